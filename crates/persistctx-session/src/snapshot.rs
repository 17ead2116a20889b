//! The snapshot store: persisted state captured when an instance becomes managed.
//!
//! Snapshots cover the columns listed by [`EntityType::persisted_columns`] and the
//! target keys of every owning many-to-many relationship. Flush compares an
//! instance against its snapshot by value and refreshes the snapshot afterwards.

use std::collections::HashMap;

use persistctx_core::{EntityType, ErasedEntity, PrimaryKey, Row, Value};

use crate::identity_map::ObjectKey;

/// Persisted state of one managed instance at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    values: Row,
    links: Vec<(&'static str, Vec<PrimaryKey>)>,
}

impl Snapshot {
    /// Read the current persisted state of `entity`.
    pub fn capture(entity: &dyn ErasedEntity, ty: &EntityType) -> Self {
        let row = entity.to_row();
        let values = ty
            .persisted_columns()
            .into_iter()
            .map(|column| (column, row.get(column).cloned().unwrap_or(Value::Null)))
            .collect();
        let links = ty
            .owning_link_relationships()
            .map(|rel| (rel.name, entity.link_keys(rel.name)))
            .collect();
        Self { values, links }
    }

    /// Captured column values.
    pub fn values(&self) -> &Row {
        &self.values
    }

    /// Captured target keys of an owning many-to-many relationship.
    pub fn links(&self, relationship: &str) -> &[PrimaryKey] {
        self.links
            .iter()
            .find(|(name, _)| *name == relationship)
            .map_or(&[], |(_, keys)| keys.as_slice())
    }

    fn links_mut(&mut self, relationship: &'static str) -> &mut Vec<PrimaryKey> {
        let pos = match self.links.iter().position(|(name, _)| *name == relationship) {
            Some(pos) => pos,
            None => {
                self.links.push((relationship, Vec::new()));
                self.links.len() - 1
            }
        };
        &mut self.links[pos].1
    }
}

/// Changes between a snapshot and the current state of an instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// Changed columns with their new values, in column order.
    pub columns: Vec<(&'static str, Value)>,
    /// Link rows to insert: (relationship, target key).
    pub linked: Vec<(&'static str, PrimaryKey)>,
    /// Link rows to delete: (relationship, target key).
    pub unlinked: Vec<(&'static str, PrimaryKey)>,
}

impl Diff {
    /// Nothing changed; no write is needed.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.linked.is_empty() && self.unlinked.is_empty()
    }

    /// Names of the changed columns.
    pub fn changed_columns(&self) -> Vec<&'static str> {
        self.columns.iter().map(|(c, _)| *c).collect()
    }
}

/// Snapshots of every managed instance in a session.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: HashMap<ObjectKey, Snapshot>,
}

impl SnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture and keep a snapshot of `entity`.
    pub fn capture(&mut self, key: ObjectKey, entity: &dyn ErasedEntity, ty: &EntityType) -> &Snapshot {
        let snapshot = Snapshot::capture(entity, ty);
        self.snapshots.insert(key.clone(), snapshot);
        &self.snapshots[&key]
    }

    /// The snapshot kept for `key`.
    pub fn get(&self, key: &ObjectKey) -> Option<&Snapshot> {
        self.snapshots.get(key)
    }

    /// Compare `entity` with its snapshot. No snapshot means no diff.
    pub fn diff(&self, key: &ObjectKey, entity: &dyn ErasedEntity, ty: &EntityType) -> Diff {
        let Some(before) = self.snapshots.get(key) else {
            return Diff::default();
        };
        let now = Snapshot::capture(entity, ty);

        let columns = now
            .values
            .iter()
            .filter(|(column, value)| before.values.get(column) != Some(*value))
            .map(|(column, value)| (column, value.clone()))
            .collect();

        let mut diff = Diff {
            columns,
            ..Diff::default()
        };
        for (relationship, current) in &now.links {
            let previous = before.links(relationship);
            diff.linked.extend(
                current
                    .iter()
                    .filter(|k| !previous.contains(k))
                    .map(|k| (*relationship, k.clone())),
            );
            diff.unlinked.extend(
                previous
                    .iter()
                    .filter(|k| !current.contains(k))
                    .map(|k| (*relationship, k.clone())),
            );
        }
        diff
    }

    /// Record target keys known to be linked in the store already.
    pub fn add_links(&mut self, key: &ObjectKey, relationship: &'static str, targets: &[PrimaryKey]) {
        if let Some(snapshot) = self.snapshots.get_mut(key) {
            let links = snapshot.links_mut(relationship);
            for target in targets {
                if !links.contains(target) {
                    links.push(target.clone());
                }
            }
        }
    }

    /// Drop the snapshot for `key`.
    pub fn discard(&mut self, key: &ObjectKey) -> Option<Snapshot> {
        self.snapshots.remove(key)
    }

    /// Drop every snapshot.
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    /// Number of snapshots kept.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True if no snapshots are kept.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistctx_core::{
        Entity, EntityRef, LinkTableInfo, RelationshipInfo, Result, ToMany,
    };

    #[derive(Debug)]
    struct Product {
        id: String,
    }

    impl Entity for Product {
        const NAME: &'static str = "Product";
        fn entity_type() -> EntityType {
            EntityType::new(Self::NAME).id("product_id")
        }
        fn primary_key(&self) -> PrimaryKey {
            PrimaryKey::from(self.id.as_str())
        }
        fn to_row(&self) -> Row {
            Row::new().with("product_id", &self.id)
        }
        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_as("product_id")?,
            })
        }
    }

    #[derive(Debug)]
    struct Member {
        id: String,
        username: String,
        age: i32,
        products: ToMany<Product>,
    }

    impl Entity for Member {
        const NAME: &'static str = "Member";
        fn entity_type() -> EntityType {
            EntityType::new(Self::NAME)
                .id("member_id")
                .column("username")
                .column("age")
                .relationship(
                    RelationshipInfo::many_to_many("products", "Product").link_table(
                        LinkTableInfo::new("member_product", "member_id", "product_id"),
                    ),
                )
        }
        fn primary_key(&self) -> PrimaryKey {
            PrimaryKey::from(self.id.as_str())
        }
        fn to_row(&self) -> Row {
            Row::new()
                .with("member_id", &self.id)
                .with("username", &self.username)
                .with("age", self.age)
        }
        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_as("member_id")?,
                username: row.get_as("username")?,
                age: row.get_as("age")?,
                products: ToMany::unloaded(),
            })
        }
        fn link_keys(&self, relationship: &str) -> Vec<PrimaryKey> {
            match relationship {
                "products" => self.products.keys(),
                _ => Vec::new(),
            }
        }
    }

    fn member() -> EntityRef<Member> {
        EntityRef::new(Member {
            id: "member1".to_string(),
            username: "A".to_string(),
            age: 12,
            products: ToMany::new(),
        })
    }

    fn product(id: &str) -> EntityRef<Product> {
        EntityRef::new(Product { id: id.to_string() })
    }

    #[test]
    fn test_unchanged_entity_has_empty_diff() {
        let mut store = SnapshotStore::new();
        let m = member();
        let ty = Member::entity_type();
        let key = ObjectKey::of(&*m.erased());
        store.capture(key.clone(), &*m.erased(), &ty);
        assert!(store.diff(&key, &*m.erased(), &ty).is_empty());
    }

    #[test]
    fn test_diff_reports_only_changed_columns() {
        let mut store = SnapshotStore::new();
        let m = member();
        let ty = Member::entity_type();
        let key = ObjectKey::of(&*m.erased());
        store.capture(key.clone(), &*m.erased(), &ty);

        m.borrow_mut().username = "B".to_string();
        let diff = store.diff(&key, &*m.erased(), &ty);
        assert_eq!(diff.changed_columns(), vec!["username"]);
        assert_eq!(diff.columns[0].1, Value::from("B"));

        // Setting a field back to its captured value is not a change.
        m.borrow_mut().username = "A".to_string();
        assert!(store.diff(&key, &*m.erased(), &ty).is_empty());
    }

    #[test]
    fn test_link_changes_are_diffed_by_key() {
        let mut store = SnapshotStore::new();
        let m = member();
        let a = product("productA");
        let b = product("productB");
        m.borrow_mut().products.push(a.clone());
        let ty = Member::entity_type();
        let key = ObjectKey::of(&*m.erased());
        store.capture(key.clone(), &*m.erased(), &ty);
        assert_eq!(store.get(&key).unwrap().links("products").len(), 1);

        m.borrow_mut().products.remove(&a);
        m.borrow_mut().products.push(b);
        let diff = store.diff(&key, &*m.erased(), &ty);
        assert!(diff.columns.is_empty());
        assert_eq!(diff.linked, vec![("products", PrimaryKey::from("productB"))]);
        assert_eq!(diff.unlinked, vec![("products", PrimaryKey::from("productA"))]);
    }

    #[test]
    fn test_add_links_marks_stored_targets_as_known() {
        let mut store = SnapshotStore::new();
        let m = member();
        let ty = Member::entity_type();
        let key = ObjectKey::of(&*m.erased());
        store.capture(key.clone(), &*m.erased(), &ty);

        let a = product("productA");
        m.borrow_mut().products.push(a);
        store.add_links(&key, "products", &[PrimaryKey::from("productA")]);
        assert!(store.diff(&key, &*m.erased(), &ty).is_empty());
    }

    #[test]
    fn test_discard_and_missing_snapshot() {
        let mut store = SnapshotStore::new();
        let m = member();
        let ty = Member::entity_type();
        let key = ObjectKey::of(&*m.erased());
        store.capture(key.clone(), &*m.erased(), &ty);
        assert!(store.discard(&key).is_some());
        m.borrow_mut().age = 40;
        assert!(store.diff(&key, &*m.erased(), &ty).is_empty());
        assert!(store.is_empty());
    }
}
