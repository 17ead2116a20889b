//! The identity map: one managed instance per (entity type, primary key).

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use persistctx_core::{Error, ErasedEntity, PrimaryKey, Result, same_instance};
use serde::Serialize;

/// Unique key for an object in the identity map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectKey {
    /// Entity type name.
    pub entity: &'static str,
    /// Primary key of the row.
    pub key: PrimaryKey,
}

impl ObjectKey {
    /// Create an object key.
    pub fn new(entity: &'static str, key: impl Into<PrimaryKey>) -> Self {
        Self {
            entity,
            key: key.into(),
        }
    }

    /// Key of an instance as it is now.
    pub fn of(entity: &dyn ErasedEntity) -> Self {
        Self::new(entity.entity_name(), entity.primary_key())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.entity, self.key)
    }
}

/// Registered instances in the order they became managed.
#[derive(Default)]
pub struct IdentityMap {
    entries: HashMap<ObjectKey, Rc<dyn ErasedEntity>>,
    order: Vec<ObjectKey>,
}

impl IdentityMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entity` under `key`.
    ///
    /// Registering the same instance twice is a no-op; a different instance
    /// under an occupied key is an identity conflict.
    pub fn register(&mut self, key: ObjectKey, entity: Rc<dyn ErasedEntity>) -> Result<()> {
        if let Some(existing) = self.entries.get(&key) {
            if same_instance(existing, &entity) {
                return Ok(());
            }
            return Err(Error::IdentityConflict {
                entity: key.entity,
                key: key.key.to_string(),
            });
        }
        self.order.push(key.clone());
        self.entries.insert(key, entity);
        Ok(())
    }

    /// Look up the instance registered under `key`. Never touches the store.
    pub fn lookup(&self, key: &ObjectKey) -> Option<&Rc<dyn ErasedEntity>> {
        self.entries.get(key)
    }

    /// Whether this exact instance is registered under `key`.
    pub fn holds(&self, key: &ObjectKey, entity: &Rc<dyn ErasedEntity>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|existing| same_instance(existing, entity))
    }

    /// Remove the mapping for `key`.
    pub fn evict(&mut self, key: &ObjectKey) -> Option<Rc<dyn ErasedEntity>> {
        let evicted = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(evicted)
    }

    /// Remove every mapping, returning the instances in registration order.
    pub fn evict_all(&mut self) -> Vec<Rc<dyn ErasedEntity>> {
        let order = std::mem::take(&mut self.order);
        let mut entries = std::mem::take(&mut self.entries);
        order.iter().filter_map(|k| entries.remove(k)).collect()
    }

    /// Keys in registration order.
    pub fn keys(&self) -> &[ObjectKey] {
        &self.order
    }

    /// Registered instances in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, &Rc<dyn ErasedEntity>)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|e| (k, e)))
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.order).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistctx_core::{Entity, EntityRef, EntityType, Row};

    #[derive(Debug)]
    struct Member {
        id: String,
    }

    impl Entity for Member {
        const NAME: &'static str = "Member";
        fn entity_type() -> EntityType {
            EntityType::new(Self::NAME).id("member_id")
        }
        fn primary_key(&self) -> PrimaryKey {
            PrimaryKey::from(self.id.as_str())
        }
        fn to_row(&self) -> Row {
            Row::new().with("member_id", &self.id)
        }
        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_as("member_id")?,
            })
        }
    }

    fn member(id: &str) -> EntityRef<Member> {
        EntityRef::new(Member { id: id.to_string() })
    }

    #[test]
    fn test_register_lookup_evict() {
        let mut map = IdentityMap::new();
        let m1 = member("member1");
        let key = ObjectKey::of(&*m1.erased());
        assert_eq!(key.to_string(), "Member('member1')");

        map.register(key.clone(), m1.erased()).unwrap();
        let found = map.lookup(&key).unwrap();
        assert!(same_instance(found, &m1.erased()));
        assert!(map.holds(&key, &m1.erased()));

        assert!(map.evict(&key).is_some());
        assert!(map.lookup(&key).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_same_instance_registers_idempotently() {
        let mut map = IdentityMap::new();
        let m1 = member("member1");
        let key = ObjectKey::new("Member", "member1");
        map.register(key.clone(), m1.erased()).unwrap();
        map.register(key, m1.erased()).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_different_instance_same_key_conflicts() {
        let mut map = IdentityMap::new();
        let key = ObjectKey::new("Member", "member1");
        map.register(key.clone(), member("member1").erased()).unwrap();
        let err = map.register(key, member("member1").erased()).unwrap_err();
        assert!(matches!(err, Error::IdentityConflict { entity: "Member", .. }));
    }

    #[test]
    fn test_iteration_follows_registration_order() {
        let mut map = IdentityMap::new();
        for id in ["b", "a", "c"] {
            map.register(ObjectKey::new("Member", id), member(id).erased())
                .unwrap();
        }
        map.evict(&ObjectKey::new("Member", "a"));
        let keys: Vec<String> = map.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["Member('b')", "Member('c')"]);
        assert_eq!(map.evict_all().len(), 2);
        assert!(map.keys().is_empty());
    }
}
