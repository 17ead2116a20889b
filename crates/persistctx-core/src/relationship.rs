//! Relationship metadata and relationship fields.
//!
//! Metadata ([`RelationshipInfo`]) is declared once per entity type and tells
//! the session which side of an association owns the foreign key. The fields
//! ([`ToOne`], [`ToMany`]) live on entity structs and hold the in-memory object
//! graph. Only the owning side reaches the store: a `ToOne` with a join column
//! contributes that column to the row, an owning many-to-many `ToMany`
//! contributes link rows. Inverse-side fields are views with no persisted state.
//!
//! Bidirectional associations are kept consistent with the convenience setters
//! in this module ([`set_many_to_one`], [`add_many_to_many`],
//! [`remove_many_to_many`], [`set_one_to_one`]): each updates both sides in one
//! call. The reference being replaced must be loaded, otherwise the previous
//! counterpart cannot be updated and [`Error::UnloadedReference`] is returned.
//! `Session::set_many_to_one` and `Session::set_one_to_one` resolve it first.
//!
//! Bidirectional links are `Rc` cycles. They are released when either side
//! drops the other.

use std::fmt;

use crate::entity::{Entity, EntityRef};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::{PrimaryKey, Value};

/// The type of relationship between two entity types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: `Member` has one `Locker`.
    OneToOne,
    /// Many-to-one: many `Member`s belong to one `Team`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Team` has many `Member`s.
    OneToMany,
    /// Many-to-many: `Member`s have many `Product`s via a link table.
    ManyToMany,
}

impl RelationshipKind {
    /// Whether the field holds at most one target.
    pub const fn is_to_one(self) -> bool {
        matches!(self, RelationshipKind::OneToOne | RelationshipKind::ManyToOne)
    }
}

/// Information about a link/join table for many-to-many relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTableInfo {
    /// The link table name (e.g., `"member_product"`).
    pub table_name: &'static str,

    /// Column in link table pointing to the owning entity (e.g., `"member_id"`).
    pub local_column: &'static str,

    /// Column in link table pointing to the target entity (e.g., `"product_id"`).
    pub remote_column: &'static str,
}

impl LinkTableInfo {
    /// Create a new link-table definition.
    #[must_use]
    pub const fn new(
        table_name: &'static str,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        Self {
            table_name,
            local_column,
            remote_column,
        }
    }

    /// Primary key of one link row.
    pub fn link_key(&self, local: &PrimaryKey, remote: &PrimaryKey) -> PrimaryKey {
        PrimaryKey::composite([key_value(local), key_value(remote)])
    }

    /// The stored row linking `local` to `remote`.
    pub fn link_row(&self, local: &PrimaryKey, remote: &PrimaryKey) -> Row {
        Row::new()
            .with(self.local_column, key_value(local))
            .with(self.remote_column, key_value(remote))
    }
}

/// Column value representing a single-column key in a foreign-key column.
fn key_value(key: &PrimaryKey) -> Value {
    key.as_single().cloned().unwrap_or(Value::Null)
}

/// Metadata about a relationship between entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the relationship field.
    pub name: &'static str,

    /// The related entity type's name.
    pub related: &'static str,

    /// Kind of relationship.
    pub kind: RelationshipKind,

    /// Join column on this entity's row (owning to-one).
    /// e.g., `"team_id"` on `Member`.
    pub local_key: Option<&'static str>,

    /// Link table for owning ManyToMany relationships.
    pub link_table: Option<LinkTableInfo>,

    /// The owning relationship on the related type this one mirrors.
    /// Set on the inverse side only.
    pub mapped_by: Option<&'static str>,
}

impl RelationshipInfo {
    /// Create a new relationship with required fields.
    #[must_use]
    pub const fn new(name: &'static str, related: &'static str, kind: RelationshipKind) -> Self {
        Self {
            name,
            related,
            kind,
            local_key: None,
            link_table: None,
            mapped_by: None,
        }
    }

    /// A many-to-one relationship.
    #[must_use]
    pub const fn many_to_one(name: &'static str, related: &'static str) -> Self {
        Self::new(name, related, RelationshipKind::ManyToOne)
    }

    /// A one-to-many relationship (always the inverse side).
    #[must_use]
    pub const fn one_to_many(name: &'static str, related: &'static str) -> Self {
        Self::new(name, related, RelationshipKind::OneToMany)
    }

    /// A one-to-one relationship.
    #[must_use]
    pub const fn one_to_one(name: &'static str, related: &'static str) -> Self {
        Self::new(name, related, RelationshipKind::OneToOne)
    }

    /// A many-to-many relationship.
    #[must_use]
    pub const fn many_to_many(name: &'static str, related: &'static str) -> Self {
        Self::new(name, related, RelationshipKind::ManyToMany)
    }

    /// Set the join column (owning to-one).
    #[must_use]
    pub const fn join_column(mut self, column: &'static str) -> Self {
        self.local_key = Some(column);
        self
    }

    /// Set the link table metadata (owning ManyToMany).
    #[must_use]
    pub const fn link_table(mut self, info: LinkTableInfo) -> Self {
        self.link_table = Some(info);
        self
    }

    /// Mark as the inverse side of `field` on the related type.
    #[must_use]
    pub const fn mapped_by(mut self, field: &'static str) -> Self {
        self.mapped_by = Some(field);
        self
    }

    /// True when this side's state generates writes.
    pub const fn is_owning(&self) -> bool {
        self.mapped_by.is_none()
    }
}

impl Default for RelationshipInfo {
    fn default() -> Self {
        Self::new("", "", RelationshipKind::default())
    }
}

enum ToOneState<T> {
    Empty,
    Unresolved,
    Unloaded(PrimaryKey),
    Loaded(EntityRef<T>),
}

/// A single-valued relationship field.
///
/// Rows read from the store produce an unloaded reference carrying the
/// foreign key; the session resolves it on navigation.
pub struct ToOne<T> {
    state: ToOneState<T>,
}

impl<T: Entity> ToOne<T> {
    /// No target.
    pub fn empty() -> Self {
        Self {
            state: ToOneState::Empty,
        }
    }

    /// A target known only by key.
    pub fn unloaded(key: PrimaryKey) -> Self {
        Self {
            state: ToOneState::Unloaded(key),
        }
    }

    /// An inverse-side reference whose target has not been looked up yet.
    pub fn unresolved() -> Self {
        Self {
            state: ToOneState::Unresolved,
        }
    }

    /// A resolved target.
    pub fn loaded(target: EntityRef<T>) -> Self {
        Self {
            state: ToOneState::Loaded(target),
        }
    }

    /// Build from a join column of a stored row; NULL or absent means empty.
    pub fn from_column(row: &Row, column: &str) -> Self {
        match row.get(column) {
            None | Some(Value::Null) => Self::empty(),
            Some(v) => Self::unloaded(PrimaryKey::single(v.clone())),
        }
    }

    /// The resolved target, if loaded.
    pub fn get(&self) -> Option<&EntityRef<T>> {
        match &self.state {
            ToOneState::Loaded(target) => Some(target),
            _ => None,
        }
    }

    /// Replace the target.
    pub fn set(&mut self, target: Option<EntityRef<T>>) {
        self.state = target.map_or(ToOneState::Empty, ToOneState::Loaded);
    }

    /// Key of the target, loaded or not.
    pub fn key(&self) -> Option<PrimaryKey> {
        match &self.state {
            ToOneState::Empty | ToOneState::Unresolved => None,
            ToOneState::Unloaded(key) => Some(key.clone()),
            ToOneState::Loaded(target) => Some(target.key()),
        }
    }

    /// Join-column value for the owning row.
    pub fn fk_value(&self) -> Value {
        self.key()
            .and_then(|k| k.as_single().cloned())
            .unwrap_or(Value::Null)
    }

    /// True once the target (or its absence) is known in memory.
    pub fn is_loaded(&self) -> bool {
        !matches!(
            self.state,
            ToOneState::Unloaded(_) | ToOneState::Unresolved
        )
    }

    /// True when there is no target at all.
    pub fn is_empty(&self) -> bool {
        matches!(self.state, ToOneState::Empty)
    }
}

impl<T: Entity> Default for ToOne<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for ToOne<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            ToOneState::Empty => f.write_str("ToOne::Empty"),
            ToOneState::Unresolved => f.write_str("ToOne::Unresolved"),
            ToOneState::Unloaded(key) => write!(f, "ToOne::Unloaded{key}"),
            ToOneState::Loaded(_) => f.write_str("ToOne::Loaded"),
        }
    }
}

/// A collection-valued relationship field.
///
/// A collection built in memory starts loaded. One materialized from a stored
/// row starts unloaded; items added before it is loaded are kept and merged
/// with the stored ones when the session loads it.
pub struct ToMany<T> {
    items: Vec<EntityRef<T>>,
    loaded: bool,
}

impl<T: Entity> ToMany<T> {
    /// An empty, loaded collection.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            loaded: true,
        }
    }

    /// A collection whose stored contents have not been read yet.
    pub fn unloaded() -> Self {
        Self {
            items: Vec::new(),
            loaded: false,
        }
    }

    /// Whether the stored contents have been merged in.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Current items.
    pub fn items(&self) -> &[EntityRef<T>] {
        &self.items
    }

    /// Iterate current items.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRef<T>> {
        self.items.iter()
    }

    /// Number of current items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if no items are present.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether this exact instance is present.
    pub fn contains(&self, item: &EntityRef<T>) -> bool {
        self.items.iter().any(|i| EntityRef::ptr_eq(i, item))
    }

    /// Add an instance unless already present.
    pub fn push(&mut self, item: EntityRef<T>) {
        if !self.contains(&item) {
            self.items.push(item);
        }
    }

    /// Remove an instance; returns whether it was present.
    pub fn remove(&mut self, item: &EntityRef<T>) -> bool {
        let before = self.items.len();
        self.items.retain(|i| !EntityRef::ptr_eq(i, item));
        before != self.items.len()
    }

    /// Keys of current items, in order.
    pub fn keys(&self) -> Vec<PrimaryKey> {
        self.items.iter().map(EntityRef::key).collect()
    }

    /// Merge stored contents and mark loaded. Items already present stay first.
    pub fn mark_loaded(&mut self, stored: Vec<EntityRef<T>>) {
        for item in stored {
            self.push(item);
        }
        self.loaded = true;
    }
}

impl<T: Entity> Default for ToMany<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ToMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToMany")
            .field("len", &self.items.len())
            .field("loaded", &self.loaded)
            .finish()
    }
}

/// Point `child`'s owning many-to-one reference at `parent` and keep the
/// parent's inverse collection in step, removing `child` from the previous
/// parent's collection.
pub fn set_many_to_one<C: Entity, P: Entity>(
    child: &EntityRef<C>,
    parent: Option<&EntityRef<P>>,
    owning: fn(&mut C) -> &mut ToOne<P>,
    inverse: fn(&mut P) -> &mut ToMany<C>,
) -> Result<()> {
    let previous = loaded_target(child, owning)?;
    if let Some(previous) = previous {
        inverse(&mut previous.borrow_mut()).remove(child);
    }
    owning(&mut child.borrow_mut()).set(parent.cloned());
    if let Some(parent) = parent {
        inverse(&mut parent.borrow_mut()).push(child.clone());
    }
    Ok(())
}

/// Add `target` to `owner`'s owning many-to-many collection and `owner` to the
/// target's inverse collection.
pub fn add_many_to_many<O: Entity, T: Entity>(
    owner: &EntityRef<O>,
    target: &EntityRef<T>,
    owning: fn(&mut O) -> &mut ToMany<T>,
    inverse: fn(&mut T) -> &mut ToMany<O>,
) {
    owning(&mut owner.borrow_mut()).push(target.clone());
    inverse(&mut target.borrow_mut()).push(owner.clone());
}

/// Remove the association between `owner` and `target` on both sides.
pub fn remove_many_to_many<O: Entity, T: Entity>(
    owner: &EntityRef<O>,
    target: &EntityRef<T>,
    owning: fn(&mut O) -> &mut ToMany<T>,
    inverse: fn(&mut T) -> &mut ToMany<O>,
) {
    owning(&mut owner.borrow_mut()).remove(target);
    inverse(&mut target.borrow_mut()).remove(owner);
}

/// Point `owner`'s owning one-to-one reference at `target` and set the
/// target's inverse reference back.
///
/// The previous target loses its back-reference and the target's previous
/// owner loses its owning reference.
pub fn set_one_to_one<O: Entity, T: Entity>(
    owner: &EntityRef<O>,
    target: Option<&EntityRef<T>>,
    owning: fn(&mut O) -> &mut ToOne<T>,
    inverse: fn(&mut T) -> &mut ToOne<O>,
) -> Result<()> {
    let previous = loaded_target(owner, owning)?;
    let displaced = match target {
        Some(target) => loaded_target(target, inverse)?,
        None => None,
    };
    if let Some(previous) = previous {
        inverse(&mut previous.borrow_mut()).set(None);
    }
    if let Some(displaced) = displaced.filter(|d| !EntityRef::ptr_eq(d, owner)) {
        owning(&mut displaced.borrow_mut()).set(None);
    }
    owning(&mut owner.borrow_mut()).set(target.cloned());
    if let Some(target) = target {
        inverse(&mut target.borrow_mut()).set(Some(owner.clone()));
    }
    Ok(())
}

fn loaded_target<E: Entity, T: Entity>(
    entity: &EntityRef<E>,
    field: fn(&mut E) -> &mut ToOne<T>,
) -> Result<Option<EntityRef<T>>> {
    let mut value = entity.borrow_mut();
    let reference = field(&mut value);
    if !reference.is_loaded() {
        return Err(Error::UnloadedReference {
            entity: E::NAME,
            related: T::NAME,
        });
    }
    Ok(reference.get().cloned())
}
