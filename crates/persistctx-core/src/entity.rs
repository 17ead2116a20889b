//! Entities, their metadata, and the shared handle used for reference identity.
//!
//! An application type becomes persistable by implementing [`Entity`]. Instances
//! are wrapped in an [`EntityRef`], a cheap-to-clone shared handle: two handles
//! are "the same object" exactly when [`EntityRef::ptr_eq`] says so, which is how
//! the first-level cache contract is expressed.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::error::Result;
use crate::field::FieldInfo;
use crate::relationship::{RelationshipInfo, RelationshipKind};
use crate::row::Row;
use crate::value::PrimaryKey;

/// Lifecycle of an entity instance relative to a persistence context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LifecycleState {
    /// Never persisted; unknown to any session.
    New,
    /// Tracked by a session: cached, snapshotted and dirty-checked.
    Managed,
    /// Previously managed, no longer tracked.
    Detached,
    /// Scheduled for deletion at the next flush.
    Removed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::New => "NEW",
            LifecycleState::Managed => "MANAGED",
            LifecycleState::Detached => "DETACHED",
            LifecycleState::Removed => "REMOVED",
        })
    }
}

/// A persistable type.
///
/// Implementations are written by hand: the type describes its own metadata
/// and converts itself to and from a [`Row`] of persisted columns.
///
/// # Example
///
/// ```
/// use persistctx_core::{Entity, EntityType, PrimaryKey, Result, Row};
///
/// struct Product {
///     id: String,
///     name: String,
/// }
///
/// impl Entity for Product {
///     const NAME: &'static str = "Product";
///
///     fn entity_type() -> EntityType {
///         EntityType::new(Self::NAME).id("product_id").column("name")
///     }
///
///     fn primary_key(&self) -> PrimaryKey {
///         PrimaryKey::from(self.id.as_str())
///     }
///
///     fn to_row(&self) -> Row {
///         Row::new().with("product_id", &self.id).with("name", &self.name)
///     }
///
///     fn from_row(row: &Row) -> Result<Self> {
///         Ok(Self {
///             id: row.get_as("product_id")?,
///             name: row.get_as("name")?,
///         })
///     }
/// }
///
/// assert_eq!(Product::entity_type().primary_key_columns(), vec!["product_id"]);
/// ```
pub trait Entity: Sized + 'static {
    /// Registry name of the entity type (also its table name).
    const NAME: &'static str;

    /// Describe fields and relationships.
    fn entity_type() -> EntityType;

    /// Current primary key.
    fn primary_key(&self) -> PrimaryKey;

    /// Persisted column values, including owning-side join columns.
    ///
    /// Columns not declared by [`Entity::entity_type`] are ignored by the session.
    fn to_row(&self) -> Row;

    /// Rebuild an instance from a stored row. Relationship fields come back unloaded.
    fn from_row(row: &Row) -> Result<Self>;

    /// Target keys currently held by an owning many-to-many relationship.
    fn link_keys(&self, _relationship: &str) -> Vec<PrimaryKey> {
        Vec::new()
    }

    /// Receive a store-generated identifier on persist.
    fn assign_generated_key(&mut self, _id: i64) {}
}

/// Metadata for one entity type: its columns and relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    name: &'static str,
    fields: Vec<FieldInfo>,
    relationships: Vec<RelationshipInfo>,
}

impl EntityType {
    /// Start describing an entity type.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Add a field descriptor.
    #[must_use]
    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    /// Add an assigned primary-key column.
    #[must_use]
    pub fn id(self, column: &'static str) -> Self {
        self.field(FieldInfo::new(column).primary_key())
    }

    /// Add a store-generated primary-key column.
    #[must_use]
    pub fn generated_id(self, column: &'static str) -> Self {
        self.field(FieldInfo::new(column).generated())
    }

    /// Add a plain persisted column.
    #[must_use]
    pub fn column(self, column: &'static str) -> Self {
        self.field(FieldInfo::new(column))
    }

    /// Add a relationship descriptor.
    #[must_use]
    pub fn relationship(mut self, info: RelationshipInfo) -> Self {
        self.relationships.push(info);
        self
    }

    /// Entity type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared field descriptors.
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Declared relationships.
    pub fn relationships(&self) -> &[RelationshipInfo] {
        &self.relationships
    }

    /// Look up a relationship by field name.
    pub fn relationship_named(&self, name: &str) -> Option<&RelationshipInfo> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Primary-key columns in declaration order.
    pub fn primary_key_columns(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.column_name)
            .collect()
    }

    /// Whether the store assigns this type's identifier.
    pub fn has_generated_key(&self) -> bool {
        self.fields.iter().any(|f| f.generated)
    }

    /// Every column whose value is part of the persisted state: declared fields
    /// first, then owning-side join columns not already declared.
    ///
    /// Inverse-side relationships contribute nothing.
    pub fn persisted_columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = self.fields.iter().map(|f| f.column_name).collect();
        for rel in &self.relationships {
            if !rel.is_owning() {
                continue;
            }
            if let Some(join) = rel.local_key {
                if !columns.contains(&join) {
                    columns.push(join);
                }
            }
        }
        columns
    }

    /// Owning many-to-many relationships, whose link rows belong to this type.
    pub fn owning_link_relationships(&self) -> impl Iterator<Item = &RelationshipInfo> {
        self.relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::ManyToMany && r.is_owning())
    }
}

/// Instance storage behind an [`EntityRef`].
pub struct EntityCell<E> {
    state: Cell<LifecycleState>,
    value: RefCell<E>,
}

/// A shared handle to one entity instance.
///
/// Cloning the handle never clones the entity.
pub struct EntityRef<E>(Rc<EntityCell<E>>);

impl<E: Entity> EntityRef<E> {
    /// Wrap a fresh instance in state `NEW`.
    pub fn new(value: E) -> Self {
        Self::with_state(value, LifecycleState::New)
    }

    /// Wrap an instance in an explicit state.
    ///
    /// Sessions use this for instances materialized from store rows.
    pub fn with_state(value: E, state: LifecycleState) -> Self {
        Self(Rc::new(EntityCell {
            state: Cell::new(state),
            value: RefCell::new(value),
        }))
    }

    /// Immutably borrow the entity.
    pub fn borrow(&self) -> Ref<'_, E> {
        self.0.value.borrow()
    }

    /// Mutably borrow the entity.
    pub fn borrow_mut(&self) -> RefMut<'_, E> {
        self.0.value.borrow_mut()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.0.state.get()
    }

    /// Current primary key.
    pub fn key(&self) -> PrimaryKey {
        self.borrow().primary_key()
    }

    /// Reference identity.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Type-erased view used by the session's identity map.
    pub fn erased(&self) -> Rc<dyn ErasedEntity> {
        self.0.clone()
    }

    /// Recover a typed handle from an erased one; `None` if the type differs.
    pub fn from_erased(erased: Rc<dyn ErasedEntity>) -> Option<Self> {
        erased.into_any().downcast::<EntityCell<E>>().ok().map(Self)
    }
}

impl<E> Clone for EntityRef<E> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<E: fmt::Debug> fmt::Debug for EntityRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("EntityRef");
        dbg.field("state", &self.0.state.get());
        match self.0.value.try_borrow() {
            Ok(value) => dbg.field("value", &*value),
            Err(_) => dbg.field("value", &"<mutably borrowed>"),
        };
        dbg.finish()
    }
}

/// Object-safe view of a managed instance, independent of its Rust type.
pub trait ErasedEntity {
    /// Registry name of the instance's entity type.
    fn entity_name(&self) -> &'static str;
    /// Current lifecycle state.
    fn state(&self) -> LifecycleState;
    /// Move to another lifecycle state.
    fn set_state(&self, state: LifecycleState);
    /// Current primary key.
    fn primary_key(&self) -> PrimaryKey;
    /// Current persisted row.
    fn to_row(&self) -> Row;
    /// Current target keys of an owning many-to-many relationship.
    fn link_keys(&self, relationship: &str) -> Vec<PrimaryKey>;
    /// Upcast for typed recovery.
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<E: Entity> ErasedEntity for EntityCell<E> {
    fn entity_name(&self) -> &'static str {
        E::NAME
    }

    fn state(&self) -> LifecycleState {
        self.state.get()
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.set(state);
    }

    fn primary_key(&self) -> PrimaryKey {
        self.value.borrow().primary_key()
    }

    fn to_row(&self) -> Row {
        self.value.borrow().to_row()
    }

    fn link_keys(&self, relationship: &str) -> Vec<PrimaryKey> {
        self.value.borrow().link_keys(relationship)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Reference identity between two erased handles.
pub fn same_instance(a: &Rc<dyn ErasedEntity>, b: &Rc<dyn ErasedEntity>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
