//! Core types and traits for persistctx.
//!
//! `persistctx-core` is the **foundation layer** of the workspace. It defines the
//! contracts the session and the stores build on.
//!
//! # Role In The Architecture
//!
//! - **Entity contract**: [`Entity`] is implemented by application types; its
//!   [`EntityType`] metadata lists persisted columns and relationships.
//! - **Identity**: [`EntityRef`] is the shared handle whose pointer identity backs
//!   the first-level cache, and [`PrimaryKey`] is the structural key it is cached under.
//! - **Store contract**: [`BackingStore`] and [`StoreConnector`] are implemented by
//!   storage backends and exchange [`Row`]s of [`Value`]s.
//! - **Registry**: [`EntityRegistry`] validates metadata once, before any session opens.
//!
//! # Who Uses This Crate
//!
//! - `persistctx-session` drives the identity map, snapshots and write-behind queue
//!   over these types.
//! - `persistctx-memory` implements [`BackingStore`].
//!
//! Most applications should use the `persistctx` facade.

pub mod entity;
pub mod error;
pub mod field;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod store;
pub mod value;

pub use entity::{Entity, EntityCell, EntityRef, EntityType, ErasedEntity, LifecycleState, same_instance};
pub use error::{Error, Result, StoreError, StoreErrorKind};
pub use field::FieldInfo;
pub use registry::{EntityRegistry, validate_identifier};
pub use relationship::{
    LinkTableInfo, RelationshipInfo, RelationshipKind, ToMany, ToOne, add_many_to_many,
    remove_many_to_many, set_many_to_one, set_one_to_one,
};
pub use row::Row;
pub use store::{BackingStore, Predicate, StoreConnector};
pub use value::{FromValue, PrimaryKey, Value};
