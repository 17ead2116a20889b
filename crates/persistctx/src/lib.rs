//! persistctx: a transactional persistence context.
//!
//! A [`Session`] keeps an identity map (one instance per primary key), snapshots
//! for dirty checking and a write-behind queue that reaches the store only on
//! `flush` or `commit`. Sessions come from a [`SessionFactory`] the application
//! builds and owns.
//!
//! # Crates
//!
//! - `persistctx-core`: entity metadata, values, rows, errors and the
//!   [`BackingStore`] contract.
//! - `persistctx-session`: [`Session`], [`SessionFactory`] and the context
//!   internals.
//! - `persistctx-memory` (feature `memory`, on by default): an in-memory
//!   [`BackingStore`] with a statement log, used by the tests.
//!
//! # Example
//!
//! ```ignore
//! use persistctx::prelude::*;
//!
//! let db = MemoryDatabase::new();
//! let factory = SessionFactory::builder().register::<Member>().build(db.clone())?;
//! let mut session = factory.open_session()?;
//!
//! let member = EntityRef::new(Member::new("member1", "A", 12));
//! session.persist(&member)?;
//! session.commit()?;
//! assert_eq!(db.count(StatementKind::Insert), 1);
//! ```

pub use persistctx_core::{
    BackingStore, Entity, EntityCell, EntityRef, EntityRegistry, EntityType, ErasedEntity, Error,
    FieldInfo, FromValue, LifecycleState, LinkTableInfo, Predicate, PrimaryKey, RelationshipInfo,
    RelationshipKind, Result, Row, StoreConnector, StoreError, StoreErrorKind, ToMany, ToOne,
    Value, add_many_to_many, remove_many_to_many, same_instance, set_many_to_one, set_one_to_one,
};
pub use persistctx_session::{
    FlushMode, FlushResult, NavigationStats, ObjectKey, OpKind, PendingOp, Session,
    SessionConfig, SessionDebugInfo, SessionFactory, SessionFactoryBuilder, SessionState,
};

#[cfg(feature = "memory")]
pub use persistctx_memory::{MemoryDatabase, MemoryStore, Statement, StatementKind, StatementLog};

/// Entity metadata, values and the store contract.
pub use persistctx_core as core_types;
/// Session internals: identity map, snapshots, queue and navigation tracking.
pub use persistctx_session as session;
#[cfg(feature = "memory")]
pub use persistctx_memory as memory;

/// Everything an application usually needs.
pub mod prelude {
    pub use crate::{
        Entity, EntityRef, EntityType, Error, FieldInfo, FlushMode, FlushResult, LifecycleState,
        LinkTableInfo, Predicate, PrimaryKey, RelationshipInfo, Result, Row, Session,
        SessionConfig, SessionFactory, StoreErrorKind, ToMany, ToOne, Value, add_many_to_many,
        remove_many_to_many, set_many_to_one, set_one_to_one,
    };

    #[cfg(feature = "memory")]
    pub use crate::{MemoryDatabase, MemoryStore, StatementKind};
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
