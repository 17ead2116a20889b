//! Error taxonomy.
//!
//! Lifecycle and identity violations are detected locally and surfaced as
//! errors immediately. Backing-store failures travel through unchanged as
//! [`Error::Store`].

use thiserror::Error;

use crate::entity::LifecycleState;

/// Errors raised by the persistence context.
#[derive(Error, Debug)]
pub enum Error {
    /// A different instance is already registered under the same identity.
    #[error("identity conflict: another {entity} instance is already managed under key {key}")]
    IdentityConflict {
        /// Entity type name.
        entity: &'static str,
        /// Rendered primary key.
        key: String,
    },

    /// An operation was invoked on an entity in the wrong lifecycle state.
    #[error("cannot {operation} an entity in state {state}")]
    IllegalState {
        /// The rejected operation (`persist`, `remove`, `detach`, ...).
        operation: &'static str,
        /// The entity's state at the time of the call.
        state: LifecycleState,
    },

    /// The instance is not tracked by the session the call was made on.
    #[error("cannot {operation} an instance this session does not manage")]
    NotManaged {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The session was closed before this call.
    #[error("session is closed: cannot {operation}")]
    SessionClosed {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The entity type was never registered with the session factory.
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    /// The named relationship does not exist on the entity type.
    #[error("unknown relationship {relationship} on {entity}")]
    UnknownRelationship {
        /// Entity type name.
        entity: &'static str,
        /// Relationship field name.
        relationship: String,
    },

    /// A bidirectional setter met a reference that is still unloaded, so the
    /// previous counterpart is unknown.
    #[error("{entity} reference to {related} must be loaded before it is reassigned")]
    UnloadedReference {
        /// Entity type holding the reference.
        entity: &'static str,
        /// Target entity type.
        related: &'static str,
    },

    /// Entity metadata or row conversion failed.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The backing store rejected a call.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias used across the persistence context.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a backing-store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// A key or integrity constraint was violated.
    Constraint,
    /// The addressed row does not exist.
    NotFound,
    /// Transaction demarcation was used incorrectly.
    Transaction,
    /// The store is unreachable.
    Connection,
    /// Anything else.
    Other,
}

/// An opaque failure reported by the backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("store error ({kind:?}): {message}")]
pub struct StoreError {
    /// Failure classification.
    pub kind: StoreErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl StoreError {
    /// Create a store error.
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A constraint violation.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Constraint, message)
    }

    /// A missing row.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    /// Misused transaction demarcation.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transaction, message)
    }
}

impl Error {
    /// Kind of the wrapped store error, if this is one.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Error::Store(e) => Some(e.kind),
            _ => None,
        }
    }
}
