//! The write-behind queue: pending data-modification operations in FIFO order.
//!
//! Operations are executed exactly in the order they were enqueued. The queue
//! does not reorder for foreign-key dependencies; persisting parents before
//! children is the caller's job.

use std::collections::VecDeque;
use std::fmt;

use persistctx_core::{BackingStore, LinkTableInfo, Predicate, PrimaryKey, Row, StoreError, Value};
use serde::Serialize;

use crate::identity_map::ObjectKey;

/// A pending store operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    /// Insert a new row.
    Insert {
        /// Object key of the inserted instance.
        key: ObjectKey,
        /// Row captured when the instance was persisted.
        row: Row,
    },
    /// Update an existing row.
    Update {
        /// Object key of the updated instance.
        key: ObjectKey,
        /// Columns to update (only dirty ones).
        changes: Vec<(&'static str, Value)>,
    },
    /// Delete a row.
    Delete {
        /// Object key of the removed instance.
        key: ObjectKey,
    },
    /// Insert a link row.
    Link {
        /// Link table metadata.
        link: LinkTableInfo,
        /// Owning-side key.
        owner: PrimaryKey,
        /// Target key.
        target: PrimaryKey,
    },
    /// Delete a link row.
    Unlink {
        /// Link table metadata.
        link: LinkTableInfo,
        /// Owning-side key.
        owner: PrimaryKey,
        /// Target key.
        target: PrimaryKey,
    },
    /// Delete every link row of an owner, including ones never loaded.
    UnlinkAll {
        /// Link table metadata.
        link: LinkTableInfo,
        /// Owning-side key.
        owner: PrimaryKey,
    },
}

/// Coarse kind of a [`PendingOp`], for counting and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpKind {
    /// Row insert.
    Insert,
    /// Row update.
    Update,
    /// Row delete.
    Delete,
    /// Link-row insert.
    Link,
    /// Link-row delete.
    Unlink,
}

impl PendingOp {
    /// Kind of this operation.
    pub fn kind(&self) -> OpKind {
        match self {
            PendingOp::Insert { .. } => OpKind::Insert,
            PendingOp::Update { .. } => OpKind::Update,
            PendingOp::Delete { .. } => OpKind::Delete,
            PendingOp::Link { .. } => OpKind::Link,
            PendingOp::Unlink { .. } | PendingOp::UnlinkAll { .. } => OpKind::Unlink,
        }
    }

    /// Table the operation writes to.
    pub fn table(&self) -> &'static str {
        match self {
            PendingOp::Insert { key, .. }
            | PendingOp::Update { key, .. }
            | PendingOp::Delete { key } => key.entity,
            PendingOp::Link { link, .. }
            | PendingOp::Unlink { link, .. }
            | PendingOp::UnlinkAll { link, .. } => link.table_name,
        }
    }

    /// Object key for row operations; `None` for link operations.
    pub fn object_key(&self) -> Option<&ObjectKey> {
        match self {
            PendingOp::Insert { key, .. }
            | PendingOp::Update { key, .. }
            | PendingOp::Delete { key } => Some(key),
            _ => None,
        }
    }

    /// Send this operation to the store. Returns the number of rows written.
    #[tracing::instrument(level = "trace", skip(store))]
    pub fn execute<S: BackingStore>(&self, store: &mut S) -> Result<usize, StoreError> {
        match self {
            PendingOp::Insert { key, row } => {
                store.execute_insert(key.entity, &key.key, row)?;
                Ok(1)
            }
            PendingOp::Update { key, changes } => {
                store.execute_update(key.entity, &key.key, changes)?;
                Ok(1)
            }
            PendingOp::Delete { key } => {
                store.execute_delete(key.entity, &key.key)?;
                Ok(1)
            }
            PendingOp::Link { link, owner, target } => {
                let row = link.link_row(owner, target);
                store.execute_insert(link.table_name, &link.link_key(owner, target), &row)?;
                Ok(1)
            }
            PendingOp::Unlink { link, owner, target } => {
                store.execute_delete(link.table_name, &link.link_key(owner, target))?;
                Ok(1)
            }
            PendingOp::UnlinkAll { link, owner } => {
                let Some(local) = owner.as_single() else {
                    return Ok(0);
                };
                let rows = store.query_by_predicate(
                    link.table_name,
                    &Predicate::Eq(link.local_column, local.clone()),
                )?;
                for row in &rows {
                    let remote = row.get(link.remote_column).cloned().unwrap_or(Value::Null);
                    let target = PrimaryKey::single(remote);
                    store.execute_delete(link.table_name, &link.link_key(owner, &target))?;
                }
                Ok(rows.len())
            }
        }
    }
}

impl fmt::Display for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingOp::Insert { key, .. } => write!(f, "INSERT {key}"),
            PendingOp::Update { key, changes } => {
                write!(f, "UPDATE {key} SET ")?;
                for (i, (column, value)) in changes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{column} = {value}")?;
                }
                Ok(())
            }
            PendingOp::Delete { key } => write!(f, "DELETE {key}"),
            PendingOp::Link { link, owner, target } => {
                write!(f, "LINK {}{owner} -> {target}", link.table_name)
            }
            PendingOp::Unlink { link, owner, target } => {
                write!(f, "UNLINK {}{owner} -> {target}", link.table_name)
            }
            PendingOp::UnlinkAll { link, owner } => {
                write!(f, "UNLINK {}{owner} -> *", link.table_name)
            }
        }
    }
}

/// Ordered pending operations of one session.
#[derive(Debug, Default)]
pub struct WriteBehindQueue {
    ops: VecDeque<PendingOp>,
}

impl WriteBehindQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation.
    pub fn enqueue(&mut self, op: PendingOp) {
        tracing::trace!(op = %op, "Enqueued");
        self.ops.push_back(op);
    }

    /// Take the oldest operation.
    pub fn pop_front(&mut self) -> Option<PendingOp> {
        self.ops.pop_front()
    }

    /// Take every operation in order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<PendingOp> {
        self.ops.drain(..).collect()
    }

    /// Drop every operation unexecuted. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.ops.len();
        self.ops.clear();
        dropped
    }

    /// Pending operations in order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingOp> {
        self.ops.iter()
    }

    /// Number of pending operations of `kind`.
    pub fn count(&self, kind: OpKind) -> usize {
        self.ops.iter().filter(|op| op.kind() == kind).count()
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of a flush operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushResult {
    /// Number of rows inserted.
    pub inserted: usize,
    /// Number of rows updated.
    pub updated: usize,
    /// Number of rows deleted.
    pub deleted: usize,
    /// Number of link rows inserted.
    pub linked: usize,
    /// Number of link rows deleted.
    pub unlinked: usize,
}

impl FlushResult {
    /// Create a new empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `rows` written by an operation of `kind`.
    pub fn record(&mut self, kind: OpKind, rows: usize) {
        match kind {
            OpKind::Insert => self.inserted += rows,
            OpKind::Update => self.updated += rows,
            OpKind::Delete => self.deleted += rows,
            OpKind::Link => self.linked += rows,
            OpKind::Unlink => self.unlinked += rows,
        }
    }

    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.linked + self.unlinked
    }
}
