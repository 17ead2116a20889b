//! The backing-store contract consumed by sessions.
//!
//! A store is the durable side of the persistence context. Every call is
//! synchronous and may fail with a [`StoreError`], which sessions propagate
//! unchanged. Stores never see entities, only rows addressed by entity (table)
//! name and primary key.

use std::fmt;

use crate::error::StoreError;
use crate::row::Row;
use crate::value::{PrimaryKey, Value};

/// Row filter for [`BackingStore::query_by_predicate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every row.
    All,
    /// `column = value`.
    Eq(&'static str, Value),
    /// `column IN (values)`.
    In(&'static str, Vec<Value>),
    /// Conjunction.
    And(Vec<Predicate>),
}

impl Predicate {
    /// `column = value`.
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Predicate::Eq(column, value.into())
    }

    /// `column IN (values)`.
    pub fn is_in(column: &'static str, values: impl IntoIterator<Item = Value>) -> Self {
        Predicate::In(column, values.into_iter().collect())
    }

    /// Evaluate against a row. NULL never compares equal.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(column, value) => {
                !value.is_null() && row.get(column).is_some_and(|v| v == value)
            }
            Predicate::In(column, values) => row
                .get(column)
                .is_some_and(|v| !v.is_null() && values.contains(v)),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(row)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::All => f.write_str("TRUE"),
            Predicate::Eq(column, value) => write!(f, "{column} = {value}"),
            Predicate::In(column, values) => {
                write!(f, "{column} IN (")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
            Predicate::And(parts) => {
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "({p})")?;
                }
                Ok(())
            }
        }
    }
}

/// One connection to a backing store.
///
/// Entity names double as table names; link tables are addressed by their own
/// table name and keyed by the composite (local, remote) key.
pub trait BackingStore {
    /// Read one row by primary key.
    fn read_row(&mut self, entity: &'static str, key: &PrimaryKey)
    -> Result<Option<Row>, StoreError>;

    /// Insert a row.
    fn execute_insert(
        &mut self,
        entity: &'static str,
        key: &PrimaryKey,
        row: &Row,
    ) -> Result<(), StoreError>;

    /// Assign changed columns of an existing row.
    fn execute_update(
        &mut self,
        entity: &'static str,
        key: &PrimaryKey,
        changes: &[(&'static str, Value)],
    ) -> Result<(), StoreError>;

    /// Delete a row.
    fn execute_delete(&mut self, entity: &'static str, key: &PrimaryKey)
    -> Result<(), StoreError>;

    /// Open a transaction.
    fn begin_transaction(&mut self) -> Result<(), StoreError>;

    /// Make the open transaction's writes durable.
    fn commit_transaction(&mut self) -> Result<(), StoreError>;

    /// Undo the open transaction's writes.
    fn rollback_transaction(&mut self) -> Result<(), StoreError>;

    /// Rows matching `predicate`, in insertion order.
    fn query_by_predicate(
        &mut self,
        entity: &'static str,
        predicate: &Predicate,
    ) -> Result<Vec<Row>, StoreError>;

    /// Next value of the entity's identifier sequence.
    fn next_id(&mut self, entity: &'static str) -> Result<i64, StoreError>;
}

/// A source of store connections, one per session.
pub trait StoreConnector {
    /// The connection type.
    type Store: BackingStore;

    /// Open a connection.
    fn connect(&self) -> Result<Self::Store, StoreError>;
}
