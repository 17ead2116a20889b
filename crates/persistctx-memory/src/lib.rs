//! In-memory backing store for persistctx.
//!
//! [`MemoryDatabase`] holds tables, identifier sequences and a statement log
//! shared by every connection opened from it. Each [`MemoryStore`] connection
//! keeps its own undo log while a transaction is open, so rollback restores the
//! tables to their state at `begin_transaction`.
//!
//! Writes are applied to the shared tables immediately: other connections see
//! uncommitted rows. Sequences are never rolled back.
//!
//! The statement log is the observation point for tests: it records every read,
//! write, query and transaction call in order.

mod log;

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use persistctx_core::{
    BackingStore, Predicate, PrimaryKey, Row, StoreConnector, StoreError, StoreErrorKind, Value,
};

pub use log::{Statement, StatementKind, StatementLog};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<(PrimaryKey, Row)>,
}

impl Table {
    fn position(&self, key: &PrimaryKey) -> Option<usize> {
        self.rows.iter().position(|(k, _)| k == key)
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: HashMap<&'static str, Table>,
    sequences: HashMap<&'static str, i64>,
    log: StatementLog,
    next_connection: u64,
}

impl Shared {
    fn table(&mut self, name: &'static str) -> &mut Table {
        self.tables.entry(name).or_default()
    }
}

/// A shared in-memory database. Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    shared: Rc<RefCell<Shared>>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row without logging a statement.
    pub fn seed(&self, table: &'static str, key: impl Into<PrimaryKey>, row: Row) -> Result<(), StoreError> {
        let key = key.into();
        let mut shared = self.shared.borrow_mut();
        let table_data = shared.table(table);
        if table_data.position(&key).is_some() {
            return Err(StoreError::constraint(format!("duplicate key {table}{key}")));
        }
        table_data.rows.push((key, row));
        Ok(())
    }

    /// Current rows of a table in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.shared
            .borrow()
            .tables
            .get(table)
            .map(|t| t.rows.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Current row stored under `key`.
    pub fn row(&self, table: &str, key: &PrimaryKey) -> Option<Row> {
        let shared = self.shared.borrow();
        let data = shared.tables.get(table)?;
        data.position(key).map(|pos| data.rows[pos].1.clone())
    }

    /// Borrow the statement log.
    pub fn log(&self) -> Ref<'_, StatementLog> {
        Ref::map(self.shared.borrow(), |s| &s.log)
    }

    /// Number of logged statements of `kind`.
    pub fn count(&self, kind: StatementKind) -> usize {
        self.log().count(kind)
    }

    /// Number of logged statements of `kind` against `table`.
    pub fn count_for(&self, kind: StatementKind, table: &str) -> usize {
        self.log().count_for(kind, table)
    }

    /// Forget all logged statements.
    pub fn clear_log(&self) {
        self.shared.borrow_mut().log.clear();
    }

    /// Tables and statement log as pretty-printed JSON.
    pub fn dump_json(&self) -> Result<String, serde_json::Error> {
        let shared = self.shared.borrow();
        let mut names: Vec<&&'static str> = shared.tables.keys().collect();
        names.sort();
        let tables: serde_json::Map<String, serde_json::Value> = names
            .into_iter()
            .map(|name| {
                let rows: Vec<&Row> = shared.tables[*name].rows.iter().map(|(_, r)| r).collect();
                Ok(((*name).to_string(), serde_json::to_value(rows)?))
            })
            .collect::<Result<_, serde_json::Error>>()?;
        serde_json::to_string_pretty(&serde_json::json!({
            "tables": tables,
            "statements": shared.log.statements(),
        }))
    }
}

impl StoreConnector for MemoryDatabase {
    type Store = MemoryStore;

    fn connect(&self) -> Result<MemoryStore, StoreError> {
        let id = {
            let mut shared = self.shared.borrow_mut();
            shared.next_connection += 1;
            shared.next_connection
        };
        tracing::debug!(connection = id, "Opened in-memory connection");
        Ok(MemoryStore {
            db: self.clone(),
            id,
            undo: None,
        })
    }
}

#[derive(Debug)]
enum Undo {
    Inserted(&'static str, PrimaryKey),
    Updated(&'static str, PrimaryKey, Row),
    Deleted(&'static str, usize, PrimaryKey, Row),
}

/// One connection to a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryStore {
    db: MemoryDatabase,
    id: u64,
    undo: Option<Vec<Undo>>,
}

impl MemoryStore {
    /// The database this connection belongs to.
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    /// Whether a transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.undo.is_some()
    }

    fn log(&self, kind: StatementKind, table: &'static str, key: Option<&PrimaryKey>, detail: String) {
        self.db.shared.borrow_mut().log.push(Statement {
            connection: self.id,
            kind,
            table,
            key: key.cloned(),
            detail,
        });
    }

    fn record(&mut self, undo: Undo) {
        if let Some(log) = self.undo.as_mut() {
            log.push(undo);
        }
    }
}

fn render_columns(columns: impl Iterator<Item = (&'static str, Value)>) -> String {
    columns
        .map(|(c, v)| format!("{c} = {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl BackingStore for MemoryStore {
    fn read_row(&mut self, entity: &'static str, key: &PrimaryKey) -> Result<Option<Row>, StoreError> {
        self.log(StatementKind::Read, entity, Some(key), String::new());
        Ok(self.db.row(entity, key))
    }

    fn execute_insert(&mut self, entity: &'static str, key: &PrimaryKey, row: &Row) -> Result<(), StoreError> {
        self.log(
            StatementKind::Insert,
            entity,
            Some(key),
            render_columns(row.iter().map(|(c, v)| (c, v.clone()))),
        );
        {
            let mut shared = self.db.shared.borrow_mut();
            let table = shared.table(entity);
            if table.position(key).is_some() {
                return Err(StoreError::constraint(format!("duplicate key {entity}{key}")));
            }
            table.rows.push((key.clone(), row.clone()));
        }
        self.record(Undo::Inserted(entity, key.clone()));
        Ok(())
    }

    fn execute_update(
        &mut self,
        entity: &'static str,
        key: &PrimaryKey,
        changes: &[(&'static str, Value)],
    ) -> Result<(), StoreError> {
        self.log(
            StatementKind::Update,
            entity,
            Some(key),
            render_columns(changes.iter().cloned()),
        );
        let previous = {
            let mut shared = self.db.shared.borrow_mut();
            let table = shared.table(entity);
            let pos = table
                .position(key)
                .ok_or_else(|| StoreError::not_found(format!("no row {entity}{key} to update")))?;
            let row = &mut table.rows[pos].1;
            let previous = row.clone();
            row.apply(changes);
            previous
        };
        self.record(Undo::Updated(entity, key.clone(), previous));
        Ok(())
    }

    fn execute_delete(&mut self, entity: &'static str, key: &PrimaryKey) -> Result<(), StoreError> {
        self.log(StatementKind::Delete, entity, Some(key), String::new());
        let (pos, row) = {
            let mut shared = self.db.shared.borrow_mut();
            let table = shared.table(entity);
            let pos = table
                .position(key)
                .ok_or_else(|| StoreError::not_found(format!("no row {entity}{key} to delete")))?;
            (pos, table.rows.remove(pos).1)
        };
        self.record(Undo::Deleted(entity, pos, key.clone(), row));
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        self.log(StatementKind::Begin, "", None, String::new());
        if self.undo.is_some() {
            return Err(StoreError::transaction("transaction already open"));
        }
        self.undo = Some(Vec::new());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        self.log(StatementKind::Commit, "", None, String::new());
        if self.undo.take().is_none() {
            return Err(StoreError::transaction("no transaction to commit"));
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), StoreError> {
        self.log(StatementKind::Rollback, "", None, String::new());
        let undo = self
            .undo
            .take()
            .ok_or_else(|| StoreError::transaction("no transaction to roll back"))?;
        let reverted = undo.len();
        let mut shared = self.db.shared.borrow_mut();
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Inserted(table, key) => {
                    let data = shared.table(table);
                    if let Some(pos) = data.position(&key) {
                        data.rows.remove(pos);
                    }
                }
                Undo::Updated(table, key, previous) => {
                    let data = shared.table(table);
                    if let Some(pos) = data.position(&key) {
                        data.rows[pos].1 = previous;
                    }
                }
                Undo::Deleted(table, pos, key, row) => {
                    let data = shared.table(table);
                    let pos = pos.min(data.rows.len());
                    data.rows.insert(pos, (key, row));
                }
            }
        }
        tracing::debug!(connection = self.id, reverted, "Rolled back in-memory transaction");
        Ok(())
    }

    fn query_by_predicate(
        &mut self,
        entity: &'static str,
        predicate: &Predicate,
    ) -> Result<Vec<Row>, StoreError> {
        self.log(StatementKind::Query, entity, None, predicate.to_string());
        let shared = self.db.shared.borrow();
        Ok(shared
            .tables
            .get(entity)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|(_, row)| predicate.matches(row))
                    .map(|(_, row)| row.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn next_id(&mut self, entity: &'static str) -> Result<i64, StoreError> {
        let id = {
            let mut shared = self.db.shared.borrow_mut();
            let next = shared.sequences.entry(entity).or_insert(0);
            *next = next
                .checked_add(1)
                .ok_or_else(|| StoreError::new(StoreErrorKind::Other, format!("sequence {entity} exhausted")))?;
            *next
        };
        self.log(StatementKind::NextId, entity, None, id.to_string());
        Ok(id)
    }
}
