//! Statement log: every call a [`crate::MemoryStore`] served, in order.

use persistctx_core::PrimaryKey;
use serde::Serialize;

/// Kind of a logged store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// `read_row`
    Read,
    /// `execute_insert`
    Insert,
    /// `execute_update`
    Update,
    /// `execute_delete`
    Delete,
    /// `query_by_predicate`
    Query,
    /// `begin_transaction`
    Begin,
    /// `commit_transaction`
    Commit,
    /// `rollback_transaction`
    Rollback,
    /// `next_id`
    NextId,
}

/// One logged store call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    /// Connection that issued the call.
    pub connection: u64,
    /// What was called.
    pub kind: StatementKind,
    /// Table addressed, empty for transaction control.
    pub table: &'static str,
    /// Row key, for keyed calls.
    pub key: Option<PrimaryKey>,
    /// Rendered details (columns written, predicate).
    pub detail: String,
}

/// Ordered log of statements.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatementLog {
    statements: Vec<Statement>,
}

impl StatementLog {
    pub(crate) fn push(&mut self, statement: Statement) {
        tracing::trace!(
            connection = statement.connection,
            kind = ?statement.kind,
            table = statement.table,
            detail = %statement.detail,
            "Statement"
        );
        self.statements.push(statement);
    }

    /// All statements in order.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Number of statements of `kind`.
    pub fn count(&self, kind: StatementKind) -> usize {
        self.statements.iter().filter(|s| s.kind == kind).count()
    }

    /// Number of statements of `kind` against `table`.
    pub fn count_for(&self, kind: StatementKind, table: &str) -> usize {
        self.statements
            .iter()
            .filter(|s| s.kind == kind && s.table == table)
            .count()
    }

    /// Statements that wrote rows (insert, update, delete), in order.
    pub fn writes(&self) -> Vec<&Statement> {
        self.statements
            .iter()
            .filter(|s| {
                matches!(
                    s.kind,
                    StatementKind::Insert | StatementKind::Update | StatementKind::Delete
                )
            })
            .collect()
    }

    /// Forget every statement.
    pub fn clear(&mut self) {
        self.statements.clear();
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// True if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
