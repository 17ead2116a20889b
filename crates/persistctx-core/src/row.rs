//! Rows exchanged with the backing store.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// An ordered set of column values for one entity row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    columns: Vec<(&'static str, Value)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column setter.
    #[must_use]
    pub fn with(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column, replacing any existing value.
    pub fn set(&mut self, column: &'static str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(slot) = self.columns.iter_mut().find(|(c, _)| *c == column) {
            slot.1 = value;
        } else {
            self.columns.push((column, value));
        }
    }

    /// Get a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    /// Get a column converted to a Rust type.
    ///
    /// A missing column is reported as a mapping error.
    pub fn get_as<T: FromValue>(&self, column: &str) -> Result<T> {
        let value = self
            .get(column)
            .ok_or_else(|| Error::Mapping(format!("row has no column {column}")))?;
        T::from_value(value).map_err(|e| match e {
            Error::Mapping(msg) => Error::Mapping(format!("column {column}: {msg}")),
            other => other,
        })
    }

    /// Iterate columns in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.columns.iter().map(|(c, v)| (*c, v))
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|(c, _)| *c).collect()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Apply a set of column assignments (used for UPDATE statements).
    pub fn apply(&mut self, changes: &[(&'static str, Value)]) {
        for (column, value) in changes {
            self.set(column, value.clone());
        }
    }
}

impl FromIterator<(&'static str, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (&'static str, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.set(column, value);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_set_replaces_existing_column() {
        let mut row = Row::new().with("id", "member1").with("age", 10);
        row.set("age", 20);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("age"), Some(&Value::Int(20)));
        assert_eq!(row.column_names(), vec!["id", "age"]);
    }

    #[test]
    fn test_get_as_reports_column_name() {
        let row = Row::new().with("age", "twelve");
        let err = row.get_as::<i32>("age").unwrap_err();
        assert!(err.to_string().contains("column age"));
        assert!(row.get_as::<i32>("missing").is_err());
    }

    #[test]
    fn test_apply_changes() {
        let mut row = Row::new().with("id", "m1").with("username", "A");
        row.apply(&[("username", Value::from("B"))]);
        assert_eq!(row.get_as::<String>("username").unwrap(), "B");
    }
}
