//! Persisted field descriptors.

/// Metadata about one persisted column of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Column name in the backing store.
    pub column_name: &'static str,
    /// Whether this column is part of the primary key
    pub primary_key: bool,
    /// Whether the store assigns this column's value on persist.
    ///
    /// Only meaningful on a single-column primary key.
    pub generated: bool,
}

impl FieldInfo {
    /// Create a plain (non-key) column descriptor.
    pub const fn new(column_name: &'static str) -> Self {
        Self {
            column_name,
            primary_key: false,
            generated: false,
        }
    }

    /// Mark as (part of) the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as a generated key.
    #[must_use]
    pub const fn generated(mut self) -> Self {
        self.primary_key = true;
        self.generated = true;
        self
    }
}
