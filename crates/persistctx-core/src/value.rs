//! Column values and primary keys.
//!
//! `Value` is the unit of persisted state: rows, snapshots and primary keys are
//! all built from it. Equality is by value (floats compare by bit pattern, `Int`
//! and `BigInt` compare numerically) so a `Value` can participate in hashed
//! keys: `find::<E>(1)` reaches an entity whose generated `i64` key is 1.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A dynamically-typed column value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 64-bit float.
    Double(f64),
    /// Text.
    Text(String),
    /// Days since the Unix epoch.
    Date(i32),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    /// Check whether this is `Value::Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the text content, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any integer variant to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i64::from(*i)),
            Value::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    /// Short name of the variant, used in mapping errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(_) | Value::BigInt(_), Value::Int(_) | Value::BigInt(_)) => {
                self.as_i64() == other.as_i64()
            }
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        match self {
            Value::Null => 0u8.hash(hasher),
            Value::Bool(b) => {
                1u8.hash(hasher);
                b.hash(hasher);
            }
            // Both integer widths hash as i64 to agree with `eq`.
            Value::Int(i) => {
                3u8.hash(hasher);
                i64::from(*i).hash(hasher);
            }
            Value::BigInt(i) => {
                3u8.hash(hasher);
                i.hash(hasher);
            }
            Value::Double(f) => {
                4u8.hash(hasher);
                f.to_bits().hash(hasher);
            }
            Value::Text(s) => {
                5u8.hash(hasher);
                s.hash(hasher);
            }
            Value::Date(d) => {
                6u8.hash(hasher);
                d.hash(hasher);
            }
            Value::Timestamp(ts) => {
                7u8.hash(hasher);
                ts.hash(hasher);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::BigInt(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Date(d) => write!(f, "date({d})"),
            Value::Timestamp(ts) => write!(f, "timestamp({ts})"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a column value back into a Rust field type.
pub trait FromValue: Sized {
    /// Convert, failing with `Error::Mapping` on a type mismatch.
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T> {
    Err(Error::Mapping(format!(
        "expected {expected}, found {}",
        value.type_name()
    )))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => mismatch("bool", other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::BigInt(i) => i32::try_from(*i)
                .map_err(|_| Error::Mapping(format!("integer {i} out of range for i32"))),
            other => mismatch("int", other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value.as_i64() {
            Some(i) => Ok(i),
            None => mismatch("bigint", value),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Double(d) => Ok(*d),
            other => mismatch("double", other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => mismatch("text", other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// The identity of one row: one value per primary-key column, in declaration order.
///
/// Single-column and composite keys share this type; composite identifier
/// structs convert into it with `From`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    /// A key over a single column.
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// A key over several columns.
    pub fn composite(values: impl IntoIterator<Item = Value>) -> Self {
        Self(values.into_iter().collect())
    }

    /// The key's values in column order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Number of key columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a key with no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when any component is still NULL (an unassigned identifier).
    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty() || self.0.iter().any(Value::is_null)
    }

    /// The single value of a one-column key.
    pub fn as_single(&self) -> Option<&Value> {
        match self.0.as_slice() {
            [v] => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}

impl From<Value> for PrimaryKey {
    fn from(v: Value) -> Self {
        Self(vec![v])
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        Self::single(v)
    }
}

impl From<String> for PrimaryKey {
    fn from(v: String) -> Self {
        Self::single(v)
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        Self::single(v)
    }
}

impl From<i32> for PrimaryKey {
    fn from(v: i32) -> Self {
        Self::single(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(v: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_value_equality_is_by_value() {
        assert_eq!(Value::from("a"), Value::Text("a".to_string()));
        assert_eq!(Value::Double(1.5), Value::Double(1.5));
        assert_eq!(Value::Int(42), Value::BigInt(42));
        assert_ne!(Value::Int(42), Value::BigInt(43));
        assert_ne!(Value::BigInt(42), Value::Text("42".to_string()));
    }

    #[test]
    fn test_value_hash_consistency() {
        assert_eq!(hash_of(&Value::BigInt(42)), hash_of(&Value::BigInt(42)));
        assert_ne!(hash_of(&Value::BigInt(42)), hash_of(&Value::BigInt(43)));
        assert_eq!(hash_of(&Value::Int(42)), hash_of(&Value::BigInt(42)));
        assert_eq!(hash_of(&PrimaryKey::from(7)), hash_of(&PrimaryKey::from(7_i64)));
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(12)), Value::Int(12));
    }

    #[test]
    fn test_from_value_mismatch_is_mapping_error() {
        let err = i32::from_value(&Value::Text("x".to_string())).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
        assert_eq!(Option::<i32>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(i32::from_value(&Value::BigInt(7)).unwrap(), 7);
    }

    #[test]
    fn test_primary_key_unassigned() {
        assert!(PrimaryKey::single(Value::Null).is_unassigned());
        assert!(!PrimaryKey::from("member1").is_unassigned());
        let composite = PrimaryKey::composite([Value::from("m1"), Value::Null]);
        assert!(composite.is_unassigned());
    }

    #[test]
    fn test_composite_key_structural_equality() {
        let a = PrimaryKey::composite([Value::from("member1"), Value::from("productA")]);
        let b = PrimaryKey::composite([Value::from("member1"), Value::from("productA")]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.to_string(), "('member1', 'productA')");
    }
}
