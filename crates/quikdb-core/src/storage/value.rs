//! Field values and record keys.

use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;

/// Identity of a record within its entity type.
///
/// Entities with a primary-key field use `Int` or `Str`, supplied by the
/// caller and mirrored in the primary-key field. Entities without a primary
/// key are addressed by a store-generated `Row` id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Archive, Serialize, Deserialize)]
pub enum Key {
    /// Integer primary key.
    Int(i64),
    /// String primary key.
    Str(String),
    /// Generated row id for key-less entities.
    Row(u64),
}

impl Key {
    /// The value the primary-key field must hold for this key, if any.
    pub fn as_value(&self) -> Option<Value> {
        match self {
            Key::Int(i) => Some(Value::Int(*i)),
            Key::Str(s) => Some(Value::String(s.clone())),
            Key::Row(_) => None,
        }
    }

    /// Check if this is a generated row id.
    pub fn is_row(&self) -> bool {
        matches!(self, Key::Row(_))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{:?}", s),
            Key::Row(r) => write!(f, "#{}", r),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value)
    }
}

/// A single field value.
///
/// Flat representation without recursion: lists hold primitives or keys only.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
    /// Reference to a record of another entity.
    Ref(Key),
    /// List of integers.
    IntList(Vec<i64>),
    /// List of strings.
    StringList(Vec<String>),
    /// List of references.
    RefList(Vec<Key>),
}

impl Value {
    /// Check if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the value as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the referenced key.
    pub fn as_ref_key(&self) -> Option<&Key> {
        match self {
            Value::Ref(k) => Some(k),
            _ => None,
        }
    }

    /// Get the referenced keys of a reference list.
    pub fn as_ref_list(&self) -> Option<&[Key]> {
        match self {
            Value::RefList(keys) => Some(keys),
            _ => None,
        }
    }

    /// Number of elements if the value is a list.
    pub fn list_len(&self) -> Option<usize> {
        match self {
            Value::IntList(v) => Some(v.len()),
            Value::StringList(v) => Some(v.len()),
            Value::RefList(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::Ref(_) => "ref",
            Value::IntList(_) => "int[]",
            Value::StringList(_) => "string[]",
            Value::RefList(_) => "ref[]",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        value.map(Value::String).unwrap_or(Value::Null)
    }
}

impl From<Key> for Value {
    fn from(value: Key) -> Self {
        Value::Ref(value)
    }
}

impl From<Option<Key>> for Value {
    fn from(value: Option<Key>) -> Self {
        value.map(Value::Ref).unwrap_or(Value::Null)
    }
}

impl From<Vec<Key>> for Value {
    fn from(value: Vec<Key>) -> Self {
        Value::RefList(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        assert!(Key::Int(-5) < Key::Int(3));
        assert!(Key::Int(i64::MAX) < Key::Str(String::new()));
        assert!(Key::Str("a".into()) < Key::Row(0));
    }

    #[test]
    fn test_key_as_value() {
        assert_eq!(Key::Int(7).as_value(), Some(Value::Int(7)));
        assert_eq!(Key::from("lk").as_value(), Some(Value::String("lk".into())));
        assert_eq!(Key::Row(1).as_value(), None);
    }

    #[test]
    fn test_list_len() {
        let recipients = Value::RefList(vec![Key::Int(1), Key::Int(2), Key::Int(3)]);
        assert_eq!(recipients.list_len(), Some(3));
        assert_eq!(Value::Int(3).list_len(), None);
    }

    #[test]
    fn test_optional_conversions() {
        assert!(Value::from(None::<String>).is_null());
        assert_eq!(Value::from(Some(Key::Int(4))), Value::Ref(Key::Int(4)));
    }
}
