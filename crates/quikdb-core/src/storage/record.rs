//! Record type for stored values.

use super::value::{Key, Value};
use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::BTreeMap;

/// One instance of an entity type.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Record {
    /// Record identity within its entity type.
    pub key: Key,

    /// Field values keyed by field name.
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record with the given key.
    pub fn new(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Create a record whose primary-key field mirrors its key.
    pub fn keyed(primary_key: &str, key: impl Into<Key>) -> Self {
        let key = key.into();
        let mut record = Self::new(key.clone());
        if let Some(value) = key.as_value() {
            record.fields.insert(primary_key.to_string(), value);
        }
        record
    }

    /// Create a record for an entity without a primary key.
    ///
    /// The row id is assigned by the store on insert.
    pub fn keyless() -> Self {
        Self::new(Key::Row(0))
    }

    /// Set a field, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Remove a field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Check if a field is present (null counts as present).
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Get an integer field.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    /// Get a boolean field.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Get a string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Get the keys of a reference-list field. Missing or null lists are empty.
    pub fn get_refs(&self, name: &str) -> &[Key] {
        self.get(name).and_then(Value::as_ref_list).unwrap_or(&[])
    }

    /// Serialize the record to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let record = Record::keyed("id", 42)
            .with("body", "hello")
            .with("read", true)
            .with("recipients", vec![Key::Int(1), Key::Int(2)]);
        let bytes = record.to_bytes().unwrap();
        let decoded = Record::from_bytes(&bytes).unwrap();

        assert_eq!(record, decoded);
    }

    #[test]
    fn test_keyed_mirrors_primary_key() {
        let record = Record::keyed("lookupKey", "abc");
        assert_eq!(record.key, Key::Str("abc".into()));
        assert_eq!(record.get_str("lookupKey"), Some("abc"));
    }

    #[test]
    fn test_keyless_has_no_fields() {
        let record = Record::keyless();
        assert!(record.key.is_row());
        assert!(record.fields.is_empty());
    }

    #[test]
    fn test_missing_ref_list_is_empty() {
        let record = Record::keyed("id", 1);
        assert!(record.get_refs("parts").is_empty());
    }
}
