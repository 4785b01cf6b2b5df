//! Schema bundle - versioned snapshot of the entire schema.

use super::{EntityDef, FieldDef};
use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::BTreeMap;

/// A versioned snapshot of the entire schema.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Schema version the snapshot describes.
    pub version: u64,
    /// Entity definitions keyed by name.
    pub entities: BTreeMap<String, EntityDef>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            entities: BTreeMap::new(),
        }
    }

    /// Add an entity to the schema.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    pub(crate) fn get_entity_mut(&mut self, name: &str) -> Option<&mut EntityDef> {
        self.entities.get_mut(name)
    }

    /// Check if an entity exists.
    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Field definitions of an entity, in declaration order.
    pub fn fields_of(&self, name: &str) -> Option<&[FieldDef]> {
        self.entities.get(name).map(|e| e.fields.as_slice())
    }

    /// List all entity names in sorted order.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(|s| s.as_str()).collect()
    }

    /// Structural fingerprint of the schema.
    ///
    /// Covers entity names and ordered field definitions, not the version,
    /// so two bundles describing the same shape hash identically.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for (name, entity) in &self.entities {
            hasher.update(name.as_bytes());
            hasher.update(&[0xff]);
            for field in &entity.fields {
                hasher.update(field.to_string().as_bytes());
                match &field.default {
                    Some(default) => hasher.update(format!("={:?}", default).as_bytes()),
                    None => hasher.update(b"=none"),
                };
                hasher.update(&[0xfe]);
            }
        }
        *hasher.finalize().as_bytes()
    }

    /// Hex rendering of [`fingerprint`](Self::fingerprint).
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint())
    }

    /// Serialize the schema bundle to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a schema bundle from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl Default for SchemaBundle {
    fn default() -> Self {
        Self::new(0)
    }
}
