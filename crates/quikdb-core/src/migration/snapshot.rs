//! Read-only pre-step view of the store.

use crate::catalog::SchemaBundle;
use crate::error::Error;
use crate::storage::{Key, Record, Store};
use std::collections::BTreeMap;

/// Every record of every live entity as it stood before a step's first edit.
///
/// Transforms and preference rewrites read derived values from here, so they
/// never observe partially migrated data. One snapshot is shared by
/// reference across all transform workers of a step.
#[derive(Debug, Clone, Default)]
pub struct CrossEntitySnapshot {
    version: u64,
    entities: BTreeMap<String, BTreeMap<Key, Record>>,
}

impl CrossEntitySnapshot {
    /// Create an empty snapshot at a version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            entities: BTreeMap::new(),
        }
    }

    /// Capture every entity of `schema` from the store.
    pub fn capture(store: &Store, schema: &SchemaBundle) -> Result<Self, Error> {
        let mut snapshot = Self::new(schema.version);
        for name in schema.entities.keys() {
            let mut records = BTreeMap::new();
            for record in store.scan(name) {
                let record = record?;
                records.insert(record.key.clone(), record);
            }
            snapshot.entities.insert(name.clone(), records);
        }
        Ok(snapshot)
    }

    /// Add a record, builder style.
    pub fn with_record(mut self, entity: impl Into<String>, record: Record) -> Self {
        self.insert(entity, record);
        self
    }

    /// Add a record.
    pub fn insert(&mut self, entity: impl Into<String>, record: Record) {
        self.entities
            .entry(entity.into())
            .or_default()
            .insert(record.key.clone(), record);
    }

    /// Schema version the snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up one record.
    pub fn get(&self, entity: &str, key: &Key) -> Option<&Record> {
        self.entities.get(entity)?.get(key)
    }

    /// Iterate the records of an entity in key order.
    pub fn records<'a>(&'a self, entity: &str) -> impl Iterator<Item = &'a Record> + 'a {
        self.entities
            .get(entity)
            .into_iter()
            .flat_map(|records| records.values())
    }

    /// Keys of an entity's records in order.
    pub fn keys<'a>(&'a self, entity: &str) -> impl Iterator<Item = &'a Key> + 'a {
        self.entities
            .get(entity)
            .into_iter()
            .flat_map(|records| records.keys())
    }

    /// Number of records of an entity.
    pub fn count(&self, entity: &str) -> usize {
        self.entities.get(entity).map_or(0, |records| records.len())
    }

    /// Total number of records captured.
    pub fn len(&self) -> usize {
        self.entities.values().map(|records| records.len()).sum()
    }

    /// Check if the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the captured entities.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(|s| s.as_str())
    }

    /// First record of `entity`, in key order, matching a predicate.
    pub fn find<P>(&self, entity: &str, mut predicate: P) -> Option<&Record>
    where
        P: FnMut(&Record) -> bool,
    {
        self.records(entity).find(|record| predicate(record))
    }

    /// Record of `entity` maximizing `rank` among those matching `filter`.
    ///
    /// Ties go to the record with the greatest key.
    pub fn max_by_key<F, R, T>(&self, entity: &str, mut filter: F, mut rank: R) -> Option<&Record>
    where
        F: FnMut(&Record) -> bool,
        R: FnMut(&Record) -> T,
        T: Ord,
    {
        self.records(entity)
            .filter(|record| filter(record))
            .max_by_key(|record| rank(record))
    }
}
