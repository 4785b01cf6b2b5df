//! The persisted object store.

use super::key::{decode_record_key, encode_record_key, entity_prefix};
use super::{Key, Record, StepTransaction, StoreConfig, Value};
use crate::catalog::SchemaBundle;
use crate::error::Error;
use sled::{Db, IVec, Tree};
use std::collections::{BTreeMap, BTreeSet};

/// Tree name for record data.
const RECORDS_TREE: &str = "records";

/// Tree name for the live schema description.
const SCHEMA_TREE: &str = "schema";

/// Tree name for the store header and run journal.
const META_TREE: &str = "meta";

/// Tree name for application preferences.
const PREFS_TREE: &str = "prefs";

/// Key for the live schema in the schema tree.
pub(crate) const LIVE_SCHEMA_KEY: &[u8] = b"live";

/// Key for the stamped schema version in the meta tree.
pub(crate) const STAMPED_VERSION_KEY: &[u8] = b"stamped_version";

/// Key for the live schema fingerprint in the meta tree.
pub(crate) const FINGERPRINT_KEY: &[u8] = b"schema_fingerprint";

/// Key for the migration journal in the meta tree.
pub(crate) const JOURNAL_KEY: &[u8] = b"journal";

/// The store: every record, the live schema, the header and preferences.
///
/// Schema-changing writes go through [`StepTransaction`] so the stamped
/// version never disagrees with the data shape.
pub struct Store {
    /// The underlying sled database.
    db: Db,

    /// Tree for records (entity prefix + key -> record).
    records: Tree,

    /// Tree for the live schema description.
    schema: Tree,

    /// Tree for the header and journal.
    meta: Tree,

    /// Tree for preferences (name -> value).
    prefs: Tree,
}

impl Store {
    /// Open or create a store with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let records = db.open_tree(RECORDS_TREE)?;
        let schema = db.open_tree(SCHEMA_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        let prefs = db.open_tree(PREFS_TREE)?;

        Ok(Self {
            db,
            records,
            schema,
            meta,
            prefs,
        })
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Read the stamped schema version from the header.
    ///
    /// Returns `None` for a store that has never been stamped.
    pub fn stamped_version(&self) -> Result<Option<u64>, Error> {
        match self.meta.get(STAMPED_VERSION_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    Error::InvalidData("stamped version is not 8 bytes".to_string())
                })?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Read the fingerprint of the live schema from the header.
    pub fn schema_fingerprint(&self) -> Result<Option<[u8; 32]>, Error> {
        match self.meta.get(FINGERPRINT_KEY)? {
            Some(bytes) => {
                let raw: [u8; 32] = bytes.as_ref().try_into().map_err(|_| {
                    Error::InvalidData("schema fingerprint is not 32 bytes".to_string())
                })?;
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }

    /// Load the live schema description.
    pub fn live_schema(&self) -> Result<Option<SchemaBundle>, Error> {
        match self.schema.get(LIVE_SCHEMA_KEY)? {
            Some(bytes) => Ok(Some(SchemaBundle::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get one record.
    pub fn get(&self, entity: &str, key: &Key) -> Result<Option<Record>, Error> {
        match self.records.get(encode_record_key(entity, key))? {
            Some(bytes) => Ok(Some(Record::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan all records of an entity type in key order.
    pub fn scan(&self, entity: &str) -> impl Iterator<Item = Result<Record, Error>> + '_ {
        self.records
            .scan_prefix(entity_prefix(entity))
            .map(|result| {
                let (_, value) = result?;
                Record::from_bytes(&value)
            })
    }

    /// Collect all records of an entity type.
    pub fn records_of(&self, entity: &str) -> Result<Vec<Record>, Error> {
        self.scan(entity).collect()
    }

    /// Count the records of an entity type.
    pub fn count(&self, entity: &str) -> Result<usize, Error> {
        let mut count = 0;
        for result in self.records.scan_prefix(entity_prefix(entity)).keys() {
            result?;
            count += 1;
        }
        Ok(count)
    }

    /// Names of every entity type that has at least one stored record.
    pub fn stored_entities(&self) -> Result<BTreeSet<String>, Error> {
        let mut names = BTreeSet::new();
        for result in self.records.iter().keys() {
            let key = result?;
            let (entity, _) = decode_record_key(&key).ok_or(Error::InvalidKey)?;
            names.insert(entity);
        }
        Ok(names)
    }

    /// Check if the store holds any records.
    pub fn has_records(&self) -> bool {
        !self.records.is_empty()
    }

    /// Insert a new record outside of a migration.
    ///
    /// The record is validated against the live schema. Records of key-less
    /// entities get a fresh row id; the assigned key is returned.
    pub fn insert(&self, entity: &str, mut record: Record) -> Result<Key, Error> {
        let schema = self
            .live_schema()?
            .ok_or_else(|| Error::InvalidData("store has no schema".to_string()))?;
        let def = schema
            .get_entity(entity)
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))?;

        if def.primary_key().is_none() {
            record.key = Key::Row(self.next_row_id()?);
        }
        def.fill_defaults(&mut record);

        if let Some(issue) = def.record_issues(&record).into_iter().next() {
            return Err(Error::InvalidData(format!(
                "{} {}: {}",
                entity, record.key, issue
            )));
        }

        let key = encode_record_key(entity, &record.key);
        let value = record.to_bytes()?;
        self.records
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?
            .map_err(|_| Error::DuplicateKey {
                entity: entity.to_string(),
                key: record.key.clone(),
            })?;

        Ok(record.key)
    }

    /// Read a preference value.
    pub fn preference(&self, name: &str) -> Result<Option<Value>, Error> {
        match self.prefs.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read every preference.
    pub fn preferences(&self) -> Result<BTreeMap<String, Value>, Error> {
        let mut out = BTreeMap::new();
        for result in self.prefs.iter() {
            let (key, value) = result?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|_| Error::InvalidData("preference name is not UTF-8".to_string()))?;
            out.insert(name, decode_value(&value)?);
        }
        Ok(out)
    }

    /// Write a preference value outside of a migration.
    pub fn set_preference(&self, name: &str, value: &Value) -> Result<(), Error> {
        self.prefs.insert(name.as_bytes(), encode_value(value)?)?;
        Ok(())
    }

    /// Allocate a row id for a key-less record.
    pub fn next_row_id(&self) -> Result<u64, Error> {
        Ok(self.db.generate_id()?)
    }

    /// Begin a step transaction.
    pub fn transaction(&self) -> StepTransaction<'_> {
        StepTransaction::new(self)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn journal_bytes(&self) -> Result<Option<IVec>, Error> {
        Ok(self.meta.get(JOURNAL_KEY)?)
    }

    pub(crate) fn write_journal(&self, bytes: &[u8]) -> Result<(), Error> {
        self.meta.insert(JOURNAL_KEY, bytes)?;
        Ok(())
    }

    pub(crate) fn records_tree(&self) -> &Tree {
        &self.records
    }

    pub(crate) fn schema_tree(&self) -> &Tree {
        &self.schema
    }

    pub(crate) fn meta_tree(&self) -> &Tree {
        &self.meta
    }

    pub(crate) fn prefs_tree(&self) -> &Tree {
        &self.prefs
    }
}

/// Serialize a preference value.
pub(crate) fn encode_value(value: &Value) -> Result<Vec<u8>, Error> {
    rkyv::to_bytes::<rkyv::rancor::Error>(value)
        .map(|v| v.to_vec())
        .map_err(|e| Error::Serialization(e.to_string()))
}

fn decode_value(bytes: &[u8]) -> Result<Value, Error> {
    rkyv::from_bytes::<Value, rkyv::rancor::Error>(bytes)
        .map_err(|e| Error::Deserialization(e.to_string()))
}
