//! Atomic step commits.
//!
//! A migration step rewrites records, the live schema, the header and
//! preferences together. [`StepTransaction`] collects those writes and applies
//! them in a single sled transaction spanning all four trees.

use super::key::encode_record_key;
use super::store::{encode_value, FINGERPRINT_KEY, JOURNAL_KEY, LIVE_SCHEMA_KEY, STAMPED_VERSION_KEY};
use super::{Key, Record, Store, Value};
use crate::catalog::SchemaBundle;
use crate::error::Error;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

/// A pending write in a step transaction.
#[derive(Debug, Clone)]
pub enum StepOp {
    /// Write a record, replacing any previous value under its key.
    Put {
        /// Entity type name.
        entity: String,
        /// Record data.
        record: Record,
    },
    /// Remove a record.
    Delete {
        /// Entity type name.
        entity: String,
        /// Record key.
        key: Key,
    },
    /// Write a preference.
    SetPreference {
        /// Preference name.
        name: String,
        /// New value.
        value: Value,
    },
    /// Remove a preference.
    DeletePreference {
        /// Preference name.
        name: String,
    },
}

/// Encoded form of the pending writes, ready for the sled transaction.
#[derive(Default)]
struct EncodedOps {
    records: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    prefs: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    schema: Option<Vec<u8>>,
    meta: Vec<(&'static [u8], Vec<u8>)>,
}

/// Collects the writes of one migration step and commits them atomically.
///
/// Either every write lands, or none do: a crash mid-commit leaves the store
/// exactly as it was before the step.
pub struct StepTransaction<'a> {
    store: &'a Store,
    ops: Vec<StepOp>,
    schema: Option<SchemaBundle>,
    version: Option<u64>,
    journal: Option<Vec<u8>>,
}

impl<'a> StepTransaction<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            ops: Vec::new(),
            schema: None,
            version: None,
            journal: None,
        }
    }

    /// Write a record.
    pub fn put(&mut self, entity: impl Into<String>, record: Record) {
        self.ops.push(StepOp::Put {
            entity: entity.into(),
            record,
        });
    }

    /// Delete a record.
    pub fn delete(&mut self, entity: impl Into<String>, key: Key) {
        self.ops.push(StepOp::Delete {
            entity: entity.into(),
            key,
        });
    }

    /// Write a preference.
    pub fn set_preference(&mut self, name: impl Into<String>, value: Value) {
        self.ops.push(StepOp::SetPreference {
            name: name.into(),
            value,
        });
    }

    /// Delete a preference.
    pub fn delete_preference(&mut self, name: impl Into<String>) {
        self.ops.push(StepOp::DeletePreference { name: name.into() });
    }

    /// Replace the live schema. The header fingerprint follows it.
    pub fn set_schema(&mut self, schema: SchemaBundle) {
        self.schema = Some(schema);
    }

    /// Stamp the header with a schema version.
    pub fn stamp(&mut self, version: u64) {
        self.version = Some(version);
    }

    /// Store the serialized run journal alongside the step.
    pub fn journal(&mut self, bytes: Vec<u8>) {
        self.journal = Some(bytes);
    }

    /// Get the pending operations.
    pub fn operations(&self) -> &[StepOp] {
        &self.ops
    }

    /// Get the number of pending operations.
    pub fn operation_count(&self) -> usize {
        self.ops.len()
    }

    /// Commit the step atomically.
    pub fn commit(self) -> Result<(), Error> {
        let encoded = self.encode()?;

        let records_tree = self.store.records_tree();
        let schema_tree = self.store.schema_tree();
        let meta_tree = self.store.meta_tree();
        let prefs_tree = self.store.prefs_tree();

        let result: Result<(), TransactionError<Error>> =
            (records_tree, schema_tree, meta_tree, prefs_tree).transaction(
                |(records_tx, schema_tx, meta_tx, prefs_tx)| {
                    for (key, value) in &encoded.records {
                        match value {
                            Some(bytes) => records_tx.insert(key.as_slice(), bytes.as_slice())?,
                            None => records_tx.remove(key.as_slice())?,
                        };
                    }
                    for (key, value) in &encoded.prefs {
                        match value {
                            Some(bytes) => prefs_tx.insert(key.as_slice(), bytes.as_slice())?,
                            None => prefs_tx.remove(key.as_slice())?,
                        };
                    }
                    if let Some(bytes) = &encoded.schema {
                        schema_tx.insert(LIVE_SCHEMA_KEY, bytes.as_slice())?;
                    }
                    for (key, bytes) in &encoded.meta {
                        meta_tx.insert(*key, bytes.as_slice())?;
                    }
                    Ok::<(), ConflictableTransactionError<Error>>(())
                },
            );

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    fn encode(&self) -> Result<EncodedOps, Error> {
        let mut encoded = EncodedOps::default();

        for op in &self.ops {
            match op {
                StepOp::Put { entity, record } => {
                    encoded
                        .records
                        .push((encode_record_key(entity, &record.key), Some(record.to_bytes()?)));
                }
                StepOp::Delete { entity, key } => {
                    encoded.records.push((encode_record_key(entity, key), None));
                }
                StepOp::SetPreference { name, value } => {
                    encoded
                        .prefs
                        .push((name.as_bytes().to_vec(), Some(encode_value(value)?)));
                }
                StepOp::DeletePreference { name } => {
                    encoded.prefs.push((name.as_bytes().to_vec(), None));
                }
            }
        }

        if let Some(schema) = &self.schema {
            encoded.schema = Some(schema.to_bytes()?);
            encoded
                .meta
                .push((FINGERPRINT_KEY, schema.fingerprint().to_vec()));
        }
        if let Some(version) = self.version {
            encoded
                .meta
                .push((STAMPED_VERSION_KEY, version.to_be_bytes().to_vec()));
        }
        if let Some(journal) = &self.journal {
            encoded.meta.push((JOURNAL_KEY, journal.clone()));
        }

        Ok(encoded)
    }
}
