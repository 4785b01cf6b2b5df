//! In-memory state of the entities a step rewrites.

use super::edit::StructuralEdit;
use super::error::MigrationError;
use super::snapshot::CrossEntitySnapshot;
use crate::catalog::{RecordIssue, SchemaBundle};
use crate::storage::{Key, Record, StepTransaction, Store};
use std::collections::{BTreeMap, BTreeSet};

/// Write counts of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WriteCounts {
    pub written: u64,
    pub deleted: u64,
}

/// The full new contents of every entity a step touches.
///
/// Tables are loaded from the snapshot on first touch, edited in memory and
/// written back through the step transaction.
pub(crate) struct WorkingSet<'s> {
    snapshot: &'s CrossEntitySnapshot,
    tables: BTreeMap<String, BTreeMap<Key, Record>>,
    cleared: BTreeSet<String>,
    emitted: BTreeSet<(String, Key)>,
    added: u64,
}

impl<'s> WorkingSet<'s> {
    pub fn new(snapshot: &'s CrossEntitySnapshot) -> Self {
        Self {
            snapshot,
            tables: BTreeMap::new(),
            cleared: BTreeSet::new(),
            emitted: BTreeSet::new(),
            added: 0,
        }
    }

    fn table(&mut self, entity: &str) -> &mut BTreeMap<Key, Record> {
        let snapshot = self.snapshot;
        self.tables.entry(entity.to_string()).or_insert_with(|| {
            snapshot
                .records(entity)
                .map(|record| (record.key.clone(), record.clone()))
                .collect()
        })
    }

    /// Empty a table. Its stored records are deleted on write.
    pub fn clear(&mut self, entity: &str) {
        self.tables.insert(entity.to_string(), BTreeMap::new());
        self.cleared.insert(entity.to_string());
    }

    /// Apply a structural edit to every record of its entity.
    pub fn apply_edit(&mut self, edit: &StructuralEdit) {
        if !edit.touches_records() {
            return;
        }
        for record in self.table(edit.entity()).values_mut() {
            edit.apply_to_record(record);
        }
    }

    /// Remove and return every record of an entity, in key order.
    pub fn take(&mut self, entity: &str) -> Vec<Record> {
        std::mem::take(self.table(entity)).into_values().collect()
    }

    /// Put back a rewritten record.
    pub fn put(&mut self, entity: &str, record: Record) {
        self.table(entity).insert(record.key.clone(), record);
    }

    /// Add a new record, assigning a row id to key-less entities and filling
    /// defaults from `schema`.
    pub fn add(
        &mut self,
        schema: &SchemaBundle,
        entity: &str,
        mut record: Record,
        store: &Store,
    ) -> Result<(), MigrationError> {
        let def = schema
            .get_entity(entity)
            .ok_or_else(|| MigrationError::InvalidRecord {
                entity: entity.to_string(),
                key: record.key.clone(),
                reason: "entity is not in the schema".to_string(),
            })?;

        if def.primary_key().is_none() {
            record.key = Key::Row(store.next_row_id()?);
        }
        def.fill_defaults(&mut record);

        let table = self.table(entity);
        if table.contains_key(&record.key) {
            return Err(MigrationError::InvalidRecord {
                entity: entity.to_string(),
                key: record.key,
                reason: "duplicate key".to_string(),
            });
        }
        table.insert(record.key.clone(), record);
        self.added += 1;
        Ok(())
    }

    /// Add a record emitted by a transform.
    ///
    /// The first record emitted under a key wins; later ones with the same
    /// key are dropped and `false` is returned. A clash with a record that
    /// was not emitted in this step is still an error.
    pub fn emit(
        &mut self,
        schema: &SchemaBundle,
        entity: &str,
        record: Record,
        store: &Store,
    ) -> Result<bool, MigrationError> {
        let keyed = schema
            .get_entity(entity)
            .is_some_and(|def| def.primary_key().is_some());
        if keyed {
            let slot = (entity.to_string(), record.key.clone());
            if self.emitted.contains(&slot) {
                return Ok(false);
            }
            self.add(schema, entity, record, store)?;
            self.emitted.insert(slot);
        } else {
            self.add(schema, entity, record, store)?;
        }
        Ok(true)
    }

    /// Number of records added with [`add`](Self::add).
    pub fn added(&self) -> u64 {
        self.added
    }

    /// Check every touched record against `schema`.
    ///
    /// Required fields left unset on `transformed` records are reported as
    /// [`MigrationError::IncompleteTransform`].
    pub fn validate(
        &self,
        schema: &SchemaBundle,
        transformed: Option<&str>,
    ) -> Result<(), MigrationError> {
        for (entity, records) in &self.tables {
            let def = schema
                .get_entity(entity)
                .ok_or_else(|| MigrationError::inconsistency(schema.version, entity.as_str(), "unknown entity"))?;

            for record in records.values() {
                let Some(issue) = def.record_issues(record).into_iter().next() else {
                    continue;
                };
                return Err(match issue {
                    RecordIssue::MissingField(field) | RecordIssue::NullRequired(field)
                        if transformed == Some(entity.as_str()) =>
                    {
                        MigrationError::IncompleteTransform {
                            entity: entity.clone(),
                            key: record.key.clone(),
                            field,
                        }
                    }
                    other => MigrationError::InvalidRecord {
                        entity: entity.clone(),
                        key: record.key.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        }
        Ok(())
    }

    /// Buffer every change into the step transaction.
    pub fn write_to(self, tx: &mut StepTransaction<'_>) -> WriteCounts {
        let mut counts = WriteCounts::default();

        for entity in &self.cleared {
            let kept = self.tables.get(entity);
            for key in self.snapshot.keys(entity) {
                if !kept.is_some_and(|table| table.contains_key(key)) {
                    tx.delete(entity.as_str(), key.clone());
                    counts.deleted += 1;
                }
            }
        }

        for (entity, records) in self.tables {
            for (_, record) in records {
                tx.put(entity.as_str(), record);
                counts.written += 1;
            }
        }

        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, FieldType};
    use crate::storage::StoreConfig;

    fn snapshot() -> CrossEntitySnapshot {
        CrossEntitySnapshot::new(8)
            .with_record("PhoneNumber", Record::new(Key::Row(1)).with("address", "a"))
            .with_record("PhoneNumber", Record::new(Key::Row(2)).with("address", "b"))
            .with_record("Conversation", Record::keyed("id", 1).with("count", 3))
    }

    fn schema() -> SchemaBundle {
        SchemaBundle::new(9)
            .with_entity(
                EntityDef::new("PhoneNumber")
                    .with_field(FieldDef::primary("id", FieldType::Int))
                    .with_field(FieldDef::new("address", FieldType::String))
                    .with_field(FieldDef::new("isDefault", FieldType::Bool).with_default(false)),
            )
            .with_entity(
                EntityDef::new("Conversation")
                    .with_field(FieldDef::primary("id", FieldType::Int))
                    .with_field(FieldDef::new("sendAsGroup", FieldType::Bool).with_default(false)),
            )
            .with_entity(
                EntityDef::new("EmojiSyncNeeded")
                    .with_field(FieldDef::new("createdAt", FieldType::Int).with_default(0)),
            )
    }

    #[test]
    fn test_edits_and_writes() {
        let snapshot = snapshot();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let mut work = WorkingSet::new(&snapshot);

        work.clear("PhoneNumber");
        work.apply_edit(&StructuralEdit::RemoveField {
            entity: "Conversation".into(),
            field: "count".into(),
        });
        work.apply_edit(&StructuralEdit::AddField {
            entity: "Conversation".into(),
            field: FieldDef::new("sendAsGroup", FieldType::Bool).with_default(false),
        });
        work.add(&schema(), "PhoneNumber", Record::keyed("id", 2).with("address", "c"), &store)
            .unwrap();
        work.add(&schema(), "EmojiSyncNeeded", Record::keyless(), &store)
            .unwrap();
        assert_eq!(work.added(), 2);
        work.validate(&schema(), None).unwrap();

        let mut tx = store.transaction();
        let counts = work.write_to(&mut tx);
        assert_eq!(counts, WriteCounts { written: 3, deleted: 2 });
    }

    #[test]
    fn test_duplicate_add() {
        let snapshot = snapshot();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let mut work = WorkingSet::new(&snapshot);
        work.clear("PhoneNumber");

        let number = Record::keyed("id", 5).with("address", "c");
        work.add(&schema(), "PhoneNumber", number.clone(), &store).unwrap();
        let err = work.add(&schema(), "PhoneNumber", number, &store).unwrap_err();
        assert!(err.to_string().contains("duplicate key"));
    }

    #[test]
    fn test_repeated_emit_keeps_first() {
        let snapshot = snapshot();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let mut work = WorkingSet::new(&snapshot);
        work.clear("PhoneNumber");

        let first = Record::keyed("id", 7).with("address", "first");
        let second = Record::keyed("id", 7).with("address", "second");
        assert!(work.emit(&schema(), "PhoneNumber", first, &store).unwrap());
        assert!(!work.emit(&schema(), "PhoneNumber", second, &store).unwrap());
        assert_eq!(work.added(), 1);

        let numbers = work.take("PhoneNumber");
        assert_eq!(numbers.len(), 1);
        assert_eq!(numbers[0].get_str("address"), Some("first"));
    }

    #[test]
    fn test_emit_clashing_with_added_record() {
        let snapshot = snapshot();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let mut work = WorkingSet::new(&snapshot);
        work.clear("PhoneNumber");

        let number = Record::keyed("id", 3).with("address", "c");
        work.add(&schema(), "PhoneNumber", number.clone(), &store).unwrap();
        assert!(work.emit(&schema(), "PhoneNumber", number, &store).is_err());
    }

    #[test]
    fn test_incomplete_transform() {
        let snapshot = snapshot();
        let mut work = WorkingSet::new(&snapshot);

        let mut records = work.take("Conversation");
        for record in &mut records {
            record.remove("count");
        }
        for record in records {
            work.put("Conversation", record);
        }

        let err = work.validate(&schema(), Some("Conversation")).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::IncompleteTransform { ref field, .. } if field == "sendAsGroup"
        ));

        let err = work.validate(&schema(), None).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidRecord { .. }));
    }
}
