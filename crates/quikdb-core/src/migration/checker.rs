//! Post-migration consistency checks.

use super::error::MigrationError;
use super::registry::SchemaRegistry;
use crate::catalog::{EntityDef, SchemaBundle};
use crate::error::Error;
use crate::storage::Store;
use serde::Serialize;
use std::fmt;

/// One mismatch between a store and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    /// The header carries the wrong version.
    VersionMismatch {
        /// Registry version.
        expected: u64,
        /// Stamped version, if any.
        found: Option<u64>,
    },
    /// The header fingerprint does not match the registry schema.
    FingerprintMismatch {
        /// Registry fingerprint (hex).
        expected: String,
        /// Stored fingerprint (hex), if any.
        found: Option<String>,
    },
    /// The store has no live schema description.
    MissingLiveSchema,
    /// An entity of the registry is absent from the live schema.
    MissingEntity(String),
    /// The live schema has an entity the registry does not.
    UnexpectedEntity(String),
    /// A registry field is absent from the live entity.
    MissingField {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
    },
    /// The live entity has a field the registry does not.
    UnexpectedField {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
    },
    /// A field exists on both sides with different definitions.
    FieldDefinitionMismatch {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
        /// Registry definition.
        expected: String,
        /// Live definition.
        found: String,
    },
    /// Same fields, different order.
    FieldOrder {
        /// Entity name.
        entity: String,
        /// Registry order.
        expected: Vec<String>,
        /// Live order.
        found: Vec<String>,
    },
    /// Records stored under an entity the registry does not know.
    OrphanedRecords {
        /// Entity name.
        entity: String,
        /// Number of records.
        count: usize,
    },
    /// A record does not match its entity definition.
    InvalidRecord {
        /// Entity name.
        entity: String,
        /// Record key.
        key: String,
        /// What is wrong.
        issue: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::VersionMismatch { expected, found } => match found {
                Some(found) => write!(f, "store is at version {}, expected {}", found, expected),
                None => write!(f, "store has no version, expected {}", expected),
            },
            Violation::FingerprintMismatch { expected, found } => write!(
                f,
                "schema fingerprint {} does not match {}",
                found.as_deref().unwrap_or("(none)"),
                expected
            ),
            Violation::MissingLiveSchema => write!(f, "store has no live schema"),
            Violation::MissingEntity(name) => write!(f, "entity {} is missing", name),
            Violation::UnexpectedEntity(name) => write!(f, "entity {} is not in the registry", name),
            Violation::MissingField { entity, field } => {
                write!(f, "field {}.{} is missing", entity, field)
            }
            Violation::UnexpectedField { entity, field } => {
                write!(f, "field {}.{} is not in the registry", entity, field)
            }
            Violation::FieldDefinitionMismatch {
                entity,
                field,
                expected,
                found,
            } => write!(
                f,
                "field {}.{} is `{}`, expected `{}`",
                entity, field, found, expected
            ),
            Violation::FieldOrder {
                entity,
                expected,
                found,
            } => write!(
                f,
                "fields of {} are ordered [{}], expected [{}]",
                entity,
                found.join(", "),
                expected.join(", ")
            ),
            Violation::OrphanedRecords { entity, count } => {
                write!(f, "{} record(s) stored under unknown entity {}", count, entity)
            }
            Violation::InvalidRecord { entity, key, issue } => {
                write!(f, "record {} {}: {}", entity, key, issue)
            }
        }
    }
}

/// Read-only validation of a migrated store against the registry.
///
/// Every violation is collected; nothing short-circuits.
#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    verify_records: bool,
}

impl Default for ConsistencyChecker {
    fn default() -> Self {
        Self {
            verify_records: true,
        }
    }
}

impl ConsistencyChecker {
    /// Create a checker that also verifies every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only compare schemas and the header; skip the record scan.
    pub fn schema_only() -> Self {
        Self {
            verify_records: false,
        }
    }

    /// Set whether records are verified.
    pub fn with_record_checks(mut self, verify_records: bool) -> Self {
        self.verify_records = verify_records;
        self
    }

    /// Check the store, failing with every violation found.
    pub fn check(&self, store: &Store, registry: &SchemaRegistry) -> Result<(), MigrationError> {
        let violations = self.violations(store, registry)?;
        if violations.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::Violations(violations))
        }
    }

    /// Collect every violation.
    pub fn violations(
        &self,
        store: &Store,
        registry: &SchemaRegistry,
    ) -> Result<Vec<Violation>, Error> {
        let mut violations = Vec::new();
        let expected = registry.current_schema();

        let stamped = store.stamped_version()?;
        if stamped != Some(registry.current_version()) {
            violations.push(Violation::VersionMismatch {
                expected: registry.current_version(),
                found: stamped,
            });
        }

        let fingerprint = store.schema_fingerprint()?;
        if fingerprint != Some(registry.fingerprint()) {
            violations.push(Violation::FingerprintMismatch {
                expected: hex::encode(registry.fingerprint()),
                found: fingerprint.map(hex::encode),
            });
        }

        match store.live_schema()? {
            Some(live) => compare_schemas(expected, &live, &mut violations),
            None => violations.push(Violation::MissingLiveSchema),
        }

        for entity in store.stored_entities()? {
            if !expected.has_entity(&entity) {
                violations.push(Violation::OrphanedRecords {
                    count: store.count(&entity)?,
                    entity,
                });
            }
        }

        if self.verify_records {
            for (name, def) in &expected.entities {
                check_records(store, name, def, &mut violations)?;
            }
        }

        Ok(violations)
    }
}

fn compare_schemas(expected: &SchemaBundle, live: &SchemaBundle, out: &mut Vec<Violation>) {
    for (name, def) in &expected.entities {
        match live.get_entity(name) {
            Some(live_def) => compare_entities(def, live_def, out),
            None => out.push(Violation::MissingEntity(name.clone())),
        }
    }
    for name in live.entities.keys() {
        if !expected.has_entity(name) {
            out.push(Violation::UnexpectedEntity(name.clone()));
        }
    }
}

fn compare_entities(expected: &EntityDef, live: &EntityDef, out: &mut Vec<Violation>) {
    let before = out.len();

    for field in &expected.fields {
        match live.get_field(&field.name) {
            None => out.push(Violation::MissingField {
                entity: expected.name.clone(),
                field: field.name.clone(),
            }),
            Some(live_field) if live_field != field => out.push(Violation::FieldDefinitionMismatch {
                entity: expected.name.clone(),
                field: field.name.clone(),
                expected: describe(field),
                found: describe(live_field),
            }),
            Some(_) => {}
        }
    }
    for field in &live.fields {
        if !expected.has_field(&field.name) {
            out.push(Violation::UnexpectedField {
                entity: expected.name.clone(),
                field: field.name.clone(),
            });
        }
    }

    if out.len() == before && expected.field_names() != live.field_names() {
        out.push(Violation::FieldOrder {
            entity: expected.name.clone(),
            expected: expected.field_names().iter().map(|s| s.to_string()).collect(),
            found: live.field_names().iter().map(|s| s.to_string()).collect(),
        });
    }
}

fn describe(field: &crate::catalog::FieldDef) -> String {
    match &field.default {
        Some(default) => format!("{} = {:?}", field, default),
        None => field.to_string(),
    }
}

fn check_records(
    store: &Store,
    entity: &str,
    def: &EntityDef,
    out: &mut Vec<Violation>,
) -> Result<(), Error> {
    for record in store.scan(entity) {
        let record = record?;
        for issue in def.record_issues(&record) {
            out.push(Violation::InvalidRecord {
                entity: entity.to_string(),
                key: record.key.to_string(),
                issue: issue.to_string(),
            });
        }
    }
    Ok(())
}
