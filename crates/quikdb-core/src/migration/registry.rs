//! Schema registry assembled from the step list.

use super::error::MigrationError;
use super::step::MigrationStep;
use crate::catalog::{FieldDef, SchemaBundle};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// The ordered step list together with the schema it produces at every
/// version.
///
/// Built once at startup by replaying every step's structural edits over a
/// baseline. Building fails on any defect in the step definitions, before a
/// store is ever opened.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    steps: BTreeMap<u64, MigrationStep>,
    schemas: BTreeMap<u64, SchemaBundle>,
    current: SchemaBundle,
}

impl SchemaRegistry {
    /// Build a registry from a baseline schema and a step list.
    ///
    /// The baseline's version is the oldest version the registry knows.
    /// Steps may leave gaps; a store inside a gap fails at run time with
    /// [`MigrationError::MissingStep`].
    pub fn build(
        baseline: SchemaBundle,
        steps: impl IntoIterator<Item = MigrationStep>,
    ) -> Result<Self, MigrationError> {
        let mut ordered = BTreeMap::new();
        for step in steps {
            let version = step.source_version();
            if ordered.insert(version, step).is_some() {
                return Err(MigrationError::DuplicateVersion(version));
            }
        }

        let mut schemas = BTreeMap::new();
        let mut schema = baseline;
        schemas.insert(schema.version, schema.clone());

        for (version, step) in &ordered {
            let version = *version;
            if version < schema.version {
                return Err(MigrationError::inconsistency(
                    version,
                    step.description(),
                    format!("step predates the baseline at version {}", schema.version),
                ));
            }
            if version > schema.version {
                // Gap: versions in between have no step. Reachable only by
                // stores stamped at or after this step.
                schema.version = version;
                schemas.insert(version, schema.clone());
            }

            Self::replay(&mut schema, step)?;
            schema.version = step.target_version();
            schemas.insert(schema.version, schema.clone());
        }

        debug!(
            steps = ordered.len(),
            current_version = schema.version,
            entities = schema.entities.len(),
            "schema registry built"
        );

        Ok(Self {
            steps: ordered,
            schemas,
            current: schema,
        })
    }

    fn replay(schema: &mut SchemaBundle, step: &MigrationStep) -> Result<(), MigrationError> {
        let version = step.source_version();

        let mut cleared = BTreeSet::new();
        for entity in step.cleared_tables() {
            if !schema.has_entity(entity) {
                return Err(MigrationError::inconsistency(
                    version,
                    entity.as_str(),
                    "cleared table does not exist",
                ));
            }
            cleared.insert(entity.clone());
        }

        for edit in step.edits() {
            edit.apply_to(schema, &cleared, version)?;
        }

        if step.transform_count() > 1 {
            return Err(MigrationError::inconsistency(
                version,
                step.description(),
                "step declares more than one transform",
            ));
        }
        if let Some(transform) = step.step_transform() {
            if !schema.has_entity(&transform.entity) {
                return Err(MigrationError::inconsistency(
                    version,
                    transform.entity.as_str(),
                    "transform targets an unknown entity",
                ));
            }
        }

        for (entity, record) in step.inserts() {
            let def = schema.get_entity(entity).ok_or_else(|| {
                MigrationError::inconsistency(version, entity.as_str(), "insert into unknown entity")
            })?;
            for name in record.fields.keys() {
                if !def.has_field(name) {
                    return Err(MigrationError::inconsistency(
                        version,
                        format!("{}.{}", entity, name),
                        "inserted record sets an undefined field",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Version every store is migrated to.
    pub fn current_version(&self) -> u64 {
        self.current.version
    }

    /// Oldest version the registry describes.
    pub fn baseline_version(&self) -> u64 {
        self.schemas.keys().next().copied().unwrap_or(self.current.version)
    }

    /// Ordered field definitions of an entity at the current version.
    pub fn definition_for(&self, entity: &str) -> Option<&[FieldDef]> {
        self.current.fields_of(entity)
    }

    /// The schema at the current version.
    pub fn current_schema(&self) -> &SchemaBundle {
        &self.current
    }

    /// The schema at any version the registry passes through.
    pub fn schema_at(&self, version: u64) -> Option<&SchemaBundle> {
        self.schemas.get(&version)
    }

    /// The step whose source version is `version`.
    pub fn step_for(&self, version: u64) -> Option<&MigrationStep> {
        self.steps.get(&version)
    }

    /// All steps in version order.
    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps.values()
    }

    /// Number of registered steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Structural fingerprint of the current schema.
    pub fn fingerprint(&self) -> [u8; 32] {
        self.current.fingerprint()
    }
}
