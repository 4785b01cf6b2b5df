//! Migration step descriptors.

use super::edit::StructuralEdit;
use super::preferences::PreferenceRewrite;
use super::transform::RecordTransform;
use crate::catalog::{EntityDef, FieldDef, FieldType};
use crate::storage::Record;
use std::fmt;
use std::sync::Arc;

/// A transform attached to one entity of a step.
#[derive(Clone)]
pub struct StepTransform {
    /// Entity whose records are transformed.
    pub entity: String,
    /// The transform itself.
    pub transform: Arc<dyn RecordTransform>,
}

/// One version-to-version schema and data transition.
///
/// A step applies to a store stamped exactly at `source_version` and leaves it
/// at `source_version + 1`. Within a step the work happens in this order:
/// tables are cleared, structural edits run, the transform rewrites its
/// entity, inserts land, and preferences are rewritten. All of it commits
/// together.
#[derive(Clone)]
pub struct MigrationStep {
    source_version: u64,
    description: String,
    clears: Vec<String>,
    edits: Vec<StructuralEdit>,
    transforms: Vec<StepTransform>,
    inserts: Vec<(String, Record)>,
    preferences: Option<Arc<dyn PreferenceRewrite>>,
}

impl MigrationStep {
    /// Create an empty step for a source version.
    pub fn new(source_version: u64, description: impl Into<String>) -> Self {
        Self {
            source_version,
            description: description.into(),
            clears: Vec::new(),
            edits: Vec::new(),
            transforms: Vec::new(),
            inserts: Vec::new(),
            preferences: None,
        }
    }

    /// Delete every record of an entity before the structural edits.
    pub fn clear_table(mut self, entity: impl Into<String>) -> Self {
        self.clears.push(entity.into());
        self
    }

    /// Add a field. Required fields need a default.
    pub fn add_field(mut self, entity: impl Into<String>, field: FieldDef) -> Self {
        self.edits.push(StructuralEdit::AddField {
            entity: entity.into(),
            field,
        });
        self
    }

    /// Remove a field.
    pub fn remove_field(mut self, entity: impl Into<String>, field: impl Into<String>) -> Self {
        self.edits.push(StructuralEdit::RemoveField {
            entity: entity.into(),
            field: field.into(),
        });
        self
    }

    /// Create a new entity type.
    pub fn create_table(mut self, def: EntityDef) -> Self {
        self.edits.push(StructuralEdit::CreateTable(def));
        self
    }

    /// Add an optional single reference to `referenced`.
    pub fn add_reference(
        mut self,
        entity: impl Into<String>,
        field: impl Into<String>,
        referenced: impl Into<String>,
    ) -> Self {
        self.edits.push(StructuralEdit::AddReference {
            entity: entity.into(),
            field: FieldDef::optional(field, FieldType::reference(referenced)),
        });
        self
    }

    /// Add a reference list to `referenced`, starting empty.
    pub fn add_reference_list(
        mut self,
        entity: impl Into<String>,
        field: impl Into<String>,
        referenced: impl Into<String>,
    ) -> Self {
        self.edits.push(StructuralEdit::AddReference {
            entity: entity.into(),
            field: FieldDef::list(field, FieldType::reference_list(referenced)),
        });
        self
    }

    /// Attach the step's transform.
    ///
    /// A step carries at most one; the registry rejects a second.
    pub fn transform<T>(mut self, entity: impl Into<String>, transform: T) -> Self
    where
        T: RecordTransform + 'static,
    {
        self.transforms.push(StepTransform {
            entity: entity.into(),
            transform: Arc::new(transform),
        });
        self
    }

    /// Insert a record after the transform.
    ///
    /// Records of key-less entities get a fresh row id.
    pub fn insert(mut self, entity: impl Into<String>, record: Record) -> Self {
        self.inserts.push((entity.into(), record));
        self
    }

    /// Attach a preference rewrite.
    pub fn rewrite_preferences<P>(mut self, rewrite: P) -> Self
    where
        P: PreferenceRewrite + 'static,
    {
        self.preferences = Some(Arc::new(rewrite));
        self
    }

    /// Version the store must be at for this step to apply.
    pub fn source_version(&self) -> u64 {
        self.source_version
    }

    /// Version the step produces.
    pub fn target_version(&self) -> u64 {
        self.source_version + 1
    }

    /// Human-readable summary.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Tables cleared before the edits.
    pub fn cleared_tables(&self) -> &[String] {
        &self.clears
    }

    /// Structural edits, in order.
    pub fn edits(&self) -> &[StructuralEdit] {
        &self.edits
    }

    /// The step's transform, if any.
    pub fn step_transform(&self) -> Option<&StepTransform> {
        self.transforms.first()
    }

    /// Records inserted after the transform.
    pub fn inserts(&self) -> &[(String, Record)] {
        &self.inserts
    }

    /// The step's preference rewrite, if any.
    pub fn preference_rewrite(&self) -> Option<&dyn PreferenceRewrite> {
        self.preferences.as_deref()
    }

    pub(crate) fn transform_count(&self) -> usize {
        self.transforms.len()
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("source_version", &self.source_version)
            .field("description", &self.description)
            .field("clears", &self.clears)
            .field("edits", &self.edits)
            .field(
                "transforms",
                &self.transforms.iter().map(|t| t.entity.as_str()).collect::<Vec<_>>(),
            )
            .field("inserts", &self.inserts.len())
            .field("preferences", &self.preferences.is_some())
            .finish()
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{} -> v{}: {}",
            self.source_version,
            self.target_version(),
            self.description
        )
    }
}
