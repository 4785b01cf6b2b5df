//! Migration-specific error types.

use super::checker::Violation;
use crate::storage::Key;
use thiserror::Error;

/// Migration errors.
///
/// `DuplicateVersion`, `MissingDefault`, `DuplicateTable` and
/// `SchemaInconsistency` come from assembling the step list and never touch a
/// store. Everything else is raised while running against one.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two steps share a source version.
    #[error("duplicate migration step for source version {0}")]
    DuplicateVersion(u64),

    /// A required field was added without a usable default.
    #[error("required field {entity}.{field} added at version {version} without a default")]
    MissingDefault {
        /// Step source version.
        version: u64,
        /// Entity being edited.
        entity: String,
        /// Field being added.
        field: String,
    },

    /// A step creates an entity that already exists.
    #[error("table {entity} created at version {version} already exists")]
    DuplicateTable {
        /// Step source version.
        version: u64,
        /// Entity name.
        entity: String,
    },

    /// A step edit conflicts with the schema it is applied to.
    #[error("schema inconsistency at version {version} in {location}: {reason}")]
    SchemaInconsistency {
        /// Step source version.
        version: u64,
        /// Entity or `entity.field` the edit targets.
        location: String,
        /// What is wrong.
        reason: String,
    },

    /// No step is registered for a version the store has to pass through.
    #[error("no migration step for source version {0}")]
    MissingStep(u64),

    /// A transform left a required field unset.
    #[error("transform left {entity} {key} without required field {field}")]
    IncompleteTransform {
        /// Entity being transformed.
        entity: String,
        /// Key of the offending record.
        key: Key,
        /// Field left null or missing.
        field: String,
    },

    /// A record produced by a step does not fit its entity.
    #[error("invalid record {entity} {key}: {reason}")]
    InvalidRecord {
        /// Entity name.
        entity: String,
        /// Record key.
        key: Key,
        /// Description of the problem.
        reason: String,
    },

    /// A transform or preference rewrite reported a failure.
    #[error("transform of {entity} failed: {reason}")]
    Transform {
        /// Entity being transformed.
        entity: String,
        /// Error message.
        reason: String,
    },

    /// The consistency check found mismatches.
    #[error("consistency check failed with {} violation(s)", .0.len())]
    Violations(Vec<Violation>),

    /// The store was written by a newer engine.
    #[error("store is stamped at version {stamped}, ahead of engine version {target}")]
    StoreAhead {
        /// Version found in the store header.
        stamped: u64,
        /// Version this engine migrates to.
        target: u64,
    },

    /// The store holds records but carries no version header.
    #[error("store holds records but has no schema version")]
    Uninitialized,

    /// The store must not be opened for normal use.
    #[error("store is blocked: {reason}")]
    Blocked {
        /// Why the store is refused.
        reason: String,
    },

    /// The persisted run journal cannot be trusted.
    #[error("migration journal corrupted: {message}")]
    StateCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl MigrationError {
    /// Create a schema inconsistency error.
    pub fn inconsistency(
        version: u64,
        location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        MigrationError::SchemaInconsistency {
            version,
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Create a transform failure for `entity`.
    pub fn transform(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        MigrationError::Transform {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error comes from assembling the step list.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            MigrationError::DuplicateVersion(_)
                | MigrationError::MissingDefault { .. }
                | MigrationError::DuplicateTable { .. }
                | MigrationError::SchemaInconsistency { .. }
        )
    }
}
