//! Versioned schema migration engine.
//!
//! A store carries one stamped schema version. The engine walks it forward
//! to the current version through an ordered list of [`MigrationStep`]s:
//!
//! - [`SchemaRegistry`] replays every step's structural edits over a baseline
//!   and rejects defective step lists before any store is opened
//! - [`MigrationRunner`] applies the steps the store still needs, each in one
//!   atomic commit together with its new stamped version
//! - [`RecordTransform`]s backfill derived fields from a
//!   [`CrossEntitySnapshot`] taken before the step's first edit
//! - [`ConsistencyChecker`] validates the end state and reports every
//!   mismatch at once
//!
//! # Example
//!
//! ```ignore
//! use quikdb_core::migration::{MigrationRunner, SchemaRegistry};
//!
//! let registry = SchemaRegistry::build(baseline, steps)?;
//! let report = MigrationRunner::new(&store, &registry).run()?;
//! store.ensure_ready(registry.current_version())?;
//! ```

pub mod checker;
pub mod edit;
pub mod error;
pub mod journal;
pub mod preferences;
pub mod registry;
pub mod runner;
pub mod snapshot;
pub mod state;
pub mod step;
pub mod transform;
mod working_set;

pub use checker::{ConsistencyChecker, Violation};
pub use edit::StructuralEdit;
pub use error::MigrationError;
pub use journal::{MigrationJournal, RunStatus, StepProgress, StepStatus};
pub use preferences::{preference_fn, FnPreferenceRewrite, PreferenceEdits, PreferenceRewrite};
pub use registry::SchemaRegistry;
pub use runner::{MigrationConfig, MigrationReport, MigrationRunner, StepReport};
pub use snapshot::CrossEntitySnapshot;
pub use state::RunnerPhase;
pub use step::{MigrationStep, StepTransform};
pub use transform::{
    run_transform, transform_fn, FnTransform, RecordTransform, TransformConfig, TransformContext,
    TransformOutput,
};
