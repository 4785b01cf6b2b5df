//! quikdb core - object store, schema catalog and migration engine.
//!
//! This crate owns the persisted message store and the engine that evolves
//! it from any historical schema version to the current one.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod error;
pub mod migration;
pub mod storage;

pub use catalog::{EntityDef, FieldDef, FieldType, RecordIssue, SchemaBundle};
pub use error::Error;
pub use migration::{
    ConsistencyChecker, CrossEntitySnapshot, MigrationConfig, MigrationError, MigrationReport,
    MigrationRunner, MigrationStep, RecordTransform, RunnerPhase, SchemaRegistry,
    TransformConfig, TransformContext, TransformOutput, Violation,
};
pub use storage::{Key, Record, StepTransaction, Store, StoreConfig, Value};
