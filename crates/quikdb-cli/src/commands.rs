//! Subcommand implementations.

use quikdb_core::migration::{
    ConsistencyChecker, MigrationConfig, MigrationError, MigrationJournal, MigrationReport,
    MigrationRunner, SchemaRegistry, Violation,
};
use quikdb_core::{Store, StoreConfig};
use quikdb_schema::{ContactLookup, ContactNumber, InMemoryContacts, NoContacts};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the tool.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("store error: {0}")]
    Store(#[from] quikdb_core::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid {what} file: {source}")]
    Parse {
        what: &'static str,
        source: serde_json::Error,
    },
}

/// One address book entry of a contacts export.
#[derive(Debug, Deserialize)]
struct ContactEntry {
    lookup_key: String,
    #[serde(flatten)]
    number: ContactNumber,
}

/// Last run as shown by `status`.
#[derive(Debug, Serialize)]
pub struct JournalView {
    pub status: String,
    pub from_version: u64,
    pub to_version: u64,
    pub completed_steps: usize,
    pub error: Option<String>,
}

/// Record count of one entity.
#[derive(Debug, Serialize)]
pub struct EntityCount {
    pub entity: String,
    pub records: usize,
}

/// Output of `status`.
#[derive(Debug, Serialize)]
pub struct StatusView {
    pub stamped_version: Option<u64>,
    pub current_version: u64,
    pub schema_matches: bool,
    pub last_run: Option<JournalView>,
    pub entities: Vec<EntityCount>,
}

impl StatusView {
    /// Check if the store needs a migration.
    pub fn needs_migration(&self) -> bool {
        self.stamped_version != Some(self.current_version)
    }
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Load an address book export, a JSON array of contact numbers each
/// carrying its contact's `lookup_key`.
pub fn load_contacts(path: &Path) -> Result<InMemoryContacts, CliError> {
    let entries: Vec<ContactEntry> = serde_json::from_str(&read(path)?)
        .map_err(|source| CliError::Parse {
            what: "contacts",
            source,
        })?;
    Ok(entries
        .into_iter()
        .map(|entry| (entry.lookup_key, entry.number))
        .collect())
}

/// Build the message store registry.
pub fn registry(contacts: Option<&Path>) -> Result<SchemaRegistry, CliError> {
    let lookup: Arc<dyn ContactLookup> = match contacts {
        Some(path) => Arc::new(load_contacts(path)?),
        None => Arc::new(NoContacts),
    };
    Ok(quikdb_schema::registry(lookup)?)
}

/// Open the store directory.
pub fn open(path: &Path) -> Result<Store, CliError> {
    Ok(Store::open(StoreConfig::new(path))?)
}

/// Runner configuration from an optional file and flag overrides.
pub fn migration_config(
    path: Option<&Path>,
    workers: Option<usize>,
    retry_failed: bool,
) -> Result<MigrationConfig, CliError> {
    let mut config = match path {
        Some(path) => serde_json::from_str(&read(path)?).map_err(|source| CliError::Parse {
            what: "config",
            source,
        })?,
        None => MigrationConfig::default(),
    };
    if let Some(workers) = workers {
        config.transform = config.transform.with_workers(workers);
    }
    config.retry_failed |= retry_failed;
    Ok(config)
}

pub fn status(store: &Store, registry: &SchemaRegistry) -> Result<StatusView, CliError> {
    let last_run = MigrationJournal::load(store)?.map(|journal| JournalView {
        status: journal.status.to_string(),
        from_version: journal.from_version,
        to_version: journal.to_version,
        completed_steps: journal.completed_steps(),
        error: journal.error.clone(),
    });

    let mut entities = Vec::new();
    for entity in store.stored_entities()? {
        entities.push(EntityCount {
            records: store.count(&entity)?,
            entity,
        });
    }

    Ok(StatusView {
        stamped_version: store.stamped_version()?,
        current_version: registry.current_version(),
        schema_matches: store.schema_fingerprint()? == Some(registry.fingerprint()),
        last_run,
        entities,
    })
}

pub fn check(
    store: &Store,
    registry: &SchemaRegistry,
    schema_only: bool,
) -> Result<Vec<Violation>, CliError> {
    let checker = ConsistencyChecker::new().with_record_checks(!schema_only);
    Ok(checker.violations(store, registry)?)
}

pub fn migrate(
    store: &Store,
    registry: &SchemaRegistry,
    config: MigrationConfig,
) -> Result<MigrationReport, CliError> {
    Ok(MigrationRunner::with_config(store, registry, config).run()?)
}

pub fn stamp(store: &Store, registry: &SchemaRegistry, version: u64) -> Result<(), CliError> {
    Ok(MigrationRunner::new(store, registry).stamp(version)?)
}
