//! Persisted record of the last migration run.
//!
//! The journal lets the application refuse a store whose last migration
//! failed, and tells an operator how far a run got.

use super::error::MigrationError;
use crate::storage::key::current_timestamp;
use crate::storage::Store;
use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;

/// Status of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum RunStatus {
    /// Steps are being applied.
    Running,
    /// The run reached the target and passed validation.
    Complete,
    /// The run stopped on an error.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum StepStatus {
    /// Step not yet started.
    Pending,
    /// Step committed.
    Complete,
    /// Step failed; nothing it did was committed.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Complete => write!(f, "complete"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of one step.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StepProgress {
    /// Source version of the step.
    pub source_version: u64,
    /// Current status.
    pub status: StepStatus,
    /// When the step completed (microseconds since epoch).
    pub completed_at: Option<u64>,
    /// Records rewritten by the step.
    pub records_written: u64,
    /// Sentinel fallbacks taken by the transform.
    pub fallbacks: u64,
    /// Error message if the step failed.
    pub error: Option<String>,
}

impl StepProgress {
    /// Create a pending entry.
    pub fn new(source_version: u64) -> Self {
        Self {
            source_version,
            status: StepStatus::Pending,
            completed_at: None,
            records_written: 0,
            fallbacks: 0,
            error: None,
        }
    }

    /// Mark the step as committed.
    pub fn complete(&mut self, records_written: u64, fallbacks: u64) {
        self.status = StepStatus::Complete;
        self.completed_at = Some(current_timestamp());
        self.records_written = records_written;
        self.fallbacks = fallbacks;
    }

    /// Mark the step as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error = Some(error.into());
    }
}

/// The journal of the most recent run.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct MigrationJournal {
    /// Version the run started from.
    pub from_version: u64,
    /// Version the run migrates to.
    pub to_version: u64,
    /// Current status.
    pub status: RunStatus,
    /// When the run started (microseconds since epoch).
    pub started_at: u64,
    /// When the run ended (microseconds since epoch).
    pub completed_at: Option<u64>,
    /// Error message if the run failed.
    pub error: Option<String>,
    /// Progress of each step, in order.
    pub steps: Vec<StepProgress>,
}

impl MigrationJournal {
    /// Start a journal for a run.
    pub fn new(from_version: u64, to_version: u64) -> Self {
        let steps = (from_version..to_version).map(StepProgress::new).collect();
        Self {
            from_version,
            to_version,
            status: RunStatus::Running,
            started_at: current_timestamp(),
            completed_at: None,
            error: None,
            steps,
        }
    }

    /// Load the journal from a store.
    pub fn load(store: &Store) -> Result<Option<Self>, MigrationError> {
        match store.journal_bytes()? {
            Some(bytes) => Self::from_bytes(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Write the journal on its own, outside a step.
    pub fn save(&self, store: &Store) -> Result<(), MigrationError> {
        store.write_journal(&self.to_bytes()?)?;
        Ok(())
    }

    /// Progress entry of a step.
    pub fn step_mut(&mut self, source_version: u64) -> Option<&mut StepProgress> {
        self.steps
            .iter_mut()
            .find(|s| s.source_version == source_version)
    }

    /// Mark the run as complete.
    pub fn complete(&mut self) {
        self.status = RunStatus::Complete;
        self.completed_at = Some(current_timestamp());
    }

    /// Mark the run as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error = Some(error.into());
    }

    /// Number of committed steps.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Complete)
            .count()
    }

    /// Check if the run ended in failure.
    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Check if the run was interrupted mid-way and can be resumed.
    pub fn can_resume(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Serialize the journal to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Deserialize a journal from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes).map_err(|e| {
            MigrationError::StateCorrupted {
                message: e.to_string(),
            }
        })
    }
}

impl Store {
    /// Refuse the store unless it is migrated to `target` and its last run
    /// did not fail.
    ///
    /// Call this before handing the store to the rest of the application.
    pub fn ensure_ready(&self, target: u64) -> Result<(), MigrationError> {
        if let Some(journal) = MigrationJournal::load(self)? {
            if journal.is_failed() {
                return Err(MigrationError::Blocked {
                    reason: format!(
                        "last migration failed: {}",
                        journal.error.as_deref().unwrap_or("unknown error")
                    ),
                });
            }
        }

        match self.stamped_version()? {
            Some(version) if version == target => Ok(()),
            Some(version) => Err(MigrationError::Blocked {
                reason: format!("store is at version {}, expected {}", version, target),
            }),
            None => Err(MigrationError::Blocked {
                reason: "store has no schema version".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaBundle;
    use crate::storage::StoreConfig;

    #[test]
    fn test_journal_lifecycle() {
        let mut journal = MigrationJournal::new(7, 10);
        assert_eq!(journal.steps.len(), 3);
        assert!(journal.can_resume());

        journal.step_mut(7).unwrap().complete(12, 0);
        journal.step_mut(8).unwrap().fail("boom");
        journal.fail("boom");

        assert_eq!(journal.completed_steps(), 1);
        assert!(journal.is_failed());
        assert!(!journal.can_resume());
        assert!(journal.step_mut(10).is_none());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut journal = MigrationJournal::new(0, 2);
        journal.step_mut(0).unwrap().complete(3, 1);
        let decoded = MigrationJournal::from_bytes(&journal.to_bytes().unwrap()).unwrap();
        assert_eq!(journal, decoded);
    }

    #[test]
    fn test_corrupt_journal() {
        let err = MigrationJournal::from_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, MigrationError::StateCorrupted { .. }));
    }

    #[test]
    fn test_ensure_ready() {
        let store = Store::open(StoreConfig::temporary()).unwrap();
        assert!(store.ensure_ready(3).is_err());

        let mut tx = store.transaction();
        tx.set_schema(SchemaBundle::new(3));
        tx.stamp(3);
        tx.commit().unwrap();
        store.ensure_ready(3).unwrap();
        assert!(matches!(store.ensure_ready(4), Err(MigrationError::Blocked { .. })));

        let mut journal = MigrationJournal::new(3, 4);
        journal.fail("no migration step for source version 3");
        journal.save(&store).unwrap();
        let err = store.ensure_ready(3).unwrap_err();
        assert!(err.to_string().contains("last migration failed"));
    }
}
