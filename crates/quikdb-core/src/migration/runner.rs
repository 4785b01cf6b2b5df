//! The migration runner.
//!
//! Walks a store from its stamped version to the registry's current version,
//! one step at a time, committing each step atomically with its new stamped
//! version.

use super::checker::ConsistencyChecker;
use super::error::MigrationError;
use super::journal::MigrationJournal;
use super::preferences::PreferenceEdits;
use super::registry::SchemaRegistry;
use super::snapshot::CrossEntitySnapshot;
use super::state::RunnerPhase;
use super::step::MigrationStep;
use super::transform::{run_transform, TransformConfig, TransformContext};
use super::working_set::WorkingSet;
use crate::storage::Store;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Migration runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Transform pass configuration.
    pub transform: TransformConfig,
    /// Whether validation scans every record, not just the schema.
    pub verify_records: bool,
    /// Whether to run again over a store whose last run failed.
    pub retry_failed: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            transform: TransformConfig::default(),
            verify_records: true,
            retry_failed: false,
        }
    }
}

/// Outcome of one committed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// Version the step started from.
    pub source_version: u64,
    /// Version the step produced.
    pub target_version: u64,
    /// Step description.
    pub description: String,
    /// Records passed through the transform.
    pub records_transformed: u64,
    /// Records emitted by the transform or inserted by the step.
    pub records_added: u64,
    /// Records written, including those only structurally edited.
    pub records_written: u64,
    /// Records deleted by table clears.
    pub records_deleted: u64,
    /// Preference keys set or deleted.
    pub preferences_changed: u64,
    /// Sentinel fallbacks taken by the transform.
    pub fallbacks: u64,
    /// Wall time of the step in milliseconds.
    pub elapsed_ms: u64,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Version the store was at.
    pub from_version: u64,
    /// Version the store is at now.
    pub to_version: u64,
    /// Whether an empty store was initialised at the current version.
    pub initialized: bool,
    /// Committed steps, in order.
    pub steps: Vec<StepReport>,
}

impl MigrationReport {
    fn unchanged(version: u64) -> Self {
        Self {
            from_version: version,
            to_version: version,
            initialized: false,
            steps: Vec::new(),
        }
    }

    /// Check if the run changed nothing.
    pub fn is_noop(&self) -> bool {
        !self.initialized && self.steps.is_empty()
    }

    /// Total sentinel fallbacks across all steps.
    pub fn total_fallbacks(&self) -> u64 {
        self.steps.iter().map(|s| s.fallbacks).sum()
    }
}

/// Sequencing engine for migration steps.
///
/// A single writer: the runner must finish before anything else opens the
/// store. The current phase can be read from other threads while it runs.
pub struct MigrationRunner<'a> {
    store: &'a Store,
    registry: &'a SchemaRegistry,
    config: MigrationConfig,
    phase: RwLock<RunnerPhase>,
}

impl<'a> MigrationRunner<'a> {
    /// Create a runner with the default configuration.
    pub fn new(store: &'a Store, registry: &'a SchemaRegistry) -> Self {
        Self::with_config(store, registry, MigrationConfig::default())
    }

    /// Create a runner with a configuration.
    pub fn with_config(
        store: &'a Store,
        registry: &'a SchemaRegistry,
        config: MigrationConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            phase: RwLock::new(RunnerPhase::Idle {
                at: registry.baseline_version(),
            }),
        }
    }

    /// The current phase.
    pub fn phase(&self) -> RunnerPhase {
        *self.phase.read()
    }

    /// Version the runner migrates to.
    pub fn target_version(&self) -> u64 {
        self.registry.current_version()
    }

    fn advance(&self, next: RunnerPhase) {
        let mut phase = self.phase.write();
        let current = *phase;
        debug_assert!(
            current.can_advance_to(&next),
            "invalid phase transition {} -> {}",
            current,
            next
        );
        debug!(from = %current, to = %next, "runner phase");
        *phase = next;
    }

    /// Stamp an unversioned store at a historical version.
    ///
    /// Used to adopt data written before the store carried a header. Records
    /// already present are not checked.
    pub fn stamp(&self, version: u64) -> Result<(), MigrationError> {
        if let Some(stamped) = self.store.stamped_version()? {
            return Err(MigrationError::Blocked {
                reason: format!("store is already stamped at version {}", stamped),
            });
        }
        let schema = self
            .registry
            .schema_at(version)
            .ok_or(MigrationError::MissingStep(version))?;

        let mut tx = self.store.transaction();
        tx.set_schema(schema.clone());
        tx.stamp(version);
        tx.commit()?;

        info!(version, "store stamped");
        Ok(())
    }

    /// Migrate the store to the current version.
    #[instrument(skip(self), fields(target = self.registry.current_version()))]
    pub fn run(&self) -> Result<MigrationReport, MigrationError> {
        let target = self.registry.current_version();

        let from = match self.store.stamped_version()? {
            Some(version) => version,
            None if self.store.has_records() => {
                *self.phase.write() = RunnerPhase::Failed;
                return Err(MigrationError::Uninitialized);
            }
            None => return self.initialize(),
        };
        *self.phase.write() = RunnerPhase::Idle { at: from };

        if from > target {
            self.advance(RunnerPhase::Failed);
            return Err(MigrationError::StoreAhead {
                stamped: from,
                target,
            });
        }

        if let Some(journal) = MigrationJournal::load(self.store)? {
            if journal.is_failed() && !self.config.retry_failed {
                self.advance(RunnerPhase::Failed);
                return Err(MigrationError::Blocked {
                    reason: format!(
                        "last migration from v{} failed: {}",
                        journal.from_version,
                        journal.error.as_deref().unwrap_or("unknown error")
                    ),
                });
            }
            if journal.can_resume() {
                warn!(
                    from = journal.from_version,
                    at = from,
                    "resuming interrupted migration"
                );
            }
        }

        if from == target {
            self.advance(RunnerPhase::Done);
            debug!(version = from, "store is current");
            return Ok(MigrationReport::unchanged(from));
        }

        info!(from, target, "migrating store");
        let mut journal = MigrationJournal::new(from, target);
        journal.save(self.store)?;
        self.advance(RunnerPhase::Stepping { at: from, target });

        let mut steps = Vec::with_capacity((target - from) as usize);
        for version in from..target {
            let result = self
                .registry
                .step_for(version)
                .ok_or(MigrationError::MissingStep(version))
                .and_then(|step| self.apply_step(step, &mut journal));

            match result {
                Ok(report) => {
                    steps.push(report);
                    self.advance(RunnerPhase::Stepping {
                        at: version + 1,
                        target,
                    });
                }
                Err(e) => {
                    if let Some(progress) = journal.step_mut(version) {
                        progress.fail(e.to_string());
                    }
                    return Err(self.fail(journal, e));
                }
            }
        }

        self.advance(RunnerPhase::Validating);
        let checker = ConsistencyChecker::new().with_record_checks(self.config.verify_records);
        if let Err(e) = checker.check(self.store, self.registry) {
            return Err(self.fail(journal, e));
        }

        journal.complete();
        journal.save(self.store)?;
        self.store.flush()?;
        self.advance(RunnerPhase::Done);
        info!(from, to = target, steps = steps.len(), "migration complete");

        Ok(MigrationReport {
            from_version: from,
            to_version: target,
            initialized: false,
            steps,
        })
    }

    fn initialize(&self) -> Result<MigrationReport, MigrationError> {
        let target = self.registry.current_version();
        let mut journal = MigrationJournal::new(target, target);
        journal.complete();

        let mut tx = self.store.transaction();
        tx.set_schema(self.registry.current_schema().clone());
        tx.stamp(target);
        tx.journal(journal.to_bytes()?);
        tx.commit()?;
        self.store.flush()?;

        *self.phase.write() = RunnerPhase::Done;
        info!(version = target, "initialized empty store");

        Ok(MigrationReport {
            initialized: true,
            ..MigrationReport::unchanged(target)
        })
    }

    fn fail(&self, mut journal: MigrationJournal, e: MigrationError) -> MigrationError {
        error!(error = %e, from = journal.from_version, "migration failed");
        if let MigrationError::Violations(violations) = &e {
            for violation in violations {
                error!(%violation, "consistency violation");
            }
        }

        journal.fail(e.to_string());
        if let Err(save_err) = journal.save(self.store) {
            error!(error = %save_err, "failed to record migration failure");
        }
        self.advance(RunnerPhase::Failed);
        e
    }

    fn apply_step(
        &self,
        step: &MigrationStep,
        journal: &mut MigrationJournal,
    ) -> Result<StepReport, MigrationError> {
        let started = Instant::now();
        let version = step.source_version();
        let (live, next) = match (
            self.registry.schema_at(version),
            self.registry.schema_at(step.target_version()),
        ) {
            (Some(live), Some(next)) => (live, next),
            _ => return Err(MigrationError::MissingStep(version)),
        };

        if self.store.schema_fingerprint()? != Some(live.fingerprint()) {
            return Err(MigrationError::inconsistency(
                version,
                "live schema",
                "stored schema does not match the registry at this version",
            ));
        }

        let snapshot = CrossEntitySnapshot::capture(self.store, live)?;
        debug!(version, records = snapshot.len(), "snapshot captured");

        let mut work = WorkingSet::new(&snapshot);
        for entity in step.cleared_tables() {
            debug!(version, entity = entity.as_str(), "clearing table");
            work.clear(entity);
        }
        for edit in step.edits() {
            debug!(version, %edit, "structural edit");
            work.apply_edit(edit);
        }

        let fallbacks = AtomicU64::new(0);
        let mut records_transformed = 0;
        let transformed = step.step_transform().map(|t| t.entity.as_str());
        if let Some(transform) = step.step_transform() {
            let entity = transform.entity.as_str();
            let records = work.take(entity);
            let keys: Vec<_> = records.iter().map(|r| r.key.clone()).collect();
            records_transformed = records.len() as u64;

            let cx = TransformContext::new(&snapshot, entity, &fallbacks);
            let outputs = run_transform(
                transform.transform.as_ref(),
                records,
                &cx,
                &self.config.transform,
            )?;

            for (key, output) in keys.into_iter().zip(outputs) {
                if output.record.key != key {
                    return Err(MigrationError::InvalidRecord {
                        entity: entity.to_string(),
                        key,
                        reason: "transform changed the record key".to_string(),
                    });
                }
                work.put(entity, output.record);
                for (target, record) in output.emitted {
                    let emitted_key = record.key.clone();
                    if !work.emit(next, &target, record, self.store)? {
                        fallbacks.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            version,
                            entity = target.as_str(),
                            key = %emitted_key,
                            "dropped repeated emitted record"
                        );
                    }
                }
            }
        }

        for (entity, record) in step.inserts() {
            work.add(next, entity, record.clone(), self.store)?;
        }
        work.validate(next, transformed)?;

        let mut preference_edits = BTreeMap::new();
        if let Some(rewrite) = step.preference_rewrite() {
            let current = self.store.preferences()?;
            let mut edits = PreferenceEdits::new(&current);
            rewrite.rewrite(&snapshot, &mut edits)?;
            preference_edits = edits.into_edits();
        }

        let fallbacks = fallbacks.load(Ordering::Relaxed);
        let records_added = work.added();

        let mut tx = self.store.transaction();
        let counts = work.write_to(&mut tx);
        let preferences_changed = preference_edits.len() as u64;
        for (name, value) in preference_edits {
            match value {
                Some(value) => tx.set_preference(name, value),
                None => tx.delete_preference(name),
            }
        }
        tx.set_schema(next.clone());
        tx.stamp(step.target_version());
        if let Some(progress) = journal.step_mut(version) {
            progress.complete(counts.written, fallbacks);
        }
        tx.journal(journal.to_bytes()?);
        tx.commit()?;

        let report = StepReport {
            source_version: version,
            target_version: step.target_version(),
            description: step.description().to_string(),
            records_transformed,
            records_added,
            records_written: counts.written,
            records_deleted: counts.deleted,
            preferences_changed,
            fallbacks,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            from = version,
            to = report.target_version,
            written = report.records_written,
            deleted = report.records_deleted,
            "applied migration step"
        );
        if fallbacks > 0 {
            warn!(
                version,
                entity = transformed.unwrap_or_default(),
                fallbacks,
                "transform fell back to sentinel values"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, FieldType, SchemaBundle};
    use crate::migration::transform::transform_fn;
    use crate::storage::{Record, StoreConfig, Value};

    fn baseline() -> SchemaBundle {
        SchemaBundle::new(0).with_entity(
            EntityDef::new("Conversation")
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::list("recipients", FieldType::StringList))
                .with_field(FieldDef::new("count", FieldType::Int).with_default(0)),
        )
    }

    fn steps() -> Vec<MigrationStep> {
        vec![
            MigrationStep::new(0, "drop count").remove_field("Conversation", "count"),
            MigrationStep::new(1, "group flag")
                .add_field(
                    "Conversation",
                    FieldDef::new("sendAsGroup", FieldType::Bool).with_default(false),
                )
                .transform(
                    "Conversation",
                    transform_fn(|mut record: Record, _cx: &TransformContext<'_>| {
                        let group = record.get("recipients").and_then(Value::list_len).unwrap_or(0) > 1;
                        record.set("sendAsGroup", group);
                        Ok(record)
                    }),
                ),
        ]
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::build(baseline(), steps()).unwrap()
    }

    fn conversation(id: i64, recipients: &[&str]) -> Record {
        Record::keyed("id", id)
            .with(
                "recipients",
                Value::StringList(recipients.iter().map(|s| s.to_string()).collect()),
            )
            .with("count", 1)
    }

    #[test]
    fn test_runs_to_current() {
        let registry = registry();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let runner = MigrationRunner::new(&store, &registry);
        runner.stamp(0).unwrap();
        store.insert("Conversation", conversation(1, &["a", "b"])).unwrap();
        store.insert("Conversation", conversation(2, &["a"])).unwrap();

        let report = runner.run().unwrap();
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, 2);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[1].records_transformed, 2);
        assert_eq!(runner.phase(), RunnerPhase::Done);

        let group = store.get("Conversation", &1.into()).unwrap().unwrap();
        assert_eq!(group.get_bool("sendAsGroup"), Some(true));
        assert!(!group.has("count"));
        store.ensure_ready(2).unwrap();
    }

    #[test]
    fn test_second_run_is_noop() {
        let registry = registry();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let runner = MigrationRunner::new(&store, &registry);
        runner.stamp(0).unwrap();
        store.insert("Conversation", conversation(1, &["a"])).unwrap();
        runner.run().unwrap();

        let report = runner.run().unwrap();
        assert!(report.is_noop());
        assert_eq!(runner.phase(), RunnerPhase::Done);
    }

    #[test]
    fn test_fresh_store_is_initialized() {
        let registry = registry();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let report = MigrationRunner::new(&store, &registry).run().unwrap();

        assert!(report.initialized);
        assert_eq!(store.stamped_version().unwrap(), Some(2));
        ConsistencyChecker::new().check(&store, &registry).unwrap();
    }

    #[test]
    fn test_unstamped_store_with_records() {
        let registry = registry();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let mut tx = store.transaction();
        tx.put("Conversation", conversation(1, &[]));
        tx.commit().unwrap();

        let runner = MigrationRunner::new(&store, &registry);
        assert!(matches!(runner.run(), Err(MigrationError::Uninitialized)));
        assert_eq!(runner.phase(), RunnerPhase::Failed);
    }

    #[test]
    fn test_store_ahead() {
        let registry = registry();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let mut tx = store.transaction();
        tx.stamp(9);
        tx.commit().unwrap();

        let err = MigrationRunner::new(&store, &registry).run().unwrap_err();
        assert!(matches!(err, MigrationError::StoreAhead { stamped: 9, target: 2 }));
        assert_eq!(store.stamped_version().unwrap(), Some(9));
    }

    #[test]
    fn test_failed_run_blocks_the_store() {
        let registry = SchemaRegistry::build(
            baseline(),
            vec![MigrationStep::new(0, "broken")
                .add_field("Conversation", FieldDef::new("name", FieldType::String).with_default(""))
                .transform(
                    "Conversation",
                    transform_fn(|mut record: Record, _cx: &TransformContext<'_>| {
                        record.remove("name");
                        Ok(record)
                    }),
                )],
        )
        .unwrap();
        let store = Store::open(StoreConfig::temporary()).unwrap();
        let runner = MigrationRunner::new(&store, &registry);
        runner.stamp(0).unwrap();
        store.insert("Conversation", conversation(1, &["a"])).unwrap();

        let err = runner.run().unwrap_err();
        assert!(matches!(err, MigrationError::IncompleteTransform { .. }));
        assert_eq!(store.stamped_version().unwrap(), Some(0));
        assert!(store.get("Conversation", &1.into()).unwrap().unwrap().has("count"));

        let journal = MigrationJournal::load(&store).unwrap().unwrap();
        assert!(journal.is_failed());
        assert!(matches!(runner.run(), Err(MigrationError::Blocked { .. })));
        assert!(store.ensure_ready(1).is_err());

        let retry = MigrationConfig {
            retry_failed: true,
            ..MigrationConfig::default()
        };
        let err = MigrationRunner::with_config(&store, &registry, retry)
            .run()
            .unwrap_err();
        assert!(matches!(err, MigrationError::IncompleteTransform { .. }));
    }

    #[test]
    fn test_config_from_json() {
        let config: MigrationConfig =
            serde_json::from_str(r#"{"transform": {"workers": 3}, "retry_failed": true}"#).unwrap();
        assert_eq!(config.transform.workers, 3);
        assert_eq!(config.transform.parallel_threshold, 2048);
        assert!(config.verify_records);
        assert!(config.retry_failed);
    }
}
