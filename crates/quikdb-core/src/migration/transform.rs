//! Per-record transforms.
//!
//! A transform rewrites every record of one entity after the step's
//! structural edits. It reads derived values from the step's
//! [`CrossEntitySnapshot`] and may emit new records into other entities.

use super::error::MigrationError;
use super::snapshot::CrossEntitySnapshot;
use crate::storage::Record;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tracing::debug;

/// A pure per-record function applied during a migration step.
pub trait RecordTransform: Send + Sync {
    /// Produce the updated record, plus any records emitted into other
    /// entities.
    fn apply(
        &self,
        record: Record,
        cx: &TransformContext<'_>,
    ) -> Result<TransformOutput, MigrationError>;
}

/// Output of a transform for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    /// The updated record.
    pub record: Record,
    /// New records for other entities, as `(entity, record)`.
    pub emitted: Vec<(String, Record)>,
}

impl TransformOutput {
    /// Output with no emitted records.
    pub fn new(record: Record) -> Self {
        Self {
            record,
            emitted: Vec::new(),
        }
    }

    /// Emit a record into another entity.
    pub fn emit(mut self, entity: impl Into<String>, record: Record) -> Self {
        self.emitted.push((entity.into(), record));
        self
    }
}

impl From<Record> for TransformOutput {
    fn from(record: Record) -> Self {
        Self::new(record)
    }
}

/// What a transform can see besides the record itself.
pub struct TransformContext<'a> {
    snapshot: &'a CrossEntitySnapshot,
    entity: &'a str,
    fallbacks: &'a AtomicU64,
}

impl<'a> TransformContext<'a> {
    /// Create a context over a snapshot.
    pub fn new(snapshot: &'a CrossEntitySnapshot, entity: &'a str, fallbacks: &'a AtomicU64) -> Self {
        Self {
            snapshot,
            entity,
            fallbacks,
        }
    }

    /// The pre-step snapshot.
    pub fn snapshot(&self) -> &'a CrossEntitySnapshot {
        self.snapshot
    }

    /// The entity being transformed.
    pub fn entity(&self) -> &'a str {
        self.entity
    }

    /// Record that a field fell back to its documented sentinel.
    ///
    /// Fallbacks are accepted information loss; the runner totals them per
    /// step and reports them.
    pub fn fallback(&self, field: &str, reason: &str) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        debug!(entity = self.entity, field, reason, "sentinel fallback");
    }

    /// Number of fallbacks recorded so far.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

/// A [`RecordTransform`] backed by a closure.
pub struct FnTransform<F>(F);

/// Wrap a closure as a [`RecordTransform`].
///
/// The closure may return a bare [`Record`] or a full [`TransformOutput`].
pub fn transform_fn<F, T>(f: F) -> FnTransform<F>
where
    F: Fn(Record, &TransformContext<'_>) -> Result<T, MigrationError> + Send + Sync,
    T: Into<TransformOutput>,
{
    FnTransform(f)
}

impl<F, T> RecordTransform for FnTransform<F>
where
    F: Fn(Record, &TransformContext<'_>) -> Result<T, MigrationError> + Send + Sync,
    T: Into<TransformOutput>,
{
    fn apply(
        &self,
        record: Record,
        cx: &TransformContext<'_>,
    ) -> Result<TransformOutput, MigrationError> {
        (self.0)(record, cx).map(Into::into)
    }
}

/// Configuration for the per-record transform pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Number of worker threads for large passes.
    pub workers: usize,
    /// Record count above which the pass runs on worker threads.
    pub parallel_threshold: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(2, |n| n.get()),
            parallel_threshold: 2048,
        }
    }
}

impl TransformConfig {
    /// Run every pass on the calling thread.
    pub fn sequential() -> Self {
        Self {
            workers: 1,
            parallel_threshold: usize::MAX,
        }
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the parallel threshold.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    fn workers_for(&self, records: usize) -> usize {
        if records <= self.parallel_threshold {
            1
        } else {
            self.workers.clamp(1, records)
        }
    }
}

/// Apply `transform` to every record, in order.
///
/// Large passes are split into contiguous chunks handled by scoped worker
/// threads that share the context. Outputs come back in input order, and the
/// error of the earliest failing chunk wins, so the result does not depend on
/// the worker count.
pub fn run_transform(
    transform: &dyn RecordTransform,
    records: Vec<Record>,
    cx: &TransformContext<'_>,
    config: &TransformConfig,
) -> Result<Vec<TransformOutput>, MigrationError> {
    let workers = config.workers_for(records.len());
    if workers <= 1 {
        return apply_chunk(transform, records, cx);
    }

    let chunk_size = records.len().div_ceil(workers);
    let mut chunks = Vec::with_capacity(workers);
    let mut rest = records;
    while rest.len() > chunk_size {
        let tail = rest.split_off(chunk_size);
        chunks.push(rest);
        rest = tail;
    }
    chunks.push(rest);

    debug!(
        entity = cx.entity(),
        workers = chunks.len(),
        chunk_size,
        "parallel transform pass"
    );

    let results: Vec<Result<Vec<TransformOutput>, MigrationError>> = thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| scope.spawn(move || apply_chunk(transform, chunk, cx)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(MigrationError::transform(cx.entity(), "worker panicked")))
            })
            .collect()
    });

    let mut outputs = Vec::new();
    for result in results {
        outputs.extend(result?);
    }
    Ok(outputs)
}

fn apply_chunk(
    transform: &dyn RecordTransform,
    records: Vec<Record>,
    cx: &TransformContext<'_>,
) -> Result<Vec<TransformOutput>, MigrationError> {
    records
        .into_iter()
        .map(|record| transform.apply(record, cx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: i64) -> Vec<Record> {
        (0..n).map(|i| Record::keyed("id", i).with("n", i)).collect()
    }

    fn double() -> impl RecordTransform {
        transform_fn(|mut record: Record, _cx: &TransformContext<'_>| {
            let n = record.get_int("n").unwrap_or(0);
            record.set("n", n * 2);
            Ok(record)
        })
    }

    #[test]
    fn test_sequential_pass() {
        let snapshot = CrossEntitySnapshot::new(0);
        let fallbacks = AtomicU64::new(0);
        let cx = TransformContext::new(&snapshot, "Message", &fallbacks);

        let out = run_transform(&double(), records(5), &cx, &TransformConfig::sequential()).unwrap();
        let values: Vec<i64> = out.iter().filter_map(|o| o.record.get_int("n")).collect();
        assert_eq!(values, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_parallel_pass_matches_sequential() {
        let snapshot = CrossEntitySnapshot::new(0);
        let fallbacks = AtomicU64::new(0);
        let cx = TransformContext::new(&snapshot, "Message", &fallbacks);

        let sequential =
            run_transform(&double(), records(1000), &cx, &TransformConfig::sequential()).unwrap();
        let config = TransformConfig::default()
            .with_workers(7)
            .with_parallel_threshold(10);
        let parallel = run_transform(&double(), records(1000), &cx, &config).unwrap();

        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_earliest_error_wins() {
        let snapshot = CrossEntitySnapshot::new(0);
        let fallbacks = AtomicU64::new(0);
        let cx = TransformContext::new(&snapshot, "Message", &fallbacks);
        let failing = transform_fn(|record: Record, cx: &TransformContext<'_>| {
            match record.get_int("n") {
                Some(n) if n % 300 == 299 => Err(MigrationError::transform(cx.entity(), format!("bad {}", n))),
                _ => Ok(record),
            }
        });

        let config = TransformConfig::default()
            .with_workers(4)
            .with_parallel_threshold(1);
        let err = run_transform(&failing, records(1000), &cx, &config).unwrap_err();
        assert!(err.to_string().contains("bad 299"));
    }

    #[test]
    fn test_fallbacks_are_counted_across_workers() {
        let snapshot = CrossEntitySnapshot::new(0);
        let fallbacks = AtomicU64::new(0);
        let cx = TransformContext::new(&snapshot, "MmsPart", &fallbacks);
        let sentinel = transform_fn(|mut record: Record, cx: &TransformContext<'_>| {
            record.set("messageId", 0);
            cx.fallback("messageId", "no owning message");
            Ok(record)
        });

        let config = TransformConfig::default()
            .with_workers(3)
            .with_parallel_threshold(0);
        run_transform(&sentinel, records(50), &cx, &config).unwrap();
        assert_eq!(cx.fallback_count(), 50);
    }

    #[test]
    fn test_emitted_records() {
        let snapshot = CrossEntitySnapshot::new(0);
        let fallbacks = AtomicU64::new(0);
        let cx = TransformContext::new(&snapshot, "Contact", &fallbacks);
        let emit = transform_fn(|record: Record, _cx: &TransformContext<'_>| {
            let number = Record::keyed("id", 1).with("address", "5550100");
            Ok(TransformOutput::new(record).emit("PhoneNumber", number))
        });

        let out = emit.apply(Record::keyed("lookupKey", "a"), &cx).unwrap();
        assert_eq!(out.emitted.len(), 1);
        assert_eq!(out.emitted[0].0, "PhoneNumber");
    }

    #[test]
    fn test_workers_for() {
        let config = TransformConfig::default()
            .with_workers(8)
            .with_parallel_threshold(100);
        assert_eq!(config.workers_for(100), 1);
        assert_eq!(config.workers_for(101), 8);
        assert_eq!(config.with_parallel_threshold(0).workers_for(3), 3);
    }
}
