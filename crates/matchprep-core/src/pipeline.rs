//! Pipeline driver: partition the identifier space, run the workers, merge
//! their reports
//!
//! Workers are spawned as independent tokio tasks; the only cross-worker
//! synchronization is the readiness barrier and the claim registry, both
//! constructed here and dependency-injected into every worker.

use crate::config::PrepareConfig;
use crate::coordinator::PartitionCoordinator;
use crate::dedup::{ClaimRegistry, ProcessedTable};
use crate::error::{PrepError, Result};
use crate::model::Partition;
use crate::registry::ModelRegistry;
use crate::store::{MatchStore, RetryingStore, RetryPolicy, SequenceSource, SharedEntitySource};
use crate::worker::{PartitionWorker, WorkerContext, WorkerReport};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Merged outcome of one pipeline run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub partitions: usize,
    pub sequences_scanned: u64,
    pub matches_written: u64,
    pub shared_flushed: u64,
    pub shared_skipped: u64,
    pub reports: Vec<WorkerReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn duration_secs(&self) -> f64 {
        (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Split an inclusive id range into `count` contiguous, non-overlapping
/// partitions covering it completely.
///
/// The remainder is spread over the leading partitions; `count` is clamped to
/// the range size so no partition is ever empty.
pub fn partition_range(range_start: u64, range_end: u64, count: u32) -> Vec<Partition> {
    let total = range_end - range_start + 1;
    let count = u64::from(count).clamp(1, total);
    let base = total / count;
    let remainder = total % count;

    let mut partitions = Vec::with_capacity(count as usize);
    let mut next_start = range_start;
    for index in 0..count {
        let span = if index < remainder { base + 1 } else { base };
        let next_end = next_start + span - 1;
        partitions.push(Partition::new(index as u32, next_start, next_end));
        next_start = next_end + 1;
    }
    partitions
}

/// Drives one complete post-processing run
pub struct Pipeline<S, R> {
    store: Arc<S>,
    registry: Arc<R>,
    config: PrepareConfig,
}

impl<S, R> Pipeline<S, R>
where
    S: MatchStore + SequenceSource + SharedEntitySource + 'static,
    R: ModelRegistry + 'static,
{
    pub fn new(store: Arc<S>, registry: Arc<R>, config: PrepareConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Run all partition workers to completion and merge their reports.
    ///
    /// Every worker is joined before the first error (if any) is returned, so
    /// partial output on disk is in a stable state when the caller sees the
    /// failure.
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let started_at = Utc::now();

        let partitions = partition_range(
            self.config.range_start,
            self.config.range_end,
            self.config.partition_count,
        );
        let expected = partitions.len();

        tracing::info!(
            partitions = expected,
            range_start = self.config.range_start,
            range_end = self.config.range_end,
            output_dir = %self.config.output_dir.display(),
            "Starting post-processing pipeline"
        );

        let coordinator = Arc::new(PartitionCoordinator::new());
        let claims = Arc::new(ClaimRegistry::new());
        let processed = Arc::new(ProcessedTable::load(&self.config.processed_table)?);

        let mut handles = Vec::with_capacity(expected);
        for partition in partitions {
            let store = RetryingStore::new(
                self.store.clone(),
                RetryPolicy::new(self.config.retry.clone()),
                partition.span(),
            );
            let worker = PartitionWorker::new(
                partition,
                store,
                self.registry.clone(),
                coordinator.clone(),
                claims.clone(),
                processed.clone(),
                WorkerContext {
                    expected_partitions: expected,
                    output_dir: self.config.output_dir.clone(),
                    run_version: self.config.run_version.clone(),
                    barrier: self.config.barrier.clone(),
                },
            );
            handles.push(tokio::spawn(worker.run()));
        }

        let mut reports = Vec::with_capacity(expected);
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "Worker task panicked");
                    if first_error.is_none() {
                        first_error =
                            Some(PrepError::internal(format!("worker panicked: {join_err}")));
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let completed_at = Utc::now();
        let summary = RunSummary {
            partitions: expected,
            sequences_scanned: reports.iter().map(|r| r.sequences_scanned).sum(),
            matches_written: reports.iter().map(|r| r.matches_written).sum(),
            shared_flushed: reports.iter().map(|r| r.shared_flushed).sum(),
            shared_skipped: reports.iter().map(|r| r.shared_skipped).sum(),
            reports,
            started_at,
            completed_at,
        };

        tracing::info!(
            partitions = summary.partitions,
            sequences_scanned = summary.sequences_scanned,
            matches_written = summary.matches_written,
            shared_flushed = summary.shared_flushed,
            duration_secs = summary.duration_secs(),
            "Pipeline completed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_range_even_split() {
        let partitions = partition_range(1, 200, 2);
        assert_eq!(partitions.len(), 2);
        assert_eq!((partitions[0].range_start, partitions[0].range_end), (1, 100));
        assert_eq!(
            (partitions[1].range_start, partitions[1].range_end),
            (101, 200)
        );
    }

    #[test]
    fn test_partition_range_remainder_goes_to_leading_partitions() {
        let partitions = partition_range(1, 10, 3);
        assert_eq!(partitions.len(), 3);
        assert_eq!((partitions[0].range_start, partitions[0].range_end), (1, 4));
        assert_eq!((partitions[1].range_start, partitions[1].range_end), (5, 7));
        assert_eq!((partitions[2].range_start, partitions[2].range_end), (8, 10));
    }

    #[test]
    fn test_partition_range_covers_without_overlap() {
        let partitions = partition_range(37, 5000, 7);
        assert_eq!(partitions[0].range_start, 37);
        assert_eq!(partitions.last().map(|p| p.range_end), Some(5000));
        for pair in partitions.windows(2) {
            assert_eq!(pair[0].range_end + 1, pair[1].range_start);
        }
        let total: u64 = partitions.iter().map(|p| p.span()).sum();
        assert_eq!(total, 5000 - 37 + 1);
    }

    #[test]
    fn test_partition_range_clamps_count_to_range_size() {
        let partitions = partition_range(1, 3, 10);
        assert_eq!(partitions.len(), 3);
        for (index, partition) in partitions.iter().enumerate() {
            assert_eq!(partition.span(), 1);
            assert_eq!(partition.id, index as u32);
        }
    }
}
