//! Partition worker: scan, aggregate, synchronize, flush
//!
//! One worker owns one partition and walks the state machine
//! `SCANNING -> AGGREGATING -> READY -> WAIT_BARRIER -> FLUSHING -> DONE`,
//! with `ERROR` terminal from any state. Nothing resumes from `ERROR`; the
//! orchestration layer re-runs the whole unit of work.

use crate::aggregate::MatchAggregator;
use crate::config::BarrierConfig;
use crate::coordinator::PartitionCoordinator;
use crate::dedup::{ClaimRegistry, ProcessedTable};
use crate::error::Result;
use crate::model::{EntityType, Partition, SequenceMatches, StoreKey};
use crate::output::{FinalizedOutput, OutputAssembler};
use crate::registry::ModelRegistry;
use crate::store::{MatchStore, RetryingStore, SequenceSource, SharedEntitySource};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Worker state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Scanning,
    Aggregating,
    Ready,
    WaitBarrier,
    Flushing,
    Done,
    Error,
}

impl WorkerPhase {
    pub fn as_str(&self) -> &str {
        match self {
            WorkerPhase::Scanning => "scanning",
            WorkerPhase::Aggregating => "aggregating",
            WorkerPhase::Ready => "ready",
            WorkerPhase::WaitBarrier => "wait_barrier",
            WorkerPhase::Flushing => "flushing",
            WorkerPhase::Done => "done",
            WorkerPhase::Error => "error",
        }
    }
}

/// Counters and outputs from one completed worker
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub partition: Partition,
    pub sequences_scanned: u64,
    pub sequences_with_matches: u64,
    pub matches_written: u64,
    pub shared_discovered: u64,
    pub shared_flushed: u64,
    pub shared_skipped: u64,
    pub matches_output: FinalizedOutput,
    pub shared_output: Option<FinalizedOutput>,
}

/// Per-worker settings carried down from the pipeline configuration
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub expected_partitions: usize,
    pub output_dir: PathBuf,
    pub run_version: String,
    pub barrier: BarrierConfig,
}

/// One partition worker
pub struct PartitionWorker<S, R> {
    worker_id: Uuid,
    partition: Partition,
    store: RetryingStore<S>,
    aggregator: MatchAggregator<R>,
    registry: Arc<R>,
    coordinator: Arc<PartitionCoordinator>,
    claims: Arc<ClaimRegistry>,
    processed: Arc<ProcessedTable>,
    ctx: WorkerContext,
}

impl<S, R> PartitionWorker<S, R>
where
    S: MatchStore + SequenceSource + SharedEntitySource,
    R: ModelRegistry,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition: Partition,
        store: RetryingStore<S>,
        registry: Arc<R>,
        coordinator: Arc<PartitionCoordinator>,
        claims: Arc<ClaimRegistry>,
        processed: Arc<ProcessedTable>,
        ctx: WorkerContext,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            partition,
            store,
            aggregator: MatchAggregator::new(registry.clone()),
            registry,
            coordinator,
            claims,
            processed,
            ctx,
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Run the worker to completion
    pub async fn run(self) -> Result<WorkerReport> {
        tracing::info!(
            worker_id = %self.worker_id,
            partition = %self.partition,
            expected_partitions = self.ctx.expected_partitions,
            "Worker started"
        );

        let mut phase = WorkerPhase::Scanning;
        match self.execute(&mut phase).await {
            Ok(report) => {
                tracing::info!(
                    worker_id = %self.worker_id,
                    partition = %report.partition,
                    sequences_scanned = report.sequences_scanned,
                    matches_written = report.matches_written,
                    shared_flushed = report.shared_flushed,
                    shared_skipped = report.shared_skipped,
                    "Worker finished"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::error!(
                    worker_id = %self.worker_id,
                    partition = %self.partition,
                    phase = phase.as_str(),
                    error = %err,
                    "Worker failed"
                );
                Err(err)
            }
        }
    }

    fn set_phase(&self, phase: &mut WorkerPhase, next: WorkerPhase) {
        *phase = next;
        tracing::debug!(
            worker_id = %self.worker_id,
            partition = %self.partition,
            phase = next.as_str(),
            "Phase transition"
        );
    }

    async fn execute(&self, phase: &mut WorkerPhase) -> Result<WorkerReport> {
        let analyses = self.registry.analyses();
        let mut sequences_scanned = 0u64;
        let mut sequences_with_matches = 0u64;
        let mut matches_written = 0u64;
        let mut shared: BTreeSet<u64> = BTreeSet::new();

        let mut matches_out = OutputAssembler::open(
            &self.ctx.output_dir,
            self.partition,
            EntityType::Matches,
            &self.ctx.run_version,
        )?;
        matches_out.write_header()?;

        let mut aggregating = false;
        for sequence_id in self.partition.range_start..=self.partition.range_end {
            let Some(sequence) = self.store.fetch_sequence(sequence_id).await? else {
                continue;
            };
            sequences_scanned += 1;
            shared.extend(sequence.shared_refs.iter().copied());

            let mut hits = Vec::new();
            for analysis in &analyses {
                let key = StoreKey::new(sequence_id, analysis.as_str());
                hits.extend(self.store.read_hits(&key).await?);
            }
            if hits.is_empty() {
                continue;
            }
            if !aggregating {
                self.set_phase(phase, WorkerPhase::Aggregating);
                aggregating = true;
            }

            let sites = self.store.read_sites(sequence_id).await?;
            let matches = self
                .aggregator
                .aggregate(sequence_id, sequence.length, &hits, &sites)?;
            if matches.is_empty() {
                continue;
            }

            self.store.write_matches(sequence_id, &matches).await?;
            matches_written += matches.len() as u64;
            sequences_with_matches += 1;
            matches_out.write_entity(&SequenceMatches {
                sequence_id,
                matches,
            })?;
        }

        matches_out.write_footer()?;
        let matches_output = matches_out.finalize()?;

        self.set_phase(phase, WorkerPhase::Ready);
        self.coordinator.register(&self.partition.key());

        self.set_phase(phase, WorkerPhase::WaitBarrier);
        self.coordinator
            .await_barrier(self.ctx.expected_partitions, &self.ctx.barrier)
            .await?;

        self.set_phase(phase, WorkerPhase::Flushing);
        let shared_discovered = shared.len() as u64;
        let mut shared_flushed = 0u64;
        let mut shared_skipped = 0u64;
        let mut shared_output = None;

        if !shared.is_empty() {
            let mut out = OutputAssembler::open(
                &self.ctx.output_dir,
                self.partition,
                EntityType::Shared,
                &self.ctx.run_version,
            )?;
            out.write_header()?;
            for entity_id in shared {
                if self.processed.contains(entity_id) {
                    // Flushed by an earlier run; skip on resumption
                    shared_skipped += 1;
                    continue;
                }
                if !self.claims.claim(entity_id) {
                    // Another partition owns this entity
                    shared_skipped += 1;
                    continue;
                }
                let entity = self.store.fetch_entity(entity_id).await?;
                out.write_entity(&entity)?;
                self.processed.mark(entity_id)?;
                shared_flushed += 1;
            }
            out.write_footer()?;
            shared_output = Some(out.finalize()?);
        }

        self.set_phase(phase, WorkerPhase::Done);
        Ok(WorkerReport {
            partition: self.partition,
            sequences_scanned,
            sequences_with_matches,
            matches_written,
            shared_discovered,
            shared_flushed,
            shared_skipped,
            matches_output,
            shared_output,
        })
    }
}
