//! Configuration for the post-processing pipeline
//!
//! Barrier and retry knobs are explicit configuration rather than hard-coded
//! constants, so operators can tune them per deployment and tests can use
//! short intervals.

use crate::error::{PrepError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default barrier poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default ceiling on a barrier wait in seconds (1 hour).
pub const DEFAULT_MAX_WAIT_SECS: u64 = 3600;

/// Default store attempt bound (initial attempt plus retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default store throughput constant used to size retry delays, in items
/// per minute of expected propagation.
pub const DEFAULT_ITEMS_PER_MINUTE: u64 = 8000;

/// Default clamp on a single retry delay in seconds.
pub const DEFAULT_MAX_RETRY_DELAY_SECS: u64 = 120;

/// Default number of partition workers.
pub const DEFAULT_PARTITION_COUNT: u32 = 4;

/// Readiness-barrier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierConfig {
    /// How often a waiting worker re-checks the ready count
    pub poll_interval: Duration,

    /// Ceiling on the total wait before the barrier fails
    pub max_wait: Duration,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_wait: Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
        }
    }
}

impl BarrierConfig {
    /// Create from environment variables
    ///
    /// - `MATCHPREP_POLL_INTERVAL_SECS`
    /// - `MATCHPREP_MAX_WAIT_SECS`
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(
                std::env::var("MATCHPREP_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            max_wait: Duration::from_secs(
                std::env::var("MATCHPREP_MAX_WAIT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_WAIT_SECS),
            ),
        }
    }
}

/// Store retry configuration
///
/// The delay between attempts models storage-propagation lag for the current
/// workload size (one node wrote, another reads behind replication), not
/// exponential backoff: `workload_items / items_per_minute` minutes, clamped
/// to `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempt bound, counting the initial attempt
    pub max_attempts: u32,

    /// Throughput constant: how many items the store is expected to
    /// propagate per minute
    pub items_per_minute: u64,

    /// Clamp on a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            items_per_minute: DEFAULT_ITEMS_PER_MINUTE,
            max_delay: Duration::from_secs(DEFAULT_MAX_RETRY_DELAY_SECS),
        }
    }
}

impl RetryConfig {
    /// Create from environment variables
    ///
    /// - `MATCHPREP_MAX_ATTEMPTS`
    /// - `MATCHPREP_ITEMS_PER_MINUTE`
    /// - `MATCHPREP_MAX_RETRY_DELAY_SECS`
    pub fn from_env() -> Self {
        Self {
            max_attempts: std::env::var("MATCHPREP_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            items_per_minute: std::env::var("MATCHPREP_ITEMS_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ITEMS_PER_MINUTE),
            max_delay: Duration::from_secs(
                std::env::var("MATCHPREP_MAX_RETRY_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_RETRY_DELAY_SECS),
            ),
        }
    }

    /// Workload-proportional delay: `workload_items / items_per_minute`
    /// minutes, clamped to `max_delay`
    pub fn delay_for(&self, workload_items: u64) -> Duration {
        let minutes = workload_items / self.items_per_minute.max(1);
        Duration::from_secs(minutes * 60).min(self.max_delay)
    }
}

/// Configuration for one post-processing pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareConfig {
    /// First sequence id of the global identifier space
    pub range_start: u64,

    /// Last sequence id of the global identifier space (inclusive)
    pub range_end: u64,

    /// How many partition workers to split the space across
    pub partition_count: u32,

    /// Directory that receives finalized output files
    pub output_dir: PathBuf,

    /// Path of the persisted processed side-table
    pub processed_table: PathBuf,

    /// Version string stamped into output headers
    pub run_version: String,

    pub barrier: BarrierConfig,
    pub retry: RetryConfig,
}

impl PrepareConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.range_start == 0 {
            return Err(PrepError::config("Sequence ids start at 1; range_start must be greater than 0"));
        }
        if self.range_start > self.range_end {
            return Err(PrepError::config(format!(
                "range_start ({}) cannot be greater than range_end ({})",
                self.range_start, self.range_end
            )));
        }
        if self.partition_count == 0 {
            return Err(PrepError::config("partition_count must be greater than 0"));
        }
        if self.run_version.is_empty() {
            return Err(PrepError::config("run_version cannot be empty"));
        }
        if self.barrier.poll_interval.is_zero() {
            return Err(PrepError::config("barrier poll_interval must be non-zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(PrepError::config("retry max_attempts must be greater than 0"));
        }
        Ok(())
    }
}
