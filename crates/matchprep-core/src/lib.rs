//! matchprep core library
//!
//! Match post-processing and output preparation for protein-signature
//! scanning: converts raw per-model hit records into structured, deduplicated
//! match records grouped by sequence, and coordinates independent partition
//! workers so that entities shared across partitions are serialized to output
//! exactly once, only after all partitions reached a consistent state.
//!
//! # Components
//!
//! - [`store`]: retrying access to the eventually-consistent backing store
//! - [`aggregate`]: raw hits grouped into canonical filtered matches
//! - [`dedup`]: at-most-once claims plus the persisted processed side-table
//! - [`coordinator`]: partition readiness and the polling barrier
//! - [`output`]: streaming output assembly with collision-safe promotion
//! - [`worker`]: the per-partition state machine tying the above together
//! - [`pipeline`]: partitioning the id space and driving all workers
//!
//! # Example
//!
//! ```no_run
//! use matchprep_core::config::{BarrierConfig, PrepareConfig, RetryConfig};
//! use matchprep_core::pipeline::Pipeline;
//! use matchprep_core::registry::InMemoryModelRegistry;
//! use matchprep_core::store::InMemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> matchprep_core::Result<()> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let registry = Arc::new(InMemoryModelRegistry::new(vec!["pfam".into()]));
//!     let config = PrepareConfig {
//!         range_start: 1,
//!         range_end: 10_000,
//!         partition_count: 4,
//!         output_dir: "out".into(),
//!         processed_table: "out/processed.json".into(),
//!         run_version: "1.0".into(),
//!         barrier: BarrierConfig::default(),
//!         retry: RetryConfig::default(),
//!     };
//!     let summary = Pipeline::new(store, registry, config).run().await?;
//!     tracing::info!(shared_flushed = summary.shared_flushed, "run complete");
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use error::{PrepError, Result};
pub use model::{FilteredMatch, Location, Partition, RawHit, RawSite, SharedEntity};
pub use pipeline::{Pipeline, RunSummary};
