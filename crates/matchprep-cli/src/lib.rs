//! matchprep CLI library
//!
//! Command-line surface for the match post-processing pipeline: loads
//! JSONL/JSON inputs into the in-memory stores, runs the partitioned
//! pipeline, and reports a run summary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
pub mod error;
pub mod input;

pub use error::{CliError, Result};

/// matchprep - match post-processing and output preparation
#[derive(Parser, Debug)]
#[command(name = "matchprep")]
#[command(author, version, about = "Match post-processing and output preparation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the post-processing pipeline over a set of input files
    Run {
        /// Raw hits file (JSONL, one hit per line)
        #[arg(long)]
        hits: PathBuf,

        /// Raw site records file (JSONL)
        #[arg(long)]
        sites: Option<PathBuf>,

        /// Sequence records file (JSONL)
        #[arg(long)]
        sequences: PathBuf,

        /// Shared entities file (JSONL)
        #[arg(long)]
        entities: Option<PathBuf>,

        /// Model registry file (JSON)
        #[arg(long)]
        models: PathBuf,

        /// Directory that receives finalized output files
        #[arg(short, long, default_value = "./out")]
        output_dir: PathBuf,

        /// Number of partition workers
        #[arg(short, long)]
        partitions: Option<u32>,

        /// First sequence id (defaults to the smallest id in the inputs)
        #[arg(long)]
        range_start: Option<u64>,

        /// Last sequence id (defaults to the largest id in the inputs)
        #[arg(long)]
        range_end: Option<u64>,

        /// Path of the processed side-table (defaults to
        /// <output-dir>/processed.json)
        #[arg(long)]
        processed_table: Option<PathBuf>,

        /// Version string stamped into output headers
        #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
        run_version: String,

        /// Barrier poll interval in seconds
        #[arg(long)]
        poll_interval_secs: Option<u64>,

        /// Barrier wait ceiling in seconds
        #[arg(long)]
        max_wait_secs: Option<u64>,

        /// Store attempt bound
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Print summary statistics for a set of input files
    Inspect {
        /// Raw hits file (JSONL)
        #[arg(long)]
        hits: PathBuf,

        /// Sequence records file (JSONL)
        #[arg(long)]
        sequences: PathBuf,

        /// Model registry file (JSON)
        #[arg(long)]
        models: PathBuf,

        /// Raw site records file (JSONL)
        #[arg(long)]
        sites: Option<PathBuf>,

        /// Shared entities file (JSONL)
        #[arg(long)]
        entities: Option<PathBuf>,
    },
}
