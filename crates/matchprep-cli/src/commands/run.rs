//! `matchprep run` - execute the post-processing pipeline

use crate::error::{CliError, Result};
use crate::input::load_inputs;
use indicatif::{ProgressBar, ProgressStyle};
use matchprep_core::config::{BarrierConfig, PrepareConfig, RetryConfig};
use matchprep_core::pipeline::Pipeline;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings assembled from CLI flags; unset knobs fall back to
/// `MATCHPREP_*` environment variables, then to defaults
#[derive(Debug)]
pub struct RunArgs {
    pub hits: PathBuf,
    pub sites: Option<PathBuf>,
    pub sequences: PathBuf,
    pub entities: Option<PathBuf>,
    pub models: PathBuf,
    pub output_dir: PathBuf,
    pub partitions: Option<u32>,
    pub range_start: Option<u64>,
    pub range_end: Option<u64>,
    pub processed_table: Option<PathBuf>,
    pub run_version: String,
    pub poll_interval_secs: Option<u64>,
    pub max_wait_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let loaded = load_inputs(
        &args.hits,
        args.sites.as_deref(),
        &args.sequences,
        args.entities.as_deref(),
        &args.models,
    )?;

    // The smallest/largest sequence ids in the inputs bound the identifier
    // space unless the caller narrowed it explicitly
    let range_start = args
        .range_start
        .or(loaded.stats.min_sequence_id)
        .ok_or_else(|| CliError::invalid_inputs("no sequence ids to derive a range from"))?;
    let range_end = args
        .range_end
        .or(loaded.stats.max_sequence_id)
        .ok_or_else(|| CliError::invalid_inputs("no sequence ids to derive a range from"))?;

    let mut barrier = BarrierConfig::from_env();
    if let Some(secs) = args.poll_interval_secs {
        barrier.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = args.max_wait_secs {
        barrier.max_wait = Duration::from_secs(secs);
    }

    let mut retry = RetryConfig::from_env();
    if let Some(attempts) = args.max_attempts {
        retry.max_attempts = attempts;
    }

    let config = PrepareConfig {
        range_start,
        range_end,
        partition_count: args
            .partitions
            .unwrap_or(matchprep_core::config::DEFAULT_PARTITION_COUNT),
        output_dir: args.output_dir.clone(),
        processed_table: args
            .processed_table
            .unwrap_or_else(|| args.output_dir.join("processed.json")),
        run_version: args.run_version,
        barrier,
        retry,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .map_err(|err| CliError::Other(err.into()))?,
    );
    spinner.set_message(format!(
        "Running {} partitions over [{}, {}]",
        config.partition_count, range_start, range_end
    ));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let pipeline = Pipeline::new(loaded.store, loaded.registry, config);
    let result = pipeline.run().await;
    spinner.finish_and_clear();
    let summary = result?;

    println!("Pipeline completed in {:.1}s", summary.duration_secs());
    println!("  partitions:        {}", summary.partitions);
    println!("  sequences scanned: {}", summary.sequences_scanned);
    println!("  matches written:   {}", summary.matches_written);
    println!("  shared flushed:    {}", summary.shared_flushed);
    println!("  shared skipped:    {}", summary.shared_skipped);
    println!("Output files:");
    for report in &summary.reports {
        print_output(&report.matches_output.path, report.matches_output.entities);
        if let Some(ref shared) = report.shared_output {
            print_output(&shared.path, shared.entities);
        }
    }
    Ok(())
}

fn print_output(path: &Path, entities: u64) {
    println!("  {} ({} entities)", path.display(), entities);
}
