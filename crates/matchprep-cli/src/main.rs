//! matchprep CLI - main entry point

use clap::Parser;
use matchprep_cli::commands::{inspect, run};
use matchprep_cli::{Cli, Commands};
use matchprep_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging based on verbose flag and environment
    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .log_file_prefix("matchprep")
            .build()
    } else {
        LogConfig::builder()
            .level(LogLevel::Warn)
            .log_file_prefix("matchprep")
            .build()
    };

    // Environment variables take precedence over the flag-derived defaults
    let log_config = log_config
        .clone()
        .with_env_overrides()
        .unwrap_or(log_config);

    // The CLI should still work when logging cannot be initialized
    let _ = init_logging(&log_config);

    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: Cli) -> matchprep_cli::Result<()> {
    match cli.command {
        Commands::Run {
            hits,
            sites,
            sequences,
            entities,
            models,
            output_dir,
            partitions,
            range_start,
            range_end,
            processed_table,
            run_version,
            poll_interval_secs,
            max_wait_secs,
            max_attempts,
        } => {
            run::run(run::RunArgs {
                hits,
                sites,
                sequences,
                entities,
                models,
                output_dir,
                partitions,
                range_start,
                range_end,
                processed_table,
                run_version,
                poll_interval_secs,
                max_wait_secs,
                max_attempts,
            })
            .await
        }

        Commands::Inspect {
            hits,
            sequences,
            models,
            sites,
            entities,
        } => {
            inspect::run(inspect::InspectArgs {
                hits,
                sequences,
                models,
                sites,
                entities,
            })
            .await
        }
    }
}
