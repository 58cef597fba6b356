//! # fabsync
//!
//! Entry point of the fabsync CLI.
//!
//! ## Startup
//!
//! 1. **Arguments** - parsed with clap
//! 2. **Configuration** - `--config`, else `./fabsync.toml`, else defaults
//! 3. **Tracing** - `RUST_LOG` when set, else `[log] filter`
//! 4. **Command** - output is printed to stdout as JSON
//!
//! ## Shutdown
//!
//! `run` without `--max-passes` reconciles until Ctrl+C, then stops both
//! loops, tears down the observation workers and prints the final report.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fabsync::cli::{Cli, Commands};
use fabsync::commands::{self, RunOptions};
use fabsync::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config.log.filter);

    let output = match cli.command {
        Commands::Tree { state, kind } => commands::tree(&state, kind.into()).await?,
        Commands::Diff {
            desired,
            observed,
            kind,
        } => commands::diff(&desired, &observed, kind.into()).await?,
        Commands::Run {
            desired,
            observed,
            max_passes,
            output,
        } => {
            let options = RunOptions {
                desired,
                observed,
                max_passes,
                output,
            };
            let report = commands::run(&config, options, wait_for_shutdown()).await?;
            info!(converged = report.converged, "Run finished");
            fabsync_core::fs::to_json_pretty(&report)?
        }
    };

    println!("{output}");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
