//! livesync CLI
//!
//! Thin wrapper around livesync-core for trying out live sessions from the
//! command line. Simulations run against in-memory sources on a paused tokio
//! clock, so a twenty second script finishes instantly.
//!
//! ## Usage
//!
//! ```bash
//! # Two-source call monitor (status feed + conversation feed)
//! livesync simulate call
//!
//! # Same, with the status feed failing four times in a row
//! livesync simulate call --status-failures 4
//!
//! # Alert list with optimistic mark-as-read
//! livesync simulate alerts
//!
//! # Alert list where every backing write fails and is rolled back
//! livesync simulate alerts --fail-writes
//!
//! # Print the effective configuration
//! livesync --config settings.json config show
//!
//! # Validate a configuration file
//! livesync config check settings.json
//! ```

mod simulate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livesync_core::SessionConfig;

/// livesync - live state sync for polled backends
#[derive(Parser)]
#[command(name = "livesync")]
#[command(version = "0.1.0")]
#[command(about = "livesync - live state sync for polled backends")]
#[command(
    long_about = "Merges overlapping polled sources and optimistic edits into one view that never regresses to older or emptier data."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Session configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session against in-memory sources
    Simulate {
        #[command(subcommand)]
        scenario: Scenario,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Scripted scenarios
#[derive(Subcommand)]
pub enum Scenario {
    /// Call monitor: light status feed under a detailed conversation feed
    Call {
        /// Simulated seconds to run
        #[arg(long, default_value_t = 20)]
        seconds: u64,

        /// Consecutive status feed failures, starting with its fourth fetch
        #[arg(long, default_value_t = 0)]
        status_failures: u32,
    },

    /// Alert list with optimistic mark-as-read
    Alerts {
        /// Simulated seconds to run
        #[arg(long, default_value_t = 15)]
        seconds: u64,

        /// Make every backing write fail so mutations are rolled back
        #[arg(long)]
        fail_writes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,

    /// Validate a configuration file
    Check {
        /// File to validate
        path: PathBuf,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", config.to_json_pretty()?);
            }
            ConfigAction::Check { path } => {
                let checked = load_config(Some(&path))?;
                println!("Configuration OK: {}", path.display());
                println!(
                    "  Default interval: {}ms (max backoff {}ms, stale after {} failures)",
                    checked.poller.interval_ms,
                    checked.poller.max_backoff_ms,
                    checked.poller.stale_after_failures
                );
                for (id, poller) in &checked.sources {
                    println!("  Source {}: {}ms", id, poller.interval_ms);
                }
            }
        },

        Commands::Simulate { scenario } => {
            // Paused clock: timers fire as soon as the runtime is idle.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .context("Failed to build runtime")?;
            runtime.block_on(simulate::run(scenario, config))?;
        }
    }

    Ok(())
}
