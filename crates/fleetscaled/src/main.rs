//! fleetscaled — the fleetscale health event daemon.
//!
//! Loads the fleet layout, registers a monitor per cluster, and runs the
//! health event dispatcher over newline-delimited JSON events read from
//! stdin or a file. Provisioning is dry-run: requests are logged only.
//!
//! # Usage
//!
//! ```text
//! fleetscaled init > fleetscale.toml
//! fleetscaled run --config fleetscale.toml --events events.ndjson
//! ```

mod bootstrap;
mod feed;
mod provisioner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleetscale_core::FleetConfig;
use fleetscale_health::{HealthEventDispatcher, HealthEventQueue};
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::bootstrap;
use crate::feed::feed_lines;
use crate::provisioner::DryRunProvisioner;

const DEFAULT_LOG_FILTER: &str = "info,fleetscale=debug";

#[derive(Parser)]
#[command(name = "fleetscaled", about = "fleetscale health event daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume health events and apply them to the monitored fleet.
    Run {
        /// Fleet configuration file.
        #[arg(long, default_value = "fleetscale.toml")]
        config: PathBuf,

        /// Read events from this file instead of stdin.
        #[arg(long)]
        events: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Print a starter fleetscale.toml.
    Init,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            events,
            log_json,
        } => {
            let config = FleetConfig::from_file(&config)?;
            init_tracing(config.logging.filter.as_deref(), log_json);

            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(run(config, events.as_deref()));
            // A pending stdin read would otherwise hold the runtime open.
            runtime.shutdown_background();
            result
        }
        Command::Init => {
            print!("{}", FleetConfig::scaffold().to_toml_string()?);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins, then the config file, then the built-in default.
fn init_tracing(config_filter: Option<&str>, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run(config: FleetConfig, events: Option<&Path>) -> anyhow::Result<()> {
    info!("fleetscale daemon starting");

    let fleet = bootstrap(&config)?;
    let dispatcher =
        HealthEventDispatcher::new(fleet.index, fleet.context, Arc::new(DryRunProvisioner));
    let (publisher, receiver) = HealthEventQueue::bounded(config.queue.capacity);
    info!(capacity = config.queue.capacity, "health event queue ready");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "failed to install Ctrl-C handler");
                // Keep the sender alive so the dispatcher still drains the feed.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    // ── Dispatcher and input feed ──────────────────────────────

    let dispatch_handle =
        tokio::spawn(async move { dispatcher.run(receiver, shutdown_rx).await });

    let feed_handle = match events {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            info!(path = %path.display(), "reading health events from file");
            tokio::spawn(feed_lines(BufReader::new(file), publisher))
        }
        None => {
            info!("reading health events from stdin");
            tokio::spawn(feed_lines(BufReader::new(tokio::io::stdin()), publisher))
        }
    };

    let stats = dispatch_handle.await?;

    // The dispatcher only stops early on Ctrl-C; stdin may still be open.
    if !feed_handle.is_finished() {
        feed_handle.abort();
    } else if let Err(e) = feed_handle.await? {
        error!(error = %e, "failed to read health events");
    }

    info!(
        received = stats.received,
        applied = stats.applied,
        dropped = stats.dropped,
        "fleetscale daemon stopped"
    );
    Ok(())
}
