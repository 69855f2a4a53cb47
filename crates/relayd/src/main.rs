//! relayd - buffer-to-endpoint file relay daemon.
//!
//! Usage:
//!     relayd --config /etc/relay/relay.yaml

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

use relay_engine::{initialize_store, start_engine, Config};
use relay_logging::LogConfig;

const DEFAULT_DATABASE_URL: &str = "sqlite:relay.db?mode=rwc";

#[derive(Parser, Debug)]
#[command(name = "relayd", about = "Relay buffered files to an endpoint site")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "RELAYD_CONFIG")]
    config: PathBuf,

    /// Log at debug level on stderr
    #[arg(short, long)]
    verbose: bool,
}

/// Daemon configuration: engine sections plus daemon-only concerns.
#[derive(Debug, Deserialize)]
struct DaemonConfig {
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(flatten)]
    engine: Config,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseConfig {
    /// sqlx URL of the job store.
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingConfig {
    /// Directory for the rolling log file; stderr-only when absent.
    dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("cannot read configuration {}", args.config.display()))?;
    let config: DaemonConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("malformed configuration {}", args.config.display()))?;

    relay_logging::init_logging(LogConfig {
        app_name: "relayd",
        log_dir: config.logging.dir.as_deref(),
        verbose: args.verbose,
    })?;

    let url = config
        .database
        .url
        .clone()
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    info!(database = %url, "opening job store");
    let store = initialize_store(&url)
        .await
        .context("failed to initialize job store")?;

    let handle = start_engine(config.engine, store)
        .await
        .context("failed to start engine")?;

    wait_for_signal().await?;
    info!("shutdown signal received, draining");
    handle.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("cannot wait for ctrl-c")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("cannot wait for ctrl-c")
}
