//! Engine wiring and lifecycle.
//!
//! `start_engine` validates everything that can fail fast, reconciles
//! store rows left over from a previous run, and spawns the scanner,
//! the worker pool, the archiver, and the janitor. The returned handle
//! owns the shutdown signal: flipping it stops dispatch immediately
//! while in-flight attempts drain.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use relay_store::JobStore;

use crate::archiver::Archiver;
use crate::config::Config;
use crate::error::{ConfigError, EngineError};
use crate::janitor::Janitor;
use crate::scanner::Scanner;
use crate::transfer::TransferRunner;
use crate::worker::Worker;

/// Open the job store and create its schema.
pub async fn initialize_store(url: &str) -> Result<JobStore, relay_store::StoreError> {
    let store = JobStore::open(url).await?;
    store.init().await?;
    Ok(store)
}

pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Graceful drain: stop the scanner and all claiming immediately,
    /// wait for in-flight attempts to resolve.
    pub async fn shutdown(self) {
        info!("engine shutting down");
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("engine stopped");
    }
}

pub async fn start_engine(config: Config, store: JobStore) -> Result<EngineHandle, EngineError> {
    // Fail fast, before any scan: template roles, reserved names,
    // referenced parameters, local directories.
    let runner = Arc::new(TransferRunner::from_config(&config)?);
    for dir in [&config.handoff.buffer, &config.handoff.holding] {
        if !dir.is_dir() {
            return Err(ConfigError::DirectoryNotFound(dir.clone()).into());
        }
    }

    store.recover().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let scanner = Scanner::new(config.handoff.buffer.clone(), store.clone());
    tasks.push(tokio::spawn(
        scanner.run(config.scan_interval(), shutdown_rx.clone()),
    ));

    let policy = config.retry_policy();
    for n in 0..config.general.num_workers.max(1) {
        let worker = Worker::new(
            format!("worker-{n}"),
            store.clone(),
            Arc::clone(&runner),
            policy,
            config.general.batch_size,
        );
        tasks.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    let archiver = Archiver::new(
        config.handoff.buffer.clone(),
        config.handoff.holding.clone(),
        store.clone(),
    );
    tasks.push(tokio::spawn(archiver.run(shutdown_rx.clone())));

    let janitor = Janitor::new(
        config.handoff.buffer.clone(),
        std::time::Duration::from_secs(config.general.expiration_time_secs),
        Arc::clone(&runner),
    );
    tasks.push(tokio::spawn(
        janitor.run(config.scan_interval(), shutdown_rx),
    ));

    info!(
        workers = config.general.num_workers.max(1),
        buffer = %config.handoff.buffer.display(),
        endpoint = %config.endpoint.host,
        "engine started"
    );
    Ok(EngineHandle {
        shutdown: shutdown_tx,
        tasks,
    })
}
