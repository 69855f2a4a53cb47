//! Transfer worker pool.
//!
//! Each worker loops: claim a transfer-ready batch from the store, run
//! it through the executor, resolve every member. The store's claim is
//! the only arbiter of ownership; workers hold no shared locks. A
//! worker that sees the shutdown flag stops claiming but finishes the
//! attempt it already owns.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{error, info, warn};

use relay_store::{JobStore, RetryPolicy};

use crate::transfer::TransferRunner;

/// Idle backoff base (ms) when the queue is empty.
const IDLE_BACKOFF_BASE_MS: u64 = 50;
/// Idle backoff max (ms).
const IDLE_BACKOFF_MAX_MS: u64 = 1_000;
/// Idle backoff jitter cap (ms).
const IDLE_BACKOFF_JITTER_MS: u64 = 50;

pub struct Worker {
    id: String,
    store: JobStore,
    runner: Arc<TransferRunner>,
    policy: RetryPolicy,
    batch_size: u32,
}

impl Worker {
    pub fn new(
        id: String,
        store: JobStore,
        runner: Arc<TransferRunner>,
        policy: RetryPolicy,
        batch_size: u32,
    ) -> Self {
        Self {
            id,
            store,
            runner,
            policy,
            batch_size,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, "worker started");
        let claim_limit = self.runner.claim_limit(self.batch_size);
        let mut idle_backoff_ms = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let jobs = match self.store.claim_next_transfer(&self.id, claim_limit).await {
                Ok(jobs) => jobs,
                Err(err) => {
                    // The store is authoritative state; back off and
                    // retry access instead of dying.
                    error!(worker = %self.id, "claim failed: {err}");
                    idle_backoff_ms = next_backoff(idle_backoff_ms);
                    if sleep_or_shutdown(idle_backoff_ms, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if jobs.is_empty() {
                idle_backoff_ms = next_backoff(idle_backoff_ms);
                if sleep_or_shutdown(idle_backoff_ms, &mut shutdown).await {
                    break;
                }
                continue;
            }
            idle_backoff_ms = 0;

            // In-flight attempts are drained, not aborted: the executor
            // timeout bounds how long this can take.
            match self.runner.run_batch(&jobs).await {
                Ok(()) => {
                    for job in &jobs {
                        if let Err(err) = self.store.mark_succeeded(job.id).await {
                            error!(job = job.id, "cannot record success: {err}");
                        }
                    }
                }
                Err(transfer_err) => {
                    // All-or-nothing: a batch failure fails every member
                    // for this attempt.
                    let description = transfer_err.describe();
                    warn!(
                        worker = %self.id,
                        files = jobs.len(),
                        "transfer attempt failed: {description}"
                    );
                    for job in &jobs {
                        if let Err(err) = self
                            .store
                            .fail_attempt(job.id, &description, &self.policy)
                            .await
                        {
                            error!(job = job.id, "cannot record failure: {err}");
                        }
                    }
                }
            }
        }
        info!(worker = %self.id, "worker stopped");
    }
}

fn next_backoff(current_ms: u64) -> u64 {
    let next = if current_ms == 0 {
        IDLE_BACKOFF_BASE_MS
    } else {
        (current_ms * 2).min(IDLE_BACKOFF_MAX_MS)
    };
    let jitter_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % IDLE_BACKOFF_JITTER_MS)
        .unwrap_or(0);
    next + jitter_ms
}

/// Sleep for the given backoff; true when shutdown fired instead.
async fn sleep_or_shutdown(backoff_ms: u64, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_to_cap() {
        let first = next_backoff(0);
        assert!(first >= IDLE_BACKOFF_BASE_MS);
        assert!(first < IDLE_BACKOFF_BASE_MS + IDLE_BACKOFF_JITTER_MS);

        let capped = next_backoff(IDLE_BACKOFF_MAX_MS);
        assert!(capped >= IDLE_BACKOFF_MAX_MS);
        assert!(capped < IDLE_BACKOFF_MAX_MS + IDLE_BACKOFF_JITTER_MS);
    }
}
