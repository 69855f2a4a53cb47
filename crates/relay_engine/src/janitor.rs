//! Housekeeping for the buffer and the staging area.
//!
//! Empty buffer subdirectories are removed once they have sat
//! unmodified past the expiration time, so a producer still writing
//! into a fresh directory is never raced. The remote staging area is
//! swept of empty directories left behind by published batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::transfer::TransferRunner;

pub struct Janitor {
    buffer: PathBuf,
    expiration: Duration,
    runner: Arc<TransferRunner>,
}

impl Janitor {
    pub fn new(buffer: PathBuf, expiration: Duration, runner: Arc<TransferRunner>) -> Self {
        Self {
            buffer,
            expiration,
            runner,
        }
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("janitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }

            let root = self.buffer.clone();
            let expiration = self.expiration;
            let removed = tokio::task::spawn_blocking(move || sweep_local(&root, expiration))
                .await
                .unwrap_or(0);
            if removed > 0 {
                debug!(removed, "removed expired empty buffer directories");
            }

            if let Err(err) = self.runner.wipe_staging().await {
                warn!("staging sweep failed: {err}");
            }
        }
        info!("janitor stopped");
    }
}

/// Remove empty directories older than `expiration`. Bottom-up, so a
/// directory that only contained expired empty children goes too on a
/// later sweep.
fn sweep_local(root: &Path, expiration: Duration) -> usize {
    let mut removed = 0;
    let now = SystemTime::now();
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("buffer sweep error: {err}");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();

        let is_empty = match std::fs::read_dir(path) {
            Ok(mut contents) => contents.next().is_none(),
            Err(_) => continue,
        };
        if !is_empty {
            continue;
        }

        let expired = entry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|mtime| now.duration_since(mtime).ok())
            .map(|age| age > expiration)
            .unwrap_or(false);
        if !expired {
            continue;
        }

        match std::fs::remove_dir(path) {
            Ok(()) => removed += 1,
            Err(err) => warn!(path = %path.display(), "cannot remove directory: {err}"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_only_expired_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("old_empty");
        let full = dir.path().join("full");
        std::fs::create_dir_all(&empty).unwrap();
        std::fs::create_dir_all(&full).unwrap();
        std::fs::write(full.join("keep.fits"), b"x").unwrap();

        // Zero expiration: everything empty is already stale.
        let removed = sweep_local(dir.path(), Duration::ZERO);
        assert_eq!(removed, 1);
        assert!(!empty.exists());
        assert!(full.exists());

        // A long expiration protects freshly created directories.
        let fresh = dir.path().join("fresh_empty");
        std::fs::create_dir_all(&fresh).unwrap();
        let removed = sweep_local(dir.path(), Duration::from_secs(3600));
        assert_eq!(removed, 0);
        assert!(fresh.exists());
    }
}
