//! Local archival of delivered files.
//!
//! Claims `SUCCEEDED` jobs (a claim class disjoint from transfer
//! claims) and moves their source files from the buffer into the
//! holding area with an atomic same-filesystem rename.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use relay_store::{Job, JobStore};

/// Poll delay when no job is ready for archival.
const IDLE_DELAY_MS: u64 = 250;

pub struct Archiver {
    buffer: PathBuf,
    holding: PathBuf,
    store: JobStore,
}

impl Archiver {
    pub fn new(buffer: PathBuf, holding: PathBuf, store: JobStore) -> Self {
        Self {
            buffer,
            holding,
            store,
        }
    }

    /// Move one delivered file into the holding area.
    ///
    /// Idempotent: a source already gone means a previous run finished
    /// the move before it could record `ARCHIVED`; that is success, not
    /// an error.
    pub async fn archive(&self, job: &Job) -> std::io::Result<()> {
        let src = job.path_under(&self.buffer);
        let dst = job.path_under(&self.holding);

        match tokio::fs::metadata(&src).await {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(job = job.id, "source already moved, completing archival");
                return Ok(());
            }
            Err(err) => return Err(err),
            Ok(_) => {}
        }

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&src, &dst).await?;
        info!(job = job.id, file = %job.rel_display(), "moved to holding area");
        Ok(())
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(holding = %self.holding.display(), "archiver started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let claimed = match self.store.claim_next_archive("archiver").await {
                Ok(claimed) => claimed,
                Err(err) => {
                    error!("archive claim failed: {err}");
                    None
                }
            };

            match claimed {
                Some(job) => match self.archive(&job).await {
                    Ok(()) => {
                        if let Err(err) = self.store.mark_archived(job.id).await {
                            error!(job = job.id, "cannot record archival: {err}");
                        }
                    }
                    Err(move_err) => {
                        // Transfer state never regresses; the claim is
                        // released and retried on a later cycle.
                        warn!(job = job.id, "archive move failed: {move_err}");
                        if let Err(err) = self
                            .store
                            .release_archive(job.id, &format!("archive move failed: {move_err}"))
                            .await
                        {
                            error!(job = job.id, "cannot release archive claim: {err}");
                        }
                    }
                },
                None => {
                    tokio::select! {
                        _ = sleep(Duration::from_millis(IDLE_DELAY_MS)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        info!("archiver stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::JobState;

    async fn delivered_job(store: &JobStore, relpath: &str, filename: &str) -> Job {
        let id = store
            .create_if_absent(relpath, filename, 4, "sum")
            .await
            .unwrap()
            .job()
            .id;
        store.claim_next_transfer("w0", 1).await.unwrap();
        store.mark_succeeded(id).await.unwrap();
        store.claim_next_archive("archiver").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn moves_file_into_holding_tree() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = dir.path().join("buffer");
        let holding = dir.path().join("holding");
        std::fs::create_dir_all(buffer.join("2026")).unwrap();
        std::fs::create_dir_all(&holding).unwrap();
        std::fs::write(buffer.join("2026/a.fits"), b"data").unwrap();

        let store = JobStore::open_in_memory().await.unwrap();
        store.init().await.unwrap();
        let job = delivered_job(&store, "2026", "a.fits").await;

        let archiver = Archiver::new(buffer.clone(), holding.clone(), store.clone());
        archiver.archive(&job).await.unwrap();
        store.mark_archived(job.id).await.unwrap();

        assert!(!buffer.join("2026/a.fits").exists());
        assert!(holding.join("2026/a.fits").exists());
        assert_eq!(store.get(job.id).await.unwrap().state, JobState::Archived);
    }

    #[tokio::test]
    async fn absent_source_still_archives() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = dir.path().join("buffer");
        let holding = dir.path().join("holding");
        std::fs::create_dir_all(&buffer).unwrap();
        std::fs::create_dir_all(&holding).unwrap();
        // No source file: the move already happened in a previous,
        // crashed run.

        let store = JobStore::open_in_memory().await.unwrap();
        store.init().await.unwrap();
        let job = delivered_job(&store, "", "gone.fits").await;

        let archiver = Archiver::new(buffer, holding, store.clone());
        archiver.archive(&job).await.unwrap();
        store.mark_archived(job.id).await.unwrap();
        assert_eq!(store.get(job.id).await.unwrap().state, JobState::Archived);
    }

    #[tokio::test]
    async fn failed_move_releases_the_claim() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = dir.path().join("buffer");
        std::fs::create_dir_all(&buffer).unwrap();
        std::fs::write(buffer.join("a.fits"), b"data").unwrap();

        let store = JobStore::open_in_memory().await.unwrap();
        store.init().await.unwrap();
        let job = delivered_job(&store, "", "a.fits").await;

        // Holding area is a plain file: create_dir_all/rename must fail.
        let holding = dir.path().join("holding");
        std::fs::write(&holding, b"not a dir").unwrap();

        let archiver = Archiver::new(buffer.clone(), holding, store.clone());
        assert!(archiver.archive(&job).await.is_err());
        store
            .release_archive(job.id, "archive move failed")
            .await
            .unwrap();

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert!(buffer.join("a.fits").exists());
        // Claimable again later.
        assert!(store.claim_next_archive("archiver").await.unwrap().is_some());
    }
}
