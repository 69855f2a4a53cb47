//! Buffer discovery.
//!
//! Walks the local buffer on a fixed interval and registers every file
//! it finds, exactly once per lineage. Listing errors are logged and
//! retried on the next tick; they never crash the engine and never
//! leave partial job rows behind.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use relay_store::JobStore;

pub struct Scanner {
    buffer: PathBuf,
    store: JobStore,
}

struct ScannedFile {
    relpath: String,
    filename: String,
    size_bytes: i64,
    checksum: String,
}

impl Scanner {
    pub fn new(buffer: PathBuf, store: JobStore) -> Self {
        Self { buffer, store }
    }

    /// One sweep of the buffer. Returns the number of new jobs created.
    pub async fn scan(&self) -> usize {
        let root = self.buffer.clone();
        let listing = tokio::task::spawn_blocking(move || list_files(&root)).await;
        let files = match listing {
            Ok(files) => files,
            Err(err) => {
                error!("buffer listing task failed: {err}");
                return 0;
            }
        };

        let mut created = 0;
        for file in files {
            match self
                .store
                .create_if_absent(&file.relpath, &file.filename, file.size_bytes, &file.checksum)
                .await
            {
                Ok(outcome) if outcome.is_created() => created += 1,
                Ok(_) => {}
                Err(err) => {
                    // The store is authoritative; skip this file and let
                    // the next sweep pick it up.
                    warn!(
                        file = %file.relpath,
                        "failed to register {}: {err}",
                        file.filename
                    );
                }
            }
        }
        created
    }

    /// Periodic scan loop; stops as soon as shutdown flips.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(buffer = %self.buffer.display(), "scanner started");
        loop {
            let created = self.scan().await;
            if created > 0 {
                info!(created, "scan registered new files");
            } else {
                debug!("scan found nothing new");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scanner stopped");
    }
}

fn list_files(root: &Path) -> Vec<ScannedFile> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("buffer walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let filename = match rel.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let relpath = rel
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        // A file can disappear between listing and stat (a racing
        // writer, or the archiver); skip it quietly.
        let (size_bytes, checksum) = match fingerprint(path) {
            Ok(fp) => fp,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                warn!(path = %path.display(), "cannot fingerprint file: {err}");
                continue;
            }
        };

        files.push(ScannedFile {
            relpath,
            filename,
            size_bytes,
            checksum,
        });
    }
    files
}

fn fingerprint(path: &Path) -> io::Result<(i64, String)> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len() as i64;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok((size, hasher.finalize().to_hex().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::JobState;

    async fn store() -> JobStore {
        let store = JobStore::open_in_memory().await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn scan_registers_new_files_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2026/08")).unwrap();
        std::fs::write(dir.path().join("top.fits"), b"one").unwrap();
        std::fs::write(dir.path().join("2026/08/deep.fits"), b"two").unwrap();

        let store = store().await;
        let scanner = Scanner::new(dir.path().to_path_buf(), store.clone());

        assert_eq!(scanner.scan().await, 2);
        // Rescan of unchanged, in-flight files creates nothing.
        assert_eq!(scanner.scan().await, 0);

        let jobs = store.list_active().await.unwrap();
        assert_eq!(jobs.len(), 2);
        let deep = jobs.iter().find(|j| j.filename == "deep.fits").unwrap();
        assert_eq!(deep.relpath, "2026/08");
        assert_eq!(deep.size_bytes, 3);
        assert_eq!(deep.state, JobState::New);
        assert!(!deep.checksum.is_empty());
    }

    #[tokio::test]
    async fn missing_buffer_is_not_fatal() {
        let store = store().await;
        let scanner = Scanner::new(PathBuf::from("/nonexistent/relay/buffer"), store);
        assert_eq!(scanner.scan().await, 0);
    }

    #[tokio::test]
    async fn rescan_after_failure_keeps_single_lineage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.fits"), b"data").unwrap();

        let store = store().await;
        let scanner = Scanner::new(dir.path().to_path_buf(), store.clone());
        assert_eq!(scanner.scan().await, 1);

        // Job fails an attempt and waits for retry; the file is still
        // in the buffer, but no duplicate lineage may appear.
        let job = store.claim_next_transfer("w0", 1).await.unwrap();
        store
            .fail_attempt(job[0].id, "exit 1", &Default::default())
            .await
            .unwrap();
        assert_eq!(scanner.scan().await, 0);
        assert_eq!(store.list_active().await.unwrap().len(), 1);
    }
}
