//! SQLite-backed job store.
//!
//! Claiming uses conditional `UPDATE ... WHERE state = ...` so that no
//! two concurrent callers ever receive the same row, regardless of how
//! many worker tasks or processes share the database file.

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::model::{Job, JobState, RetryPolicy};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS relay_jobs (
    id          INTEGER PRIMARY KEY,
    relpath     TEXT NOT NULL,
    filename    TEXT NOT NULL,
    size_bytes  INTEGER NOT NULL DEFAULT 0,
    checksum    TEXT NOT NULL DEFAULT '',
    state       TEXT NOT NULL DEFAULT 'NEW',
    attempts    INTEGER NOT NULL DEFAULT 0,
    claimed_by  TEXT,
    retry_at    TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    last_error  TEXT
);
CREATE INDEX IF NOT EXISTS idx_relay_jobs_state ON relay_jobs(state);
CREATE INDEX IF NOT EXISTS idx_relay_jobs_file ON relay_jobs(relpath, filename);
"#;

/// Result of an idempotent job registration.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Job),
    Existing(Job),
}

impl CreateOutcome {
    pub fn job(&self) -> &Job {
        match self {
            CreateOutcome::Created(job) | CreateOutcome::Existing(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Per-state row counts.
#[derive(Debug, sqlx::FromRow)]
pub struct QueueStats {
    pub new: i32,
    pub in_progress: i32,
    pub retry_wait: i32,
    pub succeeded: i32,
    pub failed_permanent: i32,
    pub archived: i32,
}

#[derive(Clone)]
pub struct JobStore {
    pool: Pool<Sqlite>,
}

impl JobStore {
    /// Open a store at the given sqlx URL (e.g. `sqlite:relay.db?mode=rwc`).
    pub async fn open(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Open a store backed by a database file, creating it if needed.
    pub async fn open_file(path: impl AsRef<str>) -> Result<Self> {
        Self::open(&format!("sqlite:{}?mode=rwc", path.as_ref())).await
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        // A single connection: every handle must see the same memory db,
        // and recycling it would discard the data.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Reconcile rows left over from a crashed run: orphaned
    /// `IN_PROGRESS` claims become immediately retryable and stale
    /// archive claims are released. The attempt that was under way
    /// keeps its count; its outcome is simply unknown.
    pub async fn recover(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let orphaned = sqlx::query(
            r#"
            UPDATE relay_jobs
            SET state = 'RETRY_WAIT', claimed_by = NULL, retry_at = ?, updated_at = ?
            WHERE state = 'IN_PROGRESS'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let stale = sqlx::query(
            r#"
            UPDATE relay_jobs
            SET claimed_by = NULL, updated_at = ?
            WHERE state = 'SUCCEEDED' AND claimed_by IS NOT NULL
            "#,
        )
        .bind(&now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if orphaned + stale > 0 {
            info!(
                orphaned,
                stale, "recovered claims left over from a previous run"
            );
        }
        Ok(orphaned + stale)
    }

    /// Register a file, exactly once per lineage.
    ///
    /// A row in any state other than `FAILED_PERMANENT` blocks a second
    /// lineage for the same (relpath, filename). A permanently failed
    /// row only yields a fresh lineage when the file's content (its
    /// checksum) has changed; rescanning the same failed file is a
    /// no-op requiring operator intervention.
    pub async fn create_if_absent(
        &self,
        relpath: &str,
        filename: &str,
        size_bytes: i64,
        checksum: &str,
    ) -> Result<CreateOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Job> = sqlx::query_as(
            r#"
            SELECT * FROM relay_jobs
            WHERE relpath = ? AND filename = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(relpath)
        .bind(filename)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(job) = existing {
            let blocks = job.state != JobState::FailedPermanent || job.checksum == checksum;
            if blocks {
                tx.commit().await?;
                return Ok(CreateOutcome::Existing(job));
            }
        }

        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            r#"
            INSERT INTO relay_jobs (relpath, filename, size_bytes, checksum, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'NEW', ?, ?)
            "#,
        )
        .bind(relpath)
        .bind(filename)
        .bind(size_bytes)
        .bind(checksum)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let job: Job = sqlx::query_as("SELECT * FROM relay_jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(job = id, file = %job.rel_display(), "job created");
        Ok(CreateOutcome::Created(job))
    }

    /// Atomically claim up to `limit` transfer-ready jobs for a worker.
    ///
    /// Claimable: `NEW`, or `RETRY_WAIT` whose backoff deadline has
    /// elapsed. All claimed jobs share one relpath so they can form a
    /// single transfer batch. The claim itself is the conditional
    /// UPDATE; a row raced away by another worker is simply skipped.
    pub async fn claim_next_transfer(&self, worker_id: &str, limit: u32) -> Result<Vec<Job>> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let relpath: Option<String> = sqlx::query_scalar(
            r#"
            SELECT relpath FROM relay_jobs
            WHERE state = 'NEW' OR (state = 'RETRY_WAIT' AND retry_at <= ?)
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(&now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(relpath) = relpath else {
            tx.commit().await?;
            return Ok(Vec::new());
        };

        let candidates: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM relay_jobs
            WHERE relpath = ?
              AND (state = 'NEW' OR (state = 'RETRY_WAIT' AND retry_at <= ?))
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(&relpath)
        .bind(&now)
        .bind(limit.max(1) as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let rows_affected = sqlx::query(
                r#"
                UPDATE relay_jobs
                SET state = 'IN_PROGRESS',
                    claimed_by = ?,
                    attempts = attempts + 1,
                    updated_at = ?
                WHERE id = ?
                  AND (state = 'NEW' OR (state = 'RETRY_WAIT' AND retry_at <= ?))
                "#,
            )
            .bind(worker_id)
            .bind(&now)
            .bind(id)
            .bind(&now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if rows_affected == 1 {
                let job: Job = sqlx::query_as("SELECT * FROM relay_jobs WHERE id = ?")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
                claimed.push(job);
            }
        }

        tx.commit().await?;
        if !claimed.is_empty() {
            debug!(
                worker = worker_id,
                count = claimed.len(),
                relpath = %relpath,
                "claimed transfer jobs"
            );
        }
        Ok(claimed)
    }

    /// Atomically claim one `SUCCEEDED` job for archival.
    ///
    /// A disjoint claim class: transfer workers never touch these rows
    /// and the archiver never touches transfer-claimable ones.
    pub async fn claim_next_archive(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM relay_jobs
            WHERE state = 'SUCCEEDED' AND claimed_by IS NULL
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            tx.commit().await?;
            return Ok(None);
        };

        let rows_affected = sqlx::query(
            r#"
            UPDATE relay_jobs
            SET claimed_by = ?, updated_at = ?
            WHERE id = ? AND state = 'SUCCEEDED' AND claimed_by IS NULL
            "#,
        )
        .bind(worker_id)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let job: Job = sqlx::query_as("SELECT * FROM relay_jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    /// Mark a claimed job's transfer as confirmed on the endpoint.
    pub async fn mark_succeeded(&self, job_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            r#"
            UPDATE relay_jobs
            SET state = 'SUCCEEDED',
                claimed_by = NULL,
                retry_at = NULL,
                last_error = NULL,
                updated_at = ?
            WHERE id = ? AND state = 'IN_PROGRESS'
            "#,
        )
        .bind(&now)
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::conflict(format!(
                "job {job_id} is not IN_PROGRESS"
            )));
        }
        info!(job = job_id, "transfer confirmed");
        Ok(())
    }

    /// Record a failed attempt for a claimed job.
    ///
    /// Resolves the retryable failure in one atomic step: back to
    /// `RETRY_WAIT` with an exponential-backoff deadline while attempts
    /// remain, `FAILED_PERMANENT` once they are exhausted.
    pub async fn fail_attempt(
        &self,
        job_id: i64,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<JobState> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, i32)> =
            sqlx::query_as("SELECT state, attempts FROM relay_jobs WHERE id = ?")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((state, attempts)) = row else {
            return Err(StoreError::NotFound(job_id));
        };
        if state != JobState::InProgress.as_str() {
            return Err(StoreError::conflict(format!(
                "job {job_id} is {state}, not IN_PROGRESS"
            )));
        }

        let now = Utc::now();
        let next = if attempts as u32 >= policy.max_attempts {
            JobState::FailedPermanent
        } else {
            JobState::RetryWait
        };
        let retry_at = match next {
            JobState::RetryWait => Some(
                (now + chrono::Duration::from_std(policy.delay_for(attempts.max(1) as u32))
                    .unwrap_or_else(|_| chrono::Duration::seconds(0)))
                .to_rfc3339(),
            ),
            _ => None,
        };

        let rows_affected = sqlx::query(
            r#"
            UPDATE relay_jobs
            SET state = ?,
                claimed_by = NULL,
                retry_at = ?,
                last_error = ?,
                updated_at = ?
            WHERE id = ? AND state = 'IN_PROGRESS'
            "#,
        )
        .bind(next)
        .bind(&retry_at)
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        if rows_affected == 0 {
            return Err(StoreError::conflict(format!(
                "job {job_id} left IN_PROGRESS during failure handling"
            )));
        }

        info!(job = job_id, attempts, state = %next, "attempt failed: {error}");
        Ok(next)
    }

    /// Mark a job archived after the local move completed.
    pub async fn mark_archived(&self, job_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            r#"
            UPDATE relay_jobs
            SET state = 'ARCHIVED',
                claimed_by = NULL,
                last_error = NULL,
                updated_at = ?
            WHERE id = ? AND state = 'SUCCEEDED'
            "#,
        )
        .bind(&now)
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::conflict(format!(
                "job {job_id} is not SUCCEEDED"
            )));
        }
        info!(job = job_id, "archived");
        Ok(())
    }

    /// Release an archive claim after a failed local move. The job
    /// stays `SUCCEEDED` and becomes claimable again; its transfer
    /// state never regresses.
    pub async fn release_archive(&self, job_id: i64, error: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE relay_jobs
            SET claimed_by = NULL, last_error = ?, updated_at = ?
            WHERE id = ? AND state = 'SUCCEEDED'
            "#,
        )
        .bind(error)
        .bind(&now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All non-terminal jobs, oldest first.
    pub async fn list_active(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as(
            r#"
            SELECT * FROM relay_jobs
            WHERE state NOT IN ('FAILED_PERMANENT', 'ARCHIVED')
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// Fetch one job by id.
    pub async fn get(&self, job_id: i64) -> Result<Job> {
        sqlx::query_as("SELECT * FROM relay_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(job_id))
    }

    /// Per-state row counts.
    pub async fn stats(&self) -> Result<QueueStats> {
        let stats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'NEW') as "new",
                COUNT(*) FILTER (WHERE state = 'IN_PROGRESS') as in_progress,
                COUNT(*) FILTER (WHERE state = 'RETRY_WAIT') as retry_wait,
                COUNT(*) FILTER (WHERE state = 'SUCCEEDED') as succeeded,
                COUNT(*) FILTER (WHERE state = 'FAILED_PERMANENT') as failed_permanent,
                COUNT(*) FILTER (WHERE state = 'ARCHIVED') as archived
            FROM relay_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn setup() -> JobStore {
        let store = JobStore::open_in_memory().await.unwrap();
        store.init().await.unwrap();
        store
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(0),
            backoff_cap: Duration::from_millis(0),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_while_in_flight() {
        let store = setup().await;

        let first = store
            .create_if_absent("2026/08", "a.fits", 42, "abc")
            .await
            .unwrap();
        assert!(first.is_created());

        // A rescan of the same file must not create a second lineage.
        let second = store
            .create_if_absent("2026/08", "a.fits", 42, "abc")
            .await
            .unwrap();
        assert!(!second.is_created());
        assert_eq!(second.job().id, first.job().id);

        // Still blocked while the job is claimed.
        let claimed = store.claim_next_transfer("w0", 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let third = store
            .create_if_absent("2026/08", "a.fits", 42, "abc")
            .await
            .unwrap();
        assert!(!third.is_created());
    }

    #[tokio::test]
    async fn permanent_failure_blocks_same_checksum_only() {
        let store = setup().await;
        let policy = quick_policy();
        let job = store
            .create_if_absent("", "b.fits", 1, "sum1")
            .await
            .unwrap()
            .job()
            .id;

        for _ in 0..3 {
            let claimed = store.claim_next_transfer("w0", 1).await.unwrap();
            assert_eq!(claimed.len(), 1);
            store.fail_attempt(job, "exit 1", &policy).await.unwrap();
        }
        assert_eq!(store.get(job).await.unwrap().state, JobState::FailedPermanent);

        // Same content: no new lineage, failed job requires intervention.
        let same = store.create_if_absent("", "b.fits", 1, "sum1").await.unwrap();
        assert!(!same.is_created());

        // New content under the same name: fresh lineage.
        let fresh = store.create_if_absent("", "b.fits", 2, "sum2").await.unwrap();
        assert!(fresh.is_created());
        assert_ne!(fresh.job().id, job);
    }

    #[tokio::test]
    async fn claim_is_exclusive_between_workers() {
        let store = setup().await;
        store.create_if_absent("", "c.fits", 1, "x").await.unwrap();

        let a = store.claim_next_transfer("w0", 1).await.unwrap();
        let b = store.claim_next_transfer("w1", 1).await.unwrap();
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        assert_eq!(a[0].attempts, 1);
        assert_eq!(a[0].state, JobState::InProgress);
    }

    #[tokio::test]
    async fn concurrent_claimers_never_share_a_job() {
        let store = setup().await;
        for i in 0..16 {
            store
                .create_if_absent("", &format!("f{i}.fits"), 1, "x")
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let jobs = store.claim_next_transfer(&format!("w{w}"), 2).await.unwrap();
                    if jobs.is_empty() {
                        break;
                    }
                    mine.extend(jobs.into_iter().map(|j| j.id));
                }
                mine
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 16);
    }

    #[tokio::test]
    async fn batch_claim_stays_within_one_relpath() {
        let store = setup().await;
        store.create_if_absent("a", "1.fits", 1, "x").await.unwrap();
        store.create_if_absent("a", "2.fits", 1, "x").await.unwrap();
        store.create_if_absent("b", "3.fits", 1, "x").await.unwrap();

        let batch = store.claim_next_transfer("w0", 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|j| j.relpath == "a"));
    }

    #[tokio::test]
    async fn failed_attempt_backs_off_with_deadline() {
        let store = setup().await;
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff_base: Duration::from_secs(3600),
            backoff_cap: Duration::from_secs(3600),
        };
        let id = store
            .create_if_absent("", "d.fits", 1, "x")
            .await
            .unwrap()
            .job()
            .id;

        store.claim_next_transfer("w0", 1).await.unwrap();
        let state = store.fail_attempt(id, "boom", &policy).await.unwrap();
        assert_eq!(state, JobState::RetryWait);

        // Backoff deadline is in the future, so the job is not claimable.
        assert!(store.claim_next_transfer("w0", 1).await.unwrap().is_empty());

        let job = store.get(id).await.unwrap();
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert!(job.retry_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn exhausted_attempts_are_never_reclaimed() {
        let store = setup().await;
        let policy = quick_policy();
        let id = store
            .create_if_absent("", "e.fits", 1, "x")
            .await
            .unwrap()
            .job()
            .id;

        for attempt in 1..=3 {
            let claimed = store.claim_next_transfer("w0", 1).await.unwrap();
            assert_eq!(claimed.len(), 1, "attempt {attempt} should claim");
            store.fail_attempt(id, "exit 1", &policy).await.unwrap();
        }

        let job = store.get(id).await.unwrap();
        assert_eq!(job.state, JobState::FailedPermanent);
        assert_eq!(job.attempts, 3);
        assert!(store.claim_next_transfer("w0", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_claim_class_is_disjoint() {
        let store = setup().await;
        let id = store
            .create_if_absent("", "f.fits", 1, "x")
            .await
            .unwrap()
            .job()
            .id;

        // Nothing to archive yet.
        assert!(store.claim_next_archive("arch").await.unwrap().is_none());

        store.claim_next_transfer("w0", 1).await.unwrap();
        store.mark_succeeded(id).await.unwrap();

        // Transfer workers no longer see the row; the archiver does.
        assert!(store.claim_next_transfer("w0", 1).await.unwrap().is_empty());
        let claimed = store.claim_next_archive("arch").await.unwrap().unwrap();
        assert_eq!(claimed.id, id);

        // Second archiver cannot double-claim.
        assert!(store.claim_next_archive("arch2").await.unwrap().is_none());

        store.mark_archived(id).await.unwrap();
        let job = store.get(id).await.unwrap();
        assert_eq!(job.state, JobState::Archived);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn release_archive_keeps_job_succeeded() {
        let store = setup().await;
        let id = store
            .create_if_absent("", "g.fits", 1, "x")
            .await
            .unwrap()
            .job()
            .id;
        store.claim_next_transfer("w0", 1).await.unwrap();
        store.mark_succeeded(id).await.unwrap();

        store.claim_next_archive("arch").await.unwrap().unwrap();
        store.release_archive(id, "mv failed").await.unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.last_error.as_deref(), Some("mv failed"));

        // Claimable again on the next cycle.
        assert!(store.claim_next_archive("arch").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recover_requeues_orphaned_claims() {
        let store = setup().await;
        let id = store
            .create_if_absent("", "h.fits", 1, "x")
            .await
            .unwrap()
            .job()
            .id;
        store.claim_next_transfer("w0", 1).await.unwrap();

        // Simulated crash: claim never resolved.
        let recovered = store.recover().await.unwrap();
        assert_eq!(recovered, 1);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.state, JobState::RetryWait);
        assert!(store.claim_next_transfer("w1", 1).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn terminal_states_reject_updates() {
        let store = setup().await;
        let policy = quick_policy();
        let id = store
            .create_if_absent("", "i.fits", 1, "x")
            .await
            .unwrap()
            .job()
            .id;
        store.claim_next_transfer("w0", 1).await.unwrap();
        store.mark_succeeded(id).await.unwrap();
        store.claim_next_archive("arch").await.unwrap();
        store.mark_archived(id).await.unwrap();

        assert!(store.mark_succeeded(id).await.is_err());
        assert!(store.mark_archived(id).await.is_err());
        assert!(store.fail_attempt(id, "late", &policy).await.is_err());
    }

    #[tokio::test]
    async fn stats_count_by_state() {
        let store = setup().await;
        store.create_if_absent("", "x.fits", 1, "x").await.unwrap();
        store.create_if_absent("", "y.fits", 1, "y").await.unwrap();
        store.claim_next_transfer("w0", 1).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.new, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.archived, 0);

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 2);
    }
}
