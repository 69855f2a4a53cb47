//! Job model and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Lifecycle state of a job.
///
/// `FailedRetryable` is the outcome a worker reports for a failed
/// attempt; the store resolves it to `RetryWait` or `FailedPermanent`
/// in the same atomic update, so it is never observed at rest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    New,
    InProgress,
    FailedRetryable,
    RetryWait,
    Succeeded,
    FailedPermanent,
    Archived,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "NEW",
            JobState::InProgress => "IN_PROGRESS",
            JobState::FailedRetryable => "FAILED_RETRYABLE",
            JobState::RetryWait => "RETRY_WAIT",
            JobState::Succeeded => "SUCCEEDED",
            JobState::FailedPermanent => "FAILED_PERMANENT",
            JobState::Archived => "ARCHIVED",
        }
    }

    /// Terminal states are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::FailedPermanent | JobState::Archived)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Ok(JobState::New),
            "IN_PROGRESS" => Ok(JobState::InProgress),
            "FAILED_RETRYABLE" => Ok(JobState::FailedRetryable),
            "RETRY_WAIT" => Ok(JobState::RetryWait),
            "SUCCEEDED" => Ok(JobState::Succeeded),
            "FAILED_PERMANENT" => Ok(JobState::FailedPermanent),
            "ARCHIVED" => Ok(JobState::Archived),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// One file's transfer lifecycle.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    /// Directory part of the path relative to the buffer root, `""`
    /// for top-level files.
    pub relpath: String,
    pub filename: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub state: JobState,
    pub attempts: i32,
    pub claimed_by: Option<String>,
    pub retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Job {
    /// Absolute path of this file under the given root directory.
    pub fn path_under(&self, root: &Path) -> PathBuf {
        if self.relpath.is_empty() {
            root.join(&self.filename)
        } else {
            root.join(&self.relpath).join(&self.filename)
        }
    }

    /// Buffer-relative path, for log lines.
    pub fn rel_display(&self) -> String {
        if self.relpath.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.relpath, self.filename)
        }
    }
}

/// Retry/backoff policy applied when an attempt fails.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    /// Backoff delay after the given (1-based) failed attempt:
    /// `min(cap, base * 2^(attempt - 1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.backoff_base
            .checked_mul(factor.min(u32::MAX as u64) as u32)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(4),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            JobState::New,
            JobState::InProgress,
            JobState::FailedRetryable,
            JobState::RetryWait,
            JobState::Succeeded,
            JobState::FailedPermanent,
            JobState::Archived,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("BOGUS".parse::<JobState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::FailedPermanent.is_terminal());
        assert!(JobState::Archived.is_terminal());
        assert!(!JobState::Succeeded.is_terminal());
        assert!(!JobState::RetryWait.is_terminal());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff_base: Duration::from_secs(4),
            backoff_cap: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(32), Duration::from_secs(60));
    }

    #[test]
    fn path_under_handles_empty_relpath() {
        let job = Job {
            id: 1,
            relpath: String::new(),
            filename: "a.fits".into(),
            size_bytes: 0,
            checksum: String::new(),
            state: JobState::New,
            attempts: 0,
            claimed_by: None,
            retry_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_error: None,
        };
        assert_eq!(job.path_under(Path::new("/buf")), PathBuf::from("/buf/a.fits"));
        assert_eq!(job.rel_display(), "a.fits");

        let nested = Job {
            relpath: "2026/08".into(),
            ..job
        };
        assert_eq!(
            nested.path_under(Path::new("/buf")),
            PathBuf::from("/buf/2026/08/a.fits")
        );
        assert_eq!(nested.rel_display(), "2026/08/a.fits");
    }
}
