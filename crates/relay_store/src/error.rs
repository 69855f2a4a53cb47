//! Error types for the job store.

use thiserror::Error;

/// Job store result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Job store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Job not found
    #[error("Job {0} not found")]
    NotFound(i64),

    /// Conditional state transition refused (row owned or already moved on)
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
