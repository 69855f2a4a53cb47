//! Durable job store for the relay engine.
//!
//! Single source of truth for per-file transfer state. All claim
//! operations are conditional updates evaluated by SQLite itself, so
//! ownership stays correct even with workers in separate processes.

pub mod error;
pub mod model;
pub mod store;

pub use error::{Result, StoreError};
pub use model::{Job, JobState, RetryPolicy};
pub use store::{CreateOutcome, JobStore, QueueStats};
