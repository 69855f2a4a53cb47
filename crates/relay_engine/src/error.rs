//! Engine error taxonomy.
//!
//! `ConfigError` is fatal at startup, before any side effect.
//! `TransferError` is recoverable and drives retry/backoff; it is
//! recorded on the job, never propagated across jobs.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or unsafe configuration. Startup refuses to scan.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{role} template must contain the {{{placeholder}}} placeholder")]
    MissingPlaceholder {
        role: &'static str,
        placeholder: &'static str,
    },

    #[error("transfer template must use exactly one of {{file}} or {{batch}}")]
    AmbiguousSource,

    #[error("parameter '{0}' collides with a reserved placeholder name")]
    ReservedParameter(String),

    #[error("template references undefined parameter '{0}'")]
    UndefinedParameter(String),

    #[error("{0}: directory not found")]
    DirectoryNotFound(PathBuf),
}

/// A template referenced a parameter absent from the render set.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("no value for placeholder '{0}'")]
pub struct TemplateError(pub String);

/// A transfer attempt failed; the job will back off and retry.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Render(#[from] TemplateError),

    #[error("{step} step failed (exit {})", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    Command {
        step: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl TransferError {
    /// One-line description recorded as the job's `last_error`.
    pub fn describe(&self) -> String {
        match self {
            TransferError::Command {
                step,
                exit_code,
                stderr,
            } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".into());
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("{step} step failed (exit {code})")
                } else {
                    format!("{step} step failed (exit {code}): {stderr}")
                }
            }
            other => other.to_string(),
        }
    }
}

/// Top-level engine errors surfaced to the bootstrap layer.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] relay_store::StoreError),
}
