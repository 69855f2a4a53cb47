//! The stage-then-publish transfer protocol.
//!
//! Files are first copied to a staging directory on the endpoint, then
//! moved into the endpoint buffer with a remote rename. The rename is
//! what makes appearance in the remote buffer atomic for the consumer
//! on the other side. When no staging area is configured, files go
//! straight to the buffer (direct mode) and the publish step is
//! skipped.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use relay_store::Job;

use crate::config::Config;
use crate::error::{ConfigError, TransferError};
use crate::executor::execute;
use crate::template::CommandTemplate;

pub struct TransferRunner {
    local_buffer: PathBuf,
    endpoint_buffer: String,
    staging: String,
    direct_mode: bool,
    transfer: CommandTemplate,
    remote: CommandTemplate,
    batch_mode: bool,
    params: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl TransferRunner {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let commands = config.validate()?;
        let staging = config.staging_root().to_string();
        let direct_mode = staging == config.endpoint.buffer;
        Ok(Self {
            local_buffer: config.handoff.buffer.clone(),
            endpoint_buffer: config.endpoint.buffer.clone(),
            staging,
            direct_mode,
            transfer: commands.transfer,
            remote: commands.remote,
            batch_mode: commands.batch_mode,
            params: config.endpoint_params(),
            timeout: config.command_timeout(),
        })
    }

    /// How many jobs one claim may group: `batch_size` with a `{batch}`
    /// template, otherwise one file per invocation.
    pub fn claim_limit(&self, batch_size: u32) -> u32 {
        if self.batch_mode {
            batch_size.max(1)
        } else {
            1
        }
    }

    /// Drive one claimed batch through the full protocol. All jobs
    /// share a relpath (the store guarantees this). The batch is
    /// all-or-nothing: any failed step fails every member for this
    /// attempt.
    pub async fn run_batch(&self, jobs: &[Job]) -> Result<(), TransferError> {
        let Some(first) = jobs.first() else {
            return Ok(());
        };
        let relpath = &first.relpath;
        let stage_dir = remote_join(&self.staging, relpath);
        let total_bytes: i64 = jobs.iter().map(|j| j.size_bytes).sum();

        // Pre-transfer: make sure the staging subdirectory exists.
        self.remote_exec("pre-transfer", format!("mkdir -p {stage_dir}"))
            .await?;

        // Transfer into staging.
        let sources: Vec<String> = jobs
            .iter()
            .map(|j| j.path_under(&self.local_buffer).display().to_string())
            .collect();
        let source = sources.join(" ");
        let mut params = self.params.clone();
        let source_key = if self.batch_mode { "batch" } else { "file" };
        params.insert(source_key.to_string(), source);
        params.insert("dest".to_string(), stage_dir.clone());
        let cmd = self.transfer.render(&params)?;

        let outcome = execute(&cmd, self.timeout).await?;
        if !outcome.success {
            return Err(TransferError::Command {
                step: "transfer",
                exit_code: outcome.exit_code,
                stderr: outcome.stderr,
            });
        }
        let secs = outcome.duration.as_secs_f64().max(f64::EPSILON);
        debug!(
            files = jobs.len(),
            bytes = total_bytes,
            rate_mb_per_sec = (total_bytes as f64 / secs) / (1024.0 * 1024.0),
            "batch staged"
        );

        // Publish: rename from staging into the endpoint buffer.
        if !self.direct_mode {
            let buffer_dir = remote_join(&self.endpoint_buffer, relpath);
            self.remote_exec("publish", format!("mkdir -p {buffer_dir}"))
                .await?;

            let staged: Vec<String> = jobs
                .iter()
                .map(|j| format!("{stage_dir}/{}", j.filename))
                .collect();
            self.remote_exec(
                "publish",
                format!("mv {} {buffer_dir}", staged.join(" ")),
            )
            .await?;
        }

        info!(
            files = jobs.len(),
            relpath = %relpath,
            bytes = total_bytes,
            "batch delivered to endpoint buffer"
        );
        Ok(())
    }

    /// Sweep empty subdirectories out of the remote staging area.
    pub async fn wipe_staging(&self) -> Result<(), TransferError> {
        if self.direct_mode {
            return Ok(());
        }
        self.remote_exec(
            "wipe",
            format!(
                "find {} -mindepth 1 -type d -empty -delete",
                self.staging
            ),
        )
        .await
    }

    async fn remote_exec(&self, step: &'static str, command: String) -> Result<(), TransferError> {
        let mut params = self.params.clone();
        params.insert("command".to_string(), command);
        let cmd = self.remote.render(&params)?;
        let outcome = execute(&cmd, self.timeout).await?;
        if !outcome.success {
            return Err(TransferError::Command {
                step,
                exit_code: outcome.exit_code,
                stderr: outcome.stderr,
            });
        }
        Ok(())
    }
}

fn remote_join(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    if rel.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{rel}")
    }
}
