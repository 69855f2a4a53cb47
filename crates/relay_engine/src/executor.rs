//! External command execution with a hard timeout.
//!
//! Commands run under `sh -c` in their own process group, so a timeout
//! kills the whole tree, not just the shell. A timed-out or failed
//! command is an `Outcome` with `success == false`; only a spawn
//! failure is an error.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::TransferError;

/// Result of one external command invocation.
#[derive(Debug)]
pub struct Outcome {
    pub success: bool,
    /// None when the process was killed (timeout) or died to a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Run a rendered command line, bounded by `timeout` when given.
pub async fn execute(command_line: &str, timeout: Option<Duration>) -> Result<Outcome, TransferError> {
    debug!(command = command_line, "executing");
    let start = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child.id();

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });

    let mut timed_out = false;
    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                timed_out = true;
                warn!(command = command_line, ?limit, "command timed out, killing process group");
                kill_process_group(pid);
                let _ = child.kill().await;
                let _ = child.wait().await;
                None
            }
        },
        None => Some(child.wait().await?),
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let mut stderr = stderr_task.await.unwrap_or_default();
    let duration = start.elapsed();

    if timed_out {
        stderr = format!("timed out after {:.1}s", duration.as_secs_f64());
    }

    let outcome = Outcome {
        success: status.map(|s| s.success()).unwrap_or(false),
        exit_code: status.and_then(|s| s.code()),
        stdout,
        stderr,
        duration,
    };
    debug!(
        success = outcome.success,
        exit_code = ?outcome.exit_code,
        secs = outcome.duration.as_secs_f64(),
        "command finished"
    );
    Ok(outcome)
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // With process_group(0) the child's pgid equals its pid.
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
