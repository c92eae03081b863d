//! Process execution inside a sandbox root.
//!
//! Commands run with the sandbox root as working directory. stdout and
//! stderr are drained concurrently with the wait so a chatty child can
//! never deadlock on a full pipe. A timeout forcibly kills the child.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExecRequest, ExecResult};
use crate::error::SandboxError;

/// Timeout applied when an [`ExecRequest`] does not set one.
pub const DEFAULT_TIMEOUT_MS: i64 = 30_000;

/// Runs a command inside `root`, capturing output and exit status.
///
/// A `timeout_ms` of zero or below disables the timeout entirely. On
/// timeout the child is killed (SIGKILL) and the result is marked
/// `timed_out`; `success` is false regardless of the reaped status.
/// A spawn failure (e.g. command not found) is an error, not a result.
pub async fn run(root: &Path, request: &ExecRequest) -> Result<ExecResult, SandboxError> {
    if request.command.trim().is_empty() {
        return Err(SandboxError::execution_failed("command must not be empty"));
    }

    let mut cmd = build_command(request);
    cmd.current_dir(root)
        .envs(&request.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Executing '{}' in {}", request.command, root.display());

    let started_at = Utc::now();
    let mut child = cmd.spawn().map_err(|e| {
        SandboxError::execution_failed(format!("failed to spawn '{}': {e}", request.command))
    })?;

    let stdin_pipe = child.stdin.take();
    let stdout_task = tokio::spawn(drain(child.stdout.take()));
    let stderr_task = tokio::spawn(drain(child.stderr.take()));

    // Feed stdin from its own task and close it so the child observes
    // end-of-input. Writing inline would block the wait below once the
    // pipes fill up. A write error means the child stopped reading;
    // the result still reflects how the child exited.
    let stdin_payload = request.stdin.clone();
    tokio::spawn(async move {
        if let (Some(input), Some(mut pipe)) = (stdin_payload, stdin_pipe) {
            let _ = pipe.write_all(input.as_bytes()).await;
            let _ = pipe.shutdown().await;
        }
    });

    let timeout_ms = request.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    let (status, timed_out) = if timeout_ms > 0 {
        let limit = Duration::from_millis(timeout_ms as u64);
        match tokio::time::timeout(limit, child.wait()).await {
            Ok(waited) => (
                waited.map_err(|e| SandboxError::execution_failed(e.to_string()))?,
                false,
            ),
            Err(_) => {
                warn!(
                    "Command '{}' exceeded {timeout_ms}ms timeout, killing",
                    request.command
                );
                let _ = child.start_kill();
                let status = child
                    .wait()
                    .await
                    .map_err(|e| SandboxError::execution_failed(e.to_string()))?;
                (status, true)
            }
        }
    } else {
        (
            child
                .wait()
                .await
                .map_err(|e| SandboxError::execution_failed(e.to_string()))?,
            false,
        )
    };

    let finished_at = Utc::now();
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    let exit_code = status.code();
    let success = !timed_out && exit_code == Some(0);

    debug!(
        "Command '{}' finished: exit={exit_code:?} timed_out={timed_out}",
        request.command
    );

    Ok(ExecResult {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
        success,
        timed_out,
        duration_ms: (finished_at - started_at).num_milliseconds(),
        started_at,
        finished_at,
    })
}

/// Builds the command line: the command itself, or `sh -c` in shell mode.
fn build_command(request: &ExecRequest) -> Command {
    if request.use_shell {
        let line = if request.args.is_empty() {
            request.command.clone()
        } else {
            format!("{} {}", request.command, shell_words::join(&request.args))
        };
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    } else {
        let mut cmd = Command::new(&request.command);
        cmd.args(&request.args);
        cmd
    }
}

async fn drain<R: AsyncReadExt + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}
