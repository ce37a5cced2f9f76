use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::executor::{ExecutionContext, ExecutionRecord, ExecutionStatus};

/// Captured stdout/stderr are bounded to this many bytes per stream.
const STREAM_CAP: usize = 1024 * 1024;

/// After SIGTERM, the child gets this long to exit before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Sentinel exit code recorded when a spawn fails.
const EXIT_SPAWN_FAILURE: i32 = -1;

/// Sentinel exit code recorded on timeout or forced termination.
const EXIT_TERMINATED: i32 = -2;

/// Executes `execute_command` tasks: the command string runs through a
/// shell, streams are captured with a byte cap, and the per-firing deadline
/// is enforced with a graceful-then-forced kill.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    stream_cap: usize,
    kill_grace: Duration,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            stream_cap: STREAM_CAP,
            kill_grace: KILL_GRACE,
        }
    }
}

impl CommandExecutor {
    pub fn with_stream_cap(mut self, cap: usize) -> Self {
        self.stream_cap = cap;
        self
    }

    pub async fn execute(&self, command: &str, ctx: ExecutionContext) -> ExecutionRecord {
        tracing::debug!(
            job_id = %ctx.job_id,
            execution_id = %ctx.execution_id,
            attempt = ctx.attempt,
            command,
            "Executing command"
        );

        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return self.finish(
                    command,
                    ctx,
                    ExecutionStatus::Failure,
                    EXIT_SPAWN_FAILURE,
                    Captured::default(),
                    Captured::default(),
                    Some(format!("failed to spawn command: {e}")),
                );
            }
        };

        let cap = self.stream_cap;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(read_capped(stdout_pipe, cap));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe, cap));

        let (status, exit_code, note) = tokio::select! {
            waited = child.wait() => match waited {
                Ok(exit) if exit.success() => (ExecutionStatus::Success, 0, None),
                Ok(exit) => {
                    let note = exit.code().is_none().then(|| "terminated by signal".to_string());
                    (ExecutionStatus::Failure, exit.code().unwrap_or(EXIT_SPAWN_FAILURE), note)
                }
                Err(e) => (
                    ExecutionStatus::Failure,
                    EXIT_SPAWN_FAILURE,
                    Some(format!("failed to wait for child: {e}")),
                ),
            },
            _ = tokio::time::sleep(ctx.timeout) => {
                terminate_child(&mut child, self.kill_grace).await;
                (
                    ExecutionStatus::Failure,
                    EXIT_TERMINATED,
                    Some(format!("command timed out after {:?}", ctx.timeout)),
                )
            }
            _ = ctx.kill.cancelled() => {
                terminate_child(&mut child, self.kill_grace).await;
                (
                    ExecutionStatus::Failure,
                    EXIT_TERMINATED,
                    Some("terminated: scheduler shutting down".to_string()),
                )
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        self.finish(command, ctx, status, exit_code, stdout, stderr, note)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        command: &str,
        ctx: ExecutionContext,
        status: ExecutionStatus,
        exit_code: i32,
        stdout: Captured,
        stderr: Captured,
        note: Option<String>,
    ) -> ExecutionRecord {
        let end_time = Utc::now();
        let duration = (end_time - ctx.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut stderr = stderr.into_string();
        if let Some(note) = note {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&note);
        }

        tracing::info!(
            job_id = %ctx.job_id,
            execution_id = %ctx.execution_id,
            attempt = ctx.attempt,
            %status,
            exit_code,
            duration_seconds = duration.as_secs_f64(),
            "Command finished"
        );

        ExecutionRecord {
            execution_id: ctx.execution_id,
            job_id: ctx.job_id,
            command: command.to_string(),
            attempt: ctx.attempt,
            start_time: ctx.start_time,
            end_time,
            duration_seconds: duration.as_secs_f64(),
            status,
            exit_code,
            stdout: stdout.into_string(),
            stderr,
        }
    }
}

/// One captured stream: up to the cap, plus a count of bytes dropped.
#[derive(Debug, Default)]
struct Captured {
    data: Vec<u8>,
    dropped: u64,
}

impl Captured {
    /// Lossy UTF-8, with the truncation marker as the final line when bytes
    /// were dropped.
    fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.dropped > 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[...truncated: {} bytes dropped]", self.dropped));
        }
        text
    }
}

/// Drain a pipe to EOF, keeping at most `cap` bytes and counting the rest.
/// The pipe is always fully drained so the child never blocks on a full
/// buffer.
async fn read_capped<R>(pipe: Option<R>, cap: usize) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let Some(mut pipe) = pipe else {
        return captured;
    };

    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let keep = n.min(cap.saturating_sub(captured.data.len()));
                captured.data.extend_from_slice(&buf[..keep]);
                captured.dropped += (n - keep) as u64;
            }
            Err(_) => break,
        }
    }
    captured
}

/// Terminate a child gracefully: SIGTERM, wait out the grace window, then
/// SIGKILL if it is still running.
async fn terminate_child(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(exit)) => {
            tracing::debug!(exit_code = ?exit.code(), "Child exited after SIGTERM");
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Error waiting for child after SIGTERM");
        }
        Err(_) => {
            tracing::warn!("Child did not exit within grace window, sending SIGKILL");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill child");
            }
        }
    }
}
