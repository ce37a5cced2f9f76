//! Task execution: runs one firing of a job and produces its record.
//!
//! Dispatch is by task kind; today that is `execute_command`, handled by
//! [`CommandExecutor`]. Executors must not leak child processes: on timeout
//! the child is signalled, given a grace window, then force-killed.

pub mod command;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::scheduler::job::Task;

pub use command::CommandExecutor;

/// Terminal status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "SUCCESS"),
            ExecutionStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Per-attempt context handed to an executor.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub job_id: String,
    /// 0 for the initial attempt, incremented per retry.
    pub attempt: u32,
    pub start_time: DateTime<Utc>,
    pub timeout: Duration,
    /// Cancelled when the scheduler's drain deadline expires; executors
    /// terminate their child immediately when it fires.
    pub kill: CancellationToken,
}

impl ExecutionContext {
    pub fn new(job_id: impl Into<String>, attempt: u32, timeout: Duration) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().simple().to_string(),
            job_id: job_id.into(),
            attempt,
            start_time: Utc::now(),
            timeout,
            kill: CancellationToken::new(),
        }
    }

    pub fn with_kill_token(mut self, kill: CancellationToken) -> Self {
        self.kill = kill;
        self
    }
}

/// The immutable artifact produced per execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub job_id: String,
    pub command: String,
    pub attempt: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run one attempt of `task` and produce its record.
///
/// The match arm set is the executor registry: one arm per task kind.
pub async fn execute_task(task: &Task, ctx: ExecutionContext) -> ExecutionRecord {
    match task {
        Task::ExecuteCommand { command } => {
            CommandExecutor::default().execute(command, ctx).await
        }
    }
}
