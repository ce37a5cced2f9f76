use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// A task descriptor, dispatched on the `type` field of the job file.
///
/// Adding a task kind means adding a variant here and an executor arm in
/// [`crate::executor::execute_task`]; the scheduler core is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    ExecuteCommand { command: String },
}

impl Task {
    /// The shell command carried by this task, if any.
    pub fn command(&self) -> &str {
        match self {
            Task::ExecuteCommand { command } => command,
        }
    }
}

/// A job definition as declared by one file in the jobs directory.
///
/// The `schedule` string is kept verbatim; classifying it as cron or
/// one-time is the schedule strategy's responsibility, not the parser's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    #[serde(default)]
    pub description: String,
    pub schedule: String,
    pub task: Task,
}

impl Job {
    pub fn new(job_id: impl Into<String>, schedule: impl Into<String>, task: Task) -> Self {
        Self {
            job_id: job_id.into(),
            description: String::new(),
            schedule: schedule.into(),
            task,
        }
    }

    /// Load and validate a job definition from a UTF-8 JSON file.
    ///
    /// Unknown top-level fields are permitted and ignored. A file that fails
    /// any validation is rejected whole.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let job: Job = serde_json::from_str(&contents)?;
        job.validate()?;
        Ok(job)
    }

    /// Field-level validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(SchedulerError::InvalidJob {
                field: "job_id",
                reason: "must be a non-empty string".to_string(),
            });
        }
        if self.schedule.is_empty() {
            return Err(SchedulerError::InvalidJob {
                field: "schedule",
                reason: "must be a non-empty string".to_string(),
            });
        }
        match &self.task {
            Task::ExecuteCommand { command } if command.is_empty() => {
                Err(SchedulerError::InvalidJob {
                    field: "task.command",
                    reason: "must be a non-empty string".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}
