use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("invalid job definition: {field}: {reason}")]
    InvalidJob {
        field: &'static str,
        reason: String,
    },

    #[error("invalid schedule {schedule:?}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    #[error("scheduler is stopped")]
    SchedulerClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed job file: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
