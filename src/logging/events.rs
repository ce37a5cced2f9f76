use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// A schedule-lifecycle event, one line each in `scheduler.log`.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Add {
        job_id: String,
        schedule: String,
    },
    Update {
        job_id: String,
    },
    Delete {
        job_id: String,
    },
    ScheduleChange {
        job_id: String,
        old_schedule: String,
        new_schedule: String,
    },
    Unchanged {
        job_id: String,
    },
    InvalidSchedule {
        job_id: String,
        reason: String,
    },
    SkippedPastDue {
        job_id: String,
    },
    ScheduleCatchup {
        job_id: String,
        next_fire: DateTime<Utc>,
    },
    ConcurrencyShed {
        job_id: String,
    },
    Start,
    Stop,
    Error {
        job_id: Option<String>,
        location: String,
        reason: String,
    },
    Fatal {
        location: String,
        reason: String,
    },
}

impl SchedulerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerEvent::Add { .. } => "ADD",
            SchedulerEvent::Update { .. } => "UPDATE",
            SchedulerEvent::Delete { .. } => "DELETE",
            SchedulerEvent::ScheduleChange { .. } => "SCHEDULE_CHANGE",
            SchedulerEvent::Unchanged { .. } => "UNCHANGED",
            SchedulerEvent::InvalidSchedule { .. } => "INVALID_SCHEDULE",
            SchedulerEvent::SkippedPastDue { .. } => "SKIPPED_PAST_DUE",
            SchedulerEvent::ScheduleCatchup { .. } => "SCHEDULE_CATCHUP",
            SchedulerEvent::ConcurrencyShed { .. } => "CONCURRENCY_SHED",
            SchedulerEvent::Start => "START",
            SchedulerEvent::Stop => "STOP",
            SchedulerEvent::Error { .. } => "ERROR",
            SchedulerEvent::Fatal { .. } => "FATAL",
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            SchedulerEvent::Add { job_id, .. }
            | SchedulerEvent::Update { job_id }
            | SchedulerEvent::Delete { job_id }
            | SchedulerEvent::ScheduleChange { job_id, .. }
            | SchedulerEvent::Unchanged { job_id }
            | SchedulerEvent::InvalidSchedule { job_id, .. }
            | SchedulerEvent::SkippedPastDue { job_id }
            | SchedulerEvent::ScheduleCatchup { job_id, .. }
            | SchedulerEvent::ConcurrencyShed { job_id } => Some(job_id),
            SchedulerEvent::Error { job_id, .. } => job_id.as_deref(),
            _ => None,
        }
    }
}

impl std::fmt::Display for SchedulerEvent {
    /// Renders `EVENT job_id=<id>[ key=value]*`; the timestamp prefix is
    /// added by [`EventLog::append`]. String values other than `job_id` are
    /// double-quoted.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())?;
        if let Some(job_id) = self.job_id() {
            write!(f, " job_id={job_id}")?;
        }
        match self {
            SchedulerEvent::Add { schedule, .. } => {
                write!(f, " schedule={schedule:?}")
            }
            SchedulerEvent::ScheduleChange {
                old_schedule,
                new_schedule,
                ..
            } => {
                write!(
                    f,
                    " old_schedule={old_schedule:?} new_schedule={new_schedule:?}"
                )
            }
            SchedulerEvent::InvalidSchedule { reason, .. } => {
                write!(f, " reason={reason:?}")
            }
            SchedulerEvent::ScheduleCatchup { next_fire, .. } => {
                write!(f, " next_fire={}", next_fire.to_rfc3339())
            }
            SchedulerEvent::Error {
                location, reason, ..
            } => {
                write!(f, " where={location} reason={reason:?}")
            }
            SchedulerEvent::Fatal { location, reason } => {
                write!(f, " where={location} reason={reason:?}")
            }
            _ => Ok(()),
        }
    }
}

/// Append-only writer for the scheduler event stream.
///
/// Each event is one line, flushed immediately, so the stream is crash-safe
/// at line granularity.
#[derive(Debug)]
pub struct EventLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl EventLog {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn append(&self, event: &SchedulerEvent) -> std::io::Result<()> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
        let line = format!("[{timestamp}] {event}\n");
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
