use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;

use crate::error::SchedulerError;

/// Window behind "now" within which a recurring entry still fires its next
/// grid instant instead of catching up.
const CATCHUP_WINDOW_SECS: i64 = 60;

/// Classified schedule strategy for one entry.
///
/// Classification tries ISO 8601 first: a string that parses as an instant
/// with an explicit offset (or trailing `Z`) is one-time, anything else must
/// be a five-field cron expression. Cron tokens contain whitespace, which
/// the instant parse rejects, so the two kinds cannot collide.
#[derive(Debug, Clone)]
pub enum ScheduleKind {
    OneTime {
        at: DateTime<Utc>,
        /// Set when the instant was already in the past at load time; the
        /// dispatch loop removes such entries without firing.
        past_due_at_load: bool,
    },
    Recurring { schedule: Box<CronSchedule> },
}

/// Outcome of advancing a recurring entry after a firing.
#[derive(Debug, Clone, Copy)]
pub struct Advance {
    pub next: Option<DateTime<Utc>>,
    /// True when the grid instant fell behind the catch-up window and the
    /// entry was realigned to the first instant after "now".
    pub caught_up: bool,
}

impl ScheduleKind {
    /// Classify a raw schedule string at load time.
    pub fn classify(raw: &str, now: DateTime<Utc>) -> Result<Self, SchedulerError> {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(instant) => {
                let at = instant.with_timezone(&Utc);
                Ok(ScheduleKind::OneTime {
                    at,
                    past_due_at_load: at < now,
                })
            }
            Err(instant_err) => match parse_cron(raw) {
                Ok(schedule) => Ok(ScheduleKind::Recurring {
                    schedule: Box::new(schedule),
                }),
                Err(cron_err) => Err(SchedulerError::InvalidSchedule {
                    schedule: raw.to_string(),
                    reason: format!(
                        "not an ISO 8601 instant ({instant_err}); not a five-field cron expression ({cron_err})"
                    ),
                }),
            },
        }
    }

    /// The first fire time for a freshly loaded entry.
    ///
    /// One-time entries fire at their instant (a past instant keeps the
    /// entry due so the dispatch loop can retire it). Recurring entries fire
    /// at the earliest cron-matching instant strictly after `now`.
    pub fn initial_fire_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleKind::OneTime { at, .. } => Some(*at),
            ScheduleKind::Recurring { schedule } => schedule.after(&now).next(),
        }
    }

    /// Recompute `next_fire_time` after a firing.
    ///
    /// Recurring entries advance strictly after the prior fire time, not
    /// after "now", so a delayed firing does not lose a tick. When that
    /// instant has fallen more than [`CATCHUP_WINDOW_SECS`] behind, the
    /// entry realigns to the first instant after "now" instead.
    pub fn advance_after_firing(&self, prior: DateTime<Utc>, now: DateTime<Utc>) -> Advance {
        match self {
            ScheduleKind::OneTime { .. } => Advance {
                next: None,
                caught_up: false,
            },
            ScheduleKind::Recurring { schedule } => {
                let next = schedule.after(&prior).next();
                match next {
                    Some(n) if n < now - Duration::seconds(CATCHUP_WINDOW_SECS) => Advance {
                        next: schedule.after(&now).next(),
                        caught_up: true,
                    },
                    next => Advance {
                        next,
                        caught_up: false,
                    },
                }
            }
        }
    }

    pub fn is_one_time(&self) -> bool {
        matches!(self, ScheduleKind::OneTime { .. })
    }
}

/// Parse a five-field cron expression (minute, hour, day-of-month, month,
/// day-of-week), UTC.
///
/// The `cron` crate expects a leading seconds field, so a `0` is prepended
/// after validating the field count; the expression then fires at second
/// zero of each matching minute.
fn parse_cron(raw: &str) -> Result<CronSchedule, String> {
    let fields = raw.split_whitespace().count();
    if fields != 5 {
        return Err(format!("expected 5 fields, got {fields}"));
    }
    CronSchedule::from_str(&format!("0 {raw}")).map_err(|e| e.to_string())
}
