use chrono::{DateTime, Utc};

use crate::scheduler::job::Job;
use crate::scheduler::schedule::ScheduleKind;

/// The in-memory scheduled form of one live job.
///
/// Owned exclusively by the scheduler's entry map; all mutation happens
/// under that map's lock.
#[derive(Debug, Clone)]
pub struct ScheduledEntry {
    pub job: Job,
    pub kind: ScheduleKind,
    /// Cached next fire instant; the dispatch loop compares this to "now".
    pub next_fire_time: DateTime<Utc>,
    /// Start of the most recent firing, for diagnostics.
    pub last_fired: Option<DateTime<Utc>>,
    /// Incremented on every re-schedule of the same `job_id`.
    pub generation: u64,
}

impl ScheduledEntry {
    /// Build the first generation of an entry. Returns `None` only when the
    /// cron grid has no future instant, which a five-field expression cannot
    /// produce in practice.
    pub fn first(job: Job, kind: ScheduleKind, now: DateTime<Utc>) -> Option<Self> {
        let next_fire_time = kind.initial_fire_time(now)?;
        Some(Self {
            job,
            kind,
            next_fire_time,
            last_fired: None,
            generation: 0,
        })
    }

    /// Build a replacement entry carrying the next generation number.
    pub fn replacement(
        job: Job,
        kind: ScheduleKind,
        now: DateTime<Utc>,
        prior_generation: u64,
    ) -> Option<Self> {
        let mut entry = Self::first(job, kind, now)?;
        entry.generation = prior_generation + 1;
        Some(entry)
    }
}
