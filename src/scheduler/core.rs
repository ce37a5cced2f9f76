use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::executor::{self, ExecutionContext, ExecutionRecord, ExecutionStatus};
use crate::logging::{EventLog, ExecutionLogWriter, SchedulerEvent};
use crate::observer::SchedulerObserver;
use crate::scheduler::entry::ScheduledEntry;
use crate::scheduler::job::Job;
use crate::scheduler::retry::{RetryPolicy, RetryRegistry};
use crate::scheduler::schedule::{Advance, ScheduleKind};

/// Loop-level errors beyond this count within [`ERROR_WINDOW`] escalate to
/// a `FATAL` event and a stop request.
const ERROR_LIMIT: usize = 5;
const ERROR_WINDOW: Duration = Duration::from_secs(60);

/// How `add` resolved against the existing entry map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Updated,
    ScheduleChanged,
    Unchanged,
    InvalidSchedule,
}

/// The scheduler core: owns the entry map and the concurrency gate, runs
/// the dispatch loop, and fans executions out as detached tasks.
///
/// Cheap to clone; all clones share one instance. All methods are safe to
/// call from any thread. There are no process-global singletons, so tests
/// can run many schedulers side by side.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    entries: Mutex<HashMap<String, ScheduledEntry>>,
    gate: Arc<Semaphore>,
    events: EventLog,
    exec_log: ExecutionLogWriter,
    observers: Vec<Arc<dyn SchedulerObserver>>,
    retries: RetryRegistry,
    tracker: TaskTracker,
    /// Cancelled to wind down the dispatch loop (and anything else watching
    /// via [`Scheduler::shutdown_signal`]).
    shutdown: CancellationToken,
    /// Cancelled when the drain deadline expires; in-flight executors
    /// terminate their children immediately.
    kill: CancellationToken,
    started: AtomicBool,
    closed: AtomicBool,
    errors: ErrorWindow,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_observers(config, Vec::new())
    }

    pub fn with_observers(
        config: SchedulerConfig,
        observers: Vec<Arc<dyn SchedulerObserver>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.log_dir)?;
        let events = EventLog::open(config.log_dir.join("scheduler.log"))?;
        let exec_log = ExecutionLogWriter::new(&config.log_dir);
        let gate = Arc::new(Semaphore::new(config.max_concurrent_jobs));

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                entries: Mutex::new(HashMap::new()),
                gate,
                events,
                exec_log,
                observers,
                retries: RetryRegistry::default(),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                kill: CancellationToken::new(),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                errors: ErrorWindow::new(ERROR_LIMIT, ERROR_WINDOW),
            }),
        })
    }

    /// Insert or replace the entry for `job.job_id`.
    ///
    /// A schedule that fails classification leaves the prior entry (if any)
    /// intact and resolves to [`AddOutcome::InvalidSchedule`].
    pub fn add(&self, job: Job) -> Result<AddOutcome> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::SchedulerClosed);
        }
        job.validate()?;

        let now = Utc::now();
        let mut pending = Vec::new();
        let outcome = {
            let mut entries = self.inner.entries();
            let decision = match entries.get(&job.job_id) {
                Some(prior) if prior.job.schedule == job.schedule && prior.job.task == job.task => {
                    Decision::Unchanged
                }
                Some(prior) if prior.job.schedule != job.schedule => Decision::Reschedule {
                    old_schedule: prior.job.schedule.clone(),
                    prior_generation: prior.generation,
                },
                Some(_) => Decision::TaskChanged,
                None => Decision::New,
            };

            match decision {
                Decision::Unchanged => {
                    if let Some(entry) = entries.get_mut(&job.job_id) {
                        entry.job.description = job.description;
                    }
                    pending.push(SchedulerEvent::Unchanged {
                        job_id: job.job_id,
                    });
                    AddOutcome::Unchanged
                }
                Decision::TaskChanged => {
                    let job_id = job.job_id.clone();
                    if let Some(entry) = entries.get_mut(&job_id) {
                        entry.job = job;
                        entry.generation += 1;
                    }
                    pending.push(SchedulerEvent::Update { job_id });
                    AddOutcome::Updated
                }
                Decision::Reschedule {
                    old_schedule,
                    prior_generation,
                } => match ScheduleKind::classify(&job.schedule, now) {
                    Ok(kind) => {
                        let job_id = job.job_id.clone();
                        let new_schedule = job.schedule.clone();
                        match ScheduledEntry::replacement(job, kind, now, prior_generation) {
                            Some(entry) => {
                                entries.insert(job_id.clone(), entry);
                            }
                            None => {
                                entries.remove(&job_id);
                            }
                        }
                        pending.push(SchedulerEvent::ScheduleChange {
                            job_id,
                            old_schedule,
                            new_schedule,
                        });
                        AddOutcome::ScheduleChanged
                    }
                    Err(e) => {
                        pending.push(SchedulerEvent::InvalidSchedule {
                            job_id: job.job_id,
                            reason: e.to_string(),
                        });
                        AddOutcome::InvalidSchedule
                    }
                },
                Decision::New => match ScheduleKind::classify(&job.schedule, now) {
                    Ok(kind) => {
                        let job_id = job.job_id.clone();
                        let schedule = job.schedule.clone();
                        match ScheduledEntry::first(job, kind, now) {
                            Some(entry) => {
                                entries.insert(job_id.clone(), entry);
                                pending.push(SchedulerEvent::Add { job_id, schedule });
                                AddOutcome::Added
                            }
                            None => {
                                pending.push(SchedulerEvent::InvalidSchedule {
                                    job_id,
                                    reason: "schedule has no future fire times".to_string(),
                                });
                                AddOutcome::InvalidSchedule
                            }
                        }
                    }
                    Err(e) => {
                        pending.push(SchedulerEvent::InvalidSchedule {
                            job_id: job.job_id,
                            reason: e.to_string(),
                        });
                        AddOutcome::InvalidSchedule
                    }
                },
            }
        };

        for event in pending {
            self.inner.emit(&event);
        }
        Ok(outcome)
    }

    /// Delete the entry if present. In-flight executions run to completion;
    /// pending retries for the job are cancelled.
    pub fn remove(&self, job_id: &str) -> Result<bool> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::SchedulerClosed);
        }
        let removed = self.inner.entries().remove(job_id).is_some();
        self.inner.retries.cancel(job_id);
        if removed {
            self.inner.emit(&SchedulerEvent::Delete {
                job_id: job_id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Spawn the dispatch loop. Idempotent; a no-op after `stop`.
    pub fn start(&self) {
        if self.inner.closed.load(Ordering::SeqCst)
            || self.inner.started.swap(true, Ordering::SeqCst)
        {
            return;
        }
        self.inner.emit(&SchedulerEvent::Start);
        tracing::info!(
            tick = ?self.inner.config.check_interval,
            max_concurrent = self.inner.config.max_concurrent_jobs,
            "Scheduler started"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.check_interval);
            // A late tick collapses into a single dispatch pass.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => inner.dispatch_pass(),
                    _ = inner.shutdown.cancelled() => {
                        tracing::debug!("Dispatch loop draining");
                        break;
                    }
                }
            }
        });
    }

    /// Signal the dispatch loop to drain, wait up to the configured grace
    /// period for in-flight executions, then force-kill stragglers. After
    /// `stop`, `add` and `remove` are rejected.
    pub async fn stop(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Scheduler stopping");
        self.inner.shutdown.cancel();
        self.inner.retries.cancel_all();
        self.inner.tracker.close();

        let drained =
            tokio::time::timeout(self.inner.config.stop_grace, self.inner.tracker.wait()).await;
        if drained.is_err() {
            tracing::warn!(
                grace = ?self.inner.config.stop_grace,
                "Drain deadline exceeded, terminating in-flight executions"
            );
            self.inner.kill.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(10), self.inner.tracker.wait()).await;
        }

        self.inner.emit(&SchedulerEvent::Stop);
        tracing::info!("Scheduler stopped");
    }

    /// Token cancelled when the scheduler winds down, whether through
    /// `stop` or through fatal-error escalation.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries().is_empty()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.inner.entries().contains_key(job_id)
    }

    /// Cached next fire instant for a live entry, for diagnostics.
    pub fn next_fire_time(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.inner.entries().get(job_id).map(|e| e.next_fire_time)
    }

    /// Re-schedule generation of a live entry, for diagnostics.
    pub fn generation(&self, job_id: &str) -> Option<u64> {
        self.inner.entries().get(job_id).map(|e| e.generation)
    }

    /// Emit an `ERROR` event for a single job's handling; never escalates.
    pub(crate) fn report_error(
        &self,
        job_id: Option<String>,
        location: &str,
        reason: impl Into<String>,
    ) {
        self.inner.emit(&SchedulerEvent::Error {
            job_id,
            location: location.to_string(),
            reason: reason.into(),
        });
    }

    /// Emit an `ERROR` event for a loop-level failure; recurring failures
    /// escalate to `FATAL` and a stop request.
    pub(crate) fn report_loop_error(&self, location: &str, reason: impl Into<String>) {
        self.inner.report_loop_error(location, reason.into());
    }
}

enum Decision {
    Unchanged,
    TaskChanged,
    Reschedule {
        old_schedule: String,
        prior_generation: u64,
    },
    New,
}

impl SchedulerInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, ScheduledEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One dispatch pass: snapshot due entries and advance them under the
    /// lock, then fire outside it. The lock is never held across I/O or
    /// subprocess spawn.
    fn dispatch_pass(self: &Arc<Self>) {
        let now = Utc::now();
        let mut pending = Vec::new();
        let mut fired = Vec::new();
        {
            let mut entries = self.entries();
            let due: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.next_fire_time <= now)
                .map(|(job_id, _)| job_id.clone())
                .collect();

            for job_id in due {
                let Some(entry) = entries.get_mut(&job_id) else {
                    continue;
                };

                if let ScheduleKind::OneTime {
                    past_due_at_load: true,
                    ..
                } = entry.kind
                {
                    entries.remove(&job_id);
                    pending.push(SchedulerEvent::SkippedPastDue { job_id });
                    continue;
                }

                let prior = entry.next_fire_time;
                entry.last_fired = Some(now);
                fired.push(entry.job.clone());

                match entry.kind.advance_after_firing(prior, now) {
                    Advance {
                        next: Some(next),
                        caught_up,
                    } => {
                        if caught_up {
                            pending.push(SchedulerEvent::ScheduleCatchup {
                                job_id: job_id.clone(),
                                next_fire: next,
                            });
                        }
                        entry.next_fire_time = next;
                    }
                    _ => {
                        entries.remove(&job_id);
                    }
                }
            }
        }

        for event in pending {
            self.emit(&event);
        }
        for job in fired {
            self.offer(job);
        }
    }

    /// Offer one due firing to the concurrency gate. Refusal drops the
    /// firing; the entry's next scheduled fire time applies.
    fn offer(self: &Arc<Self>, job: Job) {
        match self.gate.clone().try_acquire_owned() {
            Ok(permit) => {
                // A new firing supersedes any retry chain the previous
                // firing of this job left outstanding.
                let retry_token = self.retries.begin(&job.job_id);
                let inner = self.clone();
                self.tracker.spawn(async move {
                    let _permit = permit;
                    inner.run_firing(job, retry_token).await;
                });
            }
            Err(_) => {
                tracing::warn!(job_id = %job.job_id, "Concurrency gate full, shedding firing");
                self.emit(&SchedulerEvent::ConcurrencyShed { job_id: job.job_id });
            }
        }
    }

    /// One firing: the initial attempt plus retries with exponential
    /// backoff, each producing its own execution record.
    async fn run_firing(self: Arc<Self>, job: Job, retry_token: CancellationToken) {
        let policy = RetryPolicy::new(self.config.max_retries, self.config.retry_delay);
        let mut attempt = 0u32;
        loop {
            let record = self.run_attempt(&job, attempt).await;
            if record.status == ExecutionStatus::Success
                || !policy.should_retry(attempt, record.exit_code)
            {
                break;
            }

            let delay = policy.backoff(attempt);
            tracing::info!(
                job_id = %job.job_id,
                attempt,
                delay_seconds = delay.as_secs_f64(),
                "Execution failed, retrying after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => attempt += 1,
                _ = retry_token.cancelled() => {
                    tracing::debug!(job_id = %job.job_id, "Pending retry cancelled");
                    break;
                }
            }
        }
    }

    async fn run_attempt(&self, job: &Job, attempt: u32) -> ExecutionRecord {
        let ctx = ExecutionContext::new(job.job_id.as_str(), attempt, self.config.job_timeout)
            .with_kill_token(self.kill.clone());
        for observer in &self.observers {
            observer.on_execution_started(&ctx.execution_id, &job.job_id, ctx.start_time);
        }

        let record = executor::execute_task(&job.task, ctx).await;

        if let Err(e) = self.exec_log.write(&record).await {
            self.emit(&SchedulerEvent::Error {
                job_id: Some(job.job_id.clone()),
                location: "execution_log".to_string(),
                reason: e.to_string(),
            });
        }
        for observer in &self.observers {
            observer.on_execution_finished(&record);
        }
        record
    }

    fn emit(&self, event: &SchedulerEvent) {
        if let Err(e) = self.events.append(event) {
            tracing::error!(error = %e, "Failed to append scheduler event");
            if self.errors.record() {
                self.escalate("event_log", "repeated event log write failures");
            }
        }
        for observer in &self.observers {
            observer.on_event(event);
        }
        tracing::debug!(event = %event, "Scheduler event");
    }

    /// Record a loop-level error: emit `ERROR`, and escalate to `FATAL`
    /// when errors keep recurring.
    fn report_loop_error(&self, location: &str, reason: String) {
        self.emit(&SchedulerEvent::Error {
            job_id: None,
            location: location.to_string(),
            reason,
        });
        if self.errors.record() {
            self.escalate(location, "repeated errors within one minute");
        }
    }

    fn escalate(&self, location: &str, reason: &str) {
        let event = SchedulerEvent::Fatal {
            location: location.to_string(),
            reason: reason.to_string(),
        };
        let _ = self.events.append(&event);
        for observer in &self.observers {
            observer.on_event(&event);
        }
        tracing::error!(event = %event, "Fatal error threshold reached, requesting stop");
        self.shutdown.cancel();
    }
}

/// Sliding-window error counter backing `FATAL` escalation.
struct ErrorWindow {
    limit: usize,
    window: Duration,
    times: Mutex<VecDeque<Instant>>,
}

impl ErrorWindow {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            times: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one error; returns true when the window overflows.
    fn record(&self) -> bool {
        let now = Instant::now();
        let mut times = self
            .times
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while times
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            times.pop_front();
        }
        times.push_back(now);
        times.len() > self.limit
    }
}
