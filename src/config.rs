use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the scheduler daemon.
///
/// Defaults match a production deployment; every field can be overridden
/// through the environment (see [`SchedulerConfig::from_env`]) and the
/// directory paths additionally through CLI flags.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Directory containing `*.json` job definition files.
    pub jobs_dir: PathBuf,
    /// Root directory for `scheduler.log` and per-execution log files.
    pub log_dir: PathBuf,
    /// Log level for operational logging (DEBUG, INFO, WARNING, ERROR).
    pub log_level: String,
    /// Dispatch loop tick.
    pub check_interval: Duration,
    /// Directory reconciler poll interval.
    pub poll_interval: Duration,
    /// Concurrency gate: maximum simultaneous executions.
    pub max_concurrent_jobs: usize,
    /// Per-firing execution deadline.
    pub job_timeout: Duration,
    /// Maximum retry attempts after a failed execution.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_delay: Duration,
    /// How long `stop()` waits for in-flight executions before force-killing.
    pub stop_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs_dir: PathBuf::from("/etc/chronoflow/jobs.d"),
            log_dir: PathBuf::from("logs"),
            log_level: "INFO".to_string(),
            check_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            max_concurrent_jobs: 50,
            job_timeout: Duration::from_secs(3600),
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            stop_grace: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for unset or unparsable variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_string("JOBS_DIR") {
            config.jobs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(level) = env_string("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(secs) = env_parsed::<f64>("SCHEDULER_CHECK_INTERVAL").filter(|s| *s > 0.0) {
            config.check_interval = Duration::from_secs_f64(secs);
        }
        if let Some(secs) = env_parsed::<f64>("WATCHER_POLL_INTERVAL").filter(|s| *s > 0.0) {
            config.poll_interval = Duration::from_secs_f64(secs);
        }
        if let Some(n) = env_parsed::<usize>("MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = n.max(1);
        }
        if let Some(secs) = env_parsed::<u64>("JOB_TIMEOUT") {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parsed::<u32>("MAX_RETRIES") {
            config.max_retries = n;
        }
        if let Some(secs) = env_parsed::<u64>("RETRY_DELAY") {
            config.retry_delay = Duration::from_secs(secs);
        }

        config
    }

    pub fn with_jobs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.jobs_dir = dir.into();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}
