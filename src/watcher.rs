use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::scheduler::{Job, Scheduler};

/// Last observed state of one job file. `job_id` is absent while the file
/// has never parsed successfully.
#[derive(Debug, Clone)]
struct FileState {
    mtime: SystemTime,
    job_id: Option<String>,
}

/// Directory reconciler: polls the jobs directory for `*.json` files and
/// translates file mutations into `add`/`remove` calls on the scheduler.
///
/// Polling is used instead of kernel notifications for portability; the
/// scheduling cadence already lives at second granularity. The file-state
/// map is private to the reconciler loop, so no locking is needed.
pub struct JobDirWatcher {
    jobs_dir: PathBuf,
    scheduler: Scheduler,
    poll_interval: Duration,
    files: HashMap<PathBuf, FileState>,
}

impl JobDirWatcher {
    pub fn new(
        jobs_dir: impl Into<PathBuf>,
        scheduler: Scheduler,
        poll_interval: Duration,
    ) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
            scheduler,
            poll_interval,
            files: HashMap::new(),
        }
    }

    /// Run the reconciliation loop until the token is cancelled or the
    /// scheduler requests shutdown. The first tick loads all pre-existing
    /// job files.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            jobs_dir = %self.jobs_dir.display(),
            poll_interval = ?self.poll_interval,
            "Job directory watcher started"
        );
        let scheduler_shutdown = self.scheduler.shutdown_signal();

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = cancel.cancelled() => break,
                _ = scheduler_shutdown.cancelled() => break,
            }
        }
        tracing::info!("Job directory watcher stopped");
    }

    /// One reconciliation tick. An error on a single file is logged and
    /// does not affect the rest of the tick.
    pub fn tick(&mut self) {
        let current = match self.scan() {
            Ok(current) => current,
            Err(ScanError::Missing) => {
                // Directory may reappear; keep existing entries in force.
                return;
            }
            Err(ScanError::Io(e)) => {
                self.scheduler.report_loop_error(
                    "watcher",
                    format!("failed to scan {}: {e}", self.jobs_dir.display()),
                );
                return;
            }
        };

        for (path, mtime) in &current {
            match self.files.get(path) {
                None => self.file_added(path, *mtime),
                Some(state) if state.mtime != *mtime => self.file_modified(path, *mtime),
                Some(_) => {}
            }
        }

        let deleted: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        for path in deleted {
            self.file_deleted(&path);
        }
    }

    /// Enumerate current `*.json` files with their modification times.
    fn scan(&self) -> std::result::Result<HashMap<PathBuf, SystemTime>, ScanError> {
        let entries = match std::fs::read_dir(&self.jobs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ScanError::Missing),
            Err(e) => return Err(ScanError::Io(e)),
        };

        let mut current = HashMap::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Err(ScanError::Io(e)),
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match entry.metadata().and_then(|m| m.modified()) {
                Ok(mtime) => {
                    current.insert(path, mtime);
                }
                Err(e) => {
                    // File may have vanished mid-scan; skip it this tick.
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                }
            }
        }
        Ok(current)
    }

    fn file_added(&mut self, path: &Path, mtime: SystemTime) {
        tracing::info!(path = %path.display(), "New job file detected");
        let job_id = self.load_into_scheduler(path, None);
        self.files
            .insert(path.to_path_buf(), FileState { mtime, job_id });
    }

    fn file_modified(&mut self, path: &Path, mtime: SystemTime) {
        tracing::info!(path = %path.display(), "Job file modified");
        let prior_id = self.files.get(path).and_then(|s| s.job_id.clone());
        let job_id = self.load_into_scheduler(path, prior_id);
        self.files
            .insert(path.to_path_buf(), FileState { mtime, job_id });
    }

    fn file_deleted(&mut self, path: &Path) {
        tracing::info!(path = %path.display(), "Job file deleted");
        if let Some(FileState {
            job_id: Some(job_id),
            ..
        }) = self.files.remove(path)
        {
            let _ = self.scheduler.remove(&job_id);
        }
    }

    /// Parse one file and feed it to the scheduler. Returns the job id now
    /// associated with the path. A parse failure leaves the prior mapping
    /// (and the prior entry) in force.
    fn load_into_scheduler(&self, path: &Path, prior_id: Option<String>) -> Option<String> {
        match Job::from_file(path) {
            Ok(job) => {
                // A renamed job_id means the old entry no longer has a
                // backing file.
                if let Some(prior_id) = &prior_id {
                    if *prior_id != job.job_id {
                        let _ = self.scheduler.remove(prior_id);
                    }
                }
                let job_id = job.job_id.clone();
                let _ = self.scheduler.add(job);
                Some(job_id)
            }
            Err(e) => {
                self.scheduler.report_error(
                    None,
                    "watcher",
                    format!("failed to load {}: {e}", path.display()),
                );
                prior_id
            }
        }
    }
}

enum ScanError {
    Missing,
    Io(std::io::Error),
}
