use chrono::{DateTime, Utc};

use crate::executor::ExecutionRecord;
use crate::logging::SchedulerEvent;

/// External sink invoked at scheduler lifecycle points (metrics,
/// persistence). All hooks default to no-ops; implementations must return
/// quickly and must not block, they run on the dispatch and execution
/// paths.
pub trait SchedulerObserver: Send + Sync {
    fn on_event(&self, _event: &SchedulerEvent) {}

    fn on_execution_started(
        &self,
        _execution_id: &str,
        _job_id: &str,
        _start_time: DateTime<Utc>,
    ) {
    }

    fn on_execution_finished(&self, _record: &ExecutionRecord) {}
}
