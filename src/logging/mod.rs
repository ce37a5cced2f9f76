//! Persisted log artifacts: the schedule-lifecycle event stream
//! (`scheduler.log`) and the per-execution record files.

pub mod events;
pub mod execution;

pub use events::{EventLog, SchedulerEvent};
pub use execution::ExecutionLogWriter;
