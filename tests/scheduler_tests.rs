use chrono::Timelike;
use chronoflow::config::SchedulerConfig;
use chronoflow::scheduler::{AddOutcome, Job, Scheduler, Task};
use tempfile::TempDir;

fn command_task(command: &str) -> Task {
    Task::ExecuteCommand {
        command: command.to_string(),
    }
}

fn test_scheduler() -> (Scheduler, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = SchedulerConfig::default()
        .with_jobs_dir(dir.path().join("jobs.d"))
        .with_log_dir(dir.path().join("logs"));
    let scheduler = Scheduler::new(config).unwrap();
    (scheduler, dir)
}

fn events_for(dir: &TempDir, job_id: &str) -> Vec<String> {
    let log = std::fs::read_to_string(dir.path().join("logs/scheduler.log")).unwrap();
    log.lines()
        .filter(|line| line.contains(&format!("job_id={job_id}")))
        .filter_map(|line| {
            // [timestamp] EVENT job_id=... -> EVENT
            line.split_whitespace().nth(1).map(str::to_string)
        })
        .collect()
}

#[test]
fn test_add_new_job() {
    let (scheduler, dir) = test_scheduler();

    let outcome = scheduler
        .add(Job::new("backup", "0 2 * * *", command_task("echo backup")))
        .unwrap();

    assert_eq!(outcome, AddOutcome::Added);
    assert_eq!(scheduler.len(), 1);
    assert!(scheduler.contains("backup"));
    assert!(scheduler.next_fire_time("backup").is_some());
    assert_eq!(scheduler.generation("backup"), Some(0));
    assert_eq!(events_for(&dir, "backup"), vec!["ADD"]);
}

#[test]
fn test_idempotent_add_emits_unchanged() {
    let (scheduler, dir) = test_scheduler();
    let job = Job::new("j", "* * * * *", command_task("true"));

    assert_eq!(scheduler.add(job.clone()).unwrap(), AddOutcome::Added);
    assert_eq!(scheduler.add(job).unwrap(), AddOutcome::Unchanged);
    assert_eq!(scheduler.len(), 1);
    assert_eq!(events_for(&dir, "j"), vec!["ADD", "UNCHANGED"]);
}

#[test]
fn test_description_change_is_unchanged() {
    let (scheduler, _dir) = test_scheduler();
    let mut job = Job::new("j", "* * * * *", command_task("true"));
    scheduler.add(job.clone()).unwrap();

    job.description = "now with words".to_string();
    assert_eq!(scheduler.add(job).unwrap(), AddOutcome::Unchanged);
}

#[test]
fn test_task_change_emits_update() {
    let (scheduler, dir) = test_scheduler();
    scheduler
        .add(Job::new("j", "* * * * *", command_task("echo one")))
        .unwrap();
    let before = scheduler.next_fire_time("j").unwrap();

    let outcome = scheduler
        .add(Job::new("j", "* * * * *", command_task("echo two")))
        .unwrap();

    assert_eq!(outcome, AddOutcome::Updated);
    assert_eq!(scheduler.generation("j"), Some(1));
    // Same schedule string keeps the cached fire time.
    assert_eq!(scheduler.next_fire_time("j"), Some(before));
    assert_eq!(events_for(&dir, "j"), vec!["ADD", "UPDATE"]);
}

#[test]
fn test_schedule_change_realigns_next_fire() {
    let (scheduler, dir) = test_scheduler();
    scheduler
        .add(Job::new("j", "0 * * * *", command_task("true")))
        .unwrap();

    let outcome = scheduler
        .add(Job::new("j", "*/5 * * * *", command_task("true")))
        .unwrap();

    assert_eq!(outcome, AddOutcome::ScheduleChanged);
    assert_eq!(scheduler.generation("j"), Some(1));
    let next = scheduler.next_fire_time("j").unwrap();
    assert_eq!(next.minute() % 5, 0);
    assert_eq!(next.second(), 0);

    assert_eq!(events_for(&dir, "j"), vec!["ADD", "SCHEDULE_CHANGE"]);
    let log = std::fs::read_to_string(dir.path().join("logs/scheduler.log")).unwrap();
    assert!(log.contains(r#"old_schedule="0 * * * *" new_schedule="*/5 * * * *""#));
}

#[test]
fn test_invalid_schedule_preserves_prior_entry() {
    let (scheduler, dir) = test_scheduler();
    scheduler
        .add(Job::new("j", "0 * * * *", command_task("true")))
        .unwrap();
    let before = scheduler.next_fire_time("j").unwrap();

    let outcome = scheduler
        .add(Job::new("j", "every tuesday", command_task("true")))
        .unwrap();

    assert_eq!(outcome, AddOutcome::InvalidSchedule);
    assert!(scheduler.contains("j"));
    assert_eq!(scheduler.next_fire_time("j"), Some(before));
    assert_eq!(scheduler.generation("j"), Some(0));
    assert_eq!(events_for(&dir, "j"), vec!["ADD", "INVALID_SCHEDULE"]);
}

#[test]
fn test_invalid_schedule_without_prior_creates_nothing() {
    let (scheduler, dir) = test_scheduler();

    let outcome = scheduler
        .add(Job::new("j", "* * *", command_task("true")))
        .unwrap();

    assert_eq!(outcome, AddOutcome::InvalidSchedule);
    assert!(scheduler.is_empty());
    assert_eq!(events_for(&dir, "j"), vec!["INVALID_SCHEDULE"]);
}

#[test]
fn test_remove_job() {
    let (scheduler, dir) = test_scheduler();
    scheduler
        .add(Job::new("j", "* * * * *", command_task("true")))
        .unwrap();

    assert!(scheduler.remove("j").unwrap());
    assert!(scheduler.is_empty());
    assert_eq!(events_for(&dir, "j"), vec!["ADD", "DELETE"]);

    // Removing again is a quiet no-op.
    assert!(!scheduler.remove("j").unwrap());
    assert_eq!(events_for(&dir, "j"), vec!["ADD", "DELETE"]);
}

#[test]
fn test_one_entry_per_job_id() {
    let (scheduler, _dir) = test_scheduler();
    scheduler
        .add(Job::new("j", "0 * * * *", command_task("echo a")))
        .unwrap();
    scheduler
        .add(Job::new("j", "*/10 * * * *", command_task("echo b")))
        .unwrap();
    scheduler
        .add(Job::new("j", "*/10 * * * *", command_task("echo c")))
        .unwrap();

    assert_eq!(scheduler.len(), 1);
}

#[test]
fn test_event_order_follows_mutations() {
    let (scheduler, dir) = test_scheduler();
    let job = Job::new("j", "0 * * * *", command_task("true"));

    scheduler.add(job.clone()).unwrap();
    scheduler.add(job).unwrap();
    scheduler
        .add(Job::new("j", "*/5 * * * *", command_task("true")))
        .unwrap();
    scheduler
        .add(Job::new("j", "*/5 * * * *", command_task("false")))
        .unwrap();
    scheduler.remove("j").unwrap();

    assert_eq!(
        events_for(&dir, "j"),
        vec!["ADD", "UNCHANGED", "SCHEDULE_CHANGE", "UPDATE", "DELETE"]
    );
}

#[tokio::test]
async fn test_stop_closes_the_scheduler() {
    let (scheduler, dir) = test_scheduler();
    scheduler.start();
    scheduler.stop().await;

    let err = scheduler
        .add(Job::new("late", "* * * * *", command_task("true")))
        .unwrap_err();
    assert!(matches!(
        err,
        chronoflow::error::SchedulerError::SchedulerClosed
    ));
    assert!(scheduler.remove("late").is_err());

    let log = std::fs::read_to_string(dir.path().join("logs/scheduler.log")).unwrap();
    let kinds: Vec<&str> = log
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .collect();
    assert_eq!(kinds, vec!["START", "STOP"]);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (scheduler, dir) = test_scheduler();
    scheduler.start();
    scheduler.start();
    scheduler.stop().await;

    let log = std::fs::read_to_string(dir.path().join("logs/scheduler.log")).unwrap();
    assert_eq!(log.matches("START").count(), 1);
}

#[test]
fn test_rejects_invalid_job_definitions() {
    let (scheduler, _dir) = test_scheduler();

    assert!(scheduler
        .add(Job::new("", "* * * * *", command_task("true")))
        .is_err());
    assert!(scheduler
        .add(Job::new("j", "* * * * *", command_task("")))
        .is_err());

    assert!(scheduler.add(Job::new("j", "", command_task("true"))).is_err());
    assert!(scheduler.is_empty());
}
