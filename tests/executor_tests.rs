use std::time::Duration;

use chronoflow::executor::{CommandExecutor, ExecutionContext, ExecutionStatus};

fn test_context(job_id: &str) -> ExecutionContext {
    ExecutionContext::new(job_id, 0, Duration::from_secs(30))
}

#[tokio::test]
async fn test_execute_simple_command() {
    let executor = CommandExecutor::default();

    let record = executor.execute("echo hello", test_context("hello")).await;

    assert_eq!(record.job_id, "hello");
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.exit_code, 0);
    assert_eq!(record.stdout, "hello\n");
    assert!(record.stderr.is_empty());
    assert!(record.end_time >= record.start_time);
    assert!(record.duration_seconds >= 0.0);
}

#[tokio::test]
async fn test_execute_empty_output() {
    let executor = CommandExecutor::default();

    let record = executor.execute("true", test_context("quiet")).await;

    assert_eq!(record.status, ExecutionStatus::Success);
    assert!(record.stdout.is_empty());
    assert!(record.stderr.is_empty());
}

#[tokio::test]
async fn test_execute_command_failure() {
    let executor = CommandExecutor::default();

    let record = executor.execute("exit 3", test_context("failing")).await;

    assert_eq!(record.status, ExecutionStatus::Failure);
    assert_eq!(record.exit_code, 3);
}

#[tokio::test]
async fn test_execute_command_with_stderr() {
    let executor = CommandExecutor::default();

    let record = executor
        .execute("echo 'error message' >&2 && exit 1", test_context("noisy"))
        .await;

    assert_eq!(record.status, ExecutionStatus::Failure);
    assert_eq!(record.exit_code, 1);
    assert!(record.stderr.contains("error message"));
}

#[tokio::test]
async fn test_execute_command_not_found() {
    let executor = CommandExecutor::default();

    let record = executor
        .execute("nonexistent_command_12345", test_context("missing"))
        .await;

    assert_eq!(record.status, ExecutionStatus::Failure);
    // The shell reports command-not-found as 127.
    assert_eq!(record.exit_code, 127);
    assert!(!record.stderr.is_empty());
}

#[tokio::test]
async fn test_execute_timeout_kills_child() {
    let executor = CommandExecutor::default();
    let ctx = ExecutionContext::new("slow", 0, Duration::from_millis(300));

    let start = std::time::Instant::now();
    let record = executor.execute("sleep 30", ctx).await;

    assert_eq!(record.status, ExecutionStatus::Failure);
    assert_eq!(record.exit_code, -2);
    assert!(record.stderr.contains("timed out"));
    // SIGTERM takes sleep down immediately; the grace window is not used up.
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_execute_signal_termination() {
    let executor = CommandExecutor::default();

    let record = executor
        .execute("kill -9 $$", test_context("signalled"))
        .await;

    assert_eq!(record.status, ExecutionStatus::Failure);
    assert!(record.stderr.contains("terminated by signal"));
}

#[tokio::test]
async fn test_stdout_is_truncated_at_cap() {
    let executor = CommandExecutor::default().with_stream_cap(10);

    let record = executor
        .execute("printf '0123456789abcdef'", test_context("chatty"))
        .await;

    assert_eq!(record.status, ExecutionStatus::Success);
    assert!(record.stdout.starts_with("0123456789"));
    assert!(record.stdout.contains("[...truncated: 6 bytes dropped]"));
}

#[tokio::test]
async fn test_large_output_within_cap() {
    let executor = CommandExecutor::default();

    let record = executor.execute("seq 1 1000", test_context("lines")).await;

    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.stdout.lines().count(), 1000);
    assert!(!record.stdout.contains("truncated"));
}

#[tokio::test]
async fn test_execution_ids_are_unique() {
    let a = test_context("a");
    let b = test_context("a");
    assert_ne!(a.execution_id, b.execution_id);
    assert_eq!(a.execution_id.len(), 32);
}
