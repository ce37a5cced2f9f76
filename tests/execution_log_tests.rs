use std::time::Duration;

use chronoflow::executor::{CommandExecutor, ExecutionContext};
use chronoflow::logging::ExecutionLogWriter;
use tempfile::TempDir;

#[tokio::test]
async fn test_record_file_layout() {
    let dir = TempDir::new().unwrap();
    let writer = ExecutionLogWriter::new(dir.path());

    let record = CommandExecutor::default()
        .execute(
            "echo out && echo err >&2",
            ExecutionContext::new("layout", 0, Duration::from_secs(30)),
        )
        .await;
    let path = writer.write(&record).await.unwrap();

    assert_eq!(
        path,
        dir.path()
            .join("layout")
            .join(format!("{}.log", record.execution_id))
    );

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], format!("execution_id: {}", record.execution_id));
    assert_eq!(lines[1], "job_id: layout");
    assert_eq!(lines[2], "command: echo out && echo err >&2");
    assert!(lines[3].starts_with("start_time: "));
    assert!(lines[4].starts_with("end_time: "));
    assert!(lines[5].starts_with("duration_seconds: "));
    assert_eq!(lines[6], "status: SUCCESS");
    assert_eq!(lines[7], "exit_code: 0");
    assert_eq!(lines[8], "stdout:");
    assert_eq!(lines[9], "out");
    assert_eq!(lines[10], "stderr:");
    assert_eq!(lines[11], "err");

    // Microsecond precision with an explicit UTC offset.
    assert!(lines[3].contains('.'));
    assert!(lines[3].ends_with("+00:00"));
}

#[tokio::test]
async fn test_failure_record() {
    let dir = TempDir::new().unwrap();
    let writer = ExecutionLogWriter::new(dir.path());

    let record = CommandExecutor::default()
        .execute(
            "exit 2",
            ExecutionContext::new("failing", 0, Duration::from_secs(30)),
        )
        .await;
    let path = writer.write(&record).await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("status: FAILURE\n"));
    assert!(contents.contains("exit_code: 2\n"));
}

#[tokio::test]
async fn test_truncation_marker_is_final_line_of_stream() {
    let dir = TempDir::new().unwrap();
    let writer = ExecutionLogWriter::new(dir.path());

    let record = CommandExecutor::default()
        .with_stream_cap(8)
        .execute(
            "printf 'aaaaaaaaaaaaaaaa'",
            ExecutionContext::new("trunc", 0, Duration::from_secs(30)),
        )
        .await;
    let path = writer.write(&record).await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let stdout_block: Vec<&str> = contents
        .split("stdout:\n")
        .nth(1)
        .unwrap()
        .split("stderr:\n")
        .next()
        .unwrap()
        .lines()
        .collect();
    assert_eq!(
        stdout_block.last().copied(),
        Some("[...truncated: 8 bytes dropped]")
    );
}

#[tokio::test]
async fn test_one_directory_per_job() {
    let dir = TempDir::new().unwrap();
    let writer = ExecutionLogWriter::new(dir.path());

    for job_id in ["alpha", "beta"] {
        let record = CommandExecutor::default()
            .execute(
                "true",
                ExecutionContext::new(job_id, 0, Duration::from_secs(30)),
            )
            .await;
        writer.write(&record).await.unwrap();
    }

    assert!(dir.path().join("alpha").is_dir());
    assert!(dir.path().join("beta").is_dir());
}
