use std::path::{Path, PathBuf};

use crate::executor::ExecutionRecord;

/// Writes one file per execution attempt at
/// `<log_dir>/<job_id>/<execution_id>.log`.
///
/// The record is rendered to a buffer and written in a single call, so a
/// reader never observes a partial file. The per-job directory is created
/// lazily.
#[derive(Debug, Clone)]
pub struct ExecutionLogWriter {
    log_dir: PathBuf,
}

impl ExecutionLogWriter {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub async fn write(&self, record: &ExecutionRecord) -> std::io::Result<PathBuf> {
        let job_dir = self.log_dir.join(&record.job_id);
        tokio::fs::create_dir_all(&job_dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&job_dir, std::fs::Permissions::from_mode(0o755)).await?;
        }

        let path = job_dir.join(format!("{}.log", record.execution_id));
        tokio::fs::write(&path, render(record)).await?;
        Ok(path)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

fn render(record: &ExecutionRecord) -> String {
    const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

    let mut out = String::with_capacity(
        256 + record.command.len() + record.stdout.len() + record.stderr.len(),
    );
    out.push_str(&format!("execution_id: {}\n", record.execution_id));
    out.push_str(&format!("job_id: {}\n", record.job_id));
    out.push_str(&format!("command: {}\n", record.command));
    out.push_str(&format!(
        "start_time: {}\n",
        record.start_time.format(TIME_FORMAT)
    ));
    out.push_str(&format!(
        "end_time: {}\n",
        record.end_time.format(TIME_FORMAT)
    ));
    out.push_str(&format!(
        "duration_seconds: {:.6}\n",
        record.duration_seconds
    ));
    out.push_str(&format!("status: {}\n", record.status));
    out.push_str(&format!("exit_code: {}\n", record.exit_code));
    out.push_str("stdout:\n");
    push_stream(&mut out, &record.stdout);
    out.push_str("stderr:\n");
    push_stream(&mut out, &record.stderr);
    out
}

/// Stream blocks always end with a newline when non-empty.
fn push_stream(out: &mut String, stream: &str) {
    out.push_str(stream);
    if !stream.is_empty() && !stream.ends_with('\n') {
        out.push('\n');
    }
}
