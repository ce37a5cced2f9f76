use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use chronoflow::config::SchedulerConfig;
use chronoflow::scheduler::Scheduler;
use chronoflow::shutdown::install_shutdown_handler;
use chronoflow::watcher::JobDirWatcher;

#[derive(Parser, Debug)]
#[command(name = "chronoflow")]
#[command(about = "Directory-driven job scheduler")]
struct Args {
    /// Directory containing job definition files
    #[arg(long)]
    jobs_dir: Option<PathBuf>,

    /// Directory for the scheduler log and per-execution log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Logging level
    #[arg(long, value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    log_level: Option<String>,
}

fn level_filter(level: &str) -> &'static str {
    match level {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = SchedulerConfig::from_env();
    if let Some(dir) = args.jobs_dir {
        config.jobs_dir = dir;
    }
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // RUST_LOG overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level_filter(&config.log_level))),
        )
        .init();

    // A jobs directory that cannot be created is a startup failure.
    std::fs::create_dir_all(&config.jobs_dir).map_err(|e| {
        format!(
            "cannot create jobs directory {}: {e}",
            config.jobs_dir.display()
        )
    })?;

    tracing::info!(
        jobs_dir = %config.jobs_dir.display(),
        log_dir = %config.log_dir.display(),
        "Starting chronoflow"
    );

    let scheduler = Scheduler::new(config.clone())?;
    scheduler.start();

    let watcher = JobDirWatcher::new(&config.jobs_dir, scheduler.clone(), config.poll_interval);

    let token = install_shutdown_handler();
    let watcher_handle = tokio::spawn(watcher.run(token.clone()));

    // Run until a shutdown signal arrives or the scheduler escalates a
    // fatal error.
    let scheduler_shutdown = scheduler.shutdown_signal();
    tokio::select! {
        _ = token.cancelled() => {}
        _ = scheduler_shutdown.cancelled() => {}
    }

    token.cancel();
    let _ = watcher_handle.await;
    scheduler.stop().await;

    tracing::info!("chronoflow stopped");
    Ok(())
}
