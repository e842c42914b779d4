//! pq - bounded-concurrency job runner
//!
//! CLI entry point running demo batches on the parqueue scheduler.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, info};

use parqueue::cli::{Cli, Command};
use parqueue::config::Config;
use parqueue::{BatchReport, JobContext, JobEvent, JobSpec, Scheduler, event_log_path, spawn_event_logger};

fn setup_logging(level: &str) -> Result<()> {
    let level: tracing::Level = level
        .parse()
        .map_err(|_| eyre::eyre!("Unknown log level: {}", level))?;

    // Logs go to stderr so job output on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    debug!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging: CLI flag, then config file, then info
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    setup_logging(&level).context("Failed to setup logging")?;

    // CLI flags override the config file
    if let Some(concurrency) = cli.concurrency {
        config.queue.concurrency = concurrency;
    }
    if cli.save_results {
        config.queue.save_results = true;
    }
    if cli.keep_going {
        config.queue.stop_on_failure = false;
    }
    config.validate().context("Invalid configuration")?;

    let events = cli.events.as_deref();
    match cli.command {
        Command::Sleep {
            jobs,
            sleep_ms,
            fail_every,
            timeout_secs,
        } => cmd_sleep(&config, events, jobs, sleep_ms, fail_every, timeout_secs).await,
        Command::Copy { src, dst } => cmd_copy(&config, events, &src, &dst).await,
    }
}

/// Jobs that sleep and then report, every `fail_every`-th one failing
async fn cmd_sleep(
    config: &Config,
    events: Option<&Path>,
    jobs: usize,
    sleep_ms: u64,
    fail_every: Option<usize>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let mut scheduler: Scheduler<String> = Scheduler::new(config.queue.clone());

    for n in 1..=jobs {
        let fails = fail_every.is_some_and(|k| k > 0 && n % k == 0);
        let mut spec = JobSpec::new().label(format!("sleep-{}", n)).work(
            |(n, sleep_ms, fails): (usize, u64, bool), _ctx: JobContext| async move {
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                if fails {
                    return Err(eyre::eyre!("job {} failed on request", n));
                }
                Ok(format!("job {} slept {}ms", n, sleep_ms))
            },
            (n, sleep_ms, fails),
        );
        if let Some(secs) = timeout_secs {
            spec = spec.timeout(Duration::from_secs(secs));
        }
        scheduler.submit(spec)?;
    }

    let report = run_batch(scheduler, config, events).await?;
    finish(&report)
}

/// Copy each regular file of `src` into `dst`, one job per file
async fn cmd_copy(config: &Config, events: Option<&Path>, src: &Path, dst: &Path) -> Result<()> {
    let mut files: Vec<PathBuf> = fs::read_dir(src)
        .context(format!("Failed to read directory {}", src.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    debug!(count = files.len(), "cmd_copy: found files");

    fs::create_dir_all(dst).context(format!("Failed to create directory {}", dst.display()))?;

    let mut scheduler: Scheduler<u64> = Scheduler::new(config.queue.clone());
    for file in files {
        let Some(name) = file.file_name().map(|n| n.to_os_string()) else {
            continue;
        };
        let target = dst.join(&name);
        let spec = JobSpec::new().label(name.to_string_lossy()).work(
            |(from, to): (PathBuf, PathBuf), _ctx: JobContext| async move {
                let bytes = tokio::fs::copy(&from, &to)
                    .await
                    .context(format!("Failed to copy {} to {}", from.display(), to.display()))?;
                Ok(bytes)
            },
            (file, target),
        );
        scheduler.submit(spec)?;
    }

    let report = run_batch(scheduler, config, events).await?;
    if report.summary.all_succeeded() {
        let bytes: u64 = report.records.iter().filter_map(|r| r.payload).sum();
        if config.queue.save_results {
            println!("Copied {} bytes", bytes);
        }
    }
    finish(&report)
}

/// Start a batch, print its notifications and wait for the report
async fn run_batch<T>(scheduler: Scheduler<T>, config: &Config, events: Option<&Path>) -> Result<BatchReport<T>>
where
    T: Clone + Send + Display + 'static,
{
    let printer = tokio::spawn(print_events(scheduler.subscribe()));
    let logger = match events {
        Some(dir) => Some(spawn_event_logger(scheduler.subscribe(), dir).context("Failed to start event logger")?),
        None => None,
    };

    info!(
        batch_id = %scheduler.batch_id(),
        jobs = scheduler.pending_count(),
        concurrency = config.queue.concurrency,
        "Starting batch"
    );
    let handle = scheduler.start(config.queue.concurrency)?;
    let report = handle.wait().await?;

    printer.await.context("Event printer failed")?;
    if let Some(logger) = logger {
        logger.await.context("Event logger failed")?;
        if let Some(dir) = events {
            println!("Events: {}", event_log_path(dir, report.batch_id).display());
        }
    }

    Ok(report)
}

async fn print_events<T: Clone + Display>(mut rx: broadcast::Receiver<JobEvent<T>>) {
    loop {
        match rx.recv().await {
            Ok(JobEvent::JobStarted { job, .. }) => {
                println!("{} {} {}", "start".cyan(), job.id, job.label);
            }
            Ok(JobEvent::JobSucceeded { job, result, .. }) => {
                let ms = job.elapsed().map(|d| d.num_milliseconds()).unwrap_or_default();
                println!("{} {} {} ({}ms) {}", "ok".green(), job.id, job.label, ms, result);
            }
            Ok(JobEvent::JobFailed { job, cause, .. }) => {
                println!("{} {} {}: {}", "failed".red(), job.id, job.label, cause);
            }
            Ok(JobEvent::JobTimedOut { job, cause, .. }) => {
                println!("{} {} {}: {}", "timeout".yellow(), job.id, job.label, cause);
            }
            Ok(JobEvent::BatchCompleted { .. }) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("{} missed {} notifications", "warning:".yellow(), n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Print the summary; any job that did not succeed fails the command
fn finish<T>(report: &BatchReport<T>) -> Result<()> {
    let summary = &report.summary;
    println!();
    println!(
        "{} {} total, {} succeeded, {} failed, {} timed out, {} not started",
        "Summary:".bold(),
        summary.total,
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red(),
        summary.timed_out.to_string().yellow(),
        summary.skipped
    );

    if report.success() {
        Ok(())
    } else {
        Err(eyre::eyre!(
            "{} of {} jobs did not succeed",
            summary.total - summary.succeeded,
            summary.total
        ))
    }
}
