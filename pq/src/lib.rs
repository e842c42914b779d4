//! parqueue - bounded-concurrency job queue
//!
//! Submit a batch of asynchronous jobs, start it with a concurrency bound, and
//! get exactly one completion report once every admitted job has settled.
//!
//! # Core Concepts
//!
//! - **Bounded admission**: at most `concurrency` jobs run at once; each
//!   settlement frees one slot for the next pending job
//! - **Per-job deadlines**: every job races a timer and settles exactly once
//! - **Stop on failure**: optionally, the first failure stops further admissions
//!   while running jobs drain
//! - **Notifications**: admissions and settlements are broadcast to subscribers
//!
//! # Modules
//!
//! - [`scheduler`] - Scheduler, batch handle and dispatch loop
//! - [`job`] - Job identity, state and descriptors
//! - [`guard`] - Per-job timeout race
//! - [`aggregate`] - Result records and batch summary
//! - [`events`] - Notification bus and JSONL event log
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface of the `pq` binary
//!
//! # Example
//!
//! ```no_run
//! use parqueue::{QueueConfig, Scheduler};
//!
//! # async fn example() -> eyre::Result<()> {
//! let mut scheduler = Scheduler::new(QueueConfig::default());
//! for n in 0..10u64 {
//!     scheduler.add_job(|n: u64, _ctx| async move { Ok(n * n) }, n)?;
//! }
//! let report = scheduler.start(3)?.wait().await?;
//! println!("{} of {} jobs succeeded", report.summary.succeeded, report.summary.total);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod job;
pub mod scheduler;

// Re-export commonly used types
pub use aggregate::{BatchReport, ResultAggregator, ResultRecord, Summary};
pub use config::Config;
pub use error::{JobError, Result, SchedulerError};
pub use events::{EventBus, EventLogEntry, EventLogger, JobEvent, event_log_path, read_event_log, spawn_event_logger};
pub use guard::TimeoutGuard;
pub use job::{JobContext, JobDescriptor, JobFn, JobFuture, JobId, JobInfo, JobSpec, JobState};
pub use scheduler::{BatchControl, BatchHandle, BatchSnapshot, CompletionCallback, QueueConfig, Scheduler};
