//! Job notifications
//!
//! The dispatch loop publishes a [`JobEvent`] for every admission and every
//! settlement, and one final `BatchCompleted`. Delivery goes through a tokio
//! broadcast channel, so a slow observer never holds up dispatch; it lags
//! instead and is told how many events it missed.
//!
//! Observers subscribe through [`crate::Scheduler::subscribe`], which is only
//! reachable before the batch starts. Every subscriber therefore sees the
//! complete stream, buffered up to the configured channel capacity.
//!
//! ```rust,ignore
//! let mut scheduler = Scheduler::new(QueueConfig::default());
//! let mut rx = scheduler.subscribe();
//! scheduler.add_job(copy_file, (src, dst))?;
//! let batch = scheduler.start(4)?;
//!
//! while let Ok(event) = rx.recv().await {
//!     if let JobEvent::JobFailed { job, cause, .. } = &event {
//!         eprintln!("{} failed: {}", job.label, cause);
//!     }
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use logger::{EventLogger, event_log_path, read_event_log, spawn_event_logger};
pub use types::{EventLogEntry, JobEvent};
