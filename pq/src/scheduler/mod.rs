//! Bounded-concurrency batch scheduler
//!
//! Jobs are submitted to a [`Scheduler`], which is consumed by
//! [`Scheduler::start`]. The returned [`BatchHandle`] pauses, resumes,
//! cancels and inspects the batch and waits for its [`crate::BatchReport`].

mod config;
mod core;
mod handle;
mod messages;

pub use config::QueueConfig;
pub use core::{CompletionCallback, Scheduler};
pub use handle::{BatchControl, BatchHandle};
pub use messages::BatchSnapshot;
