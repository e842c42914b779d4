//! Error types for the job queue
//!
//! Two families live here:
//! - [`SchedulerError`]: configuration and control errors, raised at the call
//!   that caused them and never recorded in a batch
//! - [`JobError`]: why a single job settled without a result; captured,
//!   recorded and broadcast, never raised out of the dispatch loop

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the scheduler API
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("Job '{label}' was submitted without a work function")]
    MissingWork { label: String },

    #[error("Job '{label}' has a zero timeout bound")]
    InvalidTimeout { label: String },

    #[error("Batch {batch_id} has already finished")]
    BatchClosed { batch_id: Uuid },

    #[error("Dispatch loop for batch {batch_id} failed: {message}")]
    DispatcherFailed { batch_id: Uuid, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Cause of a Rejected or TimedOut job
///
/// Cloneable so the same cause can be stored in the aggregate and carried by
/// every subscriber's copy of the failure event.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The callable reported a failure
    #[error("{0}")]
    Failed(Arc<eyre::Report>),

    /// The deadline elapsed before the callable settled
    #[error("Job exceeded its timeout of {}ms", .bound.as_millis())]
    Timeout { bound: Duration },

    /// The callable panicked
    #[error("Job panicked: {message}")]
    Panicked { message: String },
}

impl JobError {
    /// Wrap a failure reported by a job callable
    pub fn failed(report: eyre::Report) -> Self {
        Self::Failed(Arc::new(report))
    }

    /// True for the distinguished deadline failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The underlying report when the callable itself failed
    pub fn report(&self) -> Option<&eyre::Report> {
        match self {
            Self::Failed(report) => Some(&**report),
            _ => None,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

impl From<eyre::Report> for JobError {
    fn from(report: eyre::Report) -> Self {
        Self::failed(report)
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
