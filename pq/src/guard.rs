//! Per-job deadline
//!
//! The callable runs in its own task and the guard races that task against a
//! timer. When the callable wins, the timer is dropped with the race and can
//! never fire. When the timer wins, the task is detached rather than aborted:
//! it keeps running in the background, its cancellation token is signalled,
//! and whatever it eventually produces goes nowhere.

use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::error::JobError;
use crate::job::{JobContext, JobFn};

/// Races one job's execution against its timeout bound
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    bound: Duration,
}

impl TimeoutGuard {
    pub fn new(bound: Duration) -> Self {
        Self { bound }
    }

    pub fn bound(&self) -> Duration {
        self.bound
    }

    /// Invoke the callable exactly once and settle with whichever of the
    /// callable and the deadline finishes first
    pub async fn run<T: Send + 'static>(&self, work: JobFn<T>, ctx: JobContext) -> Result<T, JobError> {
        let id = ctx.id;
        let token = ctx.cancel.clone();
        debug!(%id, bound_ms = self.bound.as_millis() as u64, "TimeoutGuard::run: called");

        let mut task: JoinHandle<eyre::Result<T>> = tokio::spawn(work(ctx));

        match tokio::time::timeout(self.bound, &mut task).await {
            Ok(Ok(Ok(value))) => {
                debug!(%id, "TimeoutGuard::run: job resolved before deadline");
                Ok(value)
            }
            Ok(Ok(Err(report))) => {
                debug!(%id, error = %report, "TimeoutGuard::run: job rejected");
                Err(JobError::failed(report))
            }
            Ok(Err(join_error)) => {
                warn!(%id, error = %join_error, "TimeoutGuard::run: job task did not complete");
                Err(Self::join_failure(join_error))
            }
            Err(_) => {
                warn!(%id, bound_ms = self.bound.as_millis() as u64, "TimeoutGuard::run: deadline elapsed");
                token.cancel();
                drop(task);
                Err(JobError::Timeout { bound: self.bound })
            }
        }
    }

    fn join_failure(join_error: JoinError) -> JobError {
        if join_error.is_panic() {
            JobError::from_panic(join_error.into_panic())
        } else {
            JobError::failed(eyre::eyre!("Job task was cancelled by the runtime"))
        }
    }
}
