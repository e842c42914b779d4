//! Job identity, lifecycle state, and the descriptor the scheduler dispatches

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::JobError;

/// Boxed future produced by a job callable
pub type JobFuture<T> = BoxFuture<'static, eyre::Result<T>>;

/// A job callable with its argument payload already bound
pub type JobFn<T> = Box<dyn FnOnce(JobContext) -> JobFuture<T> + Send>;

/// Sequence number of a job within its batch, assigned in submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    Running,
    Resolved,
    Rejected,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Resolved | JobState::Rejected | JobState::TimedOut)
    }

    /// Pending -> Running -> exactly one terminal state
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            JobState::Pending => next == JobState::Running,
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// Terminal state that corresponds to a settled outcome
    pub fn from_outcome<T>(outcome: &Result<T, JobError>) -> Self {
        match outcome {
            Ok(_) => JobState::Resolved,
            Err(e) if e.is_timeout() => JobState::TimedOut,
            Err(_) => JobState::Rejected,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Resolved => write!(f, "resolved"),
            JobState::Rejected => write!(f, "rejected"),
            JobState::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// Observable part of a job: identity, configuration and run-state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub label: String,
    pub timeout: Duration,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobInfo {
    /// Wall-clock run time, once the job has settled
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Handed to every job callable when it is admitted
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: JobId,
    /// Fires when the batch is cancelled or this job's deadline elapsed.
    /// Checking it is voluntary; nothing is interrupted forcibly.
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been signalled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A job as the caller describes it, before submission
///
/// `work` is optional so a batch assembled from external input can carry a
/// missing callable; [`crate::Scheduler::submit`] rejects it.
pub struct JobSpec<T> {
    pub(crate) label: Option<String>,
    pub(crate) work: Option<JobFn<T>>,
    pub(crate) timeout: Option<Duration>,
}

impl<T: Send + 'static> JobSpec<T> {
    pub fn new() -> Self {
        Self {
            label: None,
            work: None,
            timeout: None,
        }
    }

    /// Bind a callable and its argument payload
    pub fn work<A, F, Fut>(mut self, work: F, args: A) -> Self
    where
        A: Send + 'static,
        F: FnOnce(A, JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        self.work = Some(Box::new(move |ctx| work(args, ctx).boxed()));
        self
    }

    /// Use an already boxed callable (or none at all)
    pub fn with_boxed(mut self, work: Option<JobFn<T>>) -> Self {
        self.work = work;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Per-job deadline; the queue default applies when unset
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<T: Send + 'static> Default for JobSpec<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A submitted job: immutable identity plus mutable run-state
pub struct JobDescriptor<T> {
    info: JobInfo,
    work: Option<JobFn<T>>,
}

impl<T> JobDescriptor<T> {
    pub(crate) fn new(id: JobId, label: String, timeout: Duration, work: JobFn<T>) -> Self {
        debug!(%id, %label, timeout_ms = timeout.as_millis() as u64, "JobDescriptor::new: called");
        Self {
            info: JobInfo {
                id,
                label,
                timeout,
                state: JobState::Pending,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
            work: Some(work),
        }
    }

    pub fn id(&self) -> JobId {
        self.info.id
    }

    pub fn state(&self) -> JobState {
        self.info.state
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    /// Move to Running and hand out the callable. Returns None if the job
    /// was not Pending; a job is never dispatched twice.
    pub(crate) fn admit(&mut self) -> Option<JobFn<T>> {
        if !self.transition(JobState::Running) {
            return None;
        }
        self.info.started_at = Some(Utc::now());
        self.work.take()
    }

    /// Record the terminal state for an outcome. Returns false, leaving the
    /// descriptor untouched, if it has already settled.
    pub(crate) fn settle(&mut self, outcome: &Result<T, JobError>) -> bool {
        let next = JobState::from_outcome(outcome);
        if !self.transition(next) {
            return false;
        }
        self.info.finished_at = Some(Utc::now());
        true
    }

    fn transition(&mut self, next: JobState) -> bool {
        let current = self.info.state;
        if !current.can_transition_to(next) {
            warn!(id = %self.info.id, %current, %next, "JobDescriptor: illegal transition ignored");
            return false;
        }
        debug!(id = %self.info.id, %current, %next, "JobDescriptor::transition");
        self.info.state = next;
        true
    }
}

impl<T> fmt::Debug for JobDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("info", &self.info)
            .field("has_work", &self.work.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> JobDescriptor<u32> {
        let spec = JobSpec::new().work(|n: u32, _ctx| async move { Ok(n * 2) }, 21);
        JobDescriptor::new(JobId::new(1), "double".to_string(), Duration::from_secs(5), spec.work.unwrap())
    }

    fn context() -> JobContext {
        JobContext {
            id: JobId::new(1),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(!JobState::Pending.can_transition_to(JobState::Resolved));
        assert!(JobState::Running.can_transition_to(JobState::Resolved));
        assert!(JobState::Running.can_transition_to(JobState::Rejected));
        assert!(JobState::Running.can_transition_to(JobState::TimedOut));
        assert!(!JobState::TimedOut.can_transition_to(JobState::Resolved));
        assert!(!JobState::Resolved.can_transition_to(JobState::Running));
    }

    #[test]
    fn test_state_from_outcome() {
        let ok: Result<(), JobError> = Ok(());
        assert_eq!(JobState::from_outcome(&ok), JobState::Resolved);

        let failed: Result<(), JobError> = Err(JobError::failed(eyre::eyre!("nope")));
        assert_eq!(JobState::from_outcome(&failed), JobState::Rejected);

        let timed_out: Result<(), JobError> = Err(JobError::Timeout {
            bound: Duration::from_secs(1),
        });
        assert_eq!(JobState::from_outcome(&timed_out), JobState::TimedOut);
    }

    #[test]
    fn test_job_id_display_and_order() {
        assert_eq!(JobId::new(7).to_string(), "#7");
        assert!(JobId::new(1) < JobId::new(2));
    }

    #[tokio::test]
    async fn test_admit_hands_out_work_once() {
        let mut job = descriptor();
        assert_eq!(job.state(), JobState::Pending);

        let work = job.admit().expect("first admission yields the callable");
        assert_eq!(job.state(), JobState::Running);
        assert!(job.info().started_at.is_some());
        assert!(job.admit().is_none());

        assert_eq!(work(context()).await.unwrap(), 42);
    }

    #[test]
    fn test_terminal_state_is_never_overwritten() {
        let mut job = descriptor();
        job.admit();

        let timed_out: Result<u32, JobError> = Err(JobError::Timeout {
            bound: Duration::from_secs(5),
        });
        assert!(job.settle(&timed_out));
        assert_eq!(job.state(), JobState::TimedOut);

        // A late success after the deadline must not change anything
        assert!(!job.settle(&Ok(42)));
        assert_eq!(job.state(), JobState::TimedOut);
        assert!(job.info().elapsed().is_some());
    }

    #[test]
    fn test_settle_requires_running() {
        let mut job = descriptor();
        assert!(!job.settle(&Ok(1)));
        assert_eq!(job.state(), JobState::Pending);
    }

    #[test]
    fn test_spec_without_work() {
        let spec: JobSpec<()> = JobSpec::new().label("empty").timeout(Duration::from_secs(1));
        assert!(spec.work.is_none());
        assert_eq!(spec.label.as_deref(), Some("empty"));
        assert_eq!(spec.timeout, Some(Duration::from_secs(1)));
    }
}
