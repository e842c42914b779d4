//! Event types published by the dispatch loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Summary;
use crate::error::JobError;
use crate::job::{JobId, JobInfo};

/// Everything observers can see happen in a batch
///
/// Settlement events carry the settled job's final [`JobInfo`]; they are
/// published only after the dispatch loop has finished its bookkeeping for
/// that job, so a snapshot taken from a handler already includes it.
#[derive(Clone, Debug)]
pub enum JobEvent<T> {
    /// A job was admitted and its callable invoked
    JobStarted { batch_id: Uuid, job: JobInfo },
    /// The callable produced a value before its deadline
    JobSucceeded { batch_id: Uuid, job: JobInfo, result: T },
    /// The callable reported a failure (or panicked)
    JobFailed { batch_id: Uuid, job: JobInfo, cause: JobError },
    /// The deadline elapsed first
    JobTimedOut { batch_id: Uuid, job: JobInfo, cause: JobError },
    /// Last event of a batch
    BatchCompleted { batch_id: Uuid, summary: Summary },
}

impl<T> JobEvent<T> {
    pub fn batch_id(&self) -> Uuid {
        match self {
            JobEvent::JobStarted { batch_id, .. }
            | JobEvent::JobSucceeded { batch_id, .. }
            | JobEvent::JobFailed { batch_id, .. }
            | JobEvent::JobTimedOut { batch_id, .. }
            | JobEvent::BatchCompleted { batch_id, .. } => *batch_id,
        }
    }

    pub fn job(&self) -> Option<&JobInfo> {
        match self {
            JobEvent::JobStarted { job, .. }
            | JobEvent::JobSucceeded { job, .. }
            | JobEvent::JobFailed { job, .. }
            | JobEvent::JobTimedOut { job, .. } => Some(job),
            JobEvent::BatchCompleted { .. } => None,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job().map(|j| j.id)
    }

    /// True for the three per-job settlement notifications
    pub fn is_settlement(&self) -> bool {
        matches!(
            self,
            JobEvent::JobSucceeded { .. } | JobEvent::JobFailed { .. } | JobEvent::JobTimedOut { .. }
        )
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::JobStarted { .. } => "JobStarted",
            JobEvent::JobSucceeded { .. } => "JobSucceeded",
            JobEvent::JobFailed { .. } => "JobFailed",
            JobEvent::JobTimedOut { .. } => "JobTimedOut",
            JobEvent::BatchCompleted { .. } => "BatchCompleted",
        }
    }
}

/// A timestamped, payload-free event description for file persistence
///
/// Job results are opaque to the queue and are not written; failure causes
/// are kept as their display text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "batch-id")]
    pub batch_id: Uuid,
    #[serde(rename = "event-type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

impl EventLogEntry {
    /// Describe an event with the current timestamp
    pub fn new<T>(event: &JobEvent<T>) -> Self {
        let (cause, summary) = match event {
            JobEvent::JobFailed { cause, .. } | JobEvent::JobTimedOut { cause, .. } => (Some(cause.to_string()), None),
            JobEvent::BatchCompleted { summary, .. } => (None, Some(*summary)),
            _ => (None, None),
        };
        Self {
            timestamp: Utc::now(),
            batch_id: event.batch_id(),
            event_type: event.event_type().to_string(),
            job: event.job().cloned(),
            cause,
            summary,
        }
    }
}
