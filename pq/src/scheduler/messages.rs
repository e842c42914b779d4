//! Message types exchanged with the dispatch loop

use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::aggregate::Summary;
use crate::error::JobError;
use crate::job::JobId;

/// Control requests from a [`super::BatchControl`]
#[derive(Debug)]
pub(crate) enum BatchCommand {
    /// Stop admitting until resumed
    Pause,

    /// Clear the pause and fill free slots up to the new bound
    Resume { concurrency: usize },

    /// Stop admitting for the rest of the batch
    Cancel,

    /// Report current counts
    Snapshot { reply_tx: oneshot::Sender<BatchSnapshot> },
}

/// Sent by a job runner task when its job settles
#[derive(Debug)]
pub(crate) struct Settlement<T> {
    pub id: JobId,
    pub outcome: Result<T, JobError>,
}

/// Point-in-time view of a running batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    /// Jobs never started yet
    pub pending: usize,
    pub running: usize,
    pub recorded: usize,
    /// Fixed when submission closed
    pub total: usize,
    pub concurrency: usize,
    pub peak_running: usize,
    pub paused: bool,
    pub cancelled: bool,
    /// The dispatch loop has produced its report; counts are final
    pub finished: bool,
    pub summary: Summary,
}

impl BatchSnapshot {
    /// State of a batch that has not admitted anything yet
    pub(crate) fn initial(batch_id: Uuid, total: usize, concurrency: usize) -> Self {
        Self {
            batch_id,
            pending: total,
            running: 0,
            recorded: 0,
            total,
            concurrency,
            peak_running: 0,
            paused: false,
            cancelled: false,
            finished: false,
            summary: Summary {
                total,
                ..Default::default()
            },
        }
    }
}
