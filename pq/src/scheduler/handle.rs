//! BatchHandle - caller's interface to a running batch

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::messages::{BatchCommand, BatchSnapshot};
use crate::aggregate::BatchReport;
use crate::error::{Result, SchedulerError};

/// Cloneable control surface: pause, resume, cancel, snapshot
///
/// Every method only enqueues a request for the dispatch loop, so none of them
/// block and all of them are applied in the order they were sent.
#[derive(Debug, Clone)]
pub struct BatchControl {
    batch_id: Uuid,
    tx: mpsc::UnboundedSender<BatchCommand>,
    /// Last state the dispatch loop published; outlives the loop
    snapshot_rx: watch::Receiver<BatchSnapshot>,
}

impl BatchControl {
    pub(crate) fn new(
        batch_id: Uuid,
        tx: mpsc::UnboundedSender<BatchCommand>,
        snapshot_rx: watch::Receiver<BatchSnapshot>,
    ) -> Self {
        Self {
            batch_id,
            tx,
            snapshot_rx,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Stop admitting new jobs; running jobs continue. Idempotent.
    pub fn pause(&self) -> Result<()> {
        debug!(batch_id = %self.batch_id, "BatchControl::pause: called");
        self.send(BatchCommand::Pause)
    }

    /// Clear a pause and fill free slots up to `concurrency`
    ///
    /// Lowering the bound never stops running jobs; the running set drains
    /// down to the new bound as jobs settle.
    pub fn resume(&self, concurrency: usize) -> Result<()> {
        debug!(batch_id = %self.batch_id, concurrency, "BatchControl::resume: called");
        if concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency(concurrency));
        }
        self.send(BatchCommand::Resume { concurrency })
    }

    /// Permanently stop admitting jobs. Running jobs still settle and are
    /// recorded; their cancellation tokens are signalled.
    pub fn cancel(&self) -> Result<()> {
        debug!(batch_id = %self.batch_id, "BatchControl::cancel: called");
        self.send(BatchCommand::Cancel)
    }

    /// Current counts, consistent with every settlement handled so far
    ///
    /// Once the dispatch loop has finished this returns its final state, with
    /// `finished` set.
    pub async fn snapshot(&self) -> Result<BatchSnapshot> {
        debug!(batch_id = %self.batch_id, "BatchControl::snapshot: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.send(BatchCommand::Snapshot { reply_tx }).is_ok() {
            if let Ok(snapshot) = reply_rx.await {
                return Ok(snapshot);
            }
        }
        debug!(batch_id = %self.batch_id, "BatchControl::snapshot: loop gone, using last published state");
        Ok(self.snapshot_rx.borrow().clone())
    }

    fn send(&self, command: BatchCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| SchedulerError::BatchClosed {
            batch_id: self.batch_id,
        })
    }
}

/// Returned by [`crate::Scheduler::start`]; owns the dispatch loop task
pub struct BatchHandle<T> {
    control: BatchControl,
    join: JoinHandle<BatchReport<T>>,
}

impl<T> BatchHandle<T> {
    pub(crate) fn new(control: BatchControl, join: JoinHandle<BatchReport<T>>) -> Self {
        Self { control, join }
    }

    pub fn batch_id(&self) -> Uuid {
        self.control.batch_id()
    }

    /// A control handle that can be moved into job callables or observers
    pub fn control(&self) -> BatchControl {
        self.control.clone()
    }

    pub fn pause(&self) -> Result<()> {
        self.control.pause()
    }

    pub fn resume(&self, concurrency: usize) -> Result<()> {
        self.control.resume(concurrency)
    }

    pub fn cancel(&self) -> Result<()> {
        self.control.cancel()
    }

    pub async fn snapshot(&self) -> Result<BatchSnapshot> {
        self.control.snapshot().await
    }

    /// True once the dispatch loop has produced its report
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the batch to complete
    pub async fn wait(self) -> Result<BatchReport<T>> {
        let batch_id = self.control.batch_id();
        debug!(%batch_id, "BatchHandle::wait: called");
        self.join.await.map_err(|e| SchedulerError::DispatcherFailed {
            batch_id,
            message: e.to_string(),
        })
    }
}
