//! Result aggregation and completion detection

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{JobId, JobState};

/// Outcome of one settled job, appended in settlement order
#[derive(Debug, Clone)]
pub struct ResultRecord<T> {
    pub job_id: JobId,
    pub state: JobState,
    pub succeeded: bool,
    /// Present only for resolved jobs when results are saved
    pub payload: Option<T>,
    /// Always kept for rejected and timed-out jobs
    pub cause: Option<JobError>,
}

/// Counts over a batch, available whether or not payloads are saved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Jobs never admitted. Only known once the batch has finished, zero
    /// before that.
    pub skipped: usize,
}

impl Summary {
    /// Jobs that settled in any terminal state
    pub fn settled(&self) -> usize {
        self.succeeded + self.failed + self.timed_out
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

/// Accumulates per-job outcomes for one batch
#[derive(Debug)]
pub struct ResultAggregator<T> {
    total: usize,
    save_results: bool,
    records: Vec<ResultRecord<T>>,
    succeeded: usize,
    failed: usize,
    timed_out: usize,
}

impl<T: Clone> ResultAggregator<T> {
    /// `total` is the batch size, fixed when submission closes
    pub fn new(total: usize, save_results: bool) -> Self {
        debug!(total, save_results, "ResultAggregator::new: called");
        Self {
            total,
            save_results,
            records: Vec::with_capacity(total),
            succeeded: 0,
            failed: 0,
            timed_out: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn saves_results(&self) -> bool {
        self.save_results
    }

    /// Append the outcome of a settled job. A successful payload is copied
    /// into the aggregate only when results are saved.
    pub fn record(&mut self, job_id: JobId, outcome: &Result<T, JobError>) {
        let state = JobState::from_outcome(outcome);
        let record = match outcome {
            Ok(value) => {
                self.succeeded += 1;
                ResultRecord {
                    job_id,
                    state,
                    succeeded: true,
                    payload: self.save_results.then(|| value.clone()),
                    cause: None,
                }
            }
            Err(cause) => {
                if cause.is_timeout() {
                    self.timed_out += 1;
                } else {
                    self.failed += 1;
                }
                ResultRecord {
                    job_id,
                    state,
                    succeeded: false,
                    payload: None,
                    cause: Some(cause.clone()),
                }
            }
        };
        debug!(%job_id, %state, recorded = self.records.len() + 1, total = self.total, "ResultAggregator::record");
        self.records.push(record);
    }

    pub fn recorded(&self) -> usize {
        self.records.len()
    }

    /// Every submitted job has a record
    pub fn is_complete(&self) -> bool {
        self.records.len() == self.total
    }

    pub fn records(&self) -> &[ResultRecord<T>] {
        &self.records
    }

    /// Counts so far. `skipped` is left for the dispatcher to fill in at
    /// the end, since a job without a record may still be admitted.
    pub fn summary(&self) -> Summary {
        Summary {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            timed_out: self.timed_out,
            skipped: 0,
        }
    }

    pub fn into_records(self) -> Vec<ResultRecord<T>> {
        self.records
    }
}

/// Everything the completion callback and [`crate::BatchHandle::wait`] receive
#[derive(Debug, Clone)]
pub struct BatchReport<T> {
    pub batch_id: Uuid,
    pub records: Vec<ResultRecord<T>>,
    pub summary: Summary,
    pub cancelled: bool,
    /// Ids of jobs never admitted; they have no entry in `records`
    pub not_admitted: Vec<JobId>,
}

impl<T> BatchReport<T> {
    pub fn success(&self) -> bool {
        self.summary.all_succeeded()
    }

    pub fn record(&self, job_id: JobId) -> Option<&ResultRecord<T>> {
        self.records.iter().find(|r| r.job_id == job_id)
    }
}
