//! Scheduler implementation
//!
//! A [`Scheduler`] collects jobs. [`Scheduler::start`] consumes it, fixing the
//! batch size, and spawns a dispatch loop that owns all batch state. Job runner
//! tasks and control handles talk to the loop over channels, so every
//! bookkeeping step for one settlement happens without interleaving.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use super::config::QueueConfig;
use super::handle::{BatchControl, BatchHandle};
use super::messages::{BatchCommand, BatchSnapshot, Settlement};
use crate::aggregate::{BatchReport, ResultAggregator};
use crate::error::{Result, SchedulerError};
use crate::events::{EventBus, JobEvent};
use crate::guard::TimeoutGuard;
use crate::job::{JobContext, JobDescriptor, JobId, JobSpec};

/// Invoked once with the final report when a batch completes
pub type CompletionCallback<T> = Box<dyn FnOnce(&BatchReport<T>) + Send>;

/// Collects the jobs of one batch and starts it
pub struct Scheduler<T> {
    config: QueueConfig,
    batch_id: Uuid,
    span: Span,
    pending: VecDeque<JobDescriptor<T>>,
    next_seq: u64,
    events: EventBus<T>,
    on_complete: Option<CompletionCallback<T>>,
}

impl<T: Clone + Send + 'static> Scheduler<T> {
    /// Create a new scheduler with the given configuration
    pub fn new(config: QueueConfig) -> Self {
        let batch_id = Uuid::now_v7();
        debug!(?config, %batch_id, "Scheduler::new: called");
        let events = EventBus::new(config.channel_capacity, batch_id);
        Self {
            span: info_span!("batch", %batch_id),
            config,
            batch_id,
            pending: VecDeque::new(),
            next_seq: 1,
            events,
            on_complete: None,
        }
    }

    /// Use `span` as the parent of every log line this batch produces
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Subscribe to job notifications
    ///
    /// Only possible before [`Scheduler::start`], so every subscriber sees
    /// the complete stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobEvent<T>> {
        self.events.subscribe()
    }

    /// Set the callback run exactly once when the batch completes
    pub fn on_complete<F>(&mut self, callback: F)
    where
        F: FnOnce(&BatchReport<T>) + Send + 'static,
    {
        debug!(batch_id = %self.batch_id, "Scheduler::on_complete: called");
        self.on_complete = Some(Box::new(callback));
    }

    /// Append a job to the pending set and assign its id
    pub fn submit(&mut self, spec: JobSpec<T>) -> Result<JobId> {
        let id = JobId::new(self.next_seq);
        let label = spec.label.unwrap_or_else(|| format!("job-{}", id.get()));
        debug!(batch_id = %self.batch_id, %id, %label, "Scheduler::submit: called");

        let Some(work) = spec.work else {
            return Err(SchedulerError::MissingWork { label });
        };
        let timeout = spec.timeout.unwrap_or_else(|| self.config.default_timeout());
        if timeout.is_zero() {
            return Err(SchedulerError::InvalidTimeout { label });
        }

        self.next_seq += 1;
        self.pending.push_back(JobDescriptor::new(id, label, timeout, work));
        Ok(id)
    }

    /// Submit a callable with its argument payload under the default timeout
    pub fn add_job<A, F, Fut>(&mut self, work: F, args: A) -> Result<JobId>
    where
        A: Send + 'static,
        F: FnOnce(A, JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        self.submit(JobSpec::new().work(work, args))
    }

    /// Submit a callable with its argument payload and its own deadline
    pub fn add_job_with_timeout<A, F, Fut>(&mut self, work: F, args: A, timeout: Duration) -> Result<JobId>
    where
        A: Send + 'static,
        F: FnOnce(A, JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        self.submit(JobSpec::new().work(work, args).timeout(timeout))
    }

    /// Jobs submitted so far
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Close submission and begin dispatch
    ///
    /// Returns immediately; the first `min(concurrency, jobs)` jobs are
    /// admitted by the dispatch loop before it handles any control request.
    /// Must be called from within a tokio runtime.
    pub fn start(self, concurrency: usize) -> Result<BatchHandle<T>> {
        debug!(batch_id = %self.batch_id, concurrency, jobs = self.pending.len(), "Scheduler::start: called");
        if concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency(concurrency));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut dispatcher = Dispatcher::new(
            self.batch_id,
            &self.config,
            concurrency,
            self.pending,
            self.events,
            command_rx,
            self.span.clone(),
        );
        dispatcher.on_complete = self.on_complete;
        let control = BatchControl::new(self.batch_id, command_tx, dispatcher.snapshot_tx.subscribe());

        let join = tokio::spawn(dispatcher.run().instrument(self.span));
        Ok(BatchHandle::new(control, join))
    }
}

/// Owns the state of a started batch
struct Dispatcher<T> {
    batch_id: Uuid,
    pending: VecDeque<JobDescriptor<T>>,
    running: HashMap<JobId, JobDescriptor<T>>,
    aggregator: ResultAggregator<T>,
    events: EventBus<T>,
    stop_on_failure: bool,
    concurrency: usize,
    peak_running: usize,
    paused: bool,
    cancelled: bool,
    /// Parent of every job's cancellation token
    cancel_token: CancellationToken,
    settle_tx: mpsc::UnboundedSender<Settlement<T>>,
    settle_rx: mpsc::UnboundedReceiver<Settlement<T>>,
    command_rx: mpsc::UnboundedReceiver<BatchCommand>,
    commands_open: bool,
    /// Latest state, readable by controls after the loop is gone
    snapshot_tx: watch::Sender<BatchSnapshot>,
    on_complete: Option<CompletionCallback<T>>,
    span: Span,
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    fn new(
        batch_id: Uuid,
        config: &QueueConfig,
        concurrency: usize,
        pending: VecDeque<JobDescriptor<T>>,
        events: EventBus<T>,
        command_rx: mpsc::UnboundedReceiver<BatchCommand>,
        span: Span,
    ) -> Self {
        let total = pending.len();
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(BatchSnapshot::initial(batch_id, total, concurrency));
        Self {
            batch_id,
            pending,
            running: HashMap::new(),
            aggregator: ResultAggregator::new(total, config.save_results),
            events,
            stop_on_failure: config.stop_on_failure,
            concurrency,
            peak_running: 0,
            paused: false,
            cancelled: false,
            cancel_token: CancellationToken::new(),
            settle_tx,
            settle_rx,
            command_rx,
            commands_open: true,
            snapshot_tx,
            on_complete: None,
            span,
        }
    }

    async fn run(mut self) -> BatchReport<T> {
        info!(
            total = self.aggregator.total(),
            concurrency = self.concurrency,
            "Dispatcher::run: batch started"
        );
        self.fill_slots();
        self.publish();

        while !self.is_finished() {
            tokio::select! {
                Some(settlement) = self.settle_rx.recv() => self.handle_settlement(settlement),
                command = self.command_rx.recv(), if self.commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => self.handle_controls_dropped(),
                },
            }
            self.publish();
        }

        self.finish()
    }

    /// Every submitted job has a record, or a cancelled batch has drained
    fn is_finished(&self) -> bool {
        self.aggregator.is_complete() || (self.cancelled && self.running.is_empty())
    }

    fn handle_settlement(&mut self, settlement: Settlement<T>) {
        let Settlement { id, outcome } = settlement;
        let Some(mut job) = self.running.remove(&id) else {
            warn!(%id, "Dispatcher: settlement for a job that is not running ignored");
            return;
        };
        if !job.settle(&outcome) {
            return;
        }

        self.aggregator.record(id, &outcome);
        match &outcome {
            Ok(_) => debug!(%id, label = %job.info().label, "Dispatcher: job resolved"),
            Err(cause) => {
                warn!(%id, label = %job.info().label, error = %cause, "Dispatcher: job failed");
                if self.stop_on_failure && !self.cancelled {
                    info!(%id, "Dispatcher: stopping admissions after failure");
                    self.cancel();
                }
            }
        }

        // Observers woken by the notification must already see this settlement
        self.publish();
        self.events.job_settled(job.info().clone(), outcome);
        self.fill_slots();
    }

    fn handle_command(&mut self, command: BatchCommand) {
        match command {
            BatchCommand::Pause => {
                debug!("Dispatcher: pause");
                self.paused = true;
            }
            BatchCommand::Resume { concurrency } => {
                debug!(concurrency, "Dispatcher: resume");
                self.concurrency = concurrency;
                self.paused = false;
                self.fill_slots();
            }
            BatchCommand::Cancel => {
                info!("Dispatcher: batch cancelled");
                self.cancel();
            }
            BatchCommand::Snapshot { reply_tx } => {
                let _ = reply_tx.send(self.snapshot());
            }
        }
    }

    /// No handle is left to resume a paused batch, so it is wound down
    fn handle_controls_dropped(&mut self) {
        debug!("Dispatcher: all control handles dropped");
        self.commands_open = false;
        if self.paused {
            warn!(pending = self.pending.len(), "Dispatcher: paused batch can no longer resume, cancelling");
            self.cancel();
        }
    }

    fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.cancel_token.cancel();
        }
    }

    fn fill_slots(&mut self) {
        while !self.paused && !self.cancelled && self.running.len() < self.concurrency {
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            self.admit(job);
        }
    }

    fn admit(&mut self, mut job: JobDescriptor<T>) {
        let id = job.id();
        let Some(work) = job.admit() else {
            warn!(%id, state = %job.state(), "Dispatcher: job is not pending, not admitting it");
            return;
        };

        let timeout = job.info().timeout;
        let ctx = JobContext {
            id,
            cancel: self.cancel_token.child_token(),
        };
        self.events.job_started(job.info());
        self.running.insert(id, job);
        self.peak_running = self.peak_running.max(self.running.len());
        debug!(%id, running = self.running.len(), pending = self.pending.len(), "Dispatcher: job admitted");

        let settle_tx = self.settle_tx.clone();
        tokio::spawn(
            async move {
                let outcome = TimeoutGuard::new(timeout).run(work, ctx).await;
                let _ = settle_tx.send(Settlement { id, outcome });
            }
            .instrument(self.span.clone()),
        );
    }

    fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            batch_id: self.batch_id,
            pending: self.pending.len(),
            running: self.running.len(),
            recorded: self.aggregator.recorded(),
            total: self.aggregator.total(),
            concurrency: self.concurrency,
            peak_running: self.peak_running,
            paused: self.paused,
            cancelled: self.cancelled,
            finished: false,
            summary: self.aggregator.summary(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn finish(self) -> BatchReport<T> {
        let mut summary = self.aggregator.summary();
        summary.skipped = self.pending.len();

        let mut last = self.snapshot();
        last.finished = true;
        last.summary = summary;
        self.snapshot_tx.send_replace(last);

        let report = BatchReport {
            batch_id: self.batch_id,
            not_admitted: self.pending.iter().map(|job| job.id()).collect(),
            records: self.aggregator.into_records(),
            summary,
            cancelled: self.cancelled,
        };
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            skipped = summary.skipped,
            peak_running = self.peak_running,
            "Dispatcher::finish: batch completed"
        );

        if let Some(callback) = self.on_complete {
            callback(&report);
        }
        self.events.batch_completed(summary);
        report
    }
}
