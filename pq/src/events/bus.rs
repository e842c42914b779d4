//! Event Bus - broadcast fan-out of job notifications
//!
//! Every subscriber gets its own copy of each event. Publishing never waits:
//! with no subscribers the event is dropped, and a subscriber that falls more
//! than the channel capacity behind loses the oldest events.

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::types::JobEvent;
use crate::aggregate::Summary;
use crate::error::JobError;
use crate::job::JobInfo;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Publishing side of a batch's notification stream
pub struct EventBus<T> {
    tx: broadcast::Sender<JobEvent<T>>,
    batch_id: Uuid,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize, batch_id: Uuid) -> Self {
        debug!(capacity, %batch_id, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, batch_id }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: JobEvent<T>) {
        debug!(event_type = event.event_type(), job_id = ?event.job_id(), "EventBus::emit");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events
    ///
    /// Only events emitted after subscription are received.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent<T>> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    // === Convenience methods ===

    pub fn job_started(&self, job: &JobInfo) {
        self.emit(JobEvent::JobStarted {
            batch_id: self.batch_id,
            job: job.clone(),
        });
    }

    /// Emit the notification matching a settled outcome
    pub fn job_settled(&self, job: JobInfo, outcome: Result<T, JobError>) {
        let batch_id = self.batch_id;
        let event = match outcome {
            Ok(result) => JobEvent::JobSucceeded { batch_id, job, result },
            Err(cause) if cause.is_timeout() => JobEvent::JobTimedOut { batch_id, job, cause },
            Err(cause) => JobEvent::JobFailed { batch_id, job, cause },
        };
        self.emit(event);
    }

    pub fn batch_completed(&self, summary: Summary) {
        self.emit(JobEvent::BatchCompleted {
            batch_id: self.batch_id,
            summary,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, JobState};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn info(id: u64) -> JobInfo {
        JobInfo {
            id: JobId::new(id),
            label: format!("job-{}", id),
            timeout: Duration::from_secs(1),
            state: JobState::Running,
            submitted_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    #[test]
    fn test_event_bus_subscribe() {
        let bus: EventBus<()> = EventBus::new(100, Uuid::now_v7());
        assert_eq!(bus.subscriber_count(), 0);
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus: EventBus<u8> = EventBus::new(100, Uuid::now_v7());
        // This should not panic even with no subscribers
        bus.job_started(&info(1));
    }

    #[tokio::test]
    async fn test_job_settled_picks_variant() {
        let batch_id = Uuid::now_v7();
        let bus = EventBus::new(100, batch_id);
        let mut rx = bus.subscribe();

        bus.job_settled(info(1), Ok(5u32));
        bus.job_settled(info(2), Err(JobError::failed(eyre::eyre!("bad"))));
        bus.job_settled(
            info(3),
            Err(JobError::Timeout {
                bound: Duration::from_secs(1),
            }),
        );

        let kinds: Vec<&str> = vec![
            rx.recv().await.unwrap().event_type(),
            rx.recv().await.unwrap().event_type(),
            rx.recv().await.unwrap().event_type(),
        ];
        assert_eq!(kinds, vec!["JobSucceeded", "JobFailed", "JobTimedOut"]);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus: EventBus<()> = EventBus::new(100, Uuid::now_v7());
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.batch_completed(Summary::default());

        assert_eq!(rx1.recv().await.unwrap().event_type(), "BatchCompleted");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "BatchCompleted");
    }
}
