//! Event Logger - persists job notifications to JSONL files
//!
//! Events are written to `{runs_dir}/{batch-id}/events.jsonl`, one
//! [`EventLogEntry`] per line.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::types::{EventLogEntry, JobEvent};

/// Where the events of `batch_id` are logged under `runs_dir`
pub fn event_log_path(runs_dir: impl AsRef<Path>, batch_id: Uuid) -> PathBuf {
    runs_dir.as_ref().join(batch_id.to_string()).join("events.jsonl")
}

/// Event logger that writes events to JSONL files
pub struct EventLogger {
    runs_dir: PathBuf,
    /// Open file writers per batch
    writers: HashMap<Uuid, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self {
            runs_dir,
            writers: HashMap::new(),
        }
    }

    /// Path of the log file for a batch
    pub fn log_path(&self, batch_id: Uuid) -> PathBuf {
        event_log_path(&self.runs_dir, batch_id)
    }

    /// Write an event to its batch's log file
    pub fn write_event<T>(&mut self, event: &JobEvent<T>) -> eyre::Result<()> {
        let batch_id = event.batch_id();
        debug!(%batch_id, event_type = event.event_type(), "EventLogger::write_event");

        let writer = match self.writers.entry(batch_id) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let log_path = event_log_path(&self.runs_dir, batch_id);
                if let Some(parent) = log_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                debug!(?log_path, "EventLogger: creating new log file");
                let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
                entry.insert(BufWriter::new(file))
            }
        };

        let json = serde_json::to_string(&EventLogEntry::new(event))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close the writer for a finished batch
    pub fn close_batch(&mut self, batch_id: Uuid) {
        debug!(%batch_id, "EventLogger::close_batch");
        if let Some(mut writer) = self.writers.remove(&batch_id) {
            let _ = writer.flush();
        }
    }

    /// Consume events until the bus closes
    ///
    /// This is meant to be spawned as a background task.
    pub async fn run<T: Clone>(mut self, mut rx: broadcast::Receiver<JobEvent<T>>) {
        debug!("EventLogger::run: starting event logger");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let batch_id = event.batch_id();
                    if let Err(e) = self.write_event(&event) {
                        error!(%batch_id, error = %e, "EventLogger: failed to write event");
                    }
                    if matches!(event, JobEvent::BatchCompleted { .. }) {
                        self.close_batch(batch_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (batch_id, mut writer) in self.writers.drain() {
            debug!(%batch_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read back the events logged for a batch
pub fn read_event_log(runs_dir: impl AsRef<Path>, batch_id: Uuid) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = event_log_path(runs_dir, batch_id);
    debug!(?log_path, "read_event_log: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_event_log: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_event_log: loaded entries");
    Ok(entries)
}

/// Spawn an event logger over a subscription as a background task
pub fn spawn_event_logger<T>(
    rx: broadcast::Receiver<JobEvent<T>>,
    runs_dir: impl AsRef<Path>,
) -> eyre::Result<tokio::task::JoinHandle<()>>
where
    T: Clone + Send + 'static,
{
    fs::create_dir_all(runs_dir.as_ref())?;
    let logger = EventLogger::new(runs_dir);
    Ok(tokio::spawn(async move {
        logger.run(rx).await;
    }))
}
