//! Queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::SchedulerError;
use crate::events::DEFAULT_CHANNEL_CAPACITY;

/// Batch-wide settings, supplied once when the scheduler is built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Keep successful payloads in the aggregate (false bounds memory)
    #[serde(rename = "save-results", default)]
    pub save_results: bool,

    /// Stop admitting jobs after the first rejection or timeout
    #[serde(rename = "stop-on-failure", default = "default_stop_on_failure")]
    pub stop_on_failure: bool,

    /// Deadline for jobs submitted without their own
    #[serde(rename = "default-timeout-secs", default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Concurrency bound used when none is given explicitly
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Event bus buffer size
    #[serde(rename = "channel-capacity", default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_stop_on_failure() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_concurrency() -> usize {
    5
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            save_results: false,
            stop_on_failure: default_stop_on_failure(),
            default_timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl QueueConfig {
    /// Get the default job timeout as a Duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), SchedulerError> {
        debug!(?self, "QueueConfig::validate: called");
        if self.concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency(0));
        }
        if self.default_timeout_secs == 0 {
            return Err(SchedulerError::InvalidConfig(
                "default-timeout-secs must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "channel-capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
