//! Consumer and checkpoint configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConsumerError, Result};
use crate::monitoring::MonitoringConfig;

/// Controls when checkpoints are committed and how commits are retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Commit once the uncommitted record count exceeds this value
    pub batch_size_max: usize,
    /// Commit once this much time has passed since the last commit
    #[serde(with = "humantime_serde")]
    pub max_checkpoint_age: Duration,
    /// Total commit attempts, including the first one
    pub max_retry_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    /// Growth factor applied to the delay after every retry
    pub backoff_multiplier: f64,
    /// Upper bound for a single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Random jitter applied to each delay, as a fraction (0.0 to 1.0)
    pub backoff_jitter: f64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            batch_size_max: 500,
            max_checkpoint_age: Duration::from_secs(60),
            max_retry_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            backoff_jitter: 0.0,
        }
    }
}

impl CheckpointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retry_attempts == 0 {
            return Err(ConsumerError::ConfigError(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }

        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConsumerError::ConfigError(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConsumerError::ConfigError(format!(
                "backoff_jitter must be between 0.0 and 1.0, got {}",
                self.backoff_jitter
            )));
        }

        if self.max_backoff < self.backoff_base {
            return Err(ConsumerError::ConfigError(format!(
                "max_backoff ({:?}) must not be lower than backoff_base ({:?})",
                self.max_backoff, self.backoff_base
            )));
        }

        Ok(())
    }
}

/// Configuration for a [`KinesisConsumer`](crate::KinesisConsumer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Application name, used by the runtime to scope leases and checkpoints
    pub application_name: String,
    /// Name of the stream to consume
    pub stream_name: String,
    pub checkpoint: CheckpointConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            application_name: String::new(),
            stream_name: String::new(),
            checkpoint: CheckpointConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(ConsumerError::ConfigError(
                "stream_name must not be empty".to_string(),
            ));
        }

        self.checkpoint.validate()?;
        self.monitoring.validate()
    }
}
