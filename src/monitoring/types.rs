use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::error::{ConsumerError, Result};

/// Configuration for the monitoring channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Whether monitoring events are published
    pub enabled: bool,
    /// Size of the monitoring channel buffer
    pub channel_size: usize,
    /// How often the aggregator logs metrics
    #[serde(with = "humantime_serde")]
    pub metrics_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_size: 1000,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

impl MonitoringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.channel_size == 0 {
            return Err(ConsumerError::ConfigError(
                "monitoring channel_size must be greater than 0".to_string(),
            ));
        }
        if self.enabled && self.metrics_interval.is_zero() {
            return Err(ConsumerError::ConfigError(
                "monitoring metrics_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// What caused a checkpoint commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitTrigger {
    /// Uncommitted record count exceeded the batch limit
    Size,
    /// Time since the last commit exceeded the age limit
    Age,
    /// Pending progress flushed during shutdown or shard end
    Flush,
    /// Final acknowledgement that the shard was fully consumed
    ShardEnd,
}

impl fmt::Display for CommitTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitTrigger::Size => "size",
            CommitTrigger::Age => "age",
            CommitTrigger::Flush => "flush",
            CommitTrigger::ShardEnd => "shard_end",
        };
        f.write_str(name)
    }
}

/// Shard lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardEventType {
    Initialized,
    LeaseLost,
    Ended,
    ShutdownRequested,
}

/// A monitoring event emitted by a shard processor
#[derive(Debug, Clone)]
pub struct CheckpointEvent {
    pub timestamp: SystemTime,
    pub shard_id: String,
    pub event_type: CheckpointEventType,
}

#[derive(Debug, Clone)]
pub enum CheckpointEventType {
    BatchProcessed {
        record_count: usize,
        duration: Duration,
    },
    BatchFailed {
        record_count: usize,
        error: String,
    },
    RetryScheduled {
        sequence_number: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Committed {
        sequence_number: String,
        attempts: u32,
        trigger: CommitTrigger,
    },
    CommitFailed {
        sequence_number: String,
        attempts: u32,
        error: String,
    },
    ShardEvent {
        event_type: ShardEventType,
        details: Option<String>,
    },
}

impl CheckpointEvent {
    fn new(shard_id: String, event_type: CheckpointEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            shard_id,
            event_type,
        }
    }

    pub fn batch_processed(shard_id: String, record_count: usize, duration: Duration) -> Self {
        Self::new(
            shard_id,
            CheckpointEventType::BatchProcessed {
                record_count,
                duration,
            },
        )
    }

    pub fn batch_failed(shard_id: String, record_count: usize, error: String) -> Self {
        Self::new(
            shard_id,
            CheckpointEventType::BatchFailed {
                record_count,
                error,
            },
        )
    }

    pub fn retry_scheduled(
        shard_id: String,
        sequence_number: String,
        attempt: u32,
        delay: Duration,
        error: String,
    ) -> Self {
        Self::new(
            shard_id,
            CheckpointEventType::RetryScheduled {
                sequence_number,
                attempt,
                delay,
                error,
            },
        )
    }

    pub fn committed(
        shard_id: String,
        sequence_number: String,
        attempts: u32,
        trigger: CommitTrigger,
    ) -> Self {
        Self::new(
            shard_id,
            CheckpointEventType::Committed {
                sequence_number,
                attempts,
                trigger,
            },
        )
    }

    pub fn commit_failed(
        shard_id: String,
        sequence_number: String,
        attempts: u32,
        error: String,
    ) -> Self {
        Self::new(
            shard_id,
            CheckpointEventType::CommitFailed {
                sequence_number,
                attempts,
                error,
            },
        )
    }

    pub fn shard_event(shard_id: String, event_type: ShardEventType, details: Option<String>) -> Self {
        Self::new(
            shard_id,
            CheckpointEventType::ShardEvent {
                event_type,
                details,
            },
        )
    }
}
