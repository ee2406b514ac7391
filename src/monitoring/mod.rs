//! Monitoring for checkpoint and processing activity
//!
//! Shard processors publish [`CheckpointEvent`]s on an optional channel.
//! [`MetricsAggregator`] folds them into per-shard counters and logs a
//! summary at a fixed interval.

mod metrics;
mod types;

pub use metrics::{MetricsAggregator, ShardMetrics};
pub use types::{
    CheckpointEvent, CheckpointEventType, CommitTrigger, MonitoringConfig, ShardEventType,
};
