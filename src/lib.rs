//! Shard Checkpointer - batched, retried checkpointing for Kinesis shard consumers
//!
//! This crate hosts user batch handlers inside a shard consumer runtime. It
//! decides when to durably advance each shard's read position, retries
//! transient checkpoint failures with backoff, and stops the whole consumer
//! on a permanent processing failure so no batch is silently skipped.

pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod error;
pub mod monitoring;
pub mod processor;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod store;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;

pub use checkpoint::{CheckpointStrategy, CheckpointStrategyFactory, Checkpointer};
pub use config::{CheckpointConfig, ConsumerConfig};
pub use consumer::{KinesisConsumer, WorkerStateObserver, WorkerStateTracker};
pub use error::{CheckpointError, ConsumerError, ProcessingError, ProcessorError, Result};
pub use monitoring::{CheckpointEvent, MetricsAggregator, MonitoringConfig};
pub use processor::{
    ConsumerControl, ConsumerHandler, ShardProcessor, ShardProcessorFactory, ShardProcessorState,
    ShardRecordProcessor, ShardRecordProcessorFactory,
};
pub use record::KinesisClientRecord;
pub use retry::{Backoff, ExponentialBackoff, RetryPolicy, TransientError};
pub use scheduler::{LocalScheduler, LocalStream, Scheduler, SchedulerContext, WorkerState};

pub use crate::store::{CheckpointStore, InMemoryCheckpointStore, StoreCheckpointer};

#[cfg(feature = "dynamodb-store")]
pub use crate::store::dynamodb::DynamoDbCheckpointStore;
