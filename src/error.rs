//! Error types for the shard consumer

use thiserror::Error;
use tokio::runtime::TryCurrentError;
use tokio::task::JoinError;

use crate::processor::ShardProcessorState;
use crate::retry::TransientError;

/// Main error type for consumer and scheduler operations
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Consumer is already running")]
    AlreadyRunning,

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for consumer operations
pub type Result<T> = std::result::Result<T, ConsumerError>;

/// Failures raised by a checkpoint sink or checkpoint store
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint throttled: {0}")]
    Throttled(String),

    #[error("Checkpoint dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Invalid checkpoint state: {0}")]
    InvalidState(String),

    #[error("Checkpointer is shut down: {0}")]
    Shutdown(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransientError for CheckpointError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            CheckpointError::Throttled(_) | CheckpointError::DependencyUnavailable(_)
        )
    }
}

/// Failures raised by the user's converter or batch handler
///
/// These are permanent for the shard processor that observed them.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Failed to convert payload of record {sequence_number}: {source}")]
    Conversion {
        sequence_number: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Batch handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

/// Errors surfaced by shard processor lifecycle callbacks
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Invalid lifecycle transition from {from:?} on {event}")]
    InvalidTransition {
        from: ShardProcessorState,
        event: &'static str,
    },

    #[error("Shard processor has not been initialized")]
    NotInitialized,
}

impl From<JoinError> for ConsumerError {
    fn from(err: JoinError) -> Self {
        ConsumerError::Other(err.into())
    }
}

impl From<TryCurrentError> for ConsumerError {
    fn from(err: TryCurrentError) -> Self {
        ConsumerError::Runtime(err.to_string())
    }
}
