//! Checkpoint storage and the store-backed checkpoint sink

use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

use crate::checkpoint::Checkpointer;
use crate::error::CheckpointError;

#[cfg(feature = "dynamodb-store")]
pub mod dynamodb;
pub mod memory;

#[cfg(feature = "dynamodb-store")]
pub use dynamodb::DynamoDbCheckpointStore;
pub use memory::InMemoryCheckpointStore;

/// Sequence value stored once a shard has been fully consumed
pub const SHARD_END: &str = "SHARD_END";

/// Trait for checkpoint storage implementations
///
/// Implementations make a single attempt per call and classify failures
/// through [`CheckpointError`] so callers can decide whether to retry.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Retrieve the checkpoint for a given shard
    async fn get_checkpoint(&self, shard_id: &str) -> Result<Option<String>, CheckpointError>;

    /// Save a checkpoint for a given shard
    async fn save_checkpoint(
        &self,
        shard_id: &str,
        sequence_number: &str,
    ) -> Result<(), CheckpointError>;
}

/// A [`Checkpointer`] that records progress for one shard in a [`CheckpointStore`]
#[derive(Clone)]
pub struct StoreCheckpointer {
    store: Arc<dyn CheckpointStore>,
    shard_id: String,
}

impl StoreCheckpointer {
    pub fn new(store: Arc<dyn CheckpointStore>, shard_id: impl Into<String>) -> Self {
        Self {
            store,
            shard_id: shard_id.into(),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }
}

#[async_trait]
impl Checkpointer for StoreCheckpointer {
    async fn checkpoint(&self, sequence_number: &str) -> Result<(), CheckpointError> {
        trace!(shard_id = %self.shard_id, sequence = %sequence_number, "Writing checkpoint");
        self.store
            .save_checkpoint(&self.shard_id, sequence_number)
            .await
    }

    async fn checkpoint_shard_end(&self) -> Result<(), CheckpointError> {
        trace!(shard_id = %self.shard_id, "Writing shard end checkpoint");
        self.store.save_checkpoint(&self.shard_id, SHARD_END).await
    }
}
