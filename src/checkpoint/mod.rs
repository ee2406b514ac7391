//! Batching checkpoint strategy
//!
//! A [`CheckpointStrategy`] tracks how many records a shard processor has
//! handled since the last commit and when that commit happened. Once either
//! the size or the age threshold is exceeded, the last seen sequence number
//! is committed through a [`RetryPolicy`].

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::config::CheckpointConfig;
use crate::error::CheckpointError;
use crate::monitoring::{CheckpointEvent, CommitTrigger};
use crate::record::KinesisClientRecord;
use crate::retry::{RetryAttempt, RetryPolicy};
use crate::store::SHARD_END;

/// Sink that durably records a shard's read position
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Record that every record up to and including `sequence_number` is done
    async fn checkpoint(&self, sequence_number: &str) -> Result<(), CheckpointError>;

    /// Acknowledge that the shard has been consumed to its end
    async fn checkpoint_shard_end(&self) -> Result<(), CheckpointError>;
}

/// Creates one [`CheckpointStrategy`] per shard processor with shared settings
#[derive(Debug, Clone)]
pub struct CheckpointStrategyFactory {
    batch_size_max: usize,
    max_age: Duration,
    retry: RetryPolicy,
    monitoring_tx: Option<mpsc::Sender<CheckpointEvent>>,
}

impl CheckpointStrategyFactory {
    pub fn new(batch_size_max: usize, max_age: Duration, retry: RetryPolicy) -> Self {
        Self {
            batch_size_max,
            max_age,
            retry,
            monitoring_tx: None,
        }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self::new(
            config.batch_size_max,
            config.max_checkpoint_age,
            RetryPolicy::from_config(config),
        )
    }

    pub fn with_monitoring(mut self, monitoring_tx: Option<mpsc::Sender<CheckpointEvent>>) -> Self {
        self.monitoring_tx = monitoring_tx;
        self
    }

    pub fn checkpoint_strategy(&self, shard_id: impl Into<String>) -> CheckpointStrategy {
        CheckpointStrategy {
            shard_id: shard_id.into(),
            batch_size_max: self.batch_size_max,
            max_age: self.max_age,
            retry: self.retry.clone(),
            uncommitted_count: 0,
            last_commit: Instant::now(),
            last_sequence: None,
            monitoring_tx: self.monitoring_tx.clone(),
        }
    }
}

impl Default for CheckpointStrategyFactory {
    fn default() -> Self {
        Self::from_config(&CheckpointConfig::default())
    }
}

/// Per-shard commit bookkeeping
///
/// Commits happen when more than `batch_size_max` records are uncommitted or
/// more than `max_age` has passed since the last commit. A failed commit
/// leaves the counters untouched so the next trigger covers the same backlog.
#[derive(Debug)]
pub struct CheckpointStrategy {
    shard_id: String,
    batch_size_max: usize,
    max_age: Duration,
    retry: RetryPolicy,
    uncommitted_count: usize,
    last_commit: Instant,
    last_sequence: Option<String>,
    monitoring_tx: Option<mpsc::Sender<CheckpointEvent>>,
}

impl CheckpointStrategy {
    /// Account for a processed batch and commit if a threshold was crossed
    pub async fn checkpoint_records(
        &mut self,
        records: &[KinesisClientRecord],
        checkpointer: &dyn Checkpointer,
    ) -> Result<(), CheckpointError> {
        self.uncommitted_count += records.len();
        if let Some(last) = records.last() {
            self.last_sequence = Some(last.sequence_number.clone());
        }

        let age = self.last_commit.elapsed();
        let commit_on_size = self.uncommitted_count > self.batch_size_max;
        let commit_on_age = age > self.max_age;

        debug!(
            shard_id = %self.shard_id,
            uncommitted = self.uncommitted_count,
            batch_size_max = self.batch_size_max,
            age_ms = ?age.as_millis(),
            commit_on_size = commit_on_size,
            commit_on_age = commit_on_age,
            "Evaluated checkpoint thresholds"
        );

        if !(commit_on_size || commit_on_age) {
            return Ok(());
        }

        let Some(sequence_number) = self.last_sequence.clone() else {
            return Ok(());
        };

        let trigger = if commit_on_size {
            CommitTrigger::Size
        } else {
            CommitTrigger::Age
        };

        self.commit(&sequence_number, checkpointer, trigger).await
    }

    /// Commit the last seen sequence number regardless of thresholds
    ///
    /// Does nothing when no records arrived since the last commit.
    pub async fn commit_pending(&mut self, checkpointer: &dyn Checkpointer) -> Result<(), CheckpointError> {
        let Some(sequence_number) = self.last_sequence.clone() else {
            trace!(shard_id = %self.shard_id, "No pending progress to flush");
            return Ok(());
        };

        self.commit(&sequence_number, checkpointer, CommitTrigger::Flush)
            .await
    }

    /// Acknowledge shard end through the retry policy
    pub async fn acknowledge_shard_end(
        &mut self,
        checkpointer: &dyn Checkpointer,
    ) -> Result<(), CheckpointError> {
        self.with_retry(SHARD_END, CommitTrigger::ShardEnd, move || {
            checkpointer.checkpoint_shard_end()
        })
        .await?;

        self.reset();
        Ok(())
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted_count
    }

    pub fn pending_sequence(&self) -> Option<&str> {
        self.last_sequence.as_deref()
    }

    async fn commit(
        &mut self,
        sequence_number: &str,
        checkpointer: &dyn Checkpointer,
        trigger: CommitTrigger,
    ) -> Result<(), CheckpointError> {
        self.with_retry(sequence_number, trigger, move || {
            checkpointer.checkpoint(sequence_number)
        })
        .await?;

        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.uncommitted_count = 0;
        self.last_commit = Instant::now();
        self.last_sequence = None;
    }

    async fn with_retry<F, Fut>(
        &self,
        sequence_number: &str,
        trigger: CommitTrigger,
        operation: F,
    ) -> Result<(), CheckpointError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), CheckpointError>>,
    {
        let shard_id = self.shard_id.as_str();
        let mut attempts = 1;

        let result = self
            .retry
            .execute(operation, |retry: RetryAttempt<'_, CheckpointError>| {
                attempts = retry.attempt + 1;
                self.send_event(CheckpointEvent::retry_scheduled(
                    shard_id.to_string(),
                    sequence_number.to_string(),
                    retry.attempt,
                    retry.delay,
                    retry.error.to_string(),
                ));
            })
            .await;

        match &result {
            Ok(()) => {
                debug!(
                    shard_id = %shard_id,
                    sequence_number = %sequence_number,
                    attempts = attempts,
                    trigger = %trigger,
                    "Checkpoint committed"
                );
                self.send_event(CheckpointEvent::committed(
                    shard_id.to_string(),
                    sequence_number.to_string(),
                    attempts,
                    trigger,
                ));
            }
            Err(e) => {
                error!(
                    shard_id = %shard_id,
                    sequence_number = %sequence_number,
                    attempts = attempts,
                    error = %e,
                    "Checkpoint commit failed"
                );
                self.send_event(CheckpointEvent::commit_failed(
                    shard_id.to_string(),
                    sequence_number.to_string(),
                    attempts,
                    e.to_string(),
                ));
            }
        }

        result
    }

    fn send_event(&self, event: CheckpointEvent) {
        if let Some(tx) = &self.monitoring_tx {
            if let Err(e) = tx.try_send(event) {
                trace!(error = %e, "Dropped monitoring event");
            }
        }
    }
}
