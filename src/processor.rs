//! Shard processor lifecycle
//!
//! The consumer runtime drives one [`ShardRecordProcessor`] per shard lease
//! through a fixed set of callbacks. [`ShardProcessor`] implements those
//! callbacks on top of a user [`ConsumerHandler`] and a
//! [`CheckpointStrategy`], and enforces the failure policy: once a batch
//! fails, no further batches are handled and the whole consumer is asked to
//! shut down. The failing batch is never checkpointed, so it is redelivered
//! after a restart.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::checkpoint::{CheckpointStrategy, CheckpointStrategyFactory, Checkpointer};
use crate::error::{ProcessingError, ProcessorError};
use crate::monitoring::{CheckpointEvent, ShardEventType};
use crate::record::KinesisClientRecord;

/// User logic invoked for every delivered batch
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use shard_checkpointer::ConsumerHandler;
///
/// struct OrderHandler;
///
/// #[async_trait]
/// impl ConsumerHandler for OrderHandler {
///     type Payload = String;
///
///     fn convert_payload(&self, data: &Bytes) -> anyhow::Result<String> {
///         Ok(String::from_utf8(data.to_vec())?)
///     }
///
///     async fn process_payload(&self, batch: Vec<(String, String)>) -> anyhow::Result<()> {
///         for (partition_key, order) in batch {
///             println!("{partition_key}: {order}");
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ConsumerHandler: Send + Sync + 'static {
    type Payload: Send + 'static;

    /// Called once per shard processor when it has been initialized
    fn processor_initialized(&self) {}

    /// Convert a raw record payload into the domain type
    fn convert_payload(&self, data: &Bytes) -> anyhow::Result<Self::Payload>;

    /// Handle a whole batch of `(partition_key, payload)` pairs, in delivery order
    ///
    /// Returning an error is treated as a permanent failure of the shard.
    async fn process_payload(&self, batch: Vec<(String, Self::Payload)>) -> anyhow::Result<()>;
}

/// Lets a shard processor ask the whole consumer to stop
pub trait ConsumerControl: Send + Sync {
    /// Request a graceful shutdown. Must not block.
    fn shutdown(&self);
}

#[derive(Debug, Clone)]
pub struct InitializationInput {
    pub shard_id: String,
    /// Checkpoint the runtime resumes from, if any
    pub extended_sequence_number: Option<String>,
}

pub struct ProcessRecordsInput {
    pub records: Vec<KinesisClientRecord>,
    pub checkpointer: Arc<dyn Checkpointer>,
    pub millis_behind_latest: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct LeaseLostInput;

pub struct ShardEndedInput {
    pub checkpointer: Arc<dyn Checkpointer>,
}

pub struct ShutdownRequestedInput {
    pub checkpointer: Arc<dyn Checkpointer>,
}

/// Callbacks the runtime invokes on a processor for one shard lease
///
/// The runtime calls these from a single task, in order: `initialize` once,
/// `process_records` any number of times, then exactly one of `lease_lost`,
/// `shard_ended` or `shutdown_requested`.
#[async_trait]
pub trait ShardRecordProcessor: Send {
    async fn initialize(&mut self, input: InitializationInput) -> Result<(), ProcessorError>;

    async fn process_records(&mut self, input: ProcessRecordsInput) -> Result<(), ProcessorError>;

    async fn lease_lost(&mut self, input: LeaseLostInput) -> Result<(), ProcessorError>;

    async fn shard_ended(&mut self, input: ShardEndedInput) -> Result<(), ProcessorError>;

    async fn shutdown_requested(
        &mut self,
        input: ShutdownRequestedInput,
    ) -> Result<(), ProcessorError>;
}

/// Creates a fresh processor for every shard lease the runtime acquires
pub trait ShardRecordProcessorFactory: Send + Sync {
    fn shard_record_processor(&self) -> Box<dyn ShardRecordProcessor>;
}

/// Lifecycle states of a [`ShardProcessor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardProcessorState {
    Created,
    Initialized,
    Processing,
    /// A batch failed; later batches are ignored
    Failed,
    LeaseLost,
    ShardEnded,
    ShutdownRequested,
}

impl ShardProcessorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShardProcessorState::LeaseLost
                | ShardProcessorState::ShardEnded
                | ShardProcessorState::ShutdownRequested
        )
    }

    pub fn on_initialize(self) -> Result<Self, ProcessorError> {
        match self {
            ShardProcessorState::Created => Ok(ShardProcessorState::Initialized),
            from => Err(ProcessorError::InvalidTransition {
                from,
                event: "initialize",
            }),
        }
    }

    pub fn on_process_records(self) -> Result<Self, ProcessorError> {
        match self {
            ShardProcessorState::Failed => Ok(ShardProcessorState::Failed),
            _ => self.advance("process_records", ShardProcessorState::Processing),
        }
    }

    pub fn on_lease_lost(self) -> Result<Self, ProcessorError> {
        self.advance("lease_lost", ShardProcessorState::LeaseLost)
    }

    pub fn on_shard_ended(self) -> Result<Self, ProcessorError> {
        self.advance("shard_ended", ShardProcessorState::ShardEnded)
    }

    pub fn on_shutdown_requested(self) -> Result<Self, ProcessorError> {
        self.advance("shutdown_requested", ShardProcessorState::ShutdownRequested)
    }

    fn advance(self, event: &'static str, next: Self) -> Result<Self, ProcessorError> {
        match self {
            ShardProcessorState::Created => Err(ProcessorError::NotInitialized),
            from if from.is_terminal() => Err(ProcessorError::InvalidTransition { from, event }),
            _ => Ok(next),
        }
    }
}

/// [`ShardRecordProcessor`] that feeds batches to a [`ConsumerHandler`]
pub struct ShardProcessor<H: ConsumerHandler> {
    handler: Arc<H>,
    control: Arc<dyn ConsumerControl>,
    strategy_factory: Arc<CheckpointStrategyFactory>,
    checkpoint_strategy: Option<CheckpointStrategy>,
    shard_id: String,
    state: ShardProcessorState,
    failed: bool,
    monitoring_tx: Option<mpsc::Sender<CheckpointEvent>>,
}

impl<H: ConsumerHandler> ShardProcessor<H> {
    pub fn new(
        handler: Arc<H>,
        control: Arc<dyn ConsumerControl>,
        strategy_factory: Arc<CheckpointStrategyFactory>,
        monitoring_tx: Option<mpsc::Sender<CheckpointEvent>>,
    ) -> Self {
        Self {
            handler,
            control,
            strategy_factory,
            checkpoint_strategy: None,
            shard_id: String::new(),
            state: ShardProcessorState::Created,
            failed: false,
            monitoring_tx,
        }
    }

    pub fn state(&self) -> ShardProcessorState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    async fn handle_batch(&self, records: &[KinesisClientRecord]) -> Result<(), ProcessingError> {
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            let payload = self.handler.convert_payload(&record.data).map_err(|source| {
                ProcessingError::Conversion {
                    sequence_number: record.sequence_number.clone(),
                    source,
                }
            })?;
            batch.push((record.partition_key.clone(), payload));
        }

        self.handler
            .process_payload(batch)
            .await
            .map_err(ProcessingError::Handler)
    }

    fn send_event(&self, event: CheckpointEvent) {
        if let Some(tx) = &self.monitoring_tx {
            if let Err(e) = tx.try_send(event) {
                trace!(error = %e, "Dropped monitoring event");
            }
        }
    }
}

#[async_trait]
impl<H: ConsumerHandler> ShardRecordProcessor for ShardProcessor<H> {
    async fn initialize(&mut self, input: InitializationInput) -> Result<(), ProcessorError> {
        self.state = self.state.on_initialize()?;

        info!(
            shard_id = %input.shard_id,
            sequence_number = ?input.extended_sequence_number,
            "Initializing shard processor"
        );

        self.checkpoint_strategy = Some(self.strategy_factory.checkpoint_strategy(&input.shard_id));
        self.shard_id = input.shard_id;
        self.send_event(CheckpointEvent::shard_event(
            self.shard_id.clone(),
            ShardEventType::Initialized,
            input.extended_sequence_number,
        ));
        self.handler.processor_initialized();
        Ok(())
    }

    async fn process_records(&mut self, input: ProcessRecordsInput) -> Result<(), ProcessorError> {
        self.state = self.state.on_process_records()?;

        if self.failed {
            debug!(
                shard_id = %self.shard_id,
                records = input.records.len(),
                "Ignoring batch, processor has failed"
            );
            return Ok(());
        }

        let started = Instant::now();
        let record_count = input.records.len();
        trace!(
            shard_id = %self.shard_id,
            records = record_count,
            millis_behind_latest = ?input.millis_behind_latest,
            "Processing batch"
        );

        if record_count > 0 {
            if let Err(e) = self.handle_batch(&input.records).await {
                self.failed = true;
                self.state = ShardProcessorState::Failed;
                error!(
                    shard_id = %self.shard_id,
                    error = %e,
                    "Processor is not supposed to fail here. Will stop accepting events and shutdown the worker"
                );
                self.send_event(CheckpointEvent::batch_failed(
                    self.shard_id.clone(),
                    record_count,
                    e.to_string(),
                ));
                self.control.shutdown();
                return Ok(());
            }

            self.send_event(CheckpointEvent::batch_processed(
                self.shard_id.clone(),
                record_count,
                started.elapsed(),
            ));
        }

        let strategy = self
            .checkpoint_strategy
            .as_mut()
            .ok_or(ProcessorError::NotInitialized)?;
        strategy
            .checkpoint_records(&input.records, input.checkpointer.as_ref())
            .await?;

        Ok(())
    }

    async fn lease_lost(&mut self, _input: LeaseLostInput) -> Result<(), ProcessorError> {
        self.state = self.state.on_lease_lost()?;
        info!(shard_id = %self.shard_id, "Lost lease, so terminating");
        self.send_event(CheckpointEvent::shard_event(
            self.shard_id.clone(),
            ShardEventType::LeaseLost,
            None,
        ));
        Ok(())
    }

    async fn shard_ended(&mut self, input: ShardEndedInput) -> Result<(), ProcessorError> {
        self.state = self.state.on_shard_ended()?;
        info!(shard_id = %self.shard_id, "Reached shard end, checkpointing");
        self.send_event(CheckpointEvent::shard_event(
            self.shard_id.clone(),
            ShardEventType::Ended,
            None,
        ));

        let strategy = self
            .checkpoint_strategy
            .as_mut()
            .ok_or(ProcessorError::NotInitialized)?;
        strategy.commit_pending(input.checkpointer.as_ref()).await?;

        if self.failed {
            warn!(
                shard_id = %self.shard_id,
                "Not acknowledging shard end, processor failed"
            );
            return Ok(());
        }

        strategy
            .acknowledge_shard_end(input.checkpointer.as_ref())
            .await?;
        Ok(())
    }

    async fn shutdown_requested(
        &mut self,
        input: ShutdownRequestedInput,
    ) -> Result<(), ProcessorError> {
        self.state = self.state.on_shutdown_requested()?;
        info!(
            shard_id = %self.shard_id,
            "Scheduler is shutting down, checkpointing"
        );
        self.send_event(CheckpointEvent::shard_event(
            self.shard_id.clone(),
            ShardEventType::ShutdownRequested,
            None,
        ));

        let strategy = self
            .checkpoint_strategy
            .as_mut()
            .ok_or(ProcessorError::NotInitialized)?;
        strategy.commit_pending(input.checkpointer.as_ref()).await?;
        Ok(())
    }
}

/// Builds [`ShardProcessor`]s that share one handler and checkpoint settings
pub struct ShardProcessorFactory<H: ConsumerHandler> {
    handler: Arc<H>,
    control: Arc<dyn ConsumerControl>,
    strategy_factory: Arc<CheckpointStrategyFactory>,
    monitoring_tx: Option<mpsc::Sender<CheckpointEvent>>,
}

impl<H: ConsumerHandler> ShardProcessorFactory<H> {
    pub fn new(
        handler: Arc<H>,
        control: Arc<dyn ConsumerControl>,
        strategy_factory: CheckpointStrategyFactory,
        monitoring_tx: Option<mpsc::Sender<CheckpointEvent>>,
    ) -> Self {
        Self {
            handler,
            control,
            strategy_factory: Arc::new(strategy_factory.with_monitoring(monitoring_tx.clone())),
            monitoring_tx,
        }
    }
}

impl<H: ConsumerHandler> ShardRecordProcessorFactory for ShardProcessorFactory<H> {
    fn shard_record_processor(&self) -> Box<dyn ShardRecordProcessor> {
        Box::new(ShardProcessor::new(
            self.handler.clone(),
            self.control.clone(),
            self.strategy_factory.clone(),
            self.monitoring_tx.clone(),
        ))
    }
}
