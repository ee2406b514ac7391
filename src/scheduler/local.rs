//! In-process stream and scheduler for development and tests
//!
//! [`LocalStream`] keeps each shard as an append-only log with zero-padded,
//! monotonically increasing sequence numbers. [`LocalScheduler`] drives one
//! shard processor per shard on its own task, resuming after the checkpoint
//! held in a [`CheckpointStore`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

use super::{Scheduler, SchedulerContext, WorkerState};
use crate::checkpoint::Checkpointer;
use crate::error::{ConsumerError, ProcessorError, Result};
use crate::processor::{
    InitializationInput, ProcessRecordsInput, ShardEndedInput, ShardRecordProcessor,
    ShutdownRequestedInput,
};
use crate::record::KinesisClientRecord;
use crate::store::{CheckpointStore, StoreCheckpointer, SHARD_END};

struct LocalShard {
    shard_id: String,
    records: RwLock<Vec<KinesisClientRecord>>,
    closed: AtomicBool,
}

struct StreamInner {
    name: String,
    shards: Vec<LocalShard>,
    next_sequence: AtomicU64,
}

/// An in-memory stream with a fixed set of shards
///
/// Clones share the same shards.
#[derive(Clone)]
pub struct LocalStream {
    inner: Arc<StreamInner>,
}

impl LocalStream {
    pub fn new(name: impl Into<String>, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|i| LocalShard {
                shard_id: format!("shardId-{:012}", i),
                records: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            })
            .collect();

        Self {
            inner: Arc::new(StreamInner {
                name: name.into(),
                shards,
                next_sequence: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn shard_ids(&self) -> Vec<String> {
        self.inner
            .shards
            .iter()
            .map(|shard| shard.shard_id.clone())
            .collect()
    }

    /// Append a record to the shard its partition key hashes to
    ///
    /// Returns the assigned sequence number.
    pub fn put_record(&self, partition_key: &str, data: impl Into<Bytes>) -> Result<String> {
        let mut hasher = DefaultHasher::new();
        partition_key.hash(&mut hasher);
        let index = (hasher.finish() % self.inner.shards.len() as u64) as usize;

        self.append(&self.inner.shards[index], partition_key, data.into())
    }

    pub fn put_record_to_shard(
        &self,
        shard_id: &str,
        partition_key: &str,
        data: impl Into<Bytes>,
    ) -> Result<String> {
        let shard = self.shard(shard_id)?;
        self.append(shard, partition_key, data.into())
    }

    /// Mark a shard as ended; consumers see shard end once it is drained
    pub fn close_shard(&self, shard_id: &str) -> Result<()> {
        self.shard(shard_id)?.closed.store(true, Ordering::SeqCst);
        info!(stream = %self.inner.name, shard_id = %shard_id, "Closed shard");
        Ok(())
    }

    /// Total records written to a shard
    pub fn shard_len(&self, shard_id: &str) -> Result<usize> {
        Ok(self.shard(shard_id)?.records.read().len())
    }

    fn shard(&self, shard_id: &str) -> Result<&LocalShard> {
        self.inner
            .shards
            .iter()
            .find(|shard| shard.shard_id == shard_id)
            .ok_or_else(|| ConsumerError::Scheduler(format!("Unknown shard {}", shard_id)))
    }

    fn append(&self, shard: &LocalShard, partition_key: &str, data: Bytes) -> Result<String> {
        let mut records = shard.records.write();
        if shard.closed.load(Ordering::SeqCst) {
            return Err(ConsumerError::Scheduler(format!(
                "Shard {} is closed",
                shard.shard_id
            )));
        }

        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::SeqCst);
        let sequence_number = format!("{:020}", sequence);
        records.push(
            KinesisClientRecord::new(sequence_number.clone(), partition_key, data)
                .with_arrival_timestamp(Utc::now()),
        );

        trace!(
            shard_id = %shard.shard_id,
            sequence_number = %sequence_number,
            "Appended record"
        );
        Ok(sequence_number)
    }

    /// Records of shard `index` after `after`, at most `max` of them, and
    /// whether the shard is closed with nothing left beyond this batch
    fn read(
        &self,
        index: usize,
        after: Option<&str>,
        max: usize,
    ) -> (Vec<KinesisClientRecord>, bool) {
        let shard = &self.inner.shards[index];
        let closed = shard.closed.load(Ordering::SeqCst);
        let records = shard.records.read();

        let start = match after {
            Some(sequence) => records.partition_point(|r| r.sequence_number.as_str() <= sequence),
            None => 0,
        };
        let end = records.len().min(start + max);

        (records[start..end].to_vec(), closed && end == records.len())
    }
}

/// Scheduler that serves a [`LocalStream`] in-process
pub struct LocalScheduler {
    stream: LocalStream,
    store: Arc<dyn CheckpointStore>,
    max_records: usize,
    idle_time_between_reads: Duration,
}

impl LocalScheduler {
    pub fn new(stream: LocalStream, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            stream,
            store,
            max_records: 10_000,
            idle_time_between_reads: Duration::from_secs(1),
        }
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    pub fn with_idle_time_between_reads(mut self, idle: Duration) -> Self {
        self.idle_time_between_reads = idle;
        self
    }

    pub fn stream(&self) -> &LocalStream {
        &self.stream
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn run(&self, context: SchedulerContext, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        context.notify(WorkerState::Created);
        context.notify(WorkerState::Initializing);

        info!(
            application = %context.application_name,
            stream = %self.stream.name(),
            worker_identifier = %context.worker_identifier,
            "Initializing local scheduler"
        );

        // Every position is read before any worker starts
        let mut assignments = Vec::new();
        for (shard_index, shard_id) in self.stream.shard_ids().into_iter().enumerate() {
            let checkpoint = match self.store.get_checkpoint(&shard_id).await {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    error!(shard_id = %shard_id, error = %e, "Failed to read initial checkpoint");
                    return Err(e.into());
                }
            };
            assignments.push((shard_index, shard_id, checkpoint));
        }

        let mut tasks = Vec::new();
        for (shard_index, shard_id, checkpoint) in assignments {
            if checkpoint.as_deref() == Some(SHARD_END) {
                debug!(shard_id = %shard_id, "Shard already completed, skipping");
                continue;
            }

            let worker = ShardWorker {
                stream: self.stream.clone(),
                checkpointer: Arc::new(StoreCheckpointer::new(self.store.clone(), shard_id.clone())),
                shard_index,
                shard_id,
                max_records: self.max_records,
                idle_time_between_reads: self.idle_time_between_reads,
                shutdown: shutdown.clone(),
            };
            let processor = context.processor_factory.shard_record_processor();
            tasks.push(tokio::spawn(worker.run(processor, checkpoint)));
        }

        context.notify(WorkerState::Started);

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        context.notify(WorkerState::ShutdownRequested);
        info!(worker_identifier = %context.worker_identifier, "Graceful shutdown requested");
        context.notify(WorkerState::ShuttingDown);

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Shard task panicked or was cancelled");
            }
        }

        context.notify(WorkerState::ShutDown);
        info!(worker_identifier = %context.worker_identifier, "Local scheduler shut down");
        Ok(())
    }
}

struct ShardWorker {
    stream: LocalStream,
    checkpointer: Arc<dyn Checkpointer>,
    shard_index: usize,
    shard_id: String,
    max_records: usize,
    idle_time_between_reads: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ShardWorker {
    async fn run(mut self, mut processor: Box<dyn ShardRecordProcessor>, checkpoint: Option<String>) {
        if let Err(e) = self.consume(processor.as_mut(), checkpoint).await {
            error!(
                shard_id = %self.shard_id,
                error = %e,
                "Shard processor failed, shard will not make further progress"
            );
        }
    }

    async fn consume(
        &mut self,
        processor: &mut dyn ShardRecordProcessor,
        checkpoint: Option<String>,
    ) -> std::result::Result<(), ProcessorError> {
        processor
            .initialize(InitializationInput {
                shard_id: self.shard_id.clone(),
                extended_sequence_number: checkpoint.clone(),
            })
            .await?;

        let mut position = checkpoint;
        let mut sender_dropped = false;

        loop {
            if sender_dropped || *self.shutdown.borrow() {
                return processor
                    .shutdown_requested(ShutdownRequestedInput {
                        checkpointer: self.checkpointer.clone(),
                    })
                    .await;
            }

            let (records, ended) =
                self.stream
                    .read(self.shard_index, position.as_deref(), self.max_records);
            let delivered = records.len();

            if let Some(last) = records.last() {
                position = Some(last.sequence_number.clone());
                let millis_behind_latest = last
                    .approximate_arrival_timestamp
                    .map(|ts| (Utc::now() - ts).num_milliseconds().max(0) as u64);

                processor
                    .process_records(ProcessRecordsInput {
                        records,
                        checkpointer: self.checkpointer.clone(),
                        millis_behind_latest,
                    })
                    .await?;
            }

            if ended {
                return processor
                    .shard_ended(ShardEndedInput {
                        checkpointer: self.checkpointer.clone(),
                    })
                    .await;
            }

            if delivered < self.max_records {
                sender_dropped = self.wait_for_records().await;
            }
        }
    }

    /// Sleep between reads; returns true if the shutdown sender went away
    async fn wait_for_records(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.idle_time_between_reads) => false,
            changed = self.shutdown.changed() => changed.is_err(),
        }
    }
}
