use super::types::{CheckpointEvent, CheckpointEventType, ShardEventType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Instant};
use tracing::{debug, info, trace, warn};

/// Holds aggregated metrics for a single shard
#[derive(Debug, Clone)]
pub struct ShardMetrics {
    // Processing
    pub records_processed: u64,
    pub batches_processed: u64,
    pub batches_failed: u64,
    pub processing_time: Duration,
    pub max_batch_time: Duration,

    // Checkpoints
    pub checkpoints_succeeded: u64,
    pub checkpoints_failed: u64,
    pub retry_attempts: u64,
    pub last_committed_sequence: Option<String>,

    pub last_updated: Instant,
}

impl Default for ShardMetrics {
    fn default() -> Self {
        Self {
            records_processed: 0,
            batches_processed: 0,
            batches_failed: 0,
            processing_time: Duration::default(),
            max_batch_time: Duration::default(),
            checkpoints_succeeded: 0,
            checkpoints_failed: 0,
            retry_attempts: 0,
            last_committed_sequence: None,
            last_updated: Instant::now(),
        }
    }
}

/// Aggregates monitoring events into per-shard metrics
///
/// Counters are cumulative. A shard with no events for two windows is
/// evicted when metrics are emitted, which resets its counters.
pub struct MetricsAggregator {
    metrics: Arc<RwLock<HashMap<String, ShardMetrics>>>,
    window_duration: Duration,
    monitoring_rx: mpsc::Receiver<CheckpointEvent>,
}

impl MetricsAggregator {
    pub fn new(window_duration: Duration, monitoring_rx: mpsc::Receiver<CheckpointEvent>) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
            window_duration,
            monitoring_rx,
        }
    }

    /// Shared handle to the aggregated metrics, usable after `run` takes ownership
    pub fn metrics_handle(&self) -> Arc<RwLock<HashMap<String, ShardMetrics>>> {
        self.metrics.clone()
    }

    /// Process events and emit metrics until every sender is dropped
    pub async fn run(mut self) {
        let mut interval = interval(self.window_duration);

        loop {
            tokio::select! {
                event = self.monitoring_rx.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => {
                        debug!("Monitoring channel closed, emitting final metrics");
                        self.emit_metrics().await;
                        break;
                    }
                },

                _ = interval.tick() => {
                    self.emit_metrics().await;
                }
            }
        }
    }

    pub async fn process_event(&self, event: CheckpointEvent) {
        let mut metrics = self.metrics.write().await;
        let shard_metrics = metrics.entry(event.shard_id.clone()).or_default();

        match event.event_type {
            CheckpointEventType::BatchProcessed {
                record_count,
                duration,
            } => {
                shard_metrics.records_processed += record_count as u64;
                shard_metrics.batches_processed += 1;
                shard_metrics.processing_time += duration;
                if duration > shard_metrics.max_batch_time {
                    shard_metrics.max_batch_time = duration;
                }
                trace!(
                    shard_id = %event.shard_id,
                    records = record_count,
                    duration_ms = ?duration.as_millis(),
                    "Batch processed"
                );
            }
            CheckpointEventType::BatchFailed {
                record_count,
                error,
            } => {
                shard_metrics.batches_failed += 1;
                warn!(
                    shard_id = %event.shard_id,
                    records = record_count,
                    error = %error,
                    "Batch processing failed"
                );
            }
            CheckpointEventType::RetryScheduled {
                sequence_number,
                attempt,
                delay,
                error,
            } => {
                shard_metrics.retry_attempts += 1;
                debug!(
                    shard_id = %event.shard_id,
                    sequence = %sequence_number,
                    attempt = attempt,
                    delay_ms = ?delay.as_millis(),
                    error = %error,
                    "Checkpoint retry scheduled"
                );
            }
            CheckpointEventType::Committed {
                sequence_number,
                attempts,
                trigger,
            } => {
                shard_metrics.checkpoints_succeeded += 1;
                trace!(
                    shard_id = %event.shard_id,
                    sequence = %sequence_number,
                    attempts = attempts,
                    trigger = %trigger,
                    "Checkpoint committed"
                );
                shard_metrics.last_committed_sequence = Some(sequence_number);
            }
            CheckpointEventType::CommitFailed {
                sequence_number,
                attempts,
                error,
            } => {
                shard_metrics.checkpoints_failed += 1;
                warn!(
                    shard_id = %event.shard_id,
                    sequence = %sequence_number,
                    attempts = attempts,
                    error = %error,
                    "Checkpoint commit failed"
                );
            }
            CheckpointEventType::ShardEvent {
                event_type,
                details,
            } => match event_type {
                ShardEventType::Initialized => {
                    debug!(shard_id = %event.shard_id, "Shard processing initialized");
                }
                ShardEventType::Ended => {
                    debug!(shard_id = %event.shard_id, "Shard fully consumed");
                }
                ShardEventType::LeaseLost => {
                    info!(shard_id = %event.shard_id, details = ?details, "Shard lease lost");
                }
                ShardEventType::ShutdownRequested => {
                    info!(
                        shard_id = %event.shard_id,
                        details = ?details,
                        "Shard processing interrupted by shutdown"
                    );
                }
            },
        }

        shard_metrics.last_updated = Instant::now();
    }

    async fn emit_metrics(&self) {
        let mut metrics = self.metrics.write().await;

        for (shard_id, metrics) in metrics.iter() {
            if metrics.last_updated.elapsed() > self.window_duration * 2 {
                continue;
            }

            info!(
                shard_id = %shard_id,
                records_processed = metrics.records_processed,
                batches_processed = metrics.batches_processed,
                batches_failed = metrics.batches_failed,
                max_batch_time_ms = %metrics.max_batch_time.as_millis(),
                checkpoints_succeeded = metrics.checkpoints_succeeded,
                checkpoints_failed = metrics.checkpoints_failed,
                retry_attempts = metrics.retry_attempts,
                last_committed_sequence = ?metrics.last_committed_sequence,
                "Metrics for window"
            );

            if metrics.checkpoints_failed > 0 {
                warn!(
                    shard_id = %shard_id,
                    failures = metrics.checkpoints_failed,
                    "Checkpoint failures detected"
                );
            }
        }

        metrics.retain(|_, m| m.last_updated.elapsed() <= self.window_duration * 2);
    }

    /// Get metrics for a specific shard
    pub async fn get_shard_metrics(&self, shard_id: &str) -> Option<ShardMetrics> {
        self.metrics.read().await.get(shard_id).cloned()
    }
}
