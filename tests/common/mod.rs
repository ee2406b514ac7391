// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use shard_checkpointer::{
    CheckpointStore, ConsumerConfig, ConsumerHandler, KinesisConsumer, LocalScheduler,
    LocalStream,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("shard_checkpointer=debug".parse().unwrap())
                    .add_directive("test=debug".parse().unwrap()),
            )
            .with_test_writer()
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    });
}

/// Handler over UTF-8 events that can be told to fail on one payload
#[derive(Default)]
pub struct TestHandler {
    fail_on: Option<String>,
    pub processor_invoked: AtomicUsize,
    pub initialized: AtomicUsize,
    events_received: Mutex<Vec<String>>,
}

impl TestHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(payload: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(payload.to_string()),
            ..Default::default()
        })
    }

    pub fn processor_invoked(&self) -> usize {
        self.processor_invoked.load(Ordering::SeqCst)
    }

    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn events_received(&self) -> Vec<String> {
        self.events_received.lock().clone()
    }
}

#[async_trait]
impl ConsumerHandler for TestHandler {
    type Payload = String;

    fn processor_initialized(&self) {
        self.initialized.fetch_add(1, Ordering::SeqCst);
    }

    fn convert_payload(&self, data: &Bytes) -> anyhow::Result<String> {
        Ok(String::from_utf8(data.to_vec())?)
    }

    async fn process_payload(&self, batch: Vec<(String, String)>) -> anyhow::Result<()> {
        self.processor_invoked.fetch_add(1, Ordering::SeqCst);
        if let Some(fail_on) = &self.fail_on {
            if batch.iter().any(|(_, event)| event == fail_on) {
                anyhow::bail!("Permanent failure processing {}", fail_on);
            }
        }
        self.events_received
            .lock()
            .extend(batch.into_iter().map(|(_, event)| event));
        Ok(())
    }
}

pub fn test_config(stream: &LocalStream) -> ConsumerConfig {
    ConsumerConfig {
        application_name: "test-app".to_string(),
        stream_name: stream.name().to_string(),
        ..Default::default()
    }
}

pub fn create_consumer(
    stream: &LocalStream,
    store: Arc<dyn CheckpointStore>,
    config: ConsumerConfig,
    handler: Arc<TestHandler>,
) -> KinesisConsumer<TestHandler, LocalScheduler> {
    let scheduler = LocalScheduler::new(stream.clone(), store)
        .with_idle_time_between_reads(Duration::from_millis(20));
    KinesisConsumer::new(config, handler, Arc::new(scheduler)).0
}

pub async fn wait_for_condition<F>(mut check: F, timeout: Duration) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while !check() {
        if start.elapsed() > timeout {
            anyhow::bail!("Condition not met within timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

pub async fn wait_for_checkpoint(
    store: &dyn CheckpointStore,
    shard_id: &str,
    expected: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let start = std::time::Instant::now();
    while store.get_checkpoint(shard_id).await?.as_deref() != Some(expected) {
        if start.elapsed() > timeout {
            anyhow::bail!("Checkpoint {} for {} not written within timeout", expected, shard_id);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
