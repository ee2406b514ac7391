mod common;

use common::{
    create_consumer, init_logging, test_config, wait_for_checkpoint, wait_for_condition,
    TestHandler,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use shard_checkpointer::monitoring::CheckpointEventType;
use shard_checkpointer::store::SHARD_END;
use shard_checkpointer::{
    CheckpointStore, InMemoryCheckpointStore, LocalStream, MetricsAggregator, WorkerState,
};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_commit_after_batch_size_exceeded() -> anyhow::Result<()> {
    init_logging();
    let stream = LocalStream::new("test-stream", 1);
    let shard_id = stream.shard_ids()[0].clone();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let handler = TestHandler::new();

    let mut config = test_config(&stream);
    config.checkpoint.batch_size_max = 1;
    let consumer = create_consumer(&stream, store.clone(), config, handler.clone());
    consumer.start()?;

    stream.put_record_to_shard(&shard_id, "pk", "1")?;
    wait_for_condition(|| handler.processor_invoked() == 1, TIMEOUT).await?;
    assert_eq!(store.get_checkpoint(&shard_id).await?, None);

    let second = stream.put_record_to_shard(&shard_id, "pk", "2")?;
    wait_for_checkpoint(store.as_ref(), &shard_id, &second, TIMEOUT).await?;

    consumer.stop().await?;
    assert_eq!(handler.events_received(), vec!["1".to_string(), "2".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_permanent_failure_stops_consumer() -> anyhow::Result<()> {
    init_logging();
    let stream = LocalStream::new("test-stream", 1);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let handler = TestHandler::failing_on("First");

    let mut config = test_config(&stream);
    config.checkpoint.batch_size_max = 0;
    let consumer = create_consumer(&stream, store.clone(), config, handler.clone());
    consumer.start()?;

    stream.put_record("customer-1", "First")?;
    wait_for_condition(|| handler.processor_invoked() == 1, TIMEOUT).await?;

    // The processor asked the consumer to shut down on its own
    wait_for_condition(|| !consumer.is_running(), TIMEOUT).await?;
    stream.put_record("customer-1", "Second")?;
    consumer.stop().await?;

    assert_eq!(handler.processor_invoked(), 1);
    assert!(handler.events_received().is_empty());
    assert!(store.all_checkpoints().await.is_empty());
    assert_eq!(consumer.worker_state(), Some(WorkerState::ShutDown));
    Ok(())
}

#[tokio::test]
async fn test_not_committed_is_redelivered_after_restart() -> anyhow::Result<()> {
    init_logging();
    let stream = LocalStream::new("test-stream", 1);
    let store = Arc::new(InMemoryCheckpointStore::new());

    let failing = TestHandler::failing_on("Event");
    let consumer = create_consumer(&stream, store.clone(), test_config(&stream), failing.clone());
    consumer.start()?;
    stream.put_record("customer-1", "Event")?;
    wait_for_condition(|| failing.processor_invoked() == 1, TIMEOUT).await?;
    consumer.stop().await?;

    let handler = TestHandler::new();
    let consumer = create_consumer(&stream, store.clone(), test_config(&stream), handler.clone());
    consumer.start()?;
    wait_for_condition(|| handler.events_received().len() == 1, TIMEOUT).await?;
    consumer.stop().await?;

    assert_eq!(handler.events_received(), vec!["Event".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_committed_is_not_redelivered_after_restart() -> anyhow::Result<()> {
    init_logging();
    let stream = LocalStream::new("test-stream", 1);
    let store = Arc::new(InMemoryCheckpointStore::new());

    let first_run = TestHandler::new();
    let consumer = create_consumer(&stream, store.clone(), test_config(&stream), first_run.clone());
    consumer.start()?;
    stream.put_record("customer-1", "First")?;
    wait_for_condition(|| first_run.events_received().contains(&"First".to_string()), TIMEOUT)
        .await?;
    consumer.stop().await?;

    stream.put_record("customer-1", "Second")?;

    let second_run = TestHandler::new();
    let consumer = create_consumer(&stream, store.clone(), test_config(&stream), second_run.clone());
    consumer.start()?;
    wait_for_condition(|| second_run.events_received().contains(&"Second".to_string()), TIMEOUT)
        .await?;
    consumer.stop().await?;

    assert!(!second_run.events_received().contains(&"First".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_all_shard_processors_become_ready() -> anyhow::Result<()> {
    init_logging();
    let stream = LocalStream::new("test-stream", 3);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let handler = TestHandler::new();

    let consumer = create_consumer(&stream, store.clone(), test_config(&stream), handler.clone());
    consumer.start()?;
    wait_for_condition(|| handler.initialized() == 3, TIMEOUT).await?;

    for i in 0..30 {
        stream.put_record(&format!("customer-{}", i), format!("event-{}", i))?;
    }
    wait_for_condition(|| handler.events_received().len() == 30, TIMEOUT).await?;
    consumer.stop().await?;

    // Shutdown flushes each shard's pending progress
    for shard_id in stream.shard_ids() {
        if stream.shard_len(&shard_id)? > 0 {
            assert!(store.get_checkpoint(&shard_id).await?.is_some());
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_worker_state_transitions_are_observed() -> anyhow::Result<()> {
    init_logging();
    let stream = LocalStream::new("test-stream", 1);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let handler = TestHandler::new();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = transitions.clone();

    let consumer = create_consumer(&stream, store, test_config(&stream), handler.clone())
        .with_observer(move |previous: Option<WorkerState>, next: WorkerState| {
            seen.lock().push((previous, next));
        });
    consumer.start()?;
    wait_for_condition(|| handler.initialized() == 1, TIMEOUT).await?;
    consumer.stop().await?;

    let transitions = transitions.lock().clone();
    assert_eq!(transitions.first(), Some(&(None, WorkerState::Created)));
    assert_eq!(
        transitions.iter().map(|(_, next)| *next).collect::<Vec<_>>(),
        vec![
            WorkerState::Created,
            WorkerState::Initializing,
            WorkerState::Started,
            WorkerState::ShutdownRequested,
            WorkerState::ShuttingDown,
            WorkerState::ShutDown,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_shard_end_is_checkpointed() -> anyhow::Result<()> {
    init_logging();
    let stream = LocalStream::new("test-stream", 2);
    let shard_ids = stream.shard_ids();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let handler = TestHandler::new();

    stream.put_record_to_shard(&shard_ids[0], "pk", "last-event")?;
    stream.close_shard(&shard_ids[0])?;

    let consumer = create_consumer(&stream, store.clone(), test_config(&stream), handler.clone());
    consumer.start()?;
    wait_for_checkpoint(store.as_ref(), &shard_ids[0], SHARD_END, TIMEOUT).await?;

    stream.put_record_to_shard(&shard_ids[1], "pk", "other-event")?;
    wait_for_condition(|| handler.events_received().len() == 2, TIMEOUT).await?;
    consumer.stop().await?;

    assert_eq!(
        store.get_checkpoint(&shard_ids[0]).await?.as_deref(),
        Some(SHARD_END)
    );
    assert_ne!(
        store.get_checkpoint(&shard_ids[1]).await?.as_deref(),
        Some(SHARD_END)
    );
    Ok(())
}

#[tokio::test]
async fn test_monitoring_events_feed_metrics() -> anyhow::Result<()> {
    init_logging();
    let stream = LocalStream::new("test-stream", 1);
    let shard_id = stream.shard_ids()[0].clone();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let handler = TestHandler::new();

    let mut config = test_config(&stream);
    config.monitoring.enabled = true;
    config.checkpoint.batch_size_max = 0;

    let scheduler = shard_checkpointer::LocalScheduler::new(stream.clone(), store.clone())
        .with_idle_time_between_reads(Duration::from_millis(20));
    let (consumer, monitoring_rx) =
        shard_checkpointer::KinesisConsumer::new(config, handler.clone(), Arc::new(scheduler));
    let mut monitoring_rx = monitoring_rx.expect("monitoring enabled");

    consumer.start()?;
    let sequence = stream.put_record_to_shard(&shard_id, "pk", "event")?;
    wait_for_checkpoint(store.as_ref(), &shard_id, &sequence, TIMEOUT).await?;
    consumer.stop().await?;
    drop(consumer);

    let (tx, rx) = tokio::sync::mpsc::channel(100);
    let aggregator = MetricsAggregator::new(Duration::from_secs(60), rx);
    let mut committed = false;
    while let Ok(event) = monitoring_rx.try_recv() {
        if matches!(event.event_type, CheckpointEventType::Committed { .. }) {
            committed = true;
        }
        tx.send(event).await?;
    }
    drop(tx);
    assert!(committed);

    let metrics = aggregator.metrics_handle();
    aggregator.run().await;
    let metrics = metrics.read().await;
    let shard_metrics = &metrics[&shard_id];
    assert_eq!(shard_metrics.records_processed, 1);
    assert_eq!(shard_metrics.checkpoints_succeeded, 1);
    assert_eq!(shard_metrics.last_committed_sequence.as_deref(), Some(sequence.as_str()));
    Ok(())
}
