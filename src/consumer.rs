//! Consumer supervisor
//!
//! [`KinesisConsumer`] owns a background task running a [`Scheduler`]. It
//! wires the user's [`ConsumerHandler`] into shard processors, tracks the
//! worker lifecycle and offers `start` / `stop`.

use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStrategyFactory;
use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, Result};
use crate::monitoring::CheckpointEvent;
use crate::processor::{ConsumerControl, ConsumerHandler, ShardProcessorFactory};
use crate::scheduler::{Scheduler, SchedulerContext, WorkerState, WorkerStateChangeListener};

/// Stateless callback for worker state transitions
pub trait WorkerStateObserver: Send + Sync {
    fn on_transition(&self, previous: Option<WorkerState>, next: WorkerState);
}

impl<F> WorkerStateObserver for F
where
    F: Fn(Option<WorkerState>, WorkerState) + Send + Sync,
{
    fn on_transition(&self, previous: Option<WorkerState>, next: WorkerState) {
        self(previous, next)
    }
}

/// Remembers the last worker state and reports only actual changes
pub struct WorkerStateTracker {
    last: Mutex<Option<WorkerState>>,
    observers: Vec<Arc<dyn WorkerStateObserver>>,
}

impl WorkerStateTracker {
    pub fn new(observers: Vec<Arc<dyn WorkerStateObserver>>) -> Self {
        Self {
            last: Mutex::new(None),
            observers,
        }
    }

    pub fn current(&self) -> Option<WorkerState> {
        *self.last.lock()
    }
}

impl WorkerStateChangeListener for WorkerStateTracker {
    fn on_worker_state_change(&self, state: WorkerState) {
        let previous = {
            let mut last = self.last.lock();
            if *last == Some(state) {
                return;
            }
            last.replace(state)
        };

        match previous {
            Some(previous) => info!("worker state {} => {}", previous, state),
            None => info!("worker state {}", state),
        }

        for observer in &self.observers {
            observer.on_transition(previous, state);
        }
    }
}

/// Control handle given to shard processors; only signals shutdown
struct ShutdownTrigger {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ConsumerControl for ShutdownTrigger {
    fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Shutdown requested by shard processor");
        }
    }
}

struct RunningScheduler {
    worker_identifier: String,
    shutdown_tx: Arc<watch::Sender<bool>>,
    tracker: Arc<WorkerStateTracker>,
    handle: Option<JoinHandle<Result<()>>>,
}

/// Runs a [`Scheduler`] in the background on behalf of a [`ConsumerHandler`]
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use shard_checkpointer::{
///     ConsumerConfig, InMemoryCheckpointStore, KinesisConsumer, LocalScheduler, LocalStream,
/// };
/// # use shard_checkpointer::ConsumerHandler;
/// # struct Printer;
/// # #[async_trait::async_trait]
/// # impl ConsumerHandler for Printer {
/// #     type Payload = Vec<u8>;
/// #     fn convert_payload(&self, data: &bytes::Bytes) -> anyhow::Result<Vec<u8>> { Ok(data.to_vec()) }
/// #     async fn process_payload(&self, _batch: Vec<(String, Vec<u8>)>) -> anyhow::Result<()> { Ok(()) }
/// # }
///
/// # async fn example() -> anyhow::Result<()> {
/// let stream = LocalStream::new("orders", 2);
/// let store = Arc::new(InMemoryCheckpointStore::new());
/// let scheduler = Arc::new(LocalScheduler::new(stream.clone(), store));
///
/// let config = ConsumerConfig {
///     application_name: "orders-app".to_string(),
///     stream_name: "orders".to_string(),
///     ..Default::default()
/// };
/// let (consumer, _monitoring_rx) = KinesisConsumer::new(config, Arc::new(Printer), scheduler);
///
/// consumer.start()?;
/// stream.put_record("customer-1", "hello")?;
/// consumer.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct KinesisConsumer<H: ConsumerHandler, S: Scheduler> {
    config: ConsumerConfig,
    handler: Arc<H>,
    scheduler: Arc<S>,
    monitoring_tx: Option<mpsc::Sender<CheckpointEvent>>,
    observers: Vec<Arc<dyn WorkerStateObserver>>,
    running: Mutex<Option<RunningScheduler>>,
}

impl<H: ConsumerHandler, S: Scheduler> KinesisConsumer<H, S> {
    /// Create a consumer; returns the monitoring receiver when monitoring is enabled
    pub fn new(
        config: ConsumerConfig,
        handler: Arc<H>,
        scheduler: Arc<S>,
    ) -> (Self, Option<mpsc::Receiver<CheckpointEvent>>) {
        let (monitoring_tx, monitoring_rx) = if config.monitoring.enabled {
            let (tx, rx) = mpsc::channel(config.monitoring.channel_size.max(1));
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        (
            Self {
                config,
                handler,
                scheduler,
                monitoring_tx,
                observers: Vec::new(),
                running: Mutex::new(None),
            },
            monitoring_rx,
        )
    }

    pub fn with_observer(mut self, observer: impl WorkerStateObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Start the scheduler on a background task and return the worker identifier
    pub fn start(&self) -> Result<String> {
        self.config.validate()?;
        let runtime = Handle::try_current()?;

        let mut running = self.running.lock();
        if let Some(previous) = running.as_mut() {
            match previous.handle.take() {
                Some(handle) if !handle.is_finished() => {
                    previous.handle = Some(handle);
                    return Err(ConsumerError::AlreadyRunning);
                }
                // The previous run shut itself down without a call to stop()
                Some(handle) => log_finished_run(&previous.worker_identifier, handle),
                None => {}
            }
        }

        let worker_identifier = Uuid::new_v4().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let processor_factory = ShardProcessorFactory::new(
            self.handler.clone(),
            Arc::new(ShutdownTrigger {
                shutdown_tx: shutdown_tx.clone(),
            }),
            CheckpointStrategyFactory::from_config(&self.config.checkpoint),
            self.monitoring_tx.clone(),
        );
        let tracker = Arc::new(WorkerStateTracker::new(self.observers.clone()));

        let context = SchedulerContext {
            application_name: self.config.application_name.clone(),
            stream_name: self.config.stream_name.clone(),
            worker_identifier: worker_identifier.clone(),
            processor_factory: Arc::new(processor_factory),
            state_listener: tracker.clone(),
        };

        info!(
            application = %self.config.application_name,
            stream = %self.config.stream_name,
            worker_identifier = %worker_identifier,
            "Starting consumer"
        );

        let scheduler = self.scheduler.clone();
        let handle = runtime.spawn(async move { scheduler.run(context, shutdown_rx).await });

        *running = Some(RunningScheduler {
            worker_identifier: worker_identifier.clone(),
            shutdown_tx,
            tracker,
            handle: Some(handle),
        });

        Ok(worker_identifier)
    }

    /// Request graceful shutdown and wait for the scheduler to finish
    ///
    /// A no-op if the consumer was never started or is already stopped.
    pub async fn stop(&self) -> Result<()> {
        let stopping = {
            let mut running = self.running.lock();
            running.as_mut().and_then(|r| {
                r.handle
                    .take()
                    .map(|handle| (handle, r.shutdown_tx.clone(), r.worker_identifier.clone()))
            })
        };

        let Some((handle, shutdown_tx, worker_identifier)) = stopping else {
            debug!("Consumer is not running, nothing to stop");
            return Ok(());
        };

        info!(worker_identifier = %worker_identifier, "Stopping consumer");
        shutdown_tx.send_replace(true);

        let result = handle.await?;
        info!(worker_identifier = %worker_identifier, "Consumer stopped");
        result
    }

    /// True while the background scheduler task is alive
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .and_then(|r| r.handle.as_ref())
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Last reported worker state of the current or most recent run
    pub fn worker_state(&self) -> Option<WorkerState> {
        self.running.lock().as_ref().and_then(|r| r.tracker.current())
    }

    /// Identifier of the current or most recent run
    pub fn worker_identifier(&self) -> Option<String> {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.worker_identifier.clone())
    }
}

fn log_finished_run(worker_identifier: &str, handle: JoinHandle<Result<()>>) {
    match handle.now_or_never() {
        Some(Ok(Ok(()))) => {
            info!(worker_identifier = %worker_identifier, "Previous run had already shut down")
        }
        Some(Ok(Err(e))) => warn!(
            worker_identifier = %worker_identifier,
            error = %e,
            "Previous run ended with an error"
        ),
        Some(Err(e)) => error!(
            worker_identifier = %worker_identifier,
            error = %e,
            "Previous run task panicked or was cancelled"
        ),
        None => debug!(worker_identifier = %worker_identifier, "Previous run result unavailable"),
    }
}
