//! Contract between the consumer and the runtime that delivers records
//!
//! A [`Scheduler`] owns lease assignment and record retrieval. It creates
//! shard processors through the factory in its [`SchedulerContext`], drives
//! their callbacks, and reports coarse worker states to the context's
//! listener.

pub mod local;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;
use crate::processor::ShardRecordProcessorFactory;

pub use local::{LocalScheduler, LocalStream};

/// Coarse worker lifecycle, in the order a run passes through it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkerState {
    Created,
    Initializing,
    Started,
    ShutdownRequested,
    ShuttingDown,
    ShutDown,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Created => "CREATED",
            WorkerState::Initializing => "INITIALIZING",
            WorkerState::Started => "STARTED",
            WorkerState::ShutdownRequested => "SHUT_DOWN_STARTED",
            WorkerState::ShuttingDown => "SHUTTING_DOWN",
            WorkerState::ShutDown => "SHUT_DOWN",
        };
        f.write_str(name)
    }
}

pub trait WorkerStateChangeListener: Send + Sync {
    fn on_worker_state_change(&self, state: WorkerState);
}

/// Everything a scheduler needs to run one worker
#[derive(Clone)]
pub struct SchedulerContext {
    pub application_name: String,
    pub stream_name: String,
    pub worker_identifier: String,
    pub processor_factory: Arc<dyn ShardRecordProcessorFactory>,
    pub state_listener: Arc<dyn WorkerStateChangeListener>,
}

impl SchedulerContext {
    pub(crate) fn notify(&self, state: WorkerState) {
        self.state_listener.on_worker_state_change(state);
    }
}

/// Runtime that drives shard processors for one worker
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Run until `shutdown` turns `true` (or its sender is dropped) and every
    /// shard processor has completed its shutdown. Returning confirms that
    /// graceful shutdown is complete.
    async fn run(&self, context: SchedulerContext, shutdown: watch::Receiver<bool>) -> Result<()>;
}
