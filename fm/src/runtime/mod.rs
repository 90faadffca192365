//! Facade over the external durable workflow engine
//!
//! The orchestrator assumes an execution service that provides timers,
//! signals, child workflows, schedules, activity retries, heartbeats, and
//! workflow listing. This module fixes the shape of that contract: child
//! start options (id reuse, parent-close policy, execution timeout), start
//! acknowledgments, signal delivery, and the activity-side context for
//! heartbeats and cancellation. [`local`] supplies the in-process
//! implementation used by the daemon and the tests.

pub mod local;
pub mod schedule;

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{trace, warn};

/// Workflow type name for per-task executions
pub const WORKFLOW_TYPE_EXECUTION: &str = "task-execution";

/// Workflow type name for post-success learners
pub const WORKFLOW_TYPE_LEARNER: &str = "learner";

/// Workflow type name for post-success tactical groomers
pub const WORKFLOW_TYPE_TACTICAL_GROOM: &str = "tactical-groom";

/// Signal name the execution workflow blocks on at the human gate
pub const SIGNAL_HUMAN_APPROVAL: &str = "human-approval";

/// Signal value that rejects a plan at the gate
pub const APPROVAL_REJECTED: &str = "REJECTED";

/// Workflow-id reuse policy for child starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdReusePolicy {
    /// Any terminal prior run allows a new one
    #[default]
    AllowDuplicate,
    /// Running duplicates are rejected; a completed prior run also blocks
    /// restart, only failed or terminated runs may be replaced
    AllowDuplicateFailedOnly,
}

/// What happens to a child when its parent workflow closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentClosePolicy {
    /// Child is terminated with the parent
    #[default]
    Terminate,
    /// Child keeps running after the parent closes
    Abandon,
}

/// Options for starting a child workflow
#[derive(Debug, Clone)]
pub struct ChildWorkflowOptions {
    /// Workflow id; doubles as the dispatch idempotency key
    pub workflow_id: String,
    /// Type name used by [`WorkflowSpawner::list_running`] queries
    pub workflow_type: &'static str,
    pub id_reuse: IdReusePolicy,
    pub parent_close: ParentClosePolicy,
    /// Overall run deadline; `None` leaves the run unbounded
    pub execution_timeout: Option<Duration>,
}

/// Acknowledgment that the engine accepted a workflow start
#[derive(Debug, Clone)]
pub struct StartAck {
    pub workflow_id: String,
    pub run_id: String,
}

/// Errors from starting a child workflow
#[derive(Debug, Error)]
pub enum SpawnError {
    /// A run with this id is currently executing; duplicates are rejected
    #[error("workflow {0} is already running")]
    AlreadyRunning(String),

    /// The id's last run completed and the reuse policy only permits reuse
    /// after a failed or terminated run
    #[error("workflow {0} already completed; id reuse requires a failed or terminated run")]
    CompletedOk(String),

    /// The engine itself is unavailable
    #[error("workflow engine error: {0}")]
    Engine(String),
}

impl SpawnError {
    /// A duplicate-running rejection is a benign skip for the dispatcher
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SpawnError::AlreadyRunning(_))
    }
}

/// A boxed workflow body handed to the engine
pub type WorkflowFuture = Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>>;

/// Engine-side operations the workflows need: child starts and the running
/// set query the dispatcher scans each tick
#[async_trait]
pub trait WorkflowSpawner: Send + Sync {
    /// Start a child workflow; resolves once the engine acknowledges the
    /// start. Abandoned children must survive the caller returning.
    async fn start(&self, opts: ChildWorkflowOptions, body: WorkflowFuture)
    -> Result<StartAck, SpawnError>;

    /// Ids of currently running workflows of the given type
    async fn list_running(&self, workflow_type: &str) -> eyre::Result<HashSet<String>>;
}

/// Signal delivery and receipt, addressed by workflow id and signal name
#[async_trait]
pub trait SignalHub: Send + Sync {
    /// Deliver a signal value to a workflow (buffered until consumed)
    async fn deliver(&self, workflow_id: &str, name: &str, value: String) -> eyre::Result<()>;

    /// Block until a signal addressed to the workflow arrives
    async fn wait(&self, workflow_id: &str, name: &str) -> eyre::Result<String>;
}

/// Activity-side context: heartbeat reporting and cancellation
///
/// Long-running activities must heartbeat at least once per 30 s; the agent
/// adapter heartbeats every 5 s while its subprocess runs. Cancelling the
/// context must propagate to any spawned subprocess.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    cancel_rx: watch::Receiver<bool>,
    heartbeats: Arc<AtomicU64>,
}

impl ActivityContext {
    /// Create a context plus the handle that cancels it
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel_rx: rx,
                heartbeats: Arc::new(AtomicU64::new(0)),
            },
            CancelHandle { tx },
        )
    }

    /// Record liveness with the engine
    pub fn heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        trace!("activity heartbeat");
    }

    /// Number of heartbeats recorded so far
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolve when cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling; stay pending forever
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Cancels an [`ActivityContext`]
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Retry policy for activity invocations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base backoff; grows linearly with the attempt number
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts, backoff }
    }

    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Run an activity closure under a retry policy
///
/// Every attempt gets the 1-based attempt index. Errors on the final attempt
/// propagate to the caller.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, name: &str, mut run: F) -> eyre::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match run(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts => {
                warn!(activity = name, attempt, error = %e, "Activity attempt failed, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
