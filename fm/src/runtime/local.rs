//! In-process workflow engine
//!
//! Implements the engine facade on plain tokio: a registry of running
//! workflows keyed by workflow id, detached child tasks, execution timeouts,
//! and buffered signal delivery. This is not a durable replay engine; a
//! hosted durable service can stand behind the same traits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ChildWorkflowOptions, IdReusePolicy, ParentClosePolicy, SignalHub, SpawnError, StartAck,
    WorkflowFuture, WorkflowSpawner,
};

/// Terminal status of a finished run, kept for id-reuse decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalStatus {
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
struct RunningEntry {
    workflow_type: &'static str,
    run_id: String,
}

#[derive(Default)]
struct Registry {
    running: HashMap<String, RunningEntry>,
    terminal: HashMap<String, TerminalStatus>,
}

/// Tokio-backed implementation of [`WorkflowSpawner`]
///
/// Every child is spawned detached, so abandon-on-parent-close holds by
/// construction; returning from [`WorkflowSpawner::start`] after the
/// registry insert is the start acknowledgment.
pub struct LocalEngine {
    registry: Arc<Mutex<Registry>>,
}

impl LocalEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(Mutex::new(Registry::default())),
        })
    }

    /// Number of currently running workflows (all types)
    pub async fn running_count(&self) -> usize {
        self.registry.lock().await.running.len()
    }
}

#[async_trait]
impl WorkflowSpawner for LocalEngine {
    async fn start(
        &self,
        opts: ChildWorkflowOptions,
        body: WorkflowFuture,
    ) -> Result<StartAck, SpawnError> {
        let run_id = Uuid::now_v7().to_string();

        {
            let mut registry = self.registry.lock().await;

            if registry.running.contains_key(&opts.workflow_id) {
                return Err(SpawnError::AlreadyRunning(opts.workflow_id));
            }
            if opts.id_reuse == IdReusePolicy::AllowDuplicateFailedOnly
                && registry.terminal.get(&opts.workflow_id) == Some(&TerminalStatus::Completed)
            {
                return Err(SpawnError::CompletedOk(opts.workflow_id));
            }

            registry.running.insert(
                opts.workflow_id.clone(),
                RunningEntry {
                    workflow_type: opts.workflow_type,
                    run_id: run_id.clone(),
                },
            );
        }

        if opts.parent_close == ParentClosePolicy::Terminate {
            // Local children are always detached; terminate-on-close would
            // need parent tracking this engine does not carry.
            warn!(workflow_id = %opts.workflow_id, "Terminate parent-close policy treated as abandon");
        }

        let registry = Arc::clone(&self.registry);
        let workflow_id = opts.workflow_id.clone();
        let timeout = opts.execution_timeout;
        tokio::spawn(async move {
            let status = match timeout {
                Some(deadline) => match tokio::time::timeout(deadline, body).await {
                    Ok(Ok(())) => TerminalStatus::Completed,
                    Ok(Err(e)) => {
                        debug!(workflow_id = %workflow_id, error = %e, "Workflow failed");
                        TerminalStatus::Failed
                    }
                    Err(_) => {
                        warn!(workflow_id = %workflow_id, ?deadline, "Workflow execution timed out");
                        TerminalStatus::TimedOut
                    }
                },
                None => match body.await {
                    Ok(()) => TerminalStatus::Completed,
                    Err(e) => {
                        debug!(workflow_id = %workflow_id, error = %e, "Workflow failed");
                        TerminalStatus::Failed
                    }
                },
            };

            let mut registry = registry.lock().await;
            registry.running.remove(&workflow_id);
            registry.terminal.insert(workflow_id, status);
        });

        debug!(workflow_id = %opts.workflow_id, run_id = %run_id, workflow_type = opts.workflow_type, "Workflow started");
        Ok(StartAck {
            workflow_id: opts.workflow_id,
            run_id,
        })
    }

    async fn list_running(&self, workflow_type: &str) -> eyre::Result<HashSet<String>> {
        let registry = self.registry.lock().await;
        Ok(registry
            .running
            .iter()
            .filter(|(_, entry)| entry.workflow_type == workflow_type)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Buffered in-memory signal hub
///
/// Values queue per (workflow id, signal name) until a waiter consumes them.
#[derive(Default)]
pub struct LocalSignalHub {
    queues: Mutex<HashMap<(String, String), VecDeque<String>>>,
    notify: Notify,
}

impl LocalSignalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SignalHub for LocalSignalHub {
    async fn deliver(&self, workflow_id: &str, name: &str, value: String) -> eyre::Result<()> {
        let key = (workflow_id.to_string(), name.to_string());
        self.queues.lock().await.entry(key).or_default().push_back(value);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn wait(&self, workflow_id: &str, name: &str) -> eyre::Result<String> {
        let key = (workflow_id.to_string(), name.to_string());
        loop {
            // Register before checking so a concurrent deliver cannot be missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(queue) = self.queues.lock().await.get_mut(&key) {
                if let Some(value) = queue.pop_front() {
                    return Ok(value);
                }
            }
            notified.await;
        }
    }
}

/// Convenience: run a closure and keep the engine facade types out of tests
pub fn boxed_workflow<F>(fut: F) -> WorkflowFuture
where
    F: std::future::Future<Output = eyre::Result<()>> + Send + 'static,
{
    Box::pin(fut)
}
