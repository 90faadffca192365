//! Engine wiring for the workflow graph
//!
//! Connects the dispatcher's launch requests and the execution workflow's
//! fan-out to the engine facade: execution children keyed by task id with
//! the estimate-derived timeout, and detached learner/groom children that
//! outlive their parent.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use backlogstore::TaskStore;

use crate::agent::AgentInvoker;
use crate::dispatch::ExecutionLauncher;
use crate::exec::{
    ExecActivities, FanOut, OutcomeRecord, StructuredPlan, TaskExecution, TaskRequest, workflow_timeout,
};
use crate::groom::TacticalGroom;
use crate::learn::{Learner, LearnerInput, LessonStore};
use crate::prompts::PromptSet;
use crate::runtime::{
    ChildWorkflowOptions, IdReusePolicy, ParentClosePolicy, SignalHub, StartAck, WORKFLOW_TYPE_EXECUTION,
    WORKFLOW_TYPE_LEARNER, WORKFLOW_TYPE_TACTICAL_GROOM, WorkflowSpawner,
};

/// Starts execution workflows on the engine, task id as workflow id
pub struct ExecutionWiring {
    engine: Arc<dyn WorkflowSpawner>,
    signals: Arc<dyn SignalHub>,
    activities: Arc<dyn ExecActivities>,
    fanout: Arc<dyn FanOut>,
}

impl ExecutionWiring {
    pub fn new(
        engine: Arc<dyn WorkflowSpawner>,
        signals: Arc<dyn SignalHub>,
        activities: Arc<dyn ExecActivities>,
        fanout: Arc<dyn FanOut>,
    ) -> Self {
        Self {
            engine,
            signals,
            activities,
            fanout,
        }
    }
}

#[async_trait]
impl ExecutionLauncher for ExecutionWiring {
    async fn launch(&self, req: TaskRequest) -> Result<StartAck, crate::runtime::SpawnError> {
        let opts = ChildWorkflowOptions {
            workflow_id: req.task_id.clone(),
            workflow_type: WORKFLOW_TYPE_EXECUTION,
            // Running duplicates are rejected; only failed or terminated
            // runs may be replaced.
            id_reuse: IdReusePolicy::AllowDuplicateFailedOnly,
            parent_close: ParentClosePolicy::Abandon,
            execution_timeout: Some(workflow_timeout(req.estimate_minutes)),
        };

        let execution = TaskExecution::new(
            req,
            Arc::clone(&self.activities),
            Arc::clone(&self.signals),
            Arc::clone(&self.fanout),
        );
        self.engine
            .start(opts, Box::pin(async move { execution.run().await.map(|_| ()) }))
            .await
    }
}

/// Spawns the detached post-success children
pub struct FanOutWiring {
    engine: Arc<dyn WorkflowSpawner>,
    agent: Arc<dyn AgentInvoker>,
    prompts: Arc<PromptSet>,
    store: Arc<Mutex<TaskStore>>,
    /// Fast-tier agent for the learner and the tactical groomer
    fast_agent: String,
    /// Directory holding per-project lesson corpora
    state_dir: PathBuf,
}

impl FanOutWiring {
    pub fn new(
        engine: Arc<dyn WorkflowSpawner>,
        agent: Arc<dyn AgentInvoker>,
        prompts: Arc<PromptSet>,
        store: Arc<Mutex<TaskStore>>,
        fast_agent: String,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            agent,
            prompts,
            store,
            fast_agent,
            state_dir,
        }
    }

    fn child_opts(workflow_id: String, workflow_type: &'static str) -> ChildWorkflowOptions {
        ChildWorkflowOptions {
            workflow_id,
            workflow_type,
            id_reuse: IdReusePolicy::AllowDuplicate,
            // The children must survive the parent returning
            parent_close: ParentClosePolicy::Abandon,
            execution_timeout: Some(std::time::Duration::from_secs(10 * 60)),
        }
    }
}

#[async_trait]
impl FanOut for FanOutWiring {
    async fn spawn_learner(
        &self,
        req: &TaskRequest,
        plan: &StructuredPlan,
        outcome: &OutcomeRecord,
    ) -> eyre::Result<StartAck> {
        let learner = Learner::new(
            Arc::clone(&self.agent),
            Arc::clone(&self.prompts),
            self.fast_agent.clone(),
            LessonStore::new(self.state_dir.join(format!("{}-lessons.jsonl", req.project))),
            req.work_dir.join(".semgrep"),
            req.work_dir.join("AGENT_MEMORY.md"),
        );
        let input = LearnerInput {
            task_id: req.task_id.clone(),
            project: req.project.clone(),
            work_dir: req.work_dir.clone(),
            task_prompt: req.prompt.clone(),
            files: plan.files.clone(),
            dod_summary: if outcome.dod_passed {
                "all checks passed".to_string()
            } else {
                outcome.dod_failure.clone()
            },
            previous_errors: plan.previous_errors.clone(),
            recent_dod_failures: plan.previous_errors.clone(),
        };

        let opts = Self::child_opts(format!("learner-{}", req.task_id), WORKFLOW_TYPE_LEARNER);
        let ack = self
            .engine
            .start(opts, Box::pin(async move { learner.run(&input).await }))
            .await?;
        debug!(workflow_id = %ack.workflow_id, "Learner child acknowledged");
        Ok(ack)
    }

    async fn spawn_tactical_groom(&self, req: &TaskRequest) -> eyre::Result<StartAck> {
        let groom = TacticalGroom::new(
            Arc::clone(&self.store),
            Arc::clone(&self.agent),
            Arc::clone(&self.prompts),
            self.fast_agent.clone(),
        );
        let project = req.project.clone();
        let task_id = req.task_id.clone();
        let work_dir = req.work_dir.clone();

        let opts = Self::child_opts(format!("groom-{}", req.task_id), WORKFLOW_TYPE_TACTICAL_GROOM);
        let ack = self
            .engine
            .start(
                opts,
                Box::pin(async move { groom.run(&project, &task_id, &work_dir).await.map(|_| ()) }),
            )
            .await?;
        debug!(workflow_id = %ack.workflow_id, "Tactical groom child acknowledged");
        Ok(ack)
    }
}
