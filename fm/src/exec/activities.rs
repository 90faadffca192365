//! Activity contract for the execution workflow, plus its production wiring
//!
//! The workflow only sees the [`ExecActivities`] and [`FanOut`] traits;
//! tests substitute mocks, the daemon wires [`Activities`] over the agent
//! adapter, the scan and check runners, and the task store.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use backlogstore::TaskStore;

use crate::agent::{AgentInvoker, AgentKind, TokenUsage, extract_json};
use crate::dod::{self, DodReport};
use crate::prompts::PromptSet;
use crate::runtime::{ActivityContext, StartAck};
use crate::scan::{self, ScanReport};

use super::outcome::OutcomeRecord;
use super::plan::StructuredPlan;
use super::{DOD_TIMEOUT, TaskRequest};

/// Result of one execute (or handoff re-execute) activity
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub output: String,
    /// Agent that produced this result
    pub agent: String,
    pub tokens: TokenUsage,
}

/// Verdict from the review activity
#[derive(Debug, Clone, Default)]
pub struct ReviewResult {
    pub approved: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub reviewer: String,
    pub tokens: TokenUsage,
}

#[derive(Debug, Default, Deserialize)]
struct ReviewVerdict {
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Activities invoked by the execution state machine
#[async_trait]
pub trait ExecActivities: Send + Sync {
    /// Produce a structured plan for the task
    async fn plan(&self, ctx: &ActivityContext, req: &TaskRequest) -> eyre::Result<StructuredPlan>;

    /// Implement the plan with the given agent
    async fn execute(
        &self,
        ctx: &ActivityContext,
        req: &TaskRequest,
        plan: &StructuredPlan,
        agent: &str,
    ) -> eyre::Result<ExecutionResult>;

    /// Review an execution result with the given reviewer agent
    async fn review(
        &self,
        ctx: &ActivityContext,
        req: &TaskRequest,
        plan: &StructuredPlan,
        result: &ExecutionResult,
        reviewer: &str,
    ) -> eyre::Result<ReviewResult>;

    /// Optional static-analysis scan of the work directory
    async fn scan(&self, ctx: &ActivityContext, req: &TaskRequest) -> eyre::Result<ScanReport>;

    /// Run the definition-of-done checks
    async fn run_dod(&self, ctx: &ActivityContext, req: &TaskRequest) -> eyre::Result<DodReport>;

    /// Persist the terminal outcome; called on every terminal path
    async fn record_outcome(&self, outcome: &OutcomeRecord) -> eyre::Result<()>;

    /// Raise the escalation (logs and a health event); must never block
    async fn escalate(&self, req: &TaskRequest, reason: &str) -> eyre::Result<()>;
}

/// Post-success fan-out: detached learner and tactical groom children
///
/// Implementations must spawn with abandon-on-parent-close and return only
/// after the engine's start acknowledgment.
#[async_trait]
pub trait FanOut: Send + Sync {
    async fn spawn_learner(
        &self,
        req: &TaskRequest,
        plan: &StructuredPlan,
        outcome: &OutcomeRecord,
    ) -> eyre::Result<StartAck>;

    async fn spawn_tactical_groom(&self, req: &TaskRequest) -> eyre::Result<StartAck>;
}

/// Production activities over the agent adapter, scan and check runners, and
/// the task store
pub struct Activities {
    agent: Arc<dyn AgentInvoker>,
    prompts: Arc<PromptSet>,
    store: Arc<Mutex<TaskStore>>,
    /// JSONL log of outcome records and health events
    outcome_log: PathBuf,
}

impl Activities {
    pub fn new(
        agent: Arc<dyn AgentInvoker>,
        prompts: Arc<PromptSet>,
        store: Arc<Mutex<TaskStore>>,
        outcome_log: PathBuf,
    ) -> Self {
        Self {
            agent,
            prompts,
            store,
            outcome_log,
        }
    }

    fn append_log_line(&self, value: &serde_json::Value) -> eyre::Result<()> {
        if let Some(parent) = self.outcome_log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.outcome_log)?;
        writeln!(file, "{value}")?;
        Ok(())
    }
}

#[async_trait]
impl ExecActivities for Activities {
    async fn plan(&self, ctx: &ActivityContext, req: &TaskRequest) -> eyre::Result<StructuredPlan> {
        let prompt = self
            .prompts
            .render("plan", &json!({"task": req.prompt, "previous_errors": []}))?;
        let output = self
            .agent
            .run(ctx, AgentKind::Code, &req.provider, &prompt, &req.work_dir)
            .await?;
        StructuredPlan::parse(&output.text, output.tokens)
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        req: &TaskRequest,
        plan: &StructuredPlan,
        agent: &str,
    ) -> eyre::Result<ExecutionResult> {
        let prompt = self.prompts.render(
            "execute",
            &json!({
                "summary": plan.summary,
                "steps": plan.steps,
                "acceptance": plan.acceptance,
                "previous_errors": plan.previous_errors,
                "task": req.prompt,
            }),
        )?;
        let output = self
            .agent
            .run(ctx, AgentKind::Code, agent, &prompt, &req.work_dir)
            .await?;
        Ok(ExecutionResult {
            exit_code: 0,
            output: output.text,
            agent: output.agent,
            tokens: output.tokens,
        })
    }

    async fn review(
        &self,
        ctx: &ActivityContext,
        req: &TaskRequest,
        plan: &StructuredPlan,
        result: &ExecutionResult,
        reviewer: &str,
    ) -> eyre::Result<ReviewResult> {
        let prompt = self.prompts.render(
            "review",
            &json!({
                "summary": plan.summary,
                "acceptance": plan.acceptance,
                "output": result.output,
            }),
        )?;
        let output = self
            .agent
            .run(ctx, AgentKind::Review, reviewer, &prompt, &req.work_dir)
            .await?;
        let verdict: ReviewVerdict = serde_json::from_str(extract_json(&output.text))
            .map_err(|e| eyre::eyre!("review output is not valid JSON: {e}"))?;
        Ok(ReviewResult {
            approved: verdict.approved,
            issues: verdict.issues,
            suggestions: verdict.suggestions,
            reviewer: output.agent,
            tokens: output.tokens,
        })
    }

    async fn scan(&self, ctx: &ActivityContext, req: &TaskRequest) -> eyre::Result<ScanReport> {
        let rules_dir = req.work_dir.join(".semgrep");
        scan::run_scan(&req.work_dir, &rules_dir, ctx).await
    }

    async fn run_dod(&self, ctx: &ActivityContext, req: &TaskRequest) -> eyre::Result<DodReport> {
        dod::run_checks(&req.dod_checks, &req.work_dir, DOD_TIMEOUT, ctx).await
    }

    async fn record_outcome(&self, outcome: &OutcomeRecord) -> eyre::Result<()> {
        self.append_log_line(&serde_json::to_value(outcome)?)?;

        if outcome.status == super::OutcomeStatus::Completed {
            let store = self.store.lock().expect("task store mutex poisoned");
            store.close_task(&outcome.task_id)?;
        }

        info!(
            task_id = %outcome.task_id,
            status = %outcome.status,
            input_tokens = outcome.total_input_tokens(),
            handoffs = outcome.handoffs,
            "Recorded outcome"
        );
        Ok(())
    }

    async fn escalate(&self, req: &TaskRequest, reason: &str) -> eyre::Result<()> {
        error!(task_id = %req.task_id, project = %req.project, reason, "Task escalated to a human");
        let event = json!({
            "event": "escalation",
            "task_id": req.task_id,
            "project": req.project,
            "reason": reason,
        });
        if let Err(e) = self.append_log_line(&event) {
            warn!(error = %e, "Failed to persist escalation event");
        }
        Ok(())
    }
}
