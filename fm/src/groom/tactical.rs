//! Tactical groom: small backlog edits after a successful task
//!
//! Spawned detached alongside the learner. Summarizes the open backlog,
//! asks a fast-tier agent for at most five mutations, and applies them.
//! LLM and parse errors are logged, never propagated to the parent.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{info, warn};

use backlogstore::TaskStore;

use crate::agent::{AgentInvoker, AgentKind, extract_json};
use crate::prompts::PromptSet;
use crate::runtime::ActivityContext;

use super::mutation::{Mutation, MutationOutcome, apply_mutations};
use super::backlog_lines;

/// Open backlog items shown to the groomer
const BACKLOG_SUMMARY_CAP: usize = 30;

/// The post-success tactical groomer
pub struct TacticalGroom {
    store: Arc<Mutex<TaskStore>>,
    agent: Arc<dyn AgentInvoker>,
    prompts: Arc<PromptSet>,
    fast_agent: String,
}

impl TacticalGroom {
    pub fn new(
        store: Arc<Mutex<TaskStore>>,
        agent: Arc<dyn AgentInvoker>,
        prompts: Arc<PromptSet>,
        fast_agent: String,
    ) -> Self {
        Self {
            store,
            agent,
            prompts,
            fast_agent,
        }
    }

    /// One groom cycle for the project that just completed a task
    pub async fn run(
        &self,
        project: &str,
        completed_task_id: &str,
        work_dir: &Path,
    ) -> eyre::Result<Vec<MutationOutcome>> {
        let (ctx, _cancel) = ActivityContext::new();

        let backlog = {
            let store = self.store.lock().expect("task store mutex poisoned");
            store.list_tasks(project, &["open"])?
        };
        if backlog.is_empty() {
            info!(project, "Backlog empty, nothing to groom");
            return Ok(Vec::new());
        }

        let prompt = self.prompts.render(
            "tactical-groom",
            &json!({
                "project": project,
                "completed": completed_task_id,
                "backlog": backlog_lines(&backlog, BACKLOG_SUMMARY_CAP),
            }),
        )?;

        let output = match self
            .agent
            .run(&ctx, AgentKind::Review, &self.fast_agent, &prompt, work_dir)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(project, error = %e, "Groom agent failed, skipping cycle");
                return Ok(Vec::new());
            }
        };

        let mutations: Vec<Mutation> = match serde_json::from_str(extract_json(&output.text)) {
            Ok(mutations) => mutations,
            Err(e) => {
                warn!(project, error = %e, "Unparseable groom output, skipping cycle");
                return Ok(Vec::new());
            }
        };

        let outcomes = {
            let store = self.store.lock().expect("task store mutex poisoned");
            apply_mutations(&store, project, &mutations)
        };

        let applied = outcomes.iter().filter(|o| o.ok).count();
        info!(project, applied, failed = outcomes.len() - applied, "Tactical groom finished");
        Ok(outcomes)
    }
}
