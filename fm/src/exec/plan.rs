//! Structured plans produced by the planning activity

use serde::{Deserialize, Serialize};

use crate::agent::{TokenUsage, extract_json};

use super::TaskRequest;

/// One planned step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    /// Target file the step touches
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub rationale: String,
}

/// The plan an execution attempt works from
///
/// `previous_errors` accumulates review critique, scan findings, and
/// definition-of-done failures across retry cycles so each attempt is
/// contextually informed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredPlan {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    /// Files the plan expects to modify
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub risk: String,
    #[serde(default)]
    pub previous_errors: Vec<String>,
    #[serde(default, skip_serializing)]
    pub tokens: TokenUsage,
}

impl StructuredPlan {
    /// A plan must carry a summary, steps, acceptance, and files to enter
    /// execution
    pub fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("plan is missing a summary".to_string());
        }
        if self.steps.is_empty() {
            return Err("plan has no steps".to_string());
        }
        if self.acceptance.is_empty() {
            return Err("plan has no acceptance criteria".to_string());
        }
        if self.files.is_empty() {
            return Err("plan names no files to modify".to_string());
        }
        Ok(())
    }

    /// Synthesize a plan from the task prompt for auto-approved subtasks
    ///
    /// Pre-planned subtasks skip the planning activity and the human gate;
    /// the single placeholder step carries the full prompt.
    pub fn synthesized(req: &TaskRequest) -> Self {
        Self {
            summary: req.prompt.lines().next().unwrap_or(&req.task_id).to_string(),
            steps: vec![PlanStep {
                description: req.prompt.clone(),
                file: String::new(),
                rationale: "pre-planned subtask; executed as specified".to_string(),
            }],
            files: vec!["(determined during execution)".to_string()],
            acceptance: vec!["all definition-of-done checks pass".to_string()],
            complexity: "pre-planned".to_string(),
            risk: "low".to_string(),
            previous_errors: Vec::new(),
            tokens: TokenUsage::default(),
        }
    }

    /// Parse a plan from agent output, tolerating markdown fences
    pub fn parse(text: &str, tokens: TokenUsage) -> eyre::Result<Self> {
        let mut plan: StructuredPlan = serde_json::from_str(extract_json(text))
            .map_err(|e| eyre::eyre!("plan output is not valid JSON: {e}"))?;
        plan.tokens = tokens;
        Ok(plan)
    }

    /// Record a failure so the next attempt sees it
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.previous_errors.push(error.into());
    }
}
