//! Embedded prompt templates
//!
//! All agent-facing prompts live here as handlebars templates compiled into
//! the binary. Workflows render them with a JSON context.

use handlebars::Handlebars;
use serde_json::Value;

/// Planning prompt: task prompt in, JSON plan out
pub const PLAN: &str = r#"You are planning a code change. Produce a JSON object with this exact shape and nothing else:

{
  "summary": "one-sentence summary of the change",
  "steps": [{"description": "...", "file": "path/to/file", "rationale": "..."}],
  "files": ["every file you expect to modify"],
  "acceptance": ["verifiable acceptance criteria"],
  "complexity": "low|medium|high",
  "risk": "low|medium|high"
}

Task:
{{task}}
{{#if previous_errors}}
Earlier attempts failed with:
{{#each previous_errors}}
- {{this}}
{{/each}}
{{/if}}"#;

/// Execution prompt: carry the plan and accumulated critique
pub const EXECUTE: &str = r#"Implement the following plan in the current working directory. Make the edits directly; do not describe them.

Summary: {{summary}}

Steps:
{{#each steps}}
- {{this.description}}{{#if this.file}} ({{this.file}}){{/if}}
{{/each}}

Acceptance criteria:
{{#each acceptance}}
- {{this}}
{{/each}}
{{#if previous_errors}}
Previous attempts failed. Address every item below:
{{#each previous_errors}}
- {{this}}
{{/each}}
{{/if}}

Original task:
{{task}}"#;

/// Review prompt: advisory gate, JSON verdict out
pub const REVIEW: &str = r#"You are reviewing another agent's implementation of a planned change. Judge whether it satisfies the plan. Respond with a JSON object and nothing else:

{"approved": true|false, "issues": ["blocking problems"], "suggestions": ["non-blocking improvements"]}

Plan summary: {{summary}}

Acceptance criteria:
{{#each acceptance}}
- {{this}}
{{/each}}

Implementation output:
{{output}}"#;

/// Lesson extraction prompt for the learner
pub const LESSONS: &str = r#"A task just completed successfully. Extract 1-3 reusable lessons from it. Respond with a JSON array and nothing else; each element:

{"category": "pattern|antipattern|rule|insight", "summary": "one line", "detail": "a short paragraph", "files": ["relevant paths"], "labels": ["topic labels"]}

Task: {{task}}
Files touched: {{files}}
Definition-of-done result: {{dod}}
{{#if previous_errors}}
Failures overcome along the way:
{{#each previous_errors}}
- {{this}}
{{/each}}
{{/if}}"#;

/// Static-analysis rule generation prompt
pub const RULE: &str = r#"Write a semgrep rule (YAML, one rule, id "{{rule_id}}") that detects the following antipattern. Respond with the YAML only.

Summary: {{summary}}
Detail: {{detail}}"#;

/// Tactical groom prompt: small backlog mutations after a success
pub const TACTICAL_GROOM: &str = r#"A task in project "{{project}}" just completed. Given the open backlog below, propose at most 5 mutations that keep the backlog healthy. Respond with a JSON array and nothing else; each element is one of:

{"action": "update_priority", "task_id": "...", "priority": 0}
{"action": "add_dependency", "task_id": "...", "depends_on_id": "..."}
{"action": "update_notes", "task_id": "...", "notes": "..."}
{"action": "create", "title": "...", "description": "...", "acceptance": "...", "design": "...", "estimate_minutes": 30, "labels": []}
{"action": "close", "task_id": "...", "reason": "..."}

Completed task: {{completed}}

Open backlog:
{{backlog}}"#;

/// Strategic analysis prompt: daily priorities, risks, and mutations
pub const STRATEGIC_ANALYSIS: &str = r#"You are performing the daily strategic review of project "{{project}}". Using the repository map and backlog state below, respond with a JSON object and nothing else:

{
  "priorities": ["ordered strategic priorities"],
  "risks": ["emerging risks"],
  "observations": ["notable observations"],
  "mutations": [ ...same mutation objects as the backlog groomer... ]
}

Repository map:
{{repo_map}}

Backlog state:
{{backlog}}"#;

/// Compiled template registry
pub struct PromptSet {
    registry: Handlebars<'static>,
}

impl PromptSet {
    pub fn new() -> eyre::Result<Self> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        for (name, template) in [
            ("plan", PLAN),
            ("execute", EXECUTE),
            ("review", REVIEW),
            ("lessons", LESSONS),
            ("rule", RULE),
            ("tactical-groom", TACTICAL_GROOM),
            ("strategic-analysis", STRATEGIC_ANALYSIS),
        ] {
            registry
                .register_template_string(name, template)
                .map_err(|e| eyre::eyre!("invalid embedded template '{name}': {e}"))?;
        }
        Ok(Self { registry })
    }

    pub fn render(&self, name: &str, context: &Value) -> eyre::Result<String> {
        self.registry
            .render(name, context)
            .map_err(|e| eyre::eyre!("failed to render prompt '{name}': {e}"))
    }
}
