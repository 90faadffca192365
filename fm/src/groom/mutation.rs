//! Backlog mutations proposed by the groomers
//!
//! Both groomers speak the same mutation language; the strategic path runs
//! its proposals through [`normalize_strategic_mutations`] before applying,
//! so vague "create" ideas become safe deferred suggestions instead of
//! half-specified work the dispatcher would pick up.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use backlogstore::{TaskDraft, TaskStore};

/// Mutations applied per groom cycle
pub const MAX_MUTATIONS_PER_CYCLE: usize = 5;

/// Source stamp on strategic mutations
const STRATEGIC_SOURCE: &str = "strategic";

/// Label marking deferred suggestions; suppressed at dispatch time
pub const DEFERRED_LABEL: &str = "strategy:deferred";

const DEFERRED_PRIORITY: u32 = 4;
const DEFERRED_ESTIMATE_MINUTES: u32 = 30;
const DEFERRED_DESCRIPTION: &str =
    "Deferred suggestion from the strategic review; needs human scoping before it becomes real work.";
const DEFERRED_ACCEPTANCE: &str = "Define concrete acceptance criteria when promoting this suggestion.";
const DEFERRED_DESIGN: &str = "No design yet; write one when this suggestion is promoted.";

/// What a mutation does to the backlog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    UpdatePriority,
    AddDependency,
    UpdateNotes,
    Create,
    Close,
}

/// One proposed backlog edit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    pub action: MutationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategic_source: Option<String>,
}

impl Mutation {
    pub fn new(action: MutationAction) -> Self {
        Self {
            action,
            task_id: None,
            priority: None,
            depends_on_id: None,
            notes: None,
            title: None,
            description: None,
            acceptance: None,
            design: None,
            estimate_minutes: None,
            labels: None,
            reason: None,
            deferred: None,
            strategic_source: None,
        }
    }
}

/// How applying one mutation went
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub action: MutationAction,
    pub task_id: Option<String>,
    pub ok: bool,
    pub detail: String,
}

/// Rewrite strategic proposals into safe, applicable mutations
///
/// Non-create mutations pass through with their source stamped. A create is
/// rewritten into a deferred suggestion when it is flagged deferred or lacks
/// any of title, description, acceptance, design, or a positive estimate;
/// an optional leading "Auto:" title prefix is stripped either way. The
/// result is capped at [`MAX_MUTATIONS_PER_CYCLE`] and the function is
/// idempotent.
pub fn normalize_strategic_mutations(mutations: Vec<Mutation>) -> Vec<Mutation> {
    let mut normalized = Vec::new();

    for mut m in mutations.into_iter().take(MAX_MUTATIONS_PER_CYCLE) {
        m.strategic_source = Some(STRATEGIC_SOURCE.to_string());

        if m.action != MutationAction::Create {
            normalized.push(m);
            continue;
        }

        if let Some(title) = &m.title {
            if let Some(stripped) = title.strip_prefix("Auto:") {
                m.title = Some(stripped.trim_start().to_string());
            }
        }

        let complete = m.title.as_deref().is_some_and(|t| !t.trim().is_empty())
            && m.description.as_deref().is_some_and(|d| !d.trim().is_empty())
            && m.acceptance.as_deref().is_some_and(|a| !a.trim().is_empty())
            && m.design.as_deref().is_some_and(|d| !d.trim().is_empty())
            && m.estimate_minutes.is_some_and(|e| e > 0);

        if m.deferred == Some(true) || !complete {
            m.deferred = Some(true);
            m.priority = Some(DEFERRED_PRIORITY);
            if m.description.as_deref().is_none_or(|d| d.trim().is_empty()) {
                m.description = Some(DEFERRED_DESCRIPTION.to_string());
            }
            if m.acceptance.as_deref().is_none_or(|a| a.trim().is_empty()) {
                m.acceptance = Some(DEFERRED_ACCEPTANCE.to_string());
            }
            if m.design.as_deref().is_none_or(|d| d.trim().is_empty()) {
                m.design = Some(DEFERRED_DESIGN.to_string());
            }
            if m.estimate_minutes.is_none_or(|e| e == 0) {
                m.estimate_minutes = Some(DEFERRED_ESTIMATE_MINUTES);
            }
        }

        normalized.push(m);
    }

    normalized
}

/// Apply mutations against the store, recording per-mutation results
///
/// Individual failures never stop the batch; at most
/// [`MAX_MUTATIONS_PER_CYCLE`] mutations are applied.
pub fn apply_mutations(store: &TaskStore, project: &str, mutations: &[Mutation]) -> Vec<MutationOutcome> {
    let mut outcomes = Vec::new();

    for mutation in mutations.iter().take(MAX_MUTATIONS_PER_CYCLE) {
        let result = apply_one(store, project, mutation);
        let outcome = match result {
            Ok(detail) => {
                debug!(action = ?mutation.action, detail = %detail, "Applied mutation");
                MutationOutcome {
                    action: mutation.action,
                    task_id: mutation.task_id.clone(),
                    ok: true,
                    detail,
                }
            }
            Err(e) => {
                warn!(action = ?mutation.action, error = %e, "Mutation failed");
                MutationOutcome {
                    action: mutation.action,
                    task_id: mutation.task_id.clone(),
                    ok: false,
                    detail: e.to_string(),
                }
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}

fn apply_one(store: &TaskStore, project: &str, m: &Mutation) -> eyre::Result<String> {
    match m.action {
        MutationAction::UpdatePriority => {
            let task_id = required(&m.task_id, "task_id")?;
            let priority = m
                .priority
                .ok_or_else(|| eyre::eyre!("update_priority requires a priority"))?;
            let fields = [("priority".to_string(), serde_json::json!(priority))]
                .into_iter()
                .collect();
            store.update_task(task_id, &fields)?;
            Ok(format!("{task_id} priority -> {priority}"))
        }
        MutationAction::AddDependency => {
            let task_id = required(&m.task_id, "task_id")?;
            let dep = required(&m.depends_on_id, "depends_on_id")?;
            store.add_edge(task_id, dep)?;
            Ok(format!("{task_id} now depends on {dep}"))
        }
        MutationAction::UpdateNotes => {
            let task_id = required(&m.task_id, "task_id")?;
            let notes = required(&m.notes, "notes")?;
            let fields = [("notes".to_string(), serde_json::json!(notes))]
                .into_iter()
                .collect();
            store.update_task(task_id, &fields)?;
            Ok(format!("{task_id} notes updated"))
        }
        MutationAction::Create => {
            let title = required(&m.title, "title")?;
            let mut labels = m.labels.clone().unwrap_or_default();
            if m.deferred == Some(true) && !labels.iter().any(|l| l == DEFERRED_LABEL) {
                labels.push(DEFERRED_LABEL.to_string());
            }
            let draft = TaskDraft {
                project: project.to_string(),
                title: title.to_string(),
                description: m.description.clone().unwrap_or_default(),
                priority: m.priority.unwrap_or(2),
                estimate_minutes: m.estimate_minutes.unwrap_or(0),
                labels,
                acceptance: m.acceptance.clone().unwrap_or_default(),
                design: m.design.clone().unwrap_or_default(),
                ..Default::default()
            };
            let task = store.create_task(draft)?;
            Ok(format!("created {}", task.id))
        }
        MutationAction::Close => {
            let task_id = required(&m.task_id, "task_id")?;
            store.close_task(task_id)?;
            match &m.reason {
                Some(reason) => Ok(format!("closed {task_id}: {reason}")),
                None => Ok(format!("closed {task_id}")),
            }
        }
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> eyre::Result<&'a str> {
    field
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| eyre::eyre!("mutation requires {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use backlogstore::TaskStatus;

    fn create_mutation(title: &str) -> Mutation {
        let mut m = Mutation::new(MutationAction::Create);
        m.title = Some(title.to_string());
        m
    }

    #[test]
    fn test_normalize_vague_create_becomes_deferred() {
        let mut m = create_mutation("Auto: break down authentication flow");
        m.priority = Some(1);

        let normalized = normalize_strategic_mutations(vec![m]);
        assert_eq!(normalized.len(), 1);
        let n = &normalized[0];

        assert_eq!(n.title.as_deref(), Some("break down authentication flow"));
        assert_eq!(n.deferred, Some(true));
        assert_eq!(n.priority, Some(4));
        assert_eq!(n.estimate_minutes, Some(30));
        assert_eq!(n.description.as_deref(), Some(DEFERRED_DESCRIPTION));
        assert_eq!(n.acceptance.as_deref(), Some(DEFERRED_ACCEPTANCE));
        assert_eq!(n.design.as_deref(), Some(DEFERRED_DESIGN));
        assert_eq!(n.strategic_source.as_deref(), Some("strategic"));
    }

    #[test]
    fn test_normalize_complete_create_passes_through() {
        let mut m = create_mutation("Wire up tracing");
        m.description = Some("Add spans to the hot path".to_string());
        m.acceptance = Some("Spans visible in the trace viewer".to_string());
        m.design = Some("Use the existing subscriber".to_string());
        m.estimate_minutes = Some(45);
        m.priority = Some(1);

        let normalized = normalize_strategic_mutations(vec![m]);
        let n = &normalized[0];
        assert_eq!(n.deferred, None);
        assert_eq!(n.priority, Some(1));
        assert_eq!(n.estimate_minutes, Some(45));
        assert_eq!(n.strategic_source.as_deref(), Some("strategic"));
    }

    #[test]
    fn test_normalize_explicit_deferred_stays_deferred() {
        let mut m = create_mutation("Complete but deferred");
        m.description = Some("d".to_string());
        m.acceptance = Some("a".to_string());
        m.design = Some("g".to_string());
        m.estimate_minutes = Some(10);
        m.deferred = Some(true);

        let normalized = normalize_strategic_mutations(vec![m]);
        assert_eq!(normalized[0].deferred, Some(true));
        assert_eq!(normalized[0].priority, Some(4));
    }

    #[test]
    fn test_normalize_stamps_non_create() {
        let mut m = Mutation::new(MutationAction::Close);
        m.task_id = Some("p-aaaaaa".to_string());

        let normalized = normalize_strategic_mutations(vec![m]);
        assert_eq!(normalized[0].strategic_source.as_deref(), Some("strategic"));
        assert_eq!(normalized[0].action, MutationAction::Close);
    }

    #[test]
    fn test_normalize_caps_at_five() {
        let mutations: Vec<Mutation> = (0..8).map(|i| create_mutation(&format!("t{i}"))).collect();
        assert_eq!(normalize_strategic_mutations(mutations).len(), 5);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mutations = vec![
            create_mutation("Auto: vague idea"),
            {
                let mut m = Mutation::new(MutationAction::UpdatePriority);
                m.task_id = Some("p-aaaaaa".to_string());
                m.priority = Some(0);
                m
            },
        ];

        let once = normalize_strategic_mutations(mutations);
        let twice = normalize_strategic_mutations(once.clone());
        let once_json = serde_json::to_string(&once).unwrap();
        let twice_json = serde_json::to_string(&twice).unwrap();
        assert_eq!(once_json, twice_json);
    }

    #[test]
    fn test_apply_create_and_close() {
        let store = TaskStore::open_in_memory().unwrap();

        let mut create = create_mutation("New work");
        create.description = Some("desc".to_string());
        create.deferred = Some(true);

        let outcomes = apply_mutations(&store, "p", &[create]);
        assert!(outcomes[0].ok);

        let tasks = store.list_tasks("p", &[]).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].labels.iter().any(|l| l == DEFERRED_LABEL));

        let mut close = Mutation::new(MutationAction::Close);
        close.task_id = Some(tasks[0].id.clone());
        close.reason = Some("superseded".to_string());
        let outcomes = apply_mutations(&store, "p", &[close]);
        assert!(outcomes[0].ok);
        assert_eq!(store.get_task(&tasks[0].id).unwrap().status, TaskStatus::Closed);
    }

    #[test]
    fn test_apply_records_failures_and_continues() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = store.create_task(backlogstore::TaskDraft::new("p", "real")).unwrap();

        let mut bad = Mutation::new(MutationAction::UpdatePriority);
        bad.task_id = Some("p-404404".to_string());
        bad.priority = Some(1);

        let mut good = Mutation::new(MutationAction::UpdatePriority);
        good.task_id = Some(task.id.clone());
        good.priority = Some(0);

        let outcomes = apply_mutations(&store, "p", &[bad, good]);
        assert!(!outcomes[0].ok);
        assert!(outcomes[1].ok);
        assert_eq!(store.get_task(&task.id).unwrap().priority, 0);
    }

    #[test]
    fn test_apply_caps_at_five() {
        let store = TaskStore::open_in_memory().unwrap();
        let mutations: Vec<Mutation> = (0..7)
            .map(|i| {
                let mut m = create_mutation(&format!("task {i}"));
                m.description = Some("d".to_string());
                m
            })
            .collect();

        let outcomes = apply_mutations(&store, "p", &mutations);
        assert_eq!(outcomes.len(), 5);
        assert_eq!(store.list_tasks("p", &[]).unwrap().len(), 5);
    }

    #[test]
    fn test_missing_required_field_fails_cleanly() {
        let store = TaskStore::open_in_memory().unwrap();
        let m = Mutation::new(MutationAction::AddDependency);
        let outcomes = apply_mutations(&store, "p", &[m]);
        assert!(!outcomes[0].ok);
        assert!(outcomes[0].detail.contains("task_id"));
    }
}
