//! Task domain types
//!
//! A task is a unit of work with lifecycle status, priority, and acceptance
//! criteria. Tasks belong to exactly one project and carry a set of
//! `depends_on` edges stored separately from the task record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Task type for plain work items
pub const TYPE_TASK: &str = "task";

/// Task type for umbrella items that are never dispatched
pub const TYPE_EPIC: &str = "epic";

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Available for dispatch (subject to dependencies)
    #[default]
    Open,
    /// Done or retired; unblocks dependents
    Closed,
}

impl TaskStatus {
    /// Canonical lowercase form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Closed => "closed",
        }
    }

    /// Parse a status, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(TaskStatus::Open),
            "closed" => Some(TaskStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A work item in the backlog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Process-unique id of the form `<project>-<6 hex chars>`
    pub id: String,

    /// Short human-readable title
    pub title: String,

    /// Longer description of the work
    pub description: String,

    /// Lifecycle status
    pub status: TaskStatus,

    /// Lower value = higher priority
    pub priority: u32,

    /// `task`, `epic`, or a project-defined type
    pub task_type: String,

    /// Who (or what) the task is assigned to
    pub assignee: String,

    /// Ordered labels; serialized as a JSON array in storage
    pub labels: Vec<String>,

    /// Estimated effort in minutes
    pub estimate_minutes: u32,

    /// Optional parent task id (pre-planned subtasks carry one)
    pub parent: Option<String>,

    /// Acceptance criteria block
    pub acceptance: String,

    /// Design notes block
    pub design: String,

    /// Free-form notes
    pub notes: String,

    /// Owning project (required, non-empty)
    pub project: String,

    /// Outgoing dependency edges ("this task depends on...")
    ///
    /// Entries containing a colon are cross-project soft links resolved at
    /// dispatch time; they are never stored as edges.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    /// Creation timestamp (UTC)
    pub created_at: DateTime<Utc>,

    /// Last update timestamp (UTC); never precedes `created_at`
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether this task is an epic (never dispatched)
    pub fn is_epic(&self) -> bool {
        self.task_type.eq_ignore_ascii_case(TYPE_EPIC)
    }

    /// Whether any label begins with `stage:`
    pub fn is_stage_labeled(&self) -> bool {
        self.labels.iter().any(|l| l.starts_with("stage:"))
    }

    /// Whether the task carries the deferred-suggestion marker
    pub fn is_deferred(&self) -> bool {
        self.labels.iter().any(|l| l == "strategy:deferred")
    }
}

/// Input for creating a task; everything except `project` and `title` has a
/// sensible default
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub project: String,
    pub title: String,
    pub description: String,
    pub status: Option<TaskStatus>,
    pub priority: u32,
    pub task_type: String,
    pub assignee: String,
    pub labels: Vec<String>,
    pub estimate_minutes: u32,
    pub parent: Option<String>,
    /// Colon-format cross-project soft links (`project:task-id`)
    pub cross_deps: Vec<String>,
    pub acceptance: String,
    pub design: String,
    pub notes: String,
}

impl TaskDraft {
    /// Draft with project and title set, everything else defaulted
    pub fn new(project: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Generate a candidate task id: `<project>-<6 lowercase hex chars>`
///
/// Collisions are possible; the store retries generation on unique-id
/// conflicts.
pub fn generate_task_id(project: &str) -> String {
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!("{}-{:06x}", project, suffix)
}

/// Minimal open task for tests elsewhere in the crate
#[cfg(test)]
pub(crate) fn sample_task(id: &str, project: &str) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        title: format!("task {id}"),
        description: String::new(),
        status: TaskStatus::Open,
        priority: 2,
        task_type: TYPE_TASK.to_string(),
        assignee: String::new(),
        labels: Vec::new(),
        estimate_minutes: 0,
        parent: None,
        acceptance: String::new(),
        design: String::new(),
        notes: String::new(),
        project: project.to_string(),
        depends_on: BTreeSet::new(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        assert_eq!(TaskStatus::parse("open"), Some(TaskStatus::Open));
        assert_eq!(TaskStatus::parse("CLOSED"), Some(TaskStatus::Closed));
        assert_eq!(TaskStatus::parse("bogus"), None);
        assert_eq!(TaskStatus::Open.as_str(), "open");
        assert_eq!(TaskStatus::Closed.to_string(), "closed");
    }

    #[test]
    fn test_generate_task_id_shape() {
        let id = generate_task_id("myproj");
        let suffix = id.strip_prefix("myproj-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(suffix, suffix.to_lowercase());
    }

    #[test]
    fn test_stage_labeled() {
        let mut task = sample_task("p-000001", "p");
        assert!(!task.is_stage_labeled());
        task.labels.push("stage:implement".to_string());
        assert!(task.is_stage_labeled());
    }

    #[test]
    fn test_deferred_marker() {
        let mut task = sample_task("p-000002", "p");
        assert!(!task.is_deferred());
        task.labels.push("strategy:deferred".to_string());
        assert!(task.is_deferred());
    }
}
