//! Backlog grooming workflows
//!
//! - [`mutation`] - the mutation language both groomers speak
//! - [`tactical`] - small post-success backlog edits
//! - [`strategic`] - the daily analysis, normalization, and briefing

pub mod mutation;
pub mod strategic;
pub mod tactical;

use backlogstore::{Task, TaskStatus};

pub use mutation::{
    MAX_MUTATIONS_PER_CYCLE, Mutation, MutationAction, MutationOutcome, apply_mutations,
    normalize_strategic_mutations,
};
pub use strategic::{StrategicAnalysis, StrategicGroom};
pub use tactical::TacticalGroom;

/// One-liners for a backlog snapshot, capped
///
/// Each line carries id, priority, estimate, title, and blockers so the
/// groomers can reason about the backlog without the full records.
pub(crate) fn backlog_lines(tasks: &[Task], cap: usize) -> String {
    tasks
        .iter()
        .take(cap)
        .map(|t| {
            let mut line = format!(
                "{} [p{} {}m {}] {}",
                t.id,
                t.priority,
                t.estimate_minutes,
                match t.status {
                    TaskStatus::Open => "open",
                    TaskStatus::Closed => "closed",
                },
                t.title
            );
            if !t.depends_on.is_empty() {
                let deps: Vec<&str> = t.depends_on.iter().map(String::as_str).collect();
                line.push_str(&format!(" (blocked by: {})", deps.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use backlogstore::{TaskDraft, TaskStore};

    #[test]
    fn test_backlog_lines_shape_and_cap() {
        let store = TaskStore::open_in_memory().unwrap();
        let dep = store.create_task(TaskDraft::new("p", "dep")).unwrap();
        let mut draft = TaskDraft::new("p", "blocked work");
        draft.priority = 1;
        draft.estimate_minutes = 30;
        let blocked = store.create_task(draft).unwrap();
        store.add_edge(&blocked.id, &dep.id).unwrap();

        let tasks = store.list_tasks("p", &[]).unwrap();
        let lines = backlog_lines(&tasks, 30);
        assert!(lines.contains("blocked work"));
        assert!(lines.contains(&format!("(blocked by: {})", dep.id)));

        assert_eq!(backlog_lines(&tasks, 1).lines().count(), 1);
    }
}
