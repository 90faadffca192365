//! In-memory dependency views over task snapshots
//!
//! [`DependencyGraph`] is a per-call immutable snapshot: it value-copies every
//! task, so callers holding a graph can never affect the store through it.
//! [`CrossProjectGraph`] resolves colon-format dependency specifiers against
//! tasks from other projects; stored edges are always same-project, so cross
//! links only ever exist as strings in `depends_on`.

use std::collections::{BTreeSet, HashMap};

use crate::task::{Task, TaskStatus};

/// A dependency specifier parsed from a `depends_on` entry
///
/// A specifier containing a colon is cross-project: everything before the
/// first colon is the project (possibly empty), the remainder is the task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepSpec<'a> {
    /// Plain task id within the same project
    Local(&'a str),
    /// Reference into another project's backlog
    Cross { project: &'a str, task: &'a str },
}

/// Parse a raw dependency specifier
pub fn parse_dep_spec(spec: &str) -> DepSpec<'_> {
    match spec.split_once(':') {
        Some((project, task)) => DepSpec::Cross { project, task },
        None => DepSpec::Local(spec),
    }
}

/// Immutable snapshot of tasks with forward and reverse adjacency
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, Task>,
    /// task id -> ids it depends on
    forward: HashMap<String, BTreeSet<String>>,
    /// task id -> ids that depend on it (blocked tasks)
    reverse: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build a graph from a task snapshot
    ///
    /// Every task is value-copied. Duplicate edges collapse. Nodes always
    /// have initialized adjacency entries, even leaves. Edges to ids missing
    /// from the snapshot are still recorded in reverse adjacency; the
    /// filters treat them as unresolved blockers.
    pub fn build(tasks: &[Task]) -> Self {
        let mut graph = Self::default();

        for task in tasks {
            graph.forward.entry(task.id.clone()).or_default();
            graph.reverse.entry(task.id.clone()).or_default();
            graph.nodes.insert(task.id.clone(), task.clone());
        }

        for task in tasks {
            for dep in &task.depends_on {
                graph
                    .forward
                    .entry(task.id.clone())
                    .or_default()
                    .insert(dep.clone());
                graph.reverse.entry(dep.clone()).or_default().insert(task.id.clone());
            }
        }

        graph
    }

    /// Look up a task snapshot by id
    pub fn node(&self, id: &str) -> Option<&Task> {
        self.nodes.get(id)
    }

    /// Ids this task depends on
    pub fn dependencies(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.forward.get(id)
    }

    /// Ids blocked by this task
    pub fn dependents(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.reverse.get(id)
    }

    /// Number of nodes in the snapshot
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a dependency id is satisfied within this snapshot
    fn is_satisfied(&self, dep: &str) -> bool {
        self.nodes
            .get(dep)
            .is_some_and(|t| t.status == TaskStatus::Closed)
    }
}

/// Snapshots of other projects' backlogs, keyed by project name
#[derive(Debug, Clone, Default)]
pub struct CrossProjectGraph {
    projects: HashMap<String, HashMap<String, Task>>,
}

impl CrossProjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a project's task snapshot
    pub fn insert_project(&mut self, project: impl Into<String>, tasks: &[Task]) {
        let by_id = tasks.iter().map(|t| (t.id.clone(), t.clone())).collect();
        self.projects.insert(project.into(), by_id);
    }

    /// Resolve a cross-project reference; `None` means unresolved
    pub fn resolve(&self, project: &str, task: &str) -> Option<&Task> {
        self.projects.get(project)?.get(task)
    }

    /// Whether a cross-project dependency is satisfied (resolved and closed)
    fn is_satisfied(&self, project: &str, task: &str) -> bool {
        self.resolve(project, task)
            .is_some_and(|t| t.status == TaskStatus::Closed)
    }
}

/// Dispatcher-side total order: stage-labeled tasks first, then priority
/// ascending, estimate ascending, id ascending
fn variant_x_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    (!a.is_stage_labeled(), a.priority, a.estimate_minutes, a.id.as_str()).cmp(&(
        !b.is_stage_labeled(),
        b.priority,
        b.estimate_minutes,
        b.id.as_str(),
    ))
}

/// Tasks that are open, not epics, and whose every declared dependency exists
/// in the graph with status closed
///
/// The result order is total and deterministic: stage-labeled first, then
/// priority ascending, estimate ascending, id ascending.
pub fn filter_unblocked_open(tasks: &[Task], graph: &DependencyGraph) -> Vec<Task> {
    let mut ready: Vec<Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Open && !t.is_epic())
        .filter(|t| t.depends_on.iter().all(|dep| graph.is_satisfied(dep)))
        .cloned()
        .collect();

    ready.sort_by(variant_x_order);
    ready
}

/// Like [`filter_unblocked_open`], additionally resolving colon-format
/// cross-project specifiers; an unresolved cross dependency blocks the task
pub fn filter_unblocked_cross_project(
    tasks: &[Task],
    local: &DependencyGraph,
    cross: &CrossProjectGraph,
) -> Vec<Task> {
    let mut ready: Vec<Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Open && !t.is_epic())
        .filter(|t| {
            t.depends_on.iter().all(|dep| match parse_dep_spec(dep) {
                DepSpec::Local(id) => local.is_satisfied(id),
                DepSpec::Cross { project, task } => cross.is_satisfied(project, task),
            })
        })
        .cloned()
        .collect();

    ready.sort_by(variant_x_order);
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::sample_task;
    use proptest::prelude::*;

    fn task(id: &str, status: TaskStatus, deps: &[&str]) -> Task {
        let mut t = sample_task(id, "p");
        t.status = status;
        t.depends_on = deps.iter().map(|d| d.to_string()).collect();
        t
    }

    #[test]
    fn test_parse_dep_spec_boundaries() {
        assert_eq!(parse_dep_spec(""), DepSpec::Local(""));
        assert_eq!(parse_dep_spec("p-aaaaaa"), DepSpec::Local("p-aaaaaa"));
        assert_eq!(parse_dep_spec(":"), DepSpec::Cross { project: "", task: "" });
        assert_eq!(
            parse_dep_spec("other:o-bbbbbb"),
            DepSpec::Cross {
                project: "other",
                task: "o-bbbbbb"
            }
        );
        // Only the first colon splits
        assert_eq!(
            parse_dep_spec("a:b:c"),
            DepSpec::Cross { project: "a", task: "b:c" }
        );
    }

    #[test]
    fn test_build_initializes_adjacency_for_leaves() {
        let tasks = vec![task("p-aaaaaa", TaskStatus::Open, &[])];
        let graph = DependencyGraph::build(&tasks);

        assert_eq!(graph.len(), 1);
        assert!(graph.dependencies("p-aaaaaa").unwrap().is_empty());
        assert!(graph.dependents("p-aaaaaa").unwrap().is_empty());
    }

    #[test]
    fn test_build_records_unknown_targets_in_reverse() {
        let tasks = vec![task("p-aaaaaa", TaskStatus::Open, &["p-zzzzzz"])];
        let graph = DependencyGraph::build(&tasks);

        assert!(graph.node("p-zzzzzz").is_none());
        assert!(graph.dependents("p-zzzzzz").unwrap().contains("p-aaaaaa"));
    }

    #[test]
    fn test_build_copies_inputs() {
        let tasks = vec![task("p-aaaaaa", TaskStatus::Open, &[])];
        let graph = DependencyGraph::build(&tasks);

        let mut held = graph.node("p-aaaaaa").unwrap().clone();
        held.labels.push("mutated".to_string());

        let rebuilt = DependencyGraph::build(&tasks);
        assert!(rebuilt.node("p-aaaaaa").unwrap().labels.is_empty());
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut t = task("p-aaaaaa", TaskStatus::Open, &["p-bbbbbb"]);
        // BTreeSet already dedups; simulate duplicate input via re-insert
        t.depends_on.insert("p-bbbbbb".to_string());
        let graph = DependencyGraph::build(&[t, task("p-bbbbbb", TaskStatus::Open, &[])]);

        assert_eq!(graph.dependencies("p-aaaaaa").unwrap().len(), 1);
    }

    #[test]
    fn test_filter_unblocked_open_basics() {
        let tasks = vec![
            task("p-aaaaaa", TaskStatus::Open, &[]),
            task("p-bbbbbb", TaskStatus::Open, &["p-aaaaaa"]),
            task("p-cccccc", TaskStatus::Closed, &[]),
            task("p-dddddd", TaskStatus::Open, &["p-cccccc"]),
        ];
        let graph = DependencyGraph::build(&tasks);

        let ready = filter_unblocked_open(&tasks, &graph);
        let ids: Vec<_> = ready.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["p-aaaaaa", "p-dddddd"]);
    }

    #[test]
    fn test_filter_excludes_epics_and_unknown_deps() {
        let mut epic = task("p-eeeeee", TaskStatus::Open, &[]);
        epic.task_type = "epic".to_string();
        let tasks = vec![epic, task("p-aaaaaa", TaskStatus::Open, &["p-404404"])];
        let graph = DependencyGraph::build(&tasks);

        assert!(filter_unblocked_open(&tasks, &graph).is_empty());
    }

    #[test]
    fn test_variant_x_order_stage_first() {
        let mut staged = task("p-zzzzzz", TaskStatus::Open, &[]);
        staged.labels.push("stage:review".to_string());
        staged.priority = 5;

        let mut urgent = task("p-aaaaaa", TaskStatus::Open, &[]);
        urgent.priority = 0;

        let tasks = vec![urgent, staged];
        let graph = DependencyGraph::build(&tasks);
        let ready = filter_unblocked_open(&tasks, &graph);

        // Stage-labeled wins over lower priority
        assert_eq!(ready[0].id, "p-zzzzzz");
        assert_eq!(ready[1].id, "p-aaaaaa");
    }

    #[test]
    fn test_variant_x_ties_break_on_estimate_then_id() {
        let mut small = task("p-bbbbbb", TaskStatus::Open, &[]);
        small.estimate_minutes = 5;
        let mut big = task("p-aaaaaa", TaskStatus::Open, &[]);
        big.estimate_minutes = 50;
        let twin_a = task("p-cccccc", TaskStatus::Open, &[]);
        let twin_b = task("p-dddddd", TaskStatus::Open, &[]);

        let tasks = vec![big, twin_b, small, twin_a];
        let graph = DependencyGraph::build(&tasks);
        let ids: Vec<String> = filter_unblocked_open(&tasks, &graph)
            .into_iter()
            .map(|t| t.id)
            .collect();

        assert_eq!(ids, vec!["p-cccccc", "p-dddddd", "p-bbbbbb", "p-aaaaaa"]);
    }

    #[test]
    fn test_cross_project_resolution() {
        let mut upstream = sample_task("lib-aaaaaa", "lib");
        upstream.status = TaskStatus::Closed;
        let mut cross = CrossProjectGraph::new();
        cross.insert_project("lib", &[upstream]);

        let blocked = task("p-aaaaaa", TaskStatus::Open, &["lib:lib-aaaaaa"]);
        let unresolved = task("p-bbbbbb", TaskStatus::Open, &["ghost:g-111111"]);
        let tasks = vec![blocked, unresolved];
        let local = DependencyGraph::build(&tasks);

        let ready = filter_unblocked_cross_project(&tasks, &local, &cross);
        let ids: Vec<_> = ready.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["p-aaaaaa"]);
    }

    #[test]
    fn test_cross_project_open_dependency_blocks() {
        let upstream = sample_task("lib-aaaaaa", "lib");
        let mut cross = CrossProjectGraph::new();
        cross.insert_project("lib", &[upstream]);

        let tasks = vec![task("p-aaaaaa", TaskStatus::Open, &["lib:lib-aaaaaa"])];
        let local = DependencyGraph::build(&tasks);

        assert!(filter_unblocked_cross_project(&tasks, &local, &cross).is_empty());
    }

    proptest! {
        #[test]
        fn prop_filter_order_is_stable(
            specs in proptest::collection::vec(
                (0u32..6, 0u32..200, proptest::bool::ANY),
                0..40,
            )
        ) {
            let tasks: Vec<Task> = specs
                .iter()
                .enumerate()
                .map(|(i, (priority, estimate, staged))| {
                    let mut t = sample_task(&format!("p-{i:06x}"), "p");
                    t.priority = *priority;
                    t.estimate_minutes = *estimate;
                    if *staged {
                        t.labels.push("stage:x".to_string());
                    }
                    t
                })
                .collect();

            let graph = DependencyGraph::build(&tasks);
            let first = filter_unblocked_open(&tasks, &graph);
            let second = filter_unblocked_open(&tasks, &graph);
            let first_ids: Vec<_> = first.iter().map(|t| t.id.clone()).collect();
            let second_ids: Vec<_> = second.iter().map(|t| t.id.clone()).collect();
            prop_assert_eq!(&first_ids, &second_ids);

            // Input order must not leak into the output order
            let mut reversed = tasks.clone();
            reversed.reverse();
            let graph_rev = DependencyGraph::build(&reversed);
            let third_ids: Vec<_> = filter_unblocked_open(&reversed, &graph_rev)
                .iter()
                .map(|t| t.id.clone())
                .collect();
            prop_assert_eq!(&first_ids, &third_ids);
        }
    }
}
