//! Dependency-aware dispatcher
//!
//! Ticks on the engine schedule, scans every enabled project for ready
//! tasks, and launches per-task execution workflows while respecting the
//! global and per-project concurrency caps. Workflow id = task id makes
//! duplicate dispatch attempts idempotent; an individual project error
//! skips that project, never the tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use backlogstore::{CrossProjectGraph, DependencyGraph, Task, TaskStore, filter_unblocked_cross_project};

use crate::agent::DEFAULT_AGENT;
use crate::config::Config;
use crate::exec::{TaskRequest, effective_slow_threshold};
use crate::runtime::{SpawnError, StartAck, WORKFLOW_TYPE_EXECUTION, WorkflowSpawner};

/// Starts an execution workflow for a dispatch candidate
///
/// The production implementation wraps the engine spawner with the
/// execution-workflow wiring; tests substitute a recorder.
#[async_trait]
pub trait ExecutionLauncher: Send + Sync {
    async fn launch(&self, req: TaskRequest) -> Result<StartAck, SpawnError>;
}

/// The periodic dispatch workflow
pub struct Dispatcher {
    config: Arc<RwLock<Config>>,
    store: Arc<Mutex<TaskStore>>,
    spawner: Arc<dyn WorkflowSpawner>,
    launcher: Arc<dyn ExecutionLauncher>,
    /// Round-robin cursor over the agent pool, spreading provider quota
    rotation: AtomicUsize,
}

impl Dispatcher {
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Arc<Mutex<TaskStore>>,
        spawner: Arc<dyn WorkflowSpawner>,
        launcher: Arc<dyn ExecutionLauncher>,
    ) -> Self {
        Self {
            config,
            store,
            spawner,
            launcher,
            rotation: AtomicUsize::new(0),
        }
    }

    /// One dispatch tick
    pub async fn tick(&self) -> eyre::Result<()> {
        let config = self.config.read().expect("config lock poisoned").clone();

        let running = self.spawner.list_running(WORKFLOW_TYPE_EXECUTION).await?;
        let total_slots = config
            .general
            .max_concurrent_total
            .saturating_sub(running.len())
            .min(config.general.max_per_tick);
        if total_slots == 0 {
            debug!(running = running.len(), "No free slots this tick");
            return Ok(());
        }

        // Snapshot every enabled project's backlog; project errors skip the
        // project, never the tick.
        let mut project_tasks: HashMap<String, Vec<Task>> = HashMap::new();
        for (name, project) in config.projects.iter().filter(|(_, p)| p.enabled) {
            let listed = {
                let store = self.store.lock().expect("task store mutex poisoned");
                store.list_tasks(name, &[])
            };
            match listed {
                Ok(tasks) => {
                    project_tasks.insert(name.clone(), tasks);
                }
                Err(e) => warn!(project = %name, error = %e, "Failed to list project tasks, skipping"),
            }
        }

        let mut cross = CrossProjectGraph::new();
        for (name, tasks) in &project_tasks {
            cross.insert_project(name.clone(), tasks);
        }

        let per_project_cap = config.dispatch.git.max_concurrent_per_project;
        let mut project_slots: HashMap<String, usize> = HashMap::new();
        let mut candidates: Vec<(Task, String)> = Vec::new();

        for (name, tasks) in &project_tasks {
            let project_running = tasks.iter().filter(|t| running.contains(&t.id)).count();
            if project_running >= per_project_cap {
                debug!(project = %name, project_running, "Project at concurrency cap");
                continue;
            }
            project_slots.insert(name.clone(), per_project_cap - project_running);

            let graph = DependencyGraph::build(tasks);
            let ready = filter_unblocked_cross_project(tasks, &graph, &cross);
            candidates.extend(ready.into_iter().map(|t| (t, name.clone())));
        }

        // Deferred work stays visible in the backlog but is never dispatched
        // while real work is pending.
        if candidates.iter().any(|(t, _)| !t.is_deferred()) {
            candidates.retain(|(t, _)| !t.is_deferred());
        }

        // Priority ascending; parented (pre-planned) tasks first within a
        // priority; then estimate, then id for determinism.
        candidates.sort_by(|(a, _), (b, _)| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.parent.is_some().cmp(&a.parent.is_some()))
                .then_with(|| a.estimate_minutes.cmp(&b.estimate_minutes))
                .then_with(|| a.id.cmp(&b.id))
        });

        let agent_pool = self.agent_pool(&config);
        let mut remaining = total_slots;
        for (task, project) in candidates {
            if remaining == 0 {
                break;
            }
            if running.contains(&task.id) {
                continue;
            }
            let Some(slots) = project_slots.get_mut(&project) else {
                continue;
            };
            if *slots == 0 {
                continue;
            }

            let req = self.build_request(&config, &task, &project, &agent_pool);
            match self.launcher.launch(req).await {
                Ok(ack) => {
                    info!(task_id = %task.id, project = %project, run_id = %ack.run_id, "Dispatched task");
                    *slots -= 1;
                    remaining -= 1;
                }
                Err(e) if e.is_duplicate() => {
                    debug!(task_id = %task.id, "Duplicate already running, skipping");
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Failed to start execution workflow");
                }
            }
        }

        Ok(())
    }

    fn agent_pool(&self, config: &Config) -> Vec<String> {
        let pool = crate::agent::TierMap::new(config.tiers.as_map()).all_agents();
        if pool.is_empty() {
            vec![DEFAULT_AGENT.to_string()]
        } else {
            pool
        }
    }

    fn build_request(&self, config: &Config, task: &Task, project: &str, pool: &[String]) -> TaskRequest {
        let cursor = self.rotation.fetch_add(1, Ordering::Relaxed);
        let provider = pool[cursor % pool.len()].clone();
        let reviewer = pool[(cursor + 1) % pool.len()].clone();

        let project_config = config.projects.get(project).cloned().unwrap_or_default();

        TaskRequest {
            task_id: task.id.clone(),
            project: project.to_string(),
            work_dir: project_config.workspace.clone(),
            prompt: build_prompt(task),
            provider,
            reviewer,
            dod_checks: project_config.dod.checks.clone(),
            // Pre-planned subtasks skip the human gate
            auto_approve: task.parent.as_deref().is_some_and(|p| !p.is_empty()),
            slow_step_threshold: effective_slow_threshold(config.general.slow_step_threshold_secs),
            estimate_minutes: task.estimate_minutes,
        }
    }
}

/// Assemble the agent prompt: title, description, acceptance, and design
/// joined with blank lines, trailing whitespace stripped
pub fn build_prompt(task: &Task) -> String {
    let mut parts: Vec<String> = vec![task.title.clone()];
    if !task.description.is_empty() {
        parts.push(task.description.clone());
    }
    if !task.acceptance.is_empty() {
        parts.push(format!("Acceptance criteria:\n{}", task.acceptance));
    }
    if !task.design.is_empty() {
        parts.push(format!("Design:\n{}", task.design));
    }
    parts.join("\n\n").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use backlogstore::{TaskDraft, TaskStatus};

    use crate::config::ProjectConfig;
    use crate::runtime::{ChildWorkflowOptions, WorkflowFuture};

    struct FakeSpawner {
        running: HashSet<String>,
    }

    #[async_trait]
    impl WorkflowSpawner for FakeSpawner {
        async fn start(&self, opts: ChildWorkflowOptions, _body: WorkflowFuture) -> Result<StartAck, SpawnError> {
            Ok(StartAck {
                workflow_id: opts.workflow_id,
                run_id: "run".to_string(),
            })
        }

        async fn list_running(&self, _workflow_type: &str) -> eyre::Result<HashSet<String>> {
            Ok(self.running.clone())
        }
    }

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<TaskRequest>>,
    }

    #[async_trait]
    impl ExecutionLauncher for RecordingLauncher {
        async fn launch(&self, req: TaskRequest) -> Result<StartAck, SpawnError> {
            let task_id = req.task_id.clone();
            self.launched.lock().unwrap().push(req);
            Ok(StartAck {
                workflow_id: task_id,
                run_id: "run".to_string(),
            })
        }
    }

    fn test_config(project: &str) -> Config {
        let mut config = Config::default();
        config.projects.insert(project.to_string(), ProjectConfig::default());
        config
    }

    fn dispatcher(
        config: Config,
        store: TaskStore,
        running: HashSet<String>,
    ) -> (Dispatcher, Arc<RecordingLauncher>) {
        let launcher = Arc::new(RecordingLauncher::default());
        let dispatcher = Dispatcher::new(
            Arc::new(RwLock::new(config)),
            Arc::new(Mutex::new(store)),
            Arc::new(FakeSpawner { running }),
            Arc::clone(&launcher) as Arc<dyn ExecutionLauncher>,
        );
        (dispatcher, launcher)
    }

    fn draft(project: &str, title: &str, priority: u32) -> TaskDraft {
        let mut draft = TaskDraft::new(project, title);
        draft.priority = priority;
        draft
    }

    #[tokio::test]
    async fn test_dispatches_ready_tasks_in_order() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(draft("p", "low", 3)).unwrap();
        store.create_task(draft("p", "high", 0)).unwrap();

        let (dispatcher, launcher) = dispatcher(test_config("p"), store, HashSet::new());
        dispatcher.tick().await.unwrap();

        let launched = launcher.launched.lock().unwrap();
        assert_eq!(launched.len(), 2);
        assert!(launched[0].prompt.starts_with("high"));
        assert!(launched[1].prompt.starts_with("low"));
    }

    #[tokio::test]
    async fn test_never_dispatches_running_task() {
        let store = TaskStore::open_in_memory().unwrap();
        let running_task = store.create_task(draft("p", "already running", 0)).unwrap();
        store.create_task(draft("p", "fresh", 1)).unwrap();

        let running: HashSet<String> = [running_task.id.clone()].into();
        let (dispatcher, launcher) = dispatcher(test_config("p"), store, running);
        dispatcher.tick().await.unwrap();

        let launched = launcher.launched.lock().unwrap();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].prompt.starts_with("fresh"));
    }

    #[tokio::test]
    async fn test_respects_max_per_tick() {
        let store = TaskStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.create_task(draft("p", &format!("task {i}"), 1)).unwrap();
        }

        let mut config = test_config("p");
        config.general.max_per_tick = 2;
        config.general.max_concurrent_total = 10;
        config.dispatch.git.max_concurrent_per_project = 10;

        let (dispatcher, launcher) = dispatcher(config, store, HashSet::new());
        dispatcher.tick().await.unwrap();

        assert_eq!(launcher.launched.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_global_slots_account_for_running() {
        let store = TaskStore::open_in_memory().unwrap();
        let a = store.create_task(draft("p", "running a", 0)).unwrap();
        let b = store.create_task(draft("p", "running b", 0)).unwrap();
        let c = store.create_task(draft("p", "running c", 0)).unwrap();
        store.create_task(draft("p", "waiting", 1)).unwrap();

        // max_concurrent_total = 3 and three already running: no slots
        let running: HashSet<String> = [a.id, b.id, c.id].into();
        let (dispatcher, launcher) = dispatcher(test_config("p"), store, running);
        dispatcher.tick().await.unwrap();

        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deferred_suppressed_while_real_work_pending() {
        let store = TaskStore::open_in_memory().unwrap();
        let mut deferred = draft("p", "someday", 0);
        deferred.labels = vec!["strategy:deferred".to_string()];
        store.create_task(deferred).unwrap();
        store.create_task(draft("p", "real work", 5)).unwrap();

        let (dispatcher, launcher) = dispatcher(test_config("p"), store, HashSet::new());
        dispatcher.tick().await.unwrap();

        let launched = launcher.launched.lock().unwrap();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].prompt.starts_with("real work"));
    }

    #[tokio::test]
    async fn test_deferred_dispatches_when_nothing_else() {
        let store = TaskStore::open_in_memory().unwrap();
        let mut deferred = draft("p", "someday", 0);
        deferred.labels = vec!["strategy:deferred".to_string()];
        store.create_task(deferred).unwrap();

        let (dispatcher, launcher) = dispatcher(test_config("p"), store, HashSet::new());
        dispatcher.tick().await.unwrap();

        assert_eq!(launcher.launched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_and_epic_tasks_not_dispatched() {
        let store = TaskStore::open_in_memory().unwrap();
        let dep = store.create_task(draft("p", "dependency", 0)).unwrap();
        let blocked = store.create_task(draft("p", "blocked", 0)).unwrap();
        store.add_edge(&blocked.id, &dep.id).unwrap();
        let mut epic = draft("p", "umbrella", 0);
        epic.task_type = "epic".to_string();
        store.create_task(epic).unwrap();

        let (dispatcher, launcher) = dispatcher(test_config("p"), store, HashSet::new());
        dispatcher.tick().await.unwrap();

        let launched = launcher.launched.lock().unwrap();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].prompt.starts_with("dependency"));
    }

    #[tokio::test]
    async fn test_parent_sets_auto_approve() {
        let store = TaskStore::open_in_memory().unwrap();
        let parent = store.create_task(draft("p", "parent", 0)).unwrap();
        store.close_task(&parent.id).unwrap();

        let mut child = draft("p", "child", 1);
        child.parent = Some(parent.id.clone());
        store.create_task(child).unwrap();
        store.create_task(draft("p", "orphan", 1)).unwrap();

        let (dispatcher, launcher) = dispatcher(test_config("p"), store, HashSet::new());
        dispatcher.tick().await.unwrap();

        let launched = launcher.launched.lock().unwrap();
        // Parented child sorts before the orphan at equal priority
        assert!(launched[0].prompt.starts_with("child"));
        assert!(launched[0].auto_approve);
        assert!(!launched[1].auto_approve);
    }

    #[tokio::test]
    async fn test_disabled_project_skipped() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(draft("p", "work", 0)).unwrap();

        let mut config = test_config("p");
        config.projects.get_mut("p").unwrap().enabled = false;

        let (dispatcher, launcher) = dispatcher(config, store, HashSet::new());
        dispatcher.tick().await.unwrap();

        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cross_project_blocker_resolution() {
        let store = TaskStore::open_in_memory().unwrap();
        let closed_upstream = store.create_task(draft("lib", "shipped", 0)).unwrap();
        store.close_task(&closed_upstream.id).unwrap();
        let open_upstream = store.create_task(draft("lib", "in flight", 0)).unwrap();

        // Soft cross-project links live in depends_on strings, not edges
        let mut satisfied = draft("app", "satisfied", 0);
        satisfied.cross_deps = vec![format!("lib:{}", closed_upstream.id)];
        store.create_task(satisfied).unwrap();

        let mut blocked = draft("app", "blocked", 0);
        blocked.cross_deps = vec![format!("lib:{}", open_upstream.id)];
        store.create_task(blocked).unwrap();

        let mut unresolved = draft("app", "unresolved", 0);
        unresolved.cross_deps = vec!["ghost:g-111111".to_string()];
        store.create_task(unresolved).unwrap();

        let mut config = test_config("app");
        config.projects.insert("lib".to_string(), ProjectConfig::default());
        config.general.max_concurrent_total = 10;
        config.general.max_per_tick = 10;

        let (dispatcher, launcher) = dispatcher(config, store, HashSet::new());
        dispatcher.tick().await.unwrap();

        let launched = launcher.launched.lock().unwrap();
        let prompts: Vec<_> = launched.iter().map(|r| r.prompt.as_str()).collect();
        // Only the satisfied cross dependency and lib's own open task run
        assert!(prompts.contains(&"satisfied"));
        assert!(prompts.contains(&"in flight"));
        assert!(!prompts.contains(&"blocked"));
        assert!(!prompts.contains(&"unresolved"));
    }

    #[test]
    fn test_build_prompt_joins_blocks() {
        let store = TaskStore::open_in_memory().unwrap();
        let mut draft = TaskDraft::new("p", "Add caching");
        draft.description = "Cache lookups in memory.".to_string();
        draft.acceptance = "Cache hit rate is measurable.".to_string();
        draft.design = "Wrap the fetch path.\n".to_string();
        let task = store.create_task(draft).unwrap();

        let prompt = build_prompt(&task);
        assert_eq!(
            prompt,
            "Add caching\n\nCache lookups in memory.\n\nAcceptance criteria:\nCache hit rate is measurable.\n\nDesign:\nWrap the fetch path."
        );
    }

    #[test]
    fn test_build_prompt_skips_empty_blocks() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = store.create_task(TaskDraft::new("p", "Just a title")).unwrap();
        assert_eq!(build_prompt(&task), "Just a title");

        let mut with_status = task.clone();
        with_status.status = TaskStatus::Open;
        assert_eq!(build_prompt(&with_status), "Just a title");
    }
}
