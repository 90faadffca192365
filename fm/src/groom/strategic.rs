//! Strategic groom: the daily backlog review
//!
//! Builds a repository map and a compressed backlog summary, asks the
//! premium-tier agent for priorities, risks, observations, and mutations,
//! normalizes the mutations deterministically, applies them directly (the
//! analyst's output is never fed back through an LLM), and renders the
//! morning briefing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use backlogstore::{DependencyGraph, TaskStatus, TaskStore, filter_unblocked_open};

use crate::agent::{AgentInvoker, AgentKind, extract_json};
use crate::prompts::PromptSet;
use crate::runtime::ActivityContext;

use super::backlog_lines;
use super::mutation::{Mutation, MutationOutcome, apply_mutations, normalize_strategic_mutations};

/// Exported symbols kept per package in the repo map
const MAX_SYMBOLS_PER_PACKAGE: usize = 20;

/// Backlog one-liners shown to the analyst
const BACKLOG_SUMMARY_CAP: usize = 50;

/// What the premium analysis returns
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategicAnalysis {
    #[serde(default)]
    pub priorities: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub mutations: Vec<Mutation>,
}

/// The daily strategic groomer
pub struct StrategicGroom {
    store: Arc<Mutex<TaskStore>>,
    agent: Arc<dyn AgentInvoker>,
    prompts: Arc<PromptSet>,
    premium_agent: String,
}

impl StrategicGroom {
    pub fn new(
        store: Arc<Mutex<TaskStore>>,
        agent: Arc<dyn AgentInvoker>,
        prompts: Arc<PromptSet>,
        premium_agent: String,
    ) -> Self {
        Self {
            store,
            agent,
            prompts,
            premium_agent,
        }
    }

    /// One daily cycle for a project; writes the briefing and returns the
    /// applied mutation outcomes
    pub async fn run(
        &self,
        project: &str,
        work_dir: &Path,
        briefing_path: &Path,
    ) -> eyre::Result<Vec<MutationOutcome>> {
        let (ctx, _cancel) = ActivityContext::new();
        info!(project, "Strategic groom started");

        let repo_map = repo_map(work_dir);
        let backlog = self.backlog_summary(project)?;

        let prompt = self.prompts.render(
            "strategic-analysis",
            &json!({
                "project": project,
                "repo_map": repo_map,
                "backlog": backlog,
            }),
        )?;

        let analysis = match self
            .agent
            .run(&ctx, AgentKind::Review, &self.premium_agent, &prompt, work_dir)
            .await
        {
            Ok(output) => match serde_json::from_str::<StrategicAnalysis>(extract_json(&output.text)) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(project, error = %e, "Unparseable strategic analysis");
                    StrategicAnalysis::default()
                }
            },
            Err(e) => {
                warn!(project, error = %e, "Strategic analysis agent failed");
                StrategicAnalysis::default()
            }
        };

        // The normalized list goes straight to the applier; re-prompting an
        // LLM here would let the applied set drift from the proposal.
        let normalized = normalize_strategic_mutations(analysis.mutations.clone());
        let outcomes = {
            let store = self.store.lock().expect("task store mutex poisoned");
            apply_mutations(&store, project, &normalized)
        };

        if let Err(e) = self.write_briefing(briefing_path, project, &analysis, &outcomes) {
            warn!(project, error = %e, "Failed to write morning briefing");
        }

        let applied = outcomes.iter().filter(|o| o.ok).count();
        info!(project, applied, "Strategic groom finished");
        Ok(outcomes)
    }

    /// Counts, ready-set size, and per-task one-liners with blockers
    fn backlog_summary(&self, project: &str) -> eyre::Result<String> {
        let tasks = {
            let store = self.store.lock().expect("task store mutex poisoned");
            store.list_tasks(project, &[])?
        };

        let open = tasks.iter().filter(|t| t.status == TaskStatus::Open).count();
        let closed = tasks.len() - open;
        let graph = DependencyGraph::build(&tasks);
        let ready = filter_unblocked_open(&tasks, &graph).len();

        let open_tasks: Vec<_> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Open)
            .cloned()
            .collect();

        Ok(format!(
            "{open} open / {closed} closed, {ready} unblocked and ready\n\n{}",
            backlog_lines(&open_tasks, BACKLOG_SUMMARY_CAP)
        ))
    }

    fn write_briefing(
        &self,
        path: &Path,
        project: &str,
        analysis: &StrategicAnalysis,
        outcomes: &[MutationOutcome],
    ) -> eyre::Result<()> {
        let mut out = format!(
            "# Morning briefing - {project}\n\n{}\n",
            Utc::now().format("%Y-%m-%d")
        );

        for (heading, items) in [
            ("Priorities", &analysis.priorities),
            ("Risks", &analysis.risks),
            ("Observations", &analysis.observations),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("\n## {heading}\n\n"));
            for item in items {
                out.push_str(&format!("- {item}\n"));
            }
        }

        if !outcomes.is_empty() {
            out.push_str("\n## Backlog changes\n\n");
            for outcome in outcomes {
                let marker = if outcome.ok { "applied" } else { "failed" };
                out.push_str(&format!("- [{marker}] {:?}: {}\n", outcome.action, outcome.detail));
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, out)?;
        debug!(path = %path.display(), "Wrote morning briefing");
        Ok(())
    }
}

/// Enumerate packages and their exported symbols, best-effort
///
/// A package is a directory carrying a build manifest; symbols come from a
/// shallow line scan of its sources, capped per package.
pub fn repo_map(work_dir: &Path) -> String {
    let manifest_names = ["Cargo.toml", "go.mod", "package.json", "pyproject.toml"];
    let mut packages: Vec<(PathBuf, Vec<String>)> = Vec::new();

    for entry in WalkDir::new(work_dir)
        .max_depth(4)
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|name| !name.starts_with('.') && name != "target" && name != "node_modules")
                .unwrap_or(true)
        })
        .filter_map(Result::ok)
    {
        if entry.file_type().is_file()
            && manifest_names.contains(&entry.file_name().to_string_lossy().as_ref())
        {
            let package_dir = entry.path().parent().unwrap_or(work_dir).to_path_buf();
            let symbols = exported_symbols(&package_dir);
            packages.push((package_dir, symbols));
        }
    }

    if packages.is_empty() {
        return "(no packages found)".to_string();
    }

    packages.sort_by(|(a, _), (b, _)| a.cmp(b));
    packages
        .into_iter()
        .map(|(dir, symbols)| {
            let rel = dir.strip_prefix(work_dir).unwrap_or(&dir).display().to_string();
            let name = if rel.is_empty() { ".".to_string() } else { rel };
            if symbols.is_empty() {
                name
            } else {
                format!("{name}: {}", symbols.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn exported_symbols(package_dir: &Path) -> Vec<String> {
    let prefixes = [
        "pub fn ",
        "pub struct ",
        "pub enum ",
        "pub trait ",
        "func ",
        "export function ",
        "def ",
    ];
    let mut symbols = Vec::new();

    for entry in WalkDir::new(package_dir)
        .max_depth(3)
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|name| !name.starts_with('.') && name != "target" && name != "node_modules")
                .unwrap_or(true)
        })
        .filter_map(Result::ok)
    {
        if symbols.len() >= MAX_SYMBOLS_PER_PACKAGE {
            break;
        }
        let is_source = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| matches!(ext, "rs" | "go" | "ts" | "py"));
        if !entry.file_type().is_file() || !is_source {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for line in content.lines() {
            if symbols.len() >= MAX_SYMBOLS_PER_PACKAGE {
                break;
            }
            let trimmed = line.trim_start();
            for prefix in &prefixes {
                if let Some(rest) = trimmed.strip_prefix(prefix) {
                    let name: String = rest
                        .chars()
                        .take_while(|c| c.is_alphanumeric() || *c == '_')
                        .collect();
                    if !name.is_empty() {
                        symbols.push(name);
                    }
                    break;
                }
            }
        }
    }

    symbols
}
