//! Post-success learner workflow
//!
//! Spawned detached after a successful definition-of-done run: extract 1-3
//! structured lessons, persist them, generate static-analysis rules for the
//! rule/antipattern categories, and regenerate the canonical project-memory
//! file agents re-read on later runs. Every step is non-fatal to the parent
//! and to the steps after it.

pub mod lesson;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::agent::{AgentInvoker, AgentKind, extract_json};
use crate::prompts::PromptSet;
use crate::runtime::ActivityContext;

pub use lesson::{Lesson, LessonCategory, LessonStore, synthesize_memory};

/// Lessons kept per completed task
const MAX_LESSONS_PER_TASK: usize = 3;

/// Everything the learner needs from the finished execution
#[derive(Debug, Clone)]
pub struct LearnerInput {
    pub task_id: String,
    pub project: String,
    pub work_dir: PathBuf,
    /// The task prompt the agents worked from
    pub task_prompt: String,
    /// Files the plan expected to touch
    pub files: Vec<String>,
    /// Final definition-of-done summary
    pub dod_summary: String,
    /// Errors overcome across retries
    pub previous_errors: Vec<String>,
    /// Recent failure patterns appended to the memory file
    pub recent_dod_failures: Vec<String>,
}

/// The learner pipeline
pub struct Learner {
    agent: Arc<dyn AgentInvoker>,
    prompts: Arc<PromptSet>,
    /// Fast-tier agent used for extraction and rule generation
    fast_agent: String,
    lessons: LessonStore,
    /// Per-project static-analysis rule directory
    rules_dir: PathBuf,
    /// Canonical memory file in the work directory
    memory_path: PathBuf,
}

impl Learner {
    pub fn new(
        agent: Arc<dyn AgentInvoker>,
        prompts: Arc<PromptSet>,
        fast_agent: String,
        lessons: LessonStore,
        rules_dir: PathBuf,
        memory_path: PathBuf,
    ) -> Self {
        Self {
            agent,
            prompts,
            fast_agent,
            lessons,
            rules_dir,
            memory_path,
        }
    }

    /// Run the full pipeline; individual failures are logged and skipped
    pub async fn run(&self, input: &LearnerInput) -> eyre::Result<()> {
        let (ctx, _cancel) = ActivityContext::new();
        info!(task_id = %input.task_id, project = %input.project, "Learner started");

        let lessons = match self.extract_lessons(&ctx, input).await {
            Ok(lessons) => lessons,
            Err(e) => {
                warn!(task_id = %input.task_id, error = %e, "Lesson extraction failed");
                Vec::new()
            }
        };

        if !lessons.is_empty() {
            if let Err(e) = self.lessons.append_deduped(&lessons) {
                warn!(task_id = %input.task_id, error = %e, "Failed to store lessons");
            }
            self.generate_rules(&ctx, input, &lessons).await;
        }

        if let Err(e) = self.synthesize_project_memory(input) {
            warn!(task_id = %input.task_id, error = %e, "Failed to synthesize project memory");
        }

        info!(task_id = %input.task_id, lessons = lessons.len(), "Learner finished");
        Ok(())
    }

    /// Ask the fast-tier agent for 1-3 structured lessons
    async fn extract_lessons(
        &self,
        ctx: &ActivityContext,
        input: &LearnerInput,
    ) -> eyre::Result<Vec<Lesson>> {
        let prompt = self.prompts.render(
            "lessons",
            &json!({
                "task": input.task_prompt,
                "files": input.files.join(", "),
                "dod": input.dod_summary,
                "previous_errors": input.previous_errors,
            }),
        )?;

        let output = self
            .agent
            .run(ctx, AgentKind::Review, &self.fast_agent, &prompt, &input.work_dir)
            .await?;

        let mut lessons: Vec<Lesson> = serde_json::from_str(extract_json(&output.text))
            .map_err(|e| eyre::eyre!("lesson output is not valid JSON: {e}"))?;
        lessons.truncate(MAX_LESSONS_PER_TASK);
        for lesson in &mut lessons {
            lesson.task_id = input.task_id.clone();
        }
        Ok(lessons)
    }

    /// Write a static-analysis rule for every rule/antipattern lesson
    async fn generate_rules(&self, ctx: &ActivityContext, input: &LearnerInput, lessons: &[Lesson]) {
        for lesson in lessons
            .iter()
            .filter(|l| matches!(l.category, LessonCategory::Rule | LessonCategory::Antipattern))
        {
            let rule_id = slugify(&lesson.summary);
            let rendered = self.prompts.render(
                "rule",
                &json!({
                    "rule_id": rule_id,
                    "summary": lesson.summary,
                    "detail": lesson.detail,
                }),
            );
            let prompt = match rendered {
                Ok(prompt) => prompt,
                Err(e) => {
                    warn!(error = %e, "Failed to render rule prompt");
                    continue;
                }
            };

            match self
                .agent
                .run(ctx, AgentKind::Review, &self.fast_agent, &prompt, &input.work_dir)
                .await
            {
                Ok(output) => {
                    if let Err(e) = self.write_rule(&rule_id, &output.text) {
                        warn!(rule_id, error = %e, "Failed to write rule");
                    }
                }
                Err(e) => warn!(rule_id, error = %e, "Rule generation failed"),
            }
        }
    }

    fn write_rule(&self, rule_id: &str, yaml: &str) -> eyre::Result<()> {
        std::fs::create_dir_all(&self.rules_dir)?;
        let path = self.rules_dir.join(format!("{rule_id}.yml"));
        std::fs::write(&path, yaml)?;
        debug!(path = %path.display(), "Wrote static-analysis rule");
        Ok(())
    }

    /// Regenerate the memory file from the whole corpus
    ///
    /// Last-writer-wins on contention is fine; the file is regenerated
    /// deterministically from the corpus every time.
    fn synthesize_project_memory(&self, input: &LearnerInput) -> eyre::Result<()> {
        let corpus = self.lessons.load()?;
        let memory = synthesize_memory(&corpus, &input.recent_dod_failures);
        if let Some(parent) = self.memory_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.memory_path, memory)?;
        debug!(path = %self.memory_path.display(), lessons = corpus.len(), "Wrote project memory");
        Ok(())
    }
}

/// Lowercase, alphanumeric-and-dash identifier from a summary line
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() { "rule".to_string() } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    use crate::agent::{AgentError, AgentOutput, TokenUsage};

    /// Canned-response agent; records the prompts it saw
    struct ScriptedAgent {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedAgent {
        async fn run(
            &self,
            _ctx: &ActivityContext,
            _kind: AgentKind,
            agent: &str,
            prompt: &str,
            _work_dir: &Path,
        ) -> Result<AgentOutput, AgentError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let text = self.responses.lock().unwrap().pop().unwrap_or_default();
            Ok(AgentOutput {
                text,
                tokens: TokenUsage::default(),
                cost_usd: None,
                agent: agent.to_string(),
            })
        }
    }

    fn input(dir: &Path) -> LearnerInput {
        LearnerInput {
            task_id: "p-aaaaaa".to_string(),
            project: "p".to_string(),
            work_dir: dir.to_path_buf(),
            task_prompt: "Add caching".to_string(),
            files: vec!["src/cache.rs".to_string()],
            dod_summary: "all checks passed".to_string(),
            previous_errors: Vec::new(),
            recent_dod_failures: vec!["cargo test flaked".to_string()],
        }
    }

    fn learner(agent: Arc<ScriptedAgent>, dir: &Path) -> Learner {
        Learner::new(
            agent,
            Arc::new(PromptSet::new().unwrap()),
            "fast-agent".to_string(),
            LessonStore::new(dir.join("lessons.jsonl")),
            dir.join(".semgrep"),
            dir.join("AGENT_MEMORY.md"),
        )
    }

    #[tokio::test]
    async fn test_full_pipeline_writes_rules_and_memory() {
        let dir = tempdir().unwrap();
        let agent = ScriptedAgent::new(vec![
            // Lesson extraction
            r#"[{"category": "antipattern", "summary": "unbounded cache growth", "detail": "cap the cache"},
                {"category": "insight", "summary": "cache warms slowly"}]"#,
            // Rule generation for the antipattern
            "rules:\n  - id: unbounded-cache-growth",
        ]);

        let learner = learner(Arc::clone(&agent), dir.path());
        learner.run(&input(dir.path())).await.unwrap();

        let rule = dir.path().join(".semgrep/unbounded-cache-growth.yml");
        assert!(rule.is_file());
        let memory = std::fs::read_to_string(dir.path().join("AGENT_MEMORY.md")).unwrap();
        assert!(memory.contains("unbounded cache growth"));
        assert!(memory.contains("cache warms slowly"));
        assert!(memory.contains("cargo test flaked"));
    }

    #[tokio::test]
    async fn test_unparseable_lessons_are_non_fatal() {
        let dir = tempdir().unwrap();
        let agent = ScriptedAgent::new(vec!["this is not json"]);

        let learner = learner(agent, dir.path());
        learner.run(&input(dir.path())).await.unwrap();

        // No lessons stored, but the memory file still regenerates
        assert!(dir.path().join("AGENT_MEMORY.md").is_file());
    }

    #[tokio::test]
    async fn test_lessons_capped_at_three() {
        let dir = tempdir().unwrap();
        let agent = ScriptedAgent::new(vec![
            r#"[{"category": "insight", "summary": "one"},
                {"category": "insight", "summary": "two"},
                {"category": "insight", "summary": "three"},
                {"category": "insight", "summary": "four"}]"#,
        ]);

        let learner = learner(agent, dir.path());
        learner.run(&input(dir.path())).await.unwrap();

        let store = LessonStore::new(dir.path().join("lessons.jsonl"));
        assert_eq!(store.load().unwrap().len(), 3);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Unbounded cache growth!"), "unbounded-cache-growth");
        assert_eq!(slugify("  weird   spacing "), "weird-spacing");
        assert_eq!(slugify("???"), "rule");
    }
}
