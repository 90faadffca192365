//! Lesson types, the JSONL lesson corpus, and project-memory synthesis

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What kind of knowledge a lesson captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonCategory {
    Pattern,
    Antipattern,
    Rule,
    Insight,
}

impl LessonCategory {
    /// Memory-file ordering: rule → antipattern → pattern → insight
    pub fn rank(&self) -> u8 {
        match self {
            LessonCategory::Rule => 0,
            LessonCategory::Antipattern => 1,
            LessonCategory::Pattern => 2,
            LessonCategory::Insight => 3,
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            LessonCategory::Rule => "Rules",
            LessonCategory::Antipattern => "Antipatterns",
            LessonCategory::Pattern => "Patterns",
            LessonCategory::Insight => "Insights",
        }
    }
}

/// One extracted lesson
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(default)]
    pub task_id: String,
    pub category: LessonCategory,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Append-only JSONL corpus of lessons for one project
pub struct LessonStore {
    path: PathBuf,
}

impl LessonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the whole corpus; a missing file is an empty corpus
    pub fn load(&self) -> eyre::Result<Vec<Lesson>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        // Tolerate individual bad lines rather than losing the corpus
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Append lessons, dropping duplicates per (task id, summary)
    pub fn append_deduped(&self, lessons: &[Lesson]) -> eyre::Result<usize> {
        let existing = self.load()?;
        let mut seen: std::collections::HashSet<(String, String)> = existing
            .iter()
            .map(|l| (l.task_id.clone(), l.summary.clone()))
            .collect();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut stored = 0;
        for lesson in lessons {
            if seen.insert((lesson.task_id.clone(), lesson.summary.clone())) {
                writeln!(file, "{}", serde_json::to_string(lesson)?)?;
                stored += 1;
            }
        }

        debug!(stored, skipped = lessons.len() - stored, path = %self.path.display(), "Stored lessons");
        Ok(stored)
    }
}

/// Render the canonical project-memory file from the lesson corpus
///
/// Deterministic: lessons dedup by summary (keeping an occurrence count),
/// categories appear in rank order, and within a category lessons sort by
/// frequency then summary. Recent definition-of-done failure patterns are
/// appended so agents see what keeps going wrong.
pub fn synthesize_memory(lessons: &[Lesson], recent_dod_failures: &[String]) -> String {
    use std::collections::BTreeMap;

    // (category rank, summary) -> (lesson, count)
    let mut grouped: BTreeMap<(u8, String), (&Lesson, usize)> = BTreeMap::new();
    for lesson in lessons {
        grouped
            .entry((lesson.category.rank(), lesson.summary.clone()))
            .and_modify(|(_, count)| *count += 1)
            .or_insert((lesson, 1));
    }

    let mut out = String::from("# Project Memory\n\nDistilled from completed tasks; read before starting work.\n");

    for category in [
        LessonCategory::Rule,
        LessonCategory::Antipattern,
        LessonCategory::Pattern,
        LessonCategory::Insight,
    ] {
        let mut entries: Vec<(&Lesson, usize)> = grouped
            .iter()
            .filter(|((rank, _), _)| *rank == category.rank())
            .map(|(_, (lesson, count))| (*lesson, *count))
            .collect();
        if entries.is_empty() {
            continue;
        }
        entries.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.summary.cmp(&b.summary)));

        out.push_str(&format!("\n## {}\n\n", category.heading()));
        for (lesson, count) in entries {
            out.push_str(&format!("- {}", lesson.summary));
            if count > 1 {
                out.push_str(&format!(" (seen {count}x)"));
            }
            if !lesson.detail.is_empty() {
                out.push_str(&format!("\n  {}", lesson.detail));
            }
            out.push('\n');
        }
    }

    if !recent_dod_failures.is_empty() {
        out.push_str("\n## Recent verification failures\n\n");
        for failure in recent_dod_failures {
            out.push_str(&format!("- {failure}\n"));
        }
    }

    out
}
