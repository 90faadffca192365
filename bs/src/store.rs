//! SQLite-backed task and edge store
//!
//! The store is the single durable, mutable shared resource of the pipeline.
//! Writers are serialized by the caller (the daemon wraps the store in a
//! mutex); readers may run concurrently against the WAL journal. All
//! operations return typed [`StoreError`]s and never panic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::task::{Task, TaskDraft, TaskStatus, TYPE_TASK, generate_task_id};

/// Maximum attempts to generate a collision-free task id
const MAX_ID_ATTEMPTS: u32 = 10;

/// Columns accepted by [`TaskStore::update_task`]
const UPDATABLE_COLUMNS: &[&str] = &[
    "acceptance",
    "assignee",
    "cross_deps",
    "description",
    "design",
    "estimate_minutes",
    "labels",
    "notes",
    "parent",
    "priority",
    "project",
    "status",
    "task_type",
    "title",
];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id               TEXT PRIMARY KEY,
    title            TEXT NOT NULL DEFAULT '',
    description      TEXT NOT NULL DEFAULT '',
    status           TEXT NOT NULL DEFAULT 'open',
    priority         INTEGER NOT NULL DEFAULT 2,
    task_type        TEXT NOT NULL DEFAULT 'task',
    assignee         TEXT NOT NULL DEFAULT '',
    labels           TEXT NOT NULL DEFAULT '[]',
    estimate_minutes INTEGER NOT NULL DEFAULT 0,
    parent           TEXT,
    cross_deps       TEXT NOT NULL DEFAULT '[]',
    acceptance       TEXT NOT NULL DEFAULT '',
    design           TEXT NOT NULL DEFAULT '',
    notes            TEXT NOT NULL DEFAULT '',
    project          TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_project_status ON tasks(project, status);

CREATE TABLE IF NOT EXISTS task_edges (
    from_task TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    to_task   TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    PRIMARY KEY (from_task, to_task)
);

CREATE INDEX IF NOT EXISTS idx_edges_to ON task_edges(to_task);
";

/// The durable catalog of tasks and their dependency edges
pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    /// Open (or create) a file-backed store and ensure its schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self { conn };
        store.ensure_schema(true)?;
        info!(path = %path.as_ref().display(), "Opened task store");
        Ok(store)
    }

    /// Open an in-memory store (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.ensure_schema(false)?;
        Ok(store)
    }

    /// Idempotently create tables, enable referential integrity, and switch
    /// file-backed databases to WAL for concurrent readers
    fn ensure_schema(&self, file_backed: bool) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if file_backed {
            // journal_mode returns the resulting mode as a row
            let mode: String = self
                .conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            debug!(%mode, "Journal mode set");
        }
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Create a task from a draft, generating a process-unique id
    ///
    /// Status defaults to open and type to `task`. Fails with `Validation`
    /// for an empty project and with `Internal` after exhausting id attempts.
    pub fn create_task(&self, draft: TaskDraft) -> Result<Task> {
        let project = draft.project.clone();
        let mut next_id = move || generate_task_id(&project);
        self.create_task_with_ids(draft, &mut next_id)
    }

    fn create_task_with_ids(&self, draft: TaskDraft, next_id: &mut dyn FnMut() -> String) -> Result<Task> {
        if draft.project.trim().is_empty() {
            return Err(StoreError::Validation("task project is required".to_string()));
        }

        let now = Utc::now();
        let task_type = if draft.task_type.is_empty() {
            TYPE_TASK.to_string()
        } else {
            draft.task_type.to_lowercase()
        };
        let status = draft.status.unwrap_or_default();
        let labels_json =
            serde_json::to_string(&draft.labels).map_err(|e| StoreError::Internal(e.to_string()))?;

        let cross_deps_json =
            serde_json::to_string(&draft.cross_deps).map_err(|e| StoreError::Internal(e.to_string()))?;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = next_id();
            let inserted = self.conn.execute(
                "INSERT INTO tasks (id, title, description, status, priority, task_type, assignee,
                                    labels, estimate_minutes, parent, cross_deps, acceptance, design,
                                    notes, project, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    id,
                    draft.title,
                    draft.description,
                    status.as_str(),
                    draft.priority,
                    task_type,
                    draft.assignee,
                    labels_json,
                    draft.estimate_minutes,
                    draft.parent,
                    cross_deps_json,
                    draft.acceptance,
                    draft.design,
                    draft.notes,
                    draft.project,
                    format_ts(now),
                    format_ts(now),
                ],
            );

            match inserted {
                Ok(_) => {
                    debug!(%id, project = %draft.project, "Created task");
                    return self.get_task(&id);
                }
                Err(e) if is_constraint_violation(&e) => {
                    debug!(%id, attempt, "Task id collision, regenerating");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Internal(format!(
            "failed to generate a unique task id for project '{}' after {} attempts",
            draft.project, MAX_ID_ATTEMPTS
        )))
    }

    /// Fetch a single task with its dependencies hydrated
    pub fn get_task(&self, id: &str) -> Result<Task> {
        let task = self
            .conn
            .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;

        let mut tasks = vec![task];
        self.hydrate_dependencies(&mut tasks)?;
        Ok(tasks.pop().unwrap())
    }

    /// List tasks for a project, optionally filtered to a union of statuses
    ///
    /// An empty filter returns every task in the project.
    pub fn list_tasks(&self, project: &str, statuses: &[&str]) -> Result<Vec<Task>> {
        let mut tasks = if statuses.is_empty() {
            let mut stmt = self
                .conn
                .prepare("SELECT * FROM tasks WHERE project = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![project], row_to_task)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            let normalized: Vec<String> = statuses.iter().map(|s| s.to_lowercase()).collect();
            let placeholders = repeat_placeholders(normalized.len(), 2);
            let sql = format!(
                "SELECT * FROM tasks WHERE project = ?1 AND lower(status) IN ({placeholders}) ORDER BY id"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut params_vec: Vec<&dyn ToSql> = vec![&project];
            for s in &normalized {
                params_vec.push(s);
            }
            let rows = stmt.query_map(params_vec.as_slice(), row_to_task)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        self.hydrate_dependencies(&mut tasks)?;
        Ok(tasks)
    }

    /// Apply a targeted update to whitelisted columns
    ///
    /// Unknown keys fail the whole update with `Validation`. Assignments are
    /// ordered by column name so equivalent inputs produce identical SQL.
    /// `updated_at` is always bumped; zero affected rows yields `NotFound`.
    pub fn update_task(&self, id: &str, fields: &BTreeMap<String, Value>) -> Result<()> {
        if fields.is_empty() {
            return Err(StoreError::Validation("no fields to update".to_string()));
        }

        let mut sets: Vec<String> = Vec::with_capacity(fields.len() + 1);
        let mut values: Vec<Box<dyn ToSql>> = Vec::with_capacity(fields.len() + 2);

        // BTreeMap iteration is already sorted by column name
        for (column, value) in fields {
            if !UPDATABLE_COLUMNS.contains(&column.as_str()) {
                return Err(StoreError::Validation(format!("unknown task field '{column}'")));
            }
            values.push(coerce_column_value(column, value)?);
            sets.push(format!("{} = ?{}", column, values.len()));
        }

        values.push(Box::new(format_ts(Utc::now())));
        sets.push(format!("updated_at = ?{}", values.len()));
        values.push(Box::new(id.to_string()));

        let sql = format!(
            "UPDATE tasks SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );

        let params_ref: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let affected = self.conn.execute(&sql, params_ref.as_slice())?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }

        debug!(%id, fields = fields.len(), "Updated task");
        Ok(())
    }

    /// Set a task's status to closed; calling twice is not an error
    pub fn close_task(&self, id: &str) -> Result<()> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "status".to_string(),
            Value::String(TaskStatus::Closed.as_str().to_string()),
        );
        self.update_task(id, &fields)
    }

    /// Add a dependency edge: `from` depends on `to`
    ///
    /// Rejects empty ids, self-loops, cross-project pairs, and edges that
    /// would create a cycle. Adding an existing edge is a no-op.
    pub fn add_edge(&self, from: &str, to: &str) -> Result<()> {
        if from.is_empty() || to.is_empty() {
            return Err(StoreError::Validation("edge endpoints must be non-empty".to_string()));
        }
        if from == to {
            return Err(StoreError::Validation(format!("self-loop edge on task {from}")));
        }

        let from_project = self.task_project(from)?;
        let to_project = self.task_project(to)?;
        if from_project != to_project {
            return Err(StoreError::Validation(format!(
                "cross-project edge {from} ({from_project}) -> {to} ({to_project})"
            )));
        }

        // Walk the transitive closure from `to`; if `from` is reachable the
        // new edge would close a cycle.
        if self.is_reachable(to, from)? {
            return Err(StoreError::Validation(format!(
                "edge {from} -> {to} would create a dependency cycle"
            )));
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO task_edges (from_task, to_task) VALUES (?1, ?2)",
            params![from, to],
        )?;
        debug!(%from, %to, "Added edge");
        Ok(())
    }

    /// Remove a dependency edge; removing a missing edge is a no-op
    pub fn remove_edge(&self, from: &str, to: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM task_edges WHERE from_task = ?1 AND to_task = ?2",
            params![from, to],
        )?;
        Ok(())
    }

    /// Return open, non-epic tasks whose every dependency is closed
    ///
    /// Ordered by priority ascending, then estimate ascending (the storage
    /// side deliberately does not apply the dispatcher's stage-first order).
    pub fn ready_tasks(&self, project: &str) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.* FROM tasks t
             WHERE t.project = ?1
               AND lower(t.status) = 'open'
               AND lower(t.task_type) != 'epic'
               AND NOT EXISTS (
                   SELECT 1 FROM task_edges e
                   JOIN tasks d ON d.id = e.to_task
                   WHERE e.from_task = t.id AND lower(d.status) != 'closed'
               )
             ORDER BY t.priority ASC, t.estimate_minutes ASC",
        )?;
        let rows = stmt.query_map(params![project], row_to_task)?;
        let mut tasks = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        self.hydrate_dependencies(&mut tasks)?;
        Ok(tasks)
    }

    /// Fill `depends_on` for every task in one batch query
    fn hydrate_dependencies(&self, tasks: &mut [Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let placeholders = repeat_placeholders(ids.len(), 1);
        let sql =
            format!("SELECT from_task, to_task FROM task_edges WHERE from_task IN ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;

        let params_vec: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
        let mut by_from: HashMap<String, BTreeSet<String>> = HashMap::new();
        let rows = stmt.query_map(params_vec.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (from, to) = row?;
            by_from.entry(from).or_default().insert(to);
        }

        for task in tasks.iter_mut() {
            if let Some(deps) = by_from.remove(&task.id) {
                task.depends_on.extend(deps);
            }
        }
        Ok(())
    }

    fn task_project(&self, id: &str) -> Result<String> {
        self.conn
            .query_row("SELECT project FROM tasks WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
    }

    /// Whether `target` is reachable from `start` along dependency edges
    fn is_reachable(&self, start: &str, target: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "WITH RECURSIVE reach(id) AS (
                     SELECT to_task FROM task_edges WHERE from_task = ?1
                     UNION
                     SELECT e.to_task FROM task_edges e JOIN reach r ON e.from_task = r.id
                 )
                 SELECT 1 FROM reach WHERE id = ?2 LIMIT 1",
                params![start, target],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get("status")?;
    let labels_raw: String = row.get("labels")?;
    let cross_deps_raw: String = row.get("cross_deps")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;

    // Cross-project soft links seed the dependency set; local edges are
    // merged in during hydration.
    let cross_deps: Vec<String> = serde_json::from_str(&cross_deps_raw).unwrap_or_default();

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::parse(&status_raw).unwrap_or_default(),
        priority: row.get("priority")?,
        task_type: row.get("task_type")?,
        assignee: row.get("assignee")?,
        labels: serde_json::from_str(&labels_raw).unwrap_or_default(),
        estimate_minutes: row.get("estimate_minutes")?,
        parent: row.get("parent")?,
        acceptance: row.get("acceptance")?,
        design: row.get("design")?,
        notes: row.get("notes")?,
        project: row.get("project")?,
        depends_on: cross_deps.into_iter().collect(),
        created_at: parse_ts(&created_raw)?,
        updated_at: parse_ts(&updated_raw)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn repeat_placeholders(count: usize, start: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start + i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coerce a JSON value into a SQL parameter for the given column
///
/// Integer columns accept any numeric type; the labels column accepts a list
/// of strings or a JSON-encoded string; `parent` accepts null.
fn coerce_column_value(column: &str, value: &Value) -> Result<Box<dyn ToSql>> {
    match column {
        "priority" | "estimate_minutes" => match value {
            Value::Number(n) => {
                let v = n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .ok_or_else(|| StoreError::Validation(format!("invalid number for '{column}'")))?;
                if v < 0 {
                    return Err(StoreError::Validation(format!("'{column}' must be non-negative")));
                }
                Ok(Box::new(v))
            }
            _ => Err(StoreError::Validation(format!("'{column}' requires a numeric value"))),
        },
        "labels" | "cross_deps" => {
            let entries: Vec<String> = match value {
                Value::Array(_) => serde_json::from_value(value.clone())
                    .map_err(|_| StoreError::Validation(format!("{column} must be a list of strings")))?,
                Value::String(s) => serde_json::from_str(s)
                    .map_err(|_| StoreError::Validation(format!("{column} string must be a JSON array")))?,
                _ => {
                    return Err(StoreError::Validation(format!(
                        "{column} must be a list of strings or a JSON-encoded string"
                    )));
                }
            };
            let json = serde_json::to_string(&entries).map_err(|e| StoreError::Internal(e.to_string()))?;
            Ok(Box::new(json))
        }
        "status" => match value {
            Value::String(s) => {
                let status = TaskStatus::parse(s)
                    .ok_or_else(|| StoreError::Validation(format!("invalid status '{s}'")))?;
                Ok(Box::new(status.as_str().to_string()))
            }
            _ => Err(StoreError::Validation("status requires a string value".to_string())),
        },
        "parent" => match value {
            Value::Null => Ok(Box::new(None::<String>)),
            Value::String(s) => Ok(Box::new(Some(s.clone()))),
            _ => Err(StoreError::Validation("parent requires a string or null".to_string())),
        },
        _ => match value {
            Value::String(s) => Ok(Box::new(s.clone())),
            _ => Err(StoreError::Validation(format!("'{column}' requires a string value"))),
        },
    }
}
