//! Outcome records and step accounting for the execution workflow

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::agent::TokenUsage;

/// Slow-step threshold applied when the configured value is unset or zero
pub const DEFAULT_SLOW_STEP_THRESHOLD: Duration = Duration::from_secs(120);

/// Floor of the per-task workflow execution timeout
const MIN_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Ceiling of the per-task workflow execution timeout
const MAX_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Terminal status of an execution workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Rejected,
    Escalated,
    Failed,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Rejected => "rejected",
            OutcomeStatus::Escalated => "escalated",
            OutcomeStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

/// Timing and status of one state-machine step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetric {
    /// Step name, attempt-indexed where applicable (`execute[1]`, `dod[2]`)
    pub name: String,
    pub duration_s: f64,
    pub status: StepStatus,
    /// Duration reached the slow-step threshold
    pub slow: bool,
}

/// Times a step from entry to exit
pub struct StepTimer {
    name: String,
    started: Instant,
}

impl StepTimer {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
        }
    }

    /// Close the step with a status, flagging it slow against the threshold
    pub fn finish(self, status: StepStatus, slow_threshold: Duration) -> StepMetric {
        let elapsed = self.started.elapsed();
        StepMetric {
            name: self.name,
            duration_s: elapsed.as_secs_f64(),
            status,
            slow: elapsed >= slow_threshold,
        }
    }
}

/// Token usage attributed to one activity of the final attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityTokens {
    pub activity: String,
    pub tokens: TokenUsage,
}

/// The durable record of how an execution workflow ended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub task_id: String,
    pub status: OutcomeStatus,
    pub exit_code: i32,
    pub duration_s: f64,
    pub dod_passed: bool,
    /// Failure text from the last definition-of-done run, if any
    pub dod_failure: String,
    /// Implementer/reviewer swaps performed across the whole run
    pub handoffs: u32,
    /// Per-activity usage: the one-time plan cost plus the final attempt
    pub activity_tokens: Vec<ActivityTokens>,
    pub steps: Vec<StepMetric>,
}

impl OutcomeRecord {
    /// Total input tokens across recorded activities
    pub fn total_input_tokens(&self) -> u64 {
        self.activity_tokens.iter().map(|a| a.tokens.input).sum()
    }

    /// Total output tokens across recorded activities
    pub fn total_output_tokens(&self) -> u64 {
        self.activity_tokens.iter().map(|a| a.tokens.output).sum()
    }
}

/// Size the workflow execution timeout from the task estimate:
/// `clamp(3 × estimate, 30 min, 4 h)`
pub fn workflow_timeout(estimate_minutes: u32) -> Duration {
    let scaled = Duration::from_secs(u64::from(estimate_minutes) * 3 * 60);
    scaled.clamp(MIN_WORKFLOW_TIMEOUT, MAX_WORKFLOW_TIMEOUT)
}

/// Effective slow-step threshold: zero (unset) defaults to 2 minutes
pub fn effective_slow_threshold(configured_secs: u64) -> Duration {
    if configured_secs == 0 {
        DEFAULT_SLOW_STEP_THRESHOLD
    } else {
        Duration::from_secs(configured_secs)
    }
}
