//! Per-task execution workflow
//!
//! Implements the plan / gate / execute / review / scan / verify state
//! machine with deterministic step accounting and cross-agent handoff.
//!
//! - [`plan`] - structured plans and validation
//! - [`outcome`] - outcome records, step metrics, timeout sizing
//! - [`activities`] - the activity contract and its production wiring
//! - [`workflow`] - the state machine itself

pub mod activities;
pub mod outcome;
pub mod plan;
pub mod workflow;

use std::path::PathBuf;
use std::time::Duration;

pub use activities::{Activities, ExecActivities, ExecutionResult, FanOut, ReviewResult};
pub use outcome::{
    ActivityTokens, OutcomeRecord, OutcomeStatus, StepMetric, StepStatus, StepTimer,
    effective_slow_threshold, workflow_timeout,
};
pub use plan::{PlanStep, StructuredPlan};
pub use workflow::TaskExecution;

/// Review cycles (implementer/reviewer swaps) per execute attempt
pub const MAX_HANDOFFS: u32 = 3;

/// Outer attempts before escalating
pub const MAX_DOD_RETRIES: u32 = 3;

/// Plan activity attempts (one call plus two retries)
pub const PLAN_ATTEMPTS: u32 = 3;

/// Start-to-close budgets per activity
pub const PLAN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const REVIEW_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DOD_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const RECORD_TIMEOUT: Duration = Duration::from_secs(30);
pub const ESCALATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the dispatcher assembles for one execution workflow
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task_id: String,
    pub project: String,
    /// Directory agents and checks run in (the project workspace)
    pub work_dir: PathBuf,
    /// Title, description, acceptance, and design joined with blank lines
    pub prompt: String,
    /// Implementer agent chosen by rotation
    pub provider: String,
    /// Initial reviewer agent; swapped with the implementer on handoff
    pub reviewer: String,
    /// Definition-of-done check commands
    pub dod_checks: Vec<String>,
    /// Pre-planned subtasks skip the plan activity and the human gate
    pub auto_approve: bool,
    pub slow_step_threshold: Duration,
    pub estimate_minutes: u32,
}
