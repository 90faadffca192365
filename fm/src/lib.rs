//! Foreman - autonomous backlog-to-code orchestrator
//!
//! Foreman drains per-project backlogs of human-described work items through
//! plan → gate → execute → review → scan → verify stages using external LLM
//! command-line agents, then fans out learning and backlog-grooming work.
//! The backlog itself lives in the `backlogstore` crate; this crate holds
//! the orchestration engine.
//!
//! # Modules
//!
//! - [`runtime`] - facade over the external durable workflow engine
//! - [`dispatch`] - periodic ready-task scan and child workflow launches
//! - [`exec`] - the per-task execution state machine
//! - [`agent`] - uniform contract over agent command-line tools
//! - [`dod`] - definition-of-done check execution
//! - [`scan`] - optional static-analysis pre-filter
//! - [`learn`] - post-success lesson extraction and project memory
//! - [`groom`] - tactical and strategic backlog grooming
//! - [`prompts`] - embedded handlebars prompt templates
//! - [`config`] - configuration types and loading
//! - [`wiring`] - connects the workflow graph to the engine

pub mod agent;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod dod;
pub mod exec;
pub mod groom;
pub mod learn;
pub mod prompts;
pub mod runtime;
pub mod scan;
pub mod wiring;

// Re-export commonly used types
pub use agent::{AgentInvoker, AgentKind, AgentOutput, CliAgent, TierMap, TokenUsage};
pub use config::Config;
pub use dispatch::{Dispatcher, ExecutionLauncher};
pub use exec::{
    ExecActivities, FanOut, OutcomeRecord, OutcomeStatus, StepMetric, StepStatus, StructuredPlan,
    TaskExecution, TaskRequest, workflow_timeout,
};
pub use groom::{Mutation, MutationAction, StrategicGroom, TacticalGroom, normalize_strategic_mutations};
pub use learn::{Learner, LearnerInput, Lesson, LessonStore};
pub use prompts::PromptSet;
pub use runtime::{
    ActivityContext, ChildWorkflowOptions, IdReusePolicy, ParentClosePolicy, SignalHub, SpawnError,
    StartAck, WorkflowSpawner,
};
pub use wiring::{ExecutionWiring, FanOutWiring};
