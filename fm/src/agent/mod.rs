//! Uniform contract over external LLM command-line agents
//!
//! Every agent is an external binary handed a prompt. One recognized
//! provider emits structured JSON ({result, usage, cost_usd}); everything
//! else yields plain text. The adapter tolerates either.

pub mod adapter;
pub mod tier;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::ActivityContext;

pub use adapter::CliAgent;
pub use tier::{DEFAULT_AGENT, TierMap};

/// What the invocation is for; influences logging and tool restrictions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    /// Implementation work in the task's work directory
    Code,
    /// Advisory review of an execution result
    Review,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Code => "code",
            AgentKind::Review => "review",
        }
    }
}

/// Token usage extracted from an agent invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_creation: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            ..Default::default()
        }
    }

    /// Accumulate another invocation's usage
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_creation += other.cache_creation;
    }

    pub fn is_zero(&self) -> bool {
        self.input == 0 && self.output == 0 && self.cache_read == 0 && self.cache_creation == 0
    }
}

/// Result of one agent invocation
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    /// Extracted result text (or raw stdout on the fallback path)
    pub text: String,
    pub tokens: TokenUsage,
    /// Reported cost, when the provider publishes one
    pub cost_usd: Option<f64>,
    /// The agent binary that produced this output
    pub agent: String,
}

/// Errors from the agent adapter
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent '{agent}': {source}")]
    Spawn {
        agent: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent '{agent}' exited with code {code}: {stderr}")]
    NonZeroExit { agent: String, code: i32, stderr: String },

    #[error("agent '{agent}' was cancelled")]
    Cancelled { agent: String },

    #[error("agent io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Spawn failures and non-zero exits may be provider blips worth a retry
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Spawn { .. } => false,
            AgentError::NonZeroExit { .. } => true,
            AgentError::Cancelled { .. } => false,
            AgentError::Io(_) => true,
        }
    }
}

/// The contract exposed to the execution, learner, and groom workflows
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run an agent with a prompt in a work directory
    ///
    /// Implementations heartbeat the activity context every 5 s and kill the
    /// subprocess when the context is cancelled.
    async fn run(
        &self,
        ctx: &ActivityContext,
        kind: AgentKind,
        agent: &str,
        prompt: &str,
        work_dir: &Path,
    ) -> Result<AgentOutput, AgentError>;
}

/// Structured payload published by the recognized JSON provider
#[derive(Debug, Deserialize)]
struct ProviderPayload {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    usage: Option<ProviderUsage>,
    #[serde(default, alias = "total_cost_usd")]
    cost_usd: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderUsage {
    #[serde(default, alias = "input_tokens")]
    input: u64,
    #[serde(default, alias = "output_tokens")]
    output: u64,
    #[serde(default, alias = "cache_read_input_tokens")]
    cache_read: u64,
    #[serde(default, alias = "cache_creation_input_tokens")]
    cache_creation: u64,
}

/// Parse agent stdout: JSON first, raw text fallback
///
/// Falls back to the raw stdout when the payload does not parse, or when it
/// parses but carries an empty result with zero tokens.
pub fn parse_agent_stdout(agent: &str, stdout: &str) -> AgentOutput {
    if let Ok(payload) = serde_json::from_str::<ProviderPayload>(stdout.trim()) {
        let usage = payload.usage.unwrap_or_default();
        let tokens = TokenUsage {
            input: usage.input,
            output: usage.output,
            cache_read: usage.cache_read,
            cache_creation: usage.cache_creation,
        };
        let text = payload.result.unwrap_or_default();
        if !text.is_empty() || !tokens.is_zero() {
            return AgentOutput {
                text,
                tokens,
                cost_usd: payload.cost_usd,
                agent: agent.to_string(),
            };
        }
    }

    AgentOutput {
        text: stdout.trim().to_string(),
        tokens: TokenUsage::default(),
        cost_usd: None,
        agent: agent.to_string(),
    }
}

/// Strip markdown code fences around a JSON block, if present
///
/// Agents frequently wrap JSON answers in ```json fences even when asked not
/// to; the groom and plan parsers feed their output through this first.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}
