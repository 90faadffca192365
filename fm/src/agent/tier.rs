//! Tier resolution: named quality tiers mapped to ordered agent lists

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

/// Fallback agent used when a tier is unknown or empty
pub const DEFAULT_AGENT: &str = "claude";

/// Maps tier names (fast, balanced, premium) to ordered agent lists
#[derive(Debug, Clone, Default)]
pub struct TierMap {
    tiers: HashMap<String, Vec<String>>,
}

impl TierMap {
    pub fn new(tiers: HashMap<String, Vec<String>>) -> Self {
        Self { tiers }
    }

    /// Resolve a tier to the first available agent
    ///
    /// An unknown tier, an empty list, or a list with no available agents
    /// falls back to [`DEFAULT_AGENT`].
    pub fn resolve(&self, tier: &str) -> String {
        self.resolve_with(tier, binary_available)
    }

    fn resolve_with(&self, tier: &str, available: impl Fn(&str) -> bool) -> String {
        if let Some(agents) = self.tiers.get(tier) {
            for agent in agents {
                if available(agent) {
                    debug!(tier, agent, "Resolved tier");
                    return agent.clone();
                }
            }
        }
        debug!(tier, fallback = DEFAULT_AGENT, "Tier fell back to default agent");
        DEFAULT_AGENT.to_string()
    }

    /// All agents across all tiers, in tier-then-list order (rotation pool)
    pub fn all_agents(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut agents = Vec::new();
        for tier in ["fast", "balanced", "premium"] {
            for agent in self.tiers.get(tier).into_iter().flatten() {
                if seen.insert(agent.clone()) {
                    agents.push(agent.clone());
                }
            }
        }
        agents
    }
}

/// Whether an agent binary can be invoked: either an explicit path to an
/// existing file, or a name found on PATH
fn binary_available(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                let candidate = dir.join(name);
                candidate.is_file()
            })
        })
        .unwrap_or(false)
}
