//! Foreman configuration types and loading

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main foreman configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine-wide settings
    pub general: GeneralConfig,

    /// API server settings
    pub api: ApiConfig,

    /// Dispatcher settings
    pub dispatch: DispatchConfig,

    /// Agent quality tiers
    pub tiers: TiersConfig,

    /// Per-project settings, keyed by project name
    pub projects: BTreeMap<String, ProjectConfig>,
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must load or the call fails. Otherwise the first
    /// readable candidate wins: `.foreman.yml` in the working directory,
    /// then `foreman/foreman.yml` under the user config dir, then built-in
    /// defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::parse_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        let candidates: Vec<PathBuf> = [
            Some(PathBuf::from(".foreman.yml")),
            dirs::config_dir().map(|dir| dir.join("foreman").join("foreman.yml")),
        ]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .collect();

        for candidate in candidates {
            match Self::parse_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!(path = %candidate.display(), error = %e, "Skipping unreadable config")
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Check whether `next` may replace this config at reload time
    ///
    /// The state database and the API bind address cannot be swapped live;
    /// either would require tearing down open connections or a bound socket.
    pub fn validate_reload(&self, next: &Config) -> std::result::Result<(), String> {
        if self.general.state_db != next.general.state_db {
            return Err(format!(
                "general.state-db changed ({} -> {}); restart required",
                self.general.state_db.display(),
                next.general.state_db.display()
            ));
        }
        if self.api.bind != next.api.bind {
            return Err(format!(
                "api.bind changed ({} -> {}); restart required",
                self.api.bind, next.api.bind
            ));
        }
        Ok(())
    }

    /// Dispatcher tick period
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.general.tick_interval_secs.max(1))
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Dispatcher period in seconds
    #[serde(rename = "tick-interval-secs")]
    pub tick_interval_secs: u64,

    /// Running execution workflows across all projects
    #[serde(rename = "max-concurrent-total")]
    pub max_concurrent_total: usize,

    /// New workflows started per tick
    #[serde(rename = "max-per-tick")]
    pub max_per_tick: usize,

    /// Step duration that flags a step metric as slow, in seconds; zero
    /// falls back to 2 minutes
    #[serde(rename = "slow-step-threshold-secs")]
    pub slow_step_threshold_secs: u64,

    /// One of debug/info/warn/error
    #[serde(rename = "log-level")]
    pub log_level: String,

    /// SQLite state database path; immutable at runtime
    #[serde(rename = "state-db")]
    pub state_db: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            max_concurrent_total: 3,
            max_per_tick: 3,
            slow_step_threshold_secs: 120,
            log_level: "info".to_string(),
            state_db: PathBuf::from("foreman.db"),
        }
    }
}

/// API server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address; immutable at runtime
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8700".to_string(),
        }
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub git: GitDispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitDispatchConfig {
    /// Running execution workflows per project
    #[serde(rename = "max-concurrent-per-project")]
    pub max_concurrent_per_project: usize,
}

impl Default for GitDispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_project: 3,
        }
    }
}

/// Ordered agent lists per quality tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub fast: Vec<String>,
    pub balanced: Vec<String>,
    pub premium: Vec<String>,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            fast: vec!["claude".to_string()],
            balanced: vec!["claude".to_string()],
            premium: vec!["claude".to_string()],
        }
    }
}

impl TiersConfig {
    /// Tier lists keyed by name, for [`crate::agent::TierMap`]
    pub fn as_map(&self) -> HashMap<String, Vec<String>> {
        HashMap::from([
            ("fast".to_string(), self.fast.clone()),
            ("balanced".to_string(), self.balanced.clone()),
            ("premium".to_string(), self.premium.clone()),
        ])
    }
}

/// Per-project settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub enabled: bool,

    /// Work directory agents and checks run in
    pub workspace: PathBuf,

    pub dod: DodConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workspace: PathBuf::from("."),
            dod: DodConfig::default(),
        }
    }
}

/// Definition-of-done settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DodConfig {
    /// Shell-like check commands; all must exit zero
    pub checks: Vec<String>,
}

impl Default for DodConfig {
    fn default() -> Self {
        Self {
            // At minimum a compile check
            checks: vec!["cargo check".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.general.tick_interval_secs, 60);
        assert_eq!(config.general.max_concurrent_total, 3);
        assert_eq!(config.general.max_per_tick, 3);
        assert_eq!(config.general.slow_step_threshold_secs, 120);
        assert_eq!(config.dispatch.git.max_concurrent_per_project, 3);
        assert_eq!(config.api.bind, "127.0.0.1:8700");
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
general:
  tick-interval-secs: 30
  max-concurrent-total: 5
  slow-step-threshold-secs: 90
  log-level: debug
  state-db: /var/lib/foreman/state.db

dispatch:
  git:
    max-concurrent-per-project: 2

tiers:
  fast: [haiku-cli]
  premium: [opus-cli, claude]

projects:
  billing:
    workspace: /srv/billing
    dod:
      checks: ["cargo check", "cargo test"]
  docs:
    enabled: false
    workspace: /srv/docs
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.general.tick_interval_secs, 30);
        assert_eq!(config.general.max_concurrent_total, 5);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.dispatch.git.max_concurrent_per_project, 2);
        assert_eq!(config.tiers.fast, vec!["haiku-cli"]);
        assert_eq!(config.tiers.premium, vec!["opus-cli", "claude"]);
        // Unspecified tier keeps its default
        assert_eq!(config.tiers.balanced, vec!["claude"]);

        let billing = &config.projects["billing"];
        assert!(billing.enabled);
        assert_eq!(billing.dod.checks.len(), 2);
        assert!(!config.projects["docs"].enabled);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
general:
  max-per-tick: 1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.general.max_per_tick, 1);
        assert_eq!(config.general.tick_interval_secs, 60);
    }

    #[test]
    fn test_reload_rejects_state_db_change() {
        let current = Config::default();
        let mut next = Config::default();
        next.general.state_db = PathBuf::from("elsewhere.db");

        let err = current.validate_reload(&next).unwrap_err();
        assert!(err.contains("state-db"));
        assert!(err.contains("restart"));
    }

    #[test]
    fn test_reload_rejects_bind_change() {
        let current = Config::default();
        let mut next = Config::default();
        next.api.bind = "0.0.0.0:9000".to_string();

        assert!(current.validate_reload(&next).is_err());
    }

    #[test]
    fn test_reload_accepts_tuning_changes() {
        let current = Config::default();
        let mut next = Config::default();
        next.general.tick_interval_secs = 10;
        next.general.max_concurrent_total = 8;

        assert!(current.validate_reload(&next).is_ok());
    }
}
