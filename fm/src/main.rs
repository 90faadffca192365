//! Foreman daemon entry point
//!
//! Loads configuration, wires the workflow graph onto the in-process engine,
//! starts the dispatcher and daily-groom schedules, and handles signals:
//! SIGHUP reloads the config (state-db and api.bind changes are rejected),
//! SIGINT/SIGTERM shut down.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::NaiveTime;
use clap::Parser;
use eyre::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{info, warn};

use backlogstore::TaskStore;
use foreman::agent::{CliAgent, TierMap};
use foreman::cli::Cli;
use foreman::config::Config;
use foreman::dispatch::Dispatcher;
use foreman::exec::Activities;
use foreman::groom::StrategicGroom;
use foreman::prompts::PromptSet;
use foreman::runtime::local::{LocalEngine, LocalSignalHub};
use foreman::runtime::schedule::{run_daily, run_interval};
use foreman::wiring::{ExecutionWiring, FanOutWiring};

/// UTC time of the daily strategic groom
const STRATEGIC_GROOM_AT: (u32, u32) = (6, 7);

fn setup_logging(level: &str) {
    let directive = match level {
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.into()))
        .init();
}

/// Apply command-line overrides onto the loaded config
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(secs) = cli.set_tick_interval {
        config.general.tick_interval_secs = secs;
    }
    if cli.dev {
        config.general.log_level = "debug".to_string();
    }
    if cli.disable_anthropic {
        for tier in [
            &mut config.tiers.fast,
            &mut config.tiers.balanced,
            &mut config.tiers.premium,
        ] {
            tier.retain(|agent| !agent.contains("claude") && !agent.contains("anthropic"));
            if tier.is_empty() {
                if let Some(fallback) = &cli.fallback_model {
                    tier.push(fallback.clone());
                }
            }
        }
    }
}

fn reload_config(cli: &Cli, shared: &Arc<RwLock<Config>>) {
    let mut next = match Config::load(cli.config.as_ref()) {
        Ok(next) => next,
        Err(e) => {
            warn!(error = %e, "Config reload failed, keeping current config");
            return;
        }
    };
    apply_overrides(&mut next, cli);

    let verdict = {
        let current = shared.read().expect("config lock poisoned");
        current.validate_reload(&next)
    };
    match verdict {
        Ok(()) => {
            *shared.write().expect("config lock poisoned") = next;
            info!("Config reloaded");
        }
        Err(reason) => warn!(%reason, "Config reload rejected"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);
    setup_logging(&config.general.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        state_db = %config.general.state_db.display(),
        projects = config.projects.len(),
        "Foreman starting"
    );

    // Shared resources
    let store = Arc::new(Mutex::new(
        TaskStore::open(&config.general.state_db).context("Failed to open task store")?,
    ));
    let engine = LocalEngine::new();
    let signals = LocalSignalHub::new();
    let prompts = Arc::new(PromptSet::new()?);
    let agent = Arc::new(CliAgent::new());

    let tiers = TierMap::new(config.tiers.as_map());
    let fast_agent = tiers.resolve("fast");
    let premium_agent = tiers.resolve("premium");

    let state_dir: PathBuf = config
        .general
        .state_db
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    // Workflow wiring
    let activities = Arc::new(Activities::new(
        agent.clone(),
        Arc::clone(&prompts),
        Arc::clone(&store),
        state_dir.join("outcomes.jsonl"),
    ));
    let fanout = Arc::new(FanOutWiring::new(
        engine.clone(),
        agent.clone(),
        Arc::clone(&prompts),
        Arc::clone(&store),
        fast_agent,
        state_dir,
    ));
    let launcher = Arc::new(ExecutionWiring::new(
        engine.clone(),
        signals.clone(),
        activities,
        fanout,
    ));

    let shared_config = Arc::new(RwLock::new(config.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&shared_config),
        Arc::clone(&store),
        engine.clone(),
        launcher,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Dispatcher schedule (overlap policy: skip)
    let dispatch_handle = {
        let dispatcher = Arc::clone(&dispatcher);
        let rx = shutdown_rx.clone();
        let period = config.tick_interval();
        tokio::spawn(async move {
            run_interval("dispatch", period, rx, move || {
                let dispatcher = Arc::clone(&dispatcher);
                async move { dispatcher.tick().await }
            })
            .await;
        })
    };

    // Daily strategic groom across enabled projects
    let groom_handle = {
        let store = Arc::clone(&store);
        let shared_config = Arc::clone(&shared_config);
        let rx = shutdown_rx.clone();
        let groom = Arc::new(StrategicGroom::new(store, agent, prompts, premium_agent));
        let at = NaiveTime::from_hms_opt(STRATEGIC_GROOM_AT.0, STRATEGIC_GROOM_AT.1, 0)
            .expect("valid groom time");
        tokio::spawn(async move {
            run_daily("strategic-groom", at, rx, move || {
                let groom = Arc::clone(&groom);
                let projects: Vec<(String, PathBuf)> = {
                    let config = shared_config.read().expect("config lock poisoned");
                    config
                        .projects
                        .iter()
                        .filter(|(_, p)| p.enabled)
                        .map(|(name, p)| (name.clone(), p.workspace.clone()))
                        .collect()
                };
                async move {
                    for (project, workspace) in projects {
                        let briefing = workspace.join("morning_briefing.md");
                        if let Err(e) = groom.run(&project, &workspace, &briefing).await {
                            warn!(project = %project, error = %e, "Strategic groom failed");
                        }
                    }
                    Ok(())
                }
            })
            .await;
        })
    };

    // Signal handling: SIGHUP reloads, SIGINT/SIGTERM stop
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = sighup.recv() => reload_config(&cli, &shared_config),
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(dispatch_handle, groom_handle);
    info!("Foreman stopped");
    Ok(())
}
