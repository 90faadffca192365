//! CLI argument parsing for the foreman daemon

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fm")]
#[command(author, version, about = "Autonomous backlog-to-code orchestrator", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Development mode: debug logging
    #[arg(long)]
    pub dev: bool,

    /// Drop anthropic-backed agents from every tier
    #[arg(long)]
    pub disable_anthropic: bool,

    /// Agent substituted into tiers emptied by --disable-anthropic
    #[arg(long, requires = "disable_anthropic")]
    pub fallback_model: Option<String>,

    /// Override the dispatcher tick interval, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub set_tick_interval: Option<u64>,
}
