//! CLI argument parsing for backlogstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bs")]
#[command(author, version, about = "Task DAG backlog store", long_about = None)]
pub struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, default_value = "foreman.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a task
    Create {
        /// Owning project
        #[arg(required = true)]
        project: String,

        /// Task title
        #[arg(required = true)]
        title: String,

        /// Longer description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Priority (lower = higher priority)
        #[arg(short, long, default_value = "2")]
        priority: u32,

        /// Task type (task, epic, ...)
        #[arg(short = 't', long = "type", default_value = "task")]
        task_type: String,

        /// Estimated effort in minutes
        #[arg(short, long, default_value = "0")]
        estimate: u32,

        /// Labels (repeatable)
        #[arg(short, long)]
        label: Vec<String>,

        /// Parent task id
        #[arg(long)]
        parent: Option<String>,
    },

    /// List tasks in a project
    List {
        /// Project to list
        #[arg(required = true)]
        project: String,

        /// Status filter (repeatable; empty = all)
        #[arg(short, long)]
        status: Vec<String>,
    },

    /// Show a single task with its dependencies
    Show {
        /// Task id
        #[arg(required = true)]
        id: String,
    },

    /// Close a task
    Close {
        /// Task id
        #[arg(required = true)]
        id: String,
    },

    /// Show tasks ready for dispatch
    Ready {
        /// Project to query
        #[arg(required = true)]
        project: String,
    },

    /// Add a dependency edge (from depends on to)
    DepAdd {
        #[arg(required = true)]
        from: String,

        #[arg(required = true)]
        to: String,
    },

    /// Remove a dependency edge
    DepRm {
        #[arg(required = true)]
        from: String,

        #[arg(required = true)]
        to: String,
    },
}
