use clap::Parser;
use colored::*;
use eyre::{Context, Result};

use backlogstore::cli::{Cli, Command};
use backlogstore::{Task, TaskDraft, TaskStore};

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();
}

fn print_task_line(task: &Task) {
    let status = match task.status {
        backlogstore::TaskStatus::Open => "open".green(),
        backlogstore::TaskStatus::Closed => "closed".dimmed(),
    };
    println!(
        "{}  [{}] p{} {}m  {}",
        task.id.cyan(),
        status,
        task.priority,
        task.estimate_minutes,
        task.title
    );
}

fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let store = TaskStore::open(&cli.db).context("Failed to open task store")?;

    match cli.command {
        Command::Create {
            project,
            title,
            description,
            priority,
            task_type,
            estimate,
            label,
            parent,
        } => {
            let draft = TaskDraft {
                project,
                title,
                description,
                priority,
                task_type,
                estimate_minutes: estimate,
                labels: label,
                parent,
                ..Default::default()
            };
            let task = store.create_task(draft)?;
            println!("{} Created task: {}", "✓".green(), task.id.cyan());
        }
        Command::List { project, status } => {
            let statuses: Vec<&str> = status.iter().map(|s| s.as_str()).collect();
            let tasks = store.list_tasks(&project, &statuses)?;
            if tasks.is_empty() {
                println!("No tasks found");
            } else {
                for task in &tasks {
                    print_task_line(task);
                }
            }
        }
        Command::Show { id } => {
            let task = store.get_task(&id)?;
            print_task_line(&task);
            if !task.description.is_empty() {
                println!("  {}", task.description);
            }
            if !task.labels.is_empty() {
                println!("  labels: {}", task.labels.join(", ").yellow());
            }
            if let Some(parent) = &task.parent {
                println!("  parent: {}", parent);
            }
            for dep in &task.depends_on {
                println!("  depends on: {}", dep.cyan());
            }
        }
        Command::Close { id } => {
            store.close_task(&id)?;
            println!("{} Closed task: {}", "✓".green(), id);
        }
        Command::Ready { project } => {
            let tasks = store.ready_tasks(&project)?;
            if tasks.is_empty() {
                println!("No ready tasks");
            } else {
                for task in &tasks {
                    print_task_line(task);
                }
            }
        }
        Command::DepAdd { from, to } => {
            store.add_edge(&from, &to)?;
            println!("{} {} now depends on {}", "✓".green(), from.cyan(), to.cyan());
        }
        Command::DepRm { from, to } => {
            store.remove_edge(&from, &to)?;
            println!("{} Removed dependency {} -> {}", "✓".green(), from, to);
        }
    }

    Ok(())
}
