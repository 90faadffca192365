//! Definition-of-Done check execution
//!
//! Runs the project-configured check commands in the task's work directory.
//! Every check must exit zero for the task to count as done.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::runtime::ActivityContext;

/// Output kept per check
const MAX_CHECK_OUTPUT: usize = 4096;

/// Result of one check command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub command: String,
    pub exit_code: i32,
    /// Combined stdout+stderr, truncated
    pub output: String,
    pub passed: bool,
    pub duration_ms: u64,
}

/// Result of the whole check sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DodReport {
    pub checks: Vec<CheckResult>,
    pub passed: bool,
}

impl DodReport {
    /// One-line-per-failure summary fed back into the plan on retry
    pub fn failure_summary(&self) -> String {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("check '{}' failed (exit {}): {}", c.command, c.exit_code, c.output.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Run every check command with `sh -c` in the work directory
///
/// Checks run sequentially; each one's stdout+stderr and duration are
/// captured. The overall report passes iff every check passed. A check that
/// exceeds `timeout` fails with exit code -1 rather than erroring the
/// activity.
pub async fn run_checks(
    commands: &[String],
    work_dir: &Path,
    timeout: Duration,
    ctx: &ActivityContext,
) -> eyre::Result<DodReport> {
    let mut report = DodReport {
        checks: Vec::with_capacity(commands.len()),
        passed: true,
    };

    for command in commands {
        ctx.heartbeat();
        let start = std::time::Instant::now();

        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(work_dir)
                .output(),
        )
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let check = match result {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                truncate_at_char_boundary(&mut combined, MAX_CHECK_OUTPUT);
                CheckResult {
                    command: command.clone(),
                    exit_code,
                    output: combined,
                    passed: exit_code == 0,
                    duration_ms,
                }
            }
            Ok(Err(e)) => CheckResult {
                command: command.clone(),
                exit_code: -1,
                output: format!("failed to run: {e}"),
                passed: false,
                duration_ms,
            },
            Err(_) => CheckResult {
                command: command.clone(),
                exit_code: -1,
                output: format!("timed out after {timeout:?}"),
                passed: false,
                duration_ms,
            },
        };

        debug!(command = %check.command, exit_code = check.exit_code, passed = check.passed, "Check finished");
        report.passed &= check.passed;
        report.checks.push(check);
    }

    info!(
        checks = report.checks.len(),
        passed = report.passed,
        "Definition-of-done run finished"
    );
    Ok(report)
}

/// Truncate without splitting a multi-byte character
fn truncate_at_char_boundary(s: &mut String, mut max: usize) {
    if s.len() <= max {
        return;
    }
    while !s.is_char_boundary(max) {
        max -= 1;
    }
    s.truncate(max);
}
