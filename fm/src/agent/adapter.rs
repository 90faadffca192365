//! Agent CLI subprocess adapter
//!
//! Invokes an agent binary with the prompt, captures stdout/stderr without
//! pipe deadlock, heartbeats the activity context every 5 s while the
//! subprocess runs, and kills the subprocess on cancellation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::runtime::ActivityContext;

use super::{AgentError, AgentInvoker, AgentKind, AgentOutput, parse_agent_stdout};

/// Heartbeat cadence while a subprocess runs
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Stderr kept on non-zero exit
const MAX_STDERR_CHARS: usize = 4096;

/// Runs agents as command-line subprocesses
pub struct CliAgent {
    heartbeat_interval: Duration,
}

impl CliAgent {
    pub fn new() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    /// Override the heartbeat cadence (tests)
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    fn build_command(&self, kind: AgentKind, agent: &str, prompt: &str, work_dir: &Path) -> Command {
        let mut cmd = Command::new(agent);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("json")
            .env("FOREMAN_AGENT_ROLE", kind.as_str())
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for CliAgent {
    fn default() -> Self {
        Self::new()
    }
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

#[async_trait]
impl AgentInvoker for CliAgent {
    async fn run(
        &self,
        ctx: &ActivityContext,
        kind: AgentKind,
        agent: &str,
        prompt: &str,
        work_dir: &Path,
    ) -> Result<AgentOutput, AgentError> {
        debug!(agent, kind = kind.as_str(), work_dir = %work_dir.display(), prompt_len = prompt.len(), "Invoking agent");

        let mut child = self
            .build_command(kind, agent, prompt, work_dir)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                agent: agent.to_string(),
                source,
            })?;

        // Drain pipes concurrently so a chatty agent cannot deadlock on a
        // full pipe buffer while we wait for exit.
        let mut stdout_pipe = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = heartbeat.tick() => ctx.heartbeat(),
                _ = ctx.cancelled() => {
                    warn!(agent, "Cancellation requested, killing agent subprocess");
                    let _ = child.kill().await;
                    return Err(AgentError::Cancelled {
                        agent: agent.to_string(),
                    });
                }
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let mut stderr = stderr;
            truncate_at_char_boundary(&mut stderr, MAX_STDERR_CHARS);
            return Err(AgentError::NonZeroExit {
                agent: agent.to_string(),
                code: status.code().unwrap_or(-1),
                stderr,
            });
        }

        let output = parse_agent_stdout(agent, &stdout);
        debug!(
            agent,
            input_tokens = output.tokens.input,
            output_tokens = output.tokens.output,
            "Agent finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable stub agent script into `dir`
    fn stub_agent(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_runs_stub_agent_and_parses_json() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(
            dir.path(),
            "agent.sh",
            r#"echo '{"result": "hello", "usage": {"input_tokens": 7, "output_tokens": 2}}'"#,
        );

        let (ctx, _cancel) = ActivityContext::new();
        let output = CliAgent::new()
            .run(&ctx, AgentKind::Code, &agent, "do the thing", dir.path())
            .await
            .unwrap();

        assert_eq!(output.text, "hello");
        assert_eq!(output.tokens.input, 7);
        assert_eq!(output.tokens.output, 2);
    }

    #[tokio::test]
    async fn test_plain_text_agent_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "plain.sh", "echo just words");

        let (ctx, _cancel) = ActivityContext::new();
        let output = CliAgent::new()
            .run(&ctx, AgentKind::Review, &agent, "prompt", dir.path())
            .await
            .unwrap();

        assert_eq!(output.text, "just words");
        assert!(output.tokens.is_zero());
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "bad.sh", "echo broken >&2; exit 3");

        let (ctx, _cancel) = ActivityContext::new();
        let err = CliAgent::new()
            .run(&ctx, AgentKind::Code, &agent, "prompt", dir.path())
            .await
            .unwrap_err();

        match err {
            AgentError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_heartbeats_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "slow.sh", "sleep 0.3; echo ok");

        let (ctx, _cancel) = ActivityContext::new();
        CliAgent::new()
            .with_heartbeat_interval(Duration::from_millis(50))
            .run(&ctx, AgentKind::Code, &agent, "prompt", dir.path())
            .await
            .unwrap();

        assert!(ctx.heartbeat_count() >= 2);
    }

    #[tokio::test]
    async fn test_cancellation_kills_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "hang.sh", "sleep 30; echo never");

        let (ctx, cancel) = ActivityContext::new();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = CliAgent::new()
            .run(&ctx, AgentKind::Code, &agent, "prompt", dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
