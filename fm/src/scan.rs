//! Optional static-analysis scan
//!
//! Runs semgrep against the project's rule directory after review and before
//! the definition-of-done checks. The scan is advisory infrastructure: a
//! missing tool or rule directory passes, and tool errors never block the
//! workflow.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::runtime::ActivityContext;

/// Findings kept per scan
const MAX_FINDINGS: usize = 20;

/// Result of a scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub passed: bool,
    /// Human-readable finding lines (rule, path, message)
    pub findings: Vec<String>,
    /// True when the scan did not actually run (no tool, no rules)
    pub skipped: bool,
}

impl ScanReport {
    fn skipped() -> Self {
        Self {
            passed: true,
            findings: Vec::new(),
            skipped: true,
        }
    }

    /// Summary appended to the plan's previous errors on findings
    pub fn finding_summary(&self) -> String {
        format!(
            "static analysis reported {} finding(s):\n{}",
            self.findings.len(),
            self.findings.join("\n")
        )
    }
}

#[derive(Debug, Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResult>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    #[serde(default)]
    check_id: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    extra: SemgrepExtra,
}

#[derive(Debug, Default, Deserialize)]
struct SemgrepExtra {
    #[serde(default)]
    message: String,
}

/// Run semgrep over the work directory with the project's rule directory
///
/// Passes when the rule directory does not exist, the tool is absent, or no
/// findings are reported. Semgrep's own errors are logged and treated as a
/// pass; the scan is a pre-filter, not a gate that may amplify outages.
pub async fn run_scan(work_dir: &Path, rules_dir: &Path, ctx: &ActivityContext) -> eyre::Result<ScanReport> {
    if !rules_dir.is_dir() {
        debug!(rules_dir = %rules_dir.display(), "No rule directory, skipping scan");
        return Ok(ScanReport::skipped());
    }

    ctx.heartbeat();
    let output = tokio::process::Command::new("semgrep")
        .arg("--config")
        .arg(rules_dir)
        .arg("--json")
        .arg("--quiet")
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("semgrep not installed, skipping scan");
            return Ok(ScanReport::skipped());
        }
        Err(e) => {
            warn!(error = %e, "Scan tool failed to start, treating as pass");
            return Ok(ScanReport::skipped());
        }
    };

    // Semgrep exits non-zero when findings exist; parse stdout regardless
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: SemgrepOutput = match serde_json::from_str(&stdout) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Unparseable scan output, treating as pass");
            return Ok(ScanReport::skipped());
        }
    };

    if !parsed.errors.is_empty() {
        warn!(errors = parsed.errors.len(), "Scan reported internal errors");
    }

    let findings: Vec<String> = parsed
        .results
        .iter()
        .take(MAX_FINDINGS)
        .map(|r| format!("{}: {} ({})", r.check_id, r.extra.message, r.path))
        .collect();

    info!(findings = findings.len(), "Scan finished");
    Ok(ScanReport {
        passed: findings.is_empty(),
        findings,
        skipped: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_rules_dir_passes() {
        let temp = tempdir().unwrap();
        let (ctx, _cancel) = ActivityContext::new();

        let report = run_scan(temp.path(), &temp.path().join(".semgrep"), &ctx)
            .await
            .unwrap();

        assert!(report.passed);
        assert!(report.skipped);
    }

    #[test]
    fn test_semgrep_output_parses() {
        let raw = r#"{
            "results": [
                {"check_id": "no-unwrap", "path": "src/lib.rs", "extra": {"message": "avoid unwrap"}}
            ],
            "errors": []
        }"#;
        let parsed: SemgrepOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].check_id, "no-unwrap");
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn test_finding_summary_shape() {
        let report = ScanReport {
            passed: false,
            findings: vec!["no-unwrap: avoid unwrap (src/lib.rs)".to_string()],
            skipped: false,
        };
        let summary = report.finding_summary();
        assert!(summary.contains("1 finding"));
        assert!(summary.contains("no-unwrap"));
    }
}
