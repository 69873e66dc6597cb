//! Run evidence: captured logs, a JSON summary, and a printable report

use std::fs;
use std::path::Path;

use aido_sandbox::{RunOutcome, RunRecord, SandboxLayout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, Result};

pub const STDOUT_FILE: &str = "stdout.log";
pub const STDERR_FILE: &str = "stderr.log";
pub const SUMMARY_FILE: &str = "summary.json";

const REPORT_WIDTH: usize = 80;

/// Contents of `summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub sandbox_id: String,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub exit_code: i64,
    pub success: bool,
    pub outcome: RunOutcome,
    pub artifacts: Vec<String>,
}

/// Write `stdout.log`, `stderr.log` and `summary.json` into `outputs_dir`.
///
/// Returns the artifact paths relative to the sandbox directory, in the order
/// written.
pub fn write_evidence(
    outputs_dir: &Path,
    sandbox_id: &str,
    run: &RunRecord,
    stdout: &str,
    stderr: &str,
) -> Result<Vec<String>> {
    fs::create_dir_all(outputs_dir).map_err(AgentError::staging(outputs_dir))?;
    let mut artifacts = Vec::with_capacity(3);

    let stdout_path = outputs_dir.join(STDOUT_FILE);
    fs::write(&stdout_path, stdout).map_err(AgentError::staging(&stdout_path))?;
    artifacts.push(SandboxLayout::output_artifact(STDOUT_FILE));
    debug!(size = stdout.len(), "Wrote stdout.log");

    let stderr_path = outputs_dir.join(STDERR_FILE);
    fs::write(&stderr_path, stderr).map_err(AgentError::staging(&stderr_path))?;
    artifacts.push(SandboxLayout::output_artifact(STDERR_FILE));
    debug!(size = stderr.len(), "Wrote stderr.log");

    let summary = RunSummary {
        run_id: run.run_id.clone(),
        sandbox_id: sandbox_id.to_string(),
        task: run.task.clone(),
        started_at: run.started_at,
        completed_at: run.completed_at,
        duration_ms: run.duration_ms,
        exit_code: run.exit_code,
        success: run.exit_code == 0 && run.outcome.is_success(),
        outcome: run.outcome,
        artifacts: artifacts.clone(),
    };
    let summary_path = outputs_dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| AgentError::Internal(format!("failed to serialize run summary: {e}")))?;
    fs::write(&summary_path, json).map_err(AgentError::staging(&summary_path))?;
    artifacts.push(SandboxLayout::output_artifact(SUMMARY_FILE));

    Ok(artifacts)
}

/// Human-readable report for one run
pub fn render_report(sandbox_id: &str, run: &RunRecord, stdout: &str, stderr: &str) -> String {
    let heavy = "━".repeat(REPORT_WIDTH);
    let light = "─".repeat(REPORT_WIDTH);
    let status = if run.outcome.is_success() {
        "✓ SUCCESS".to_string()
    } else {
        format!("✗ FAILED ({})", run.outcome)
    };

    let mut report = String::new();
    report.push_str(&heavy);
    report.push_str("\nRun Report\n");
    report.push_str(&heavy);
    report.push('\n');
    report.push_str(&format!("Run ID:       {}\n", run.run_id));
    report.push_str(&format!("Sandbox:      {sandbox_id}\n"));
    report.push_str(&format!("Task:         {}\n", run.task));
    report.push_str(&format!("Status:       {status}\n"));
    report.push_str(&format!("Exit Code:    {}\n", run.exit_code));
    report.push_str(&format!(
        "Duration:     {:.2}s\n",
        run.duration_ms as f64 / 1000.0
    ));
    report.push_str(&format!("Started:      {}\n", run.started_at.to_rfc3339()));
    report.push_str(&format!("Completed:    {}\n", run.completed_at.to_rfc3339()));
    report.push_str(&heavy);
    report.push('\n');

    for (title, body) in [("Standard Output", stdout), ("Standard Error", stderr)] {
        if body.is_empty() {
            continue;
        }
        report.push_str(&format!("\n{title}:\n{light}\n"));
        report.push_str(body);
        if !body.ends_with('\n') {
            report.push('\n');
        }
        report.push_str(&light);
        report.push('\n');
    }

    report.push_str("\nArtifacts:\n");
    for artifact in &run.artifacts {
        report.push_str(&format!("  {artifact}\n"));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(outcome: RunOutcome, exit_code: i64) -> RunRecord {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        RunRecord {
            run_id: "run-00000001".to_string(),
            task: "task.py".to_string(),
            started_at,
            completed_at: started_at + chrono::Duration::milliseconds(1500),
            duration_ms: 1500,
            exit_code,
            outcome,
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_write_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = dir.path().join("outputs");
        let run = record(RunOutcome::Succeeded, 0);

        let artifacts = write_evidence(&outputs, "sbx1", &run, "hello\n", "").unwrap();

        assert_eq!(
            artifacts,
            vec![
                "outputs/stdout.log",
                "outputs/stderr.log",
                "outputs/summary.json"
            ]
        );
        assert_eq!(fs::read_to_string(outputs.join(STDOUT_FILE)).unwrap(), "hello\n");
        assert_eq!(fs::read_to_string(outputs.join(STDERR_FILE)).unwrap(), "");

        let summary: RunSummary =
            serde_json::from_str(&fs::read_to_string(outputs.join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert_eq!(summary.sandbox_id, "sbx1");
        assert!(summary.success);
        assert_eq!(summary.duration_ms, 1500);
        assert_eq!(summary.artifacts.len(), 2);
    }

    #[test]
    fn test_summary_marks_timeout_unsuccessful() {
        let dir = tempfile::tempdir().unwrap();
        let run = record(RunOutcome::TimedOut, 124);
        write_evidence(dir.path(), "sbx1", &run, "", "late").unwrap();

        let summary: RunSummary =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert!(!summary.success);
        assert_eq!(summary.outcome, RunOutcome::TimedOut);
    }

    #[test]
    fn test_render_report() {
        let mut run = record(RunOutcome::PolicyViolation, 1);
        run.artifacts = vec!["outputs/stdout.log".to_string()];

        let report = render_report("sbx1", &run, "out", "");

        assert!(report.starts_with(&"━".repeat(80)));
        assert!(report.contains("Status:       ✗ FAILED (policy_violation)"));
        assert!(report.contains("Duration:     1.50s"));
        assert!(report.contains("\nStandard Output:\n"));
        assert!(!report.contains("Standard Error"));
        assert!(report.ends_with("Artifacts:\n  outputs/stdout.log\n"));
    }
}
