use std::path::{Path, PathBuf};

use aido_agent::{connect_runtime, Orchestrator, OrchestratorConfig, RunOptions, TaskRunner};
use aido_sandbox::SandboxStore;
use anyhow::{Context, Result};
use serde_json::json;

use super::print_json;

/// Run a task and print its report. Returns the task's exit code.
pub(crate) async fn handle_run(
    options: RunOptions,
    workspace: &Path,
    docker_socket: Option<PathBuf>,
    json: bool,
) -> Result<i64> {
    let config = OrchestratorConfig {
        docker_socket,
        ..Default::default()
    };
    let runtime = connect_runtime(config.docker_socket.as_deref())
        .context("Failed to connect to the container runtime")?;

    let store = SandboxStore::for_workspace(workspace);
    let runner = TaskRunner::new(Orchestrator::new(runtime, store, workspace, config));

    if !json {
        eprintln!("Running {}...", options.task.display());
    }
    let report = runner
        .run(&options)
        .await
        .with_context(|| format!("Failed to run {}", options.task.display()))?;

    if json {
        print_json(&json!({
            "sandbox_id": report.sandbox_id,
            "run": report.record,
            "image": report.execution.image,
            "violations": report.execution.violations,
            "stdout": report.execution.stdout,
            "stderr": report.execution.stderr,
        }))?;
    } else {
        print!("{}", report.render());
    }

    Ok(report.record.exit_code)
}
