use std::fs;
use std::path::Path;

use aido_agent::evidence::{STDERR_FILE, STDOUT_FILE};
use aido_sandbox::SandboxStore;
use anyhow::{Context, Result};
use serde_json::json;

use super::print_json;

/// Print captured output of a sandbox's latest run
pub(crate) fn handle_logs(
    sandbox: Option<&str>,
    stderr_only: bool,
    workspace: &Path,
    json: bool,
) -> Result<()> {
    let store = SandboxStore::for_workspace(workspace);
    let metadata = match sandbox {
        Some(id) => store
            .load(id)
            .with_context(|| format!("Failed to load sandbox {id}"))?,
        None => store
            .get_latest()
            .context("Failed to list sandboxes")?
            .context("No sandbox found. Create one with: aido sandbox up")?,
    };

    let outputs = store.layout(&metadata.id).outputs_dir();
    let stdout = if stderr_only {
        None
    } else {
        read_log(&outputs.join(STDOUT_FILE))?
    };
    let stderr = read_log(&outputs.join(STDERR_FILE))?;
    let last_run = store.load_latest_run(&metadata.id)?;

    if json {
        return print_json(&json!({
            "sandbox_id": metadata.id,
            "status": metadata.status,
            "run": last_run,
            "stdout": stdout,
            "stderr": stderr,
        }));
    }

    println!("Logs for sandbox {} ({}):", metadata.id, metadata.config.name);
    println!("Status: {}", metadata.status);
    if let Some(run) = &last_run {
        println!("Run:    {} ({}, exit {})", run.run_id, run.outcome, run.exit_code);
    }
    println!();

    if last_run.is_none() && stdout.is_none() && stderr.is_none() {
        println!("No logs available. Run a task first: aido run <task>");
        return Ok(());
    }

    if let Some(stdout) = stdout.filter(|s| !s.trim().is_empty()) {
        println!("--- stdout ---");
        println!("{stdout}");
    }
    if let Some(stderr) = stderr.filter(|s| !s.trim().is_empty()) {
        println!("--- stderr ---");
        println!("{stderr}");
    }
    Ok(())
}

fn read_log(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}
