//! Docker runtime integration tests
//!
//! These tests run real containers. They are gated behind the `docker`
//! feature and skip themselves when no daemon is reachable.
//!
//! # Running
//! ```bash
//! cargo test -p aido-agent --features docker --test docker_runtime_test -- --nocapture
//! ```

#![cfg(feature = "docker")]

use std::fs;
use std::sync::Arc;

use aido_agent::{
    DockerRuntime, Orchestrator, OrchestratorConfig, RunOptions, Runtime, TaskRunner,
    TIMEOUT_EXIT_CODE,
};
use aido_sandbox::{RunOutcome, SandboxStore};
use aido_spec::SandboxConfig;
use tempfile::TempDir;

const TEST_RUNTIME: &str = "docker://alpine:3.19";

/// Attempt to connect to Docker. Returns None if Docker is not available.
async fn skip_if_no_docker() -> Option<Arc<DockerRuntime>> {
    let runtime = DockerRuntime::connect(None).ok()?;
    match runtime.ping().await {
        Ok(()) => Some(Arc::new(runtime)),
        Err(e) => {
            eprintln!("Skipping: Docker not available ({e})");
            None
        }
    }
}

fn setup(script: &str, timeout: &str) -> (TempDir, SandboxStore, String) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("task.sh"), script).unwrap();
    let store = SandboxStore::for_workspace(dir.path());

    let mut config = SandboxConfig::new("docker-test", TEST_RUNTIME, "10m");
    config.resources.timeout = timeout.to_string();
    let id = store.create(config).unwrap().id;
    (dir, store, id)
}

#[tokio::test]
async fn test_run_captures_both_streams() {
    let Some(runtime) = skip_if_no_docker().await else {
        return;
    };
    let (dir, store, id) = setup(
        "echo out\necho err >&2\necho data > /outputs/result.txt\nexit 7\n",
        "5m",
    );
    let runner = TaskRunner::new(Orchestrator::new(
        runtime,
        store.clone(),
        dir.path(),
        OrchestratorConfig::default(),
    ));

    let report = runner
        .run(&RunOptions {
            sandbox_id: Some(id.clone()),
            task: dir.path().join("task.sh"),
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert_eq!(report.record.exit_code, 7);
    assert_eq!(report.record.outcome, RunOutcome::Failed);
    assert_eq!(report.execution.stdout, "out\n");
    assert_eq!(report.execution.stderr, "err\n");
    assert!(store
        .layout(&id)
        .outputs_dir()
        .join("result.txt")
        .is_file());
}

#[tokio::test]
async fn test_timeout_kills_real_container() {
    let Some(runtime) = skip_if_no_docker().await else {
        return;
    };
    let (dir, store, id) = setup("sleep 600\n", "1m");
    let runner = TaskRunner::new(Orchestrator::new(
        runtime.clone(),
        store,
        dir.path(),
        OrchestratorConfig::default(),
    ));

    let report = runner
        .run(&RunOptions {
            sandbox_id: Some(id),
            task: dir.path().join("task.sh"),
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert_eq!(report.record.outcome, RunOutcome::TimedOut);
    assert_eq!(report.record.exit_code, TIMEOUT_EXIT_CODE);
    // Removed during cleanup
    assert!(runtime
        .container_logs(&report.execution.container_name)
        .await
        .is_err());
}
