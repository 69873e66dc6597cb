//! Single-task container execution
//!
//! The [`Orchestrator`] runs one task in one container: preflight, image
//! resolution and pull, input staging, container construction under enforced
//! limits, the completion-versus-deadline race, log capture, and output
//! policy validation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aido_sandbox::{events, Event, RunOutcome, SandboxLayout, SandboxStore, STATE_DIR_NAME};
use aido_spec::SandboxConfig;
use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::demux::{demultiplex, Demuxed};
use crate::error::{AgentError, Result};
use crate::image::{resolve_image, task_command, task_container_path, TASK_MOUNT_DIR};
use crate::runtime::{ContainerSpec, Mount, NetworkMode, ResourceLimits, Runtime};
use crate::staging;

/// Exit code reported for a run killed by its timeout
pub const TIMEOUT_EXIT_CODE: i64 = 124;

const INPUTS_MOUNT: &str = "/inputs";
const OUTPUTS_MOUNT: &str = "/outputs";

/// Tunables for container execution
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Grace period between stop and kill on timeout
    pub stop_grace: Duration,
    pub pids_limit: i64,
    /// CFS scheduling period in microseconds
    pub cpu_period: i64,
    /// Docker engine socket; `None` resolves it from the environment
    pub docker_socket: Option<PathBuf>,
    /// Workspace state directory name, never staged as input
    pub state_dir_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
            pids_limit: 100,
            cpu_period: 100_000,
            docker_socket: None,
            state_dir_name: STATE_DIR_NAME.to_string(),
        }
    }
}

/// One task execution to perform
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub sandbox_id: String,
    pub run_id: String,
    pub config: SandboxConfig,
    /// Task file on the host
    pub task: PathBuf,
    /// Caller confirmed writable inputs
    pub allow_mutations: bool,
    /// Caller enabled networking regardless of config
    pub enable_network: bool,
}

impl RunRequest {
    /// Deterministic container name for this run
    pub fn container_name(&self) -> String {
        format!("aido-{}-{}", self.sandbox_id, self.run_id)
    }
}

/// What one execution produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub outcome: RunOutcome,
    /// Output files not allowed by any output rule, sorted
    pub violations: Vec<String>,
    pub image: String,
    pub container_name: String,
}

/// How the container finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Exited(i64),
    TimedOut,
}

/// Drives a [`Runtime`] through one task execution per call
pub struct Orchestrator {
    runtime: Arc<dyn Runtime>,
    store: SandboxStore,
    workspace_root: PathBuf,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        store: SandboxStore,
        workspace_root: impl Into<PathBuf>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            workspace_root: workspace_root.into(),
            config,
        }
    }

    pub fn store(&self) -> &SandboxStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute the task described by `request`.
    ///
    /// Timeouts and output policy violations are reported in the result's
    /// outcome. Errors mean the run could not be carried out at all.
    #[instrument(
        skip(self, request),
        fields(sandbox = %request.sandbox_id, run = %request.run_id, task = %request.task.display())
    )]
    pub async fn execute(&self, request: &RunRequest) -> Result<ExecutionResult> {
        let started = Instant::now();
        let config = &request.config;

        // 1. Preflight
        self.runtime.ping().await?;
        if !request.task.is_file() {
            return Err(AgentError::TaskNotFound {
                path: request.task.clone(),
            });
        }

        // 2-3. Image
        let image = resolve_image(&config.runtime);
        self.ensure_image(&request.sandbox_id, &image).await?;

        // 4-5. Host filesystem
        let layout = self.store.layout(&request.sandbox_id);
        let report = staging::stage_inputs(
            &self.workspace_root,
            &config.inputs,
            &layout.inputs_dir(),
            &self.config.state_dir_name,
        )?;
        self.record(
            &request.sandbox_id,
            Event::new(events::INPUTS_STAGED)
                .with("staged", report.staged.len())
                .with("unmatched", report.unmatched.clone()),
        );
        staging::reset_outputs(&layout.outputs_dir())?;
        let staged_task = staging::stage_task(&request.task, &layout.work_dir())?;

        // 6. Container
        let spec = self.container_spec(request, &image, &layout, &staged_task)?;
        let name = spec.name.clone();
        self.runtime.create_container(&spec).await?;

        // 7. Race
        let timeout = config
            .timeout()
            .map_err(|e| AgentError::Internal(format!("invalid timeout: {e}")))?;
        let completion = self.start_and_wait(&request.sandbox_id, &name, timeout).await;

        // 8. Capture, then always clean up
        let output = match completion {
            Ok(_) => self.collect_logs(&name).await,
            Err(_) => Demuxed::default(),
        };
        self.cleanup(&name).await;
        let completion = completion?;

        let stdout = output.stdout_lossy();
        let mut stderr = output.stderr_lossy();

        let (mut exit_code, mut outcome) = match completion {
            Completion::Exited(code) => (
                code,
                if code == 0 {
                    RunOutcome::Succeeded
                } else {
                    RunOutcome::Failed
                },
            ),
            Completion::TimedOut => {
                stderr = append_stderr(
                    &stderr,
                    &format!("Execution timed out after {}", config.resources.timeout),
                );
                self.record(
                    &request.sandbox_id,
                    Event::new(events::EXECUTION_TIMEOUT)
                        .with("container", name.clone())
                        .with("timeout", config.resources.timeout.clone()),
                );
                (TIMEOUT_EXIT_CODE, RunOutcome::TimedOut)
            }
        };

        // 9. Output policy
        let violations = if config.outputs_enabled() {
            staging::find_unauthorized_outputs(&layout.outputs_dir(), &config.outputs)?
        } else {
            Vec::new()
        };
        if !violations.is_empty() {
            warn!(count = violations.len(), "Task wrote files outside configured outputs");
            stderr = append_stderr(&stderr, &violation_message(&violations));
            self.record(
                &request.sandbox_id,
                Event::new(events::OUTPUT_POLICY_VIOLATION).with("files", violations.clone()),
            );
            if outcome != RunOutcome::TimedOut {
                exit_code = 1;
                outcome = RunOutcome::PolicyViolation;
            }
        }

        let duration = started.elapsed();
        info!(
            exit_code,
            %outcome,
            duration_ms = duration.as_millis() as u64,
            "Task finished"
        );

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration,
            outcome,
            violations,
            image,
            container_name: name,
        })
    }

    /// Pull `image` unless it is already present
    async fn ensure_image(&self, sandbox_id: &str, image: &str) -> Result<()> {
        if self.runtime.image_exists(image).await? {
            debug!(image = %image, "Image present locally");
            return Ok(());
        }

        info!(image = %image, "Pulling image");
        let mut progress = self.runtime.pull_image(image);
        while let Some(event) = progress.next().await {
            let event = event?;
            debug!(
                image = %image,
                status = %event.status,
                layer = event.id.as_deref().unwrap_or(""),
                progress = event.progress.as_deref().unwrap_or(""),
                "Pull progress"
            );
        }

        self.record(sandbox_id, Event::new(events::IMAGE_PULLED).with("image", image));
        Ok(())
    }

    fn container_spec(
        &self,
        request: &RunRequest,
        image: &str,
        layout: &SandboxLayout,
        staged_task: &Path,
    ) -> Result<ContainerSpec> {
        let config = &request.config;

        let mut mounts = vec![Mount::read_only(
            staged_task,
            task_container_path(&request.task),
        )];
        if config.inputs_writable(request.allow_mutations) {
            mounts.push(Mount::read_write(layout.inputs_dir(), INPUTS_MOUNT));
        } else {
            mounts.push(Mount::read_only(layout.inputs_dir(), INPUTS_MOUNT));
        }
        if config.outputs_enabled() {
            mounts.push(Mount::read_write(layout.outputs_dir(), OUTPUTS_MOUNT));
        }

        let memory = config
            .memory_bytes()
            .map_err(|e| AgentError::Internal(format!("invalid memory limit: {e}")))?;
        let memory_bytes = i64::try_from(memory)
            .map_err(|_| AgentError::Internal(format!("memory limit too large: {memory}")))?;
        let cpu_quota = (config.resources.cpu * self.config.cpu_period as f64).floor() as i64;

        let network = if config.network_enabled(request.enable_network) {
            NetworkMode::Bridge
        } else {
            NetworkMode::None
        };

        Ok(ContainerSpec {
            name: request.container_name(),
            image: image.to_string(),
            command: task_command(&config.runtime, &request.task),
            working_dir: TASK_MOUNT_DIR.to_string(),
            env: config.env.clone(),
            mounts,
            limits: ResourceLimits {
                cpu_quota,
                cpu_period: self.config.cpu_period,
                memory_bytes,
                pids_limit: self.config.pids_limit,
                no_new_privileges: true,
            },
            network,
        })
    }

    /// Start the container and race its exit against `timeout`
    async fn start_and_wait(
        &self,
        sandbox_id: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Completion> {
        self.runtime.start_container(name).await?;
        self.record(
            sandbox_id,
            Event::new(events::CONTAINER_STARTED).with("container", name),
        );

        tokio::select! {
            code = self.runtime.wait_container(name) => Ok(Completion::Exited(code?)),
            _ = tokio::time::sleep(timeout) => {
                warn!(container = %name, timeout_ms = timeout.as_millis() as u64, "Execution timed out");
                self.terminate(name).await;
                Ok(Completion::TimedOut)
            }
        }
    }

    /// Stop with a grace period, killing if the stop fails
    async fn terminate(&self, name: &str) {
        if let Err(e) = self.runtime.stop_container(name, self.config.stop_grace).await {
            warn!(container = %name, error = %e, "Stop failed, killing container");
            if let Err(e) = self.runtime.kill_container(name).await {
                warn!(container = %name, error = %e, "Kill failed");
            }
        }
    }

    async fn collect_logs(&self, name: &str) -> Demuxed {
        match self.runtime.container_logs(name).await {
            Ok(raw) => demultiplex(&raw),
            Err(e) => {
                warn!(container = %name, error = %e, "Failed to collect container logs");
                Demuxed {
                    stdout: Vec::new(),
                    stderr: format!("Failed to collect container logs: {e}").into_bytes(),
                }
            }
        }
    }

    async fn cleanup(&self, name: &str) {
        if let Err(e) = self.runtime.remove_container(name).await {
            warn!(container = %name, error = %e, "Failed to remove container");
        }
    }

    /// Event logging never fails a run
    fn record(&self, sandbox_id: &str, event: Event) {
        if let Err(e) = self.store.log_event(sandbox_id, &event) {
            warn!(sandbox = %sandbox_id, event = %event.event, error = %e, "Failed to log event");
        }
    }
}

/// Append `message` on its own line, never replacing what is there
pub(crate) fn append_stderr(current: &str, message: &str) -> String {
    if current.is_empty() {
        return message.to_string();
    }
    let mut out = String::with_capacity(current.len() + message.len() + 1);
    out.push_str(current);
    if !current.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(message);
    out
}

fn violation_message(violations: &[String]) -> String {
    let mut lines =
        vec!["Output policy violation: task wrote files outside configured outputs.".to_string()];
    lines.extend(violations.iter().map(|v| format!("  - {v}")));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_stderr() {
        assert_eq!(append_stderr("", "boom"), "boom");
        assert_eq!(append_stderr("warn", "boom"), "warn\nboom");
        assert_eq!(append_stderr("warn\n", "boom"), "warn\nboom");
    }

    #[test]
    fn test_violation_message() {
        let message = violation_message(&["a.txt".to_string(), "tmp/b.bin".to_string()]);
        assert_eq!(
            message,
            "Output policy violation: task wrote files outside configured outputs.\n  - a.txt\n  - tmp/b.bin"
        );
    }

    #[test]
    fn test_container_name() {
        let request = RunRequest {
            sandbox_id: "abc123".to_string(),
            run_id: "run-1a2b3c4d".to_string(),
            config: SandboxConfig::new("t", "python", "1h"),
            task: PathBuf::from("task.py"),
            allow_mutations: false,
            enable_network: false,
        };
        assert_eq!(request.container_name(), "aido-abc123-run-1a2b3c4d");
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.stop_grace, Duration::from_secs(5));
        assert_eq!(config.pids_limit, 100);
        assert_eq!(config.cpu_period, 100_000);
        assert_eq!(config.state_dir_name, ".aido");
    }
}
