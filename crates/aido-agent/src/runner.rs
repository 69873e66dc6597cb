//! Run a task in a sandbox, end to end
//!
//! Wraps the [`Orchestrator`] with the sandbox bookkeeping around a run:
//! expiry and mutation checks, status transitions, run history, events and
//! evidence.

use std::path::PathBuf;

use aido_sandbox::{
    events, generate_run_id, Event, RunRecord, SandboxMetadata, SandboxStatus, SandboxStore,
};
use aido_spec::FilesystemPermission;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::{AgentError, Result};
use crate::evidence;
use crate::orchestrator::{ExecutionResult, Orchestrator, RunRequest};

/// Caller choices for one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Sandbox to run in; the most recently created one when `None`
    pub sandbox_id: Option<String>,
    pub task: PathBuf,
    /// Confirms that a `readwrite` sandbox may mutate its inputs
    pub allow_mutations: bool,
    pub enable_network: bool,
}

/// A finished run as persisted in the sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub sandbox_id: String,
    pub record: RunRecord,
    pub execution: ExecutionResult,
}

impl RunReport {
    /// Human-readable report of this run
    pub fn render(&self) -> String {
        evidence::render_report(
            &self.sandbox_id,
            &self.record,
            &self.execution.stdout,
            &self.execution.stderr,
        )
    }
}

/// Runs tasks in sandboxes and keeps their history current
pub struct TaskRunner {
    orchestrator: Orchestrator,
}

impl TaskRunner {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn store(&self) -> &SandboxStore {
        self.orchestrator.store()
    }

    /// Resolve the target sandbox and refuse runs it does not permit
    pub fn prepare(&self, options: &RunOptions) -> Result<SandboxMetadata> {
        let store = self.store();
        let metadata = match &options.sandbox_id {
            Some(id) => store.load(id)?,
            None => store.get_latest()?.ok_or(AgentError::NoSandbox)?,
        };

        if store.is_expired(&metadata) {
            return Err(AgentError::SandboxExpired { id: metadata.id });
        }
        if metadata.config.permissions.filesystem == FilesystemPermission::ReadWrite
            && !options.allow_mutations
        {
            return Err(AgentError::MutationConfirmationRequired { id: metadata.id });
        }
        Ok(metadata)
    }

    /// Run `options.task` and record the result.
    ///
    /// A run that could not be carried out leaves the sandbox `failed` with a
    /// `run_error` event; the sandbox itself stays loadable.
    #[instrument(skip(self, options), fields(task = %options.task.display()))]
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let metadata = self.prepare(options)?;
        let sandbox_id = metadata.id.clone();
        let run_id = generate_run_id();

        self.store().set_status(&sandbox_id, SandboxStatus::Running)?;
        self.record(
            &sandbox_id,
            Event::new(events::RUN_STARTED)
                .with("run_id", run_id.clone())
                .with("task", options.task.display().to_string()),
        );
        info!(sandbox = %sandbox_id, run = %run_id, "Run started");

        let request = RunRequest {
            sandbox_id: sandbox_id.clone(),
            run_id: run_id.clone(),
            config: metadata.config,
            task: options.task.clone(),
            allow_mutations: options.allow_mutations,
            enable_network: options.enable_network,
        };

        match self.execute_and_record(&request).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(sandbox = %sandbox_id, run = %run_id, error = %e, "Run failed");
                if let Err(status_err) = self.store().set_status(&sandbox_id, SandboxStatus::Failed)
                {
                    warn!(sandbox = %sandbox_id, error = %status_err, "Failed to mark sandbox failed");
                }
                self.record(
                    &sandbox_id,
                    Event::new(events::RUN_ERROR)
                        .with("run_id", run_id)
                        .with("error", e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn execute_and_record(&self, request: &RunRequest) -> Result<RunReport> {
        let started_at = Utc::now();
        let execution = self.orchestrator.execute(request).await?;
        let completed_at = Utc::now();

        let mut record = RunRecord {
            run_id: request.run_id.clone(),
            task: request.task.display().to_string(),
            started_at,
            completed_at,
            duration_ms: u64::try_from(execution.duration.as_millis()).unwrap_or(u64::MAX),
            exit_code: execution.exit_code,
            outcome: execution.outcome,
            artifacts: Vec::new(),
        };

        let store = self.store();
        let layout = store.layout(&request.sandbox_id);
        record.artifacts = evidence::write_evidence(
            &layout.outputs_dir(),
            &request.sandbox_id,
            &record,
            &execution.stdout,
            &execution.stderr,
        )?;

        let status = if execution.outcome.is_success() {
            SandboxStatus::Completed
        } else {
            SandboxStatus::Failed
        };
        store.update(&request.sandbox_id, |m| {
            m.runs.push(record.clone());
            m.status = status;
        })?;
        store.save_latest_run(&request.sandbox_id, &record)?;
        self.record(
            &request.sandbox_id,
            Event::new(events::RUN_COMPLETED)
                .with("run_id", record.run_id.clone())
                .with("exit_code", record.exit_code)
                .with("outcome", record.outcome.to_string())
                .with("duration_ms", record.duration_ms),
        );

        info!(
            sandbox = %request.sandbox_id,
            run = %record.run_id,
            exit_code = record.exit_code,
            outcome = %record.outcome,
            "Run recorded"
        );

        Ok(RunReport {
            sandbox_id: request.sandbox_id.clone(),
            record,
            execution,
        })
    }

    fn record(&self, sandbox_id: &str, event: Event) {
        if let Err(e) = self.store().log_event(sandbox_id, &event) {
            warn!(sandbox = %sandbox_id, event = %event.event, error = %e, "Failed to log event");
        }
    }
}
