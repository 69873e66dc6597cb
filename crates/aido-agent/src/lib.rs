//! aido agent - sandboxed task execution
//!
//! Runs one task per call inside a resource-bounded container, stages its
//! inputs, captures its output, checks what it wrote against the output
//! policy, and records evidence in the sandbox.

pub mod demux;
pub mod error;
pub mod evidence;
pub mod image;
pub mod orchestrator;
pub mod runner;
pub mod runtime;
pub mod runtimes;
pub mod staging;

pub use demux::{demultiplex, Demuxed, StreamKind};
pub use error::*;
pub use evidence::{render_report, write_evidence, RunSummary};
pub use image::{resolve_image, task_command, Interpreter};
pub use orchestrator::{
    ExecutionResult, Orchestrator, OrchestratorConfig, RunRequest, TIMEOUT_EXIT_CODE,
};
pub use runner::{RunOptions, RunReport, TaskRunner};
pub use runtime::*;
pub use runtimes::connect_runtime;
pub use staging::StagingReport;

#[cfg(feature = "docker")]
pub use runtimes::DockerRuntime;
