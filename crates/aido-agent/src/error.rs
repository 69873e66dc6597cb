//! Agent-specific errors

use std::path::PathBuf;

use aido_sandbox::StoreError;
use thiserror::Error;

/// Errors that abort a run.
///
/// Timeouts and output policy violations are not errors; they are reported
/// through [`RunOutcome`](aido_sandbox::RunOutcome).
#[derive(Debug, Error)]
pub enum AgentError {
    /// The container engine could not be reached
    #[error("Container runtime unavailable: {reason}")]
    RuntimeUnavailable { reason: String },

    /// Task file does not exist
    #[error("Task file not found: {}", path.display())]
    TaskNotFound { path: PathBuf },

    /// Failed to pull image
    #[error("Failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    /// Failed to create container
    #[error("Failed to create container '{id}': {reason}")]
    CreateFailed { id: String, reason: String },

    /// Failed to start container
    #[error("Failed to start container '{id}': {reason}")]
    StartFailed { id: String, reason: String },

    /// Container not found
    #[error("Container '{container}' not found: {reason}")]
    NotFound { container: String, reason: String },

    /// Any other container engine failure
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Copying inputs, the task, or evidence failed
    #[error("Staging failed at {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The sandbox's TTL has passed
    #[error("Sandbox '{id}' has expired; create a new one")]
    SandboxExpired { id: String },

    /// The config allows writable inputs but the caller did not confirm
    #[error("Sandbox '{id}' permits input mutation; pass the mutation flag to confirm")]
    MutationConfirmationRequired { id: String },

    /// No sandbox was named and none exist
    #[error("No sandbox found; create one first")]
    NoSandbox,

    /// Internal runtime error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub(crate) fn staging(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> AgentError {
        let path = path.into();
        move |source| AgentError::Staging { path, source }
    }
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;
