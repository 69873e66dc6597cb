//! Error types for the sandbox store

use std::path::{Path, PathBuf};

use aido_spec::ConfigValidationError;
use thiserror::Error;

/// Errors from sandbox store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The sandbox directory or its metadata file does not exist
    #[error("Sandbox not found: {id}")]
    NotFound { id: String },

    /// The config failed validation; nothing was written
    #[error(transparent)]
    InvalidConfig(#[from] ConfigValidationError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The per-sandbox advisory lock could not be taken
    #[error("Failed to lock sandbox {id}: {source}")]
    Lock {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path) -> impl FnOnce(serde_json::Error) -> StoreError + '_ {
        move |source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true for [`StoreError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
