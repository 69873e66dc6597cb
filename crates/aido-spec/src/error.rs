//! Error types for sandbox spec parsing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when parsing or validating a sandbox spec
#[derive(Debug, Error)]
pub enum SpecError {
    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// One or more fields failed validation
    #[error("{0}")]
    Validation(#[from] ConfigValidationError),

    /// IO error when reading a spec file
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the duration and memory parsers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("invalid duration '{value}': expected <integer><s|m|h>")]
    InvalidDuration { value: String },

    #[error("duration '{value}' must be between {min} and {max} minutes")]
    DurationOutOfRange { value: String, min: u64, max: u64 },

    #[error("invalid memory size '{value}': expected <integer><M|G>")]
    InvalidMemory { value: String },
}

/// Every violation found in a sandbox config, never just the first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigValidationError {
    pub errors: Vec<ValidationError>,
}

impl ConfigValidationError {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, kind: ValidationErrorKind, path: impl Into<String>) {
        self.errors.push(ValidationError {
            kind,
            path: path.into(),
        });
    }

    /// Returns true if any violation targets `path`
    pub fn has_path(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.path == path)
    }

    pub(crate) fn into_result(mut self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            self.errors.sort_by(|a, b| a.path.cmp(&b.path));
            Err(self)
        }
    }
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid sandbox config ({} error(s))", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

/// A single validation failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    /// The kind of validation error
    pub kind: ValidationErrorKind,

    /// Dotted path to the invalid field
    pub path: String,
}

/// The specific kind of validation error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ValidationErrorKind {
    /// Sandbox name is empty
    EmptyName,

    /// Runtime identifier is empty
    EmptyRuntime,

    /// Duration is not `<integer><s|m|h>`
    InvalidDuration { value: String },

    /// Duration parsed but falls outside 1m..=24h
    DurationOutOfRange { value: String },

    /// Memory is not `<integer><M|G>`
    InvalidMemoryFormat { value: String },

    /// CPU must be a positive, finite number of cores
    InvalidCpu { cpu: f64 },

    /// Path rule is absolute, empty, or traverses out of the workspace
    UnsafePath { rule: String },

    /// Environment variable name is empty or contains '=' or NUL
    InvalidEnvVar { name: String },

    /// Anything reported by the derive validator that has no dedicated kind
    Generic { message: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.path)
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationErrorKind::EmptyName => write!(f, "name must not be empty"),
            ValidationErrorKind::EmptyRuntime => write!(f, "runtime must not be empty"),
            ValidationErrorKind::InvalidDuration { value } => {
                write!(f, "invalid duration '{value}' (expected e.g. 30s, 15m, 2h)")
            }
            ValidationErrorKind::DurationOutOfRange { value } => {
                write!(f, "duration '{value}' must be between 1m and 24h")
            }
            ValidationErrorKind::InvalidMemoryFormat { value } => {
                write!(f, "invalid memory '{value}' (expected e.g. 512M, 2G)")
            }
            ValidationErrorKind::InvalidCpu { cpu } => {
                write!(f, "cpu must be a positive number, got {cpu}")
            }
            ValidationErrorKind::UnsafePath { rule } => {
                write!(f, "unsafe path rule '{rule}'")
            }
            ValidationErrorKind::InvalidEnvVar { name } => {
                write!(f, "invalid environment variable name '{name}'")
            }
            ValidationErrorKind::Generic { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl std::error::Error for ConfigValidationError {}
