//! Sandbox specification types
//!
//! A [`SandboxConfig`] is the declarative description of one sandbox: which
//! runtime to use, how long it lives, which paths go in and which may come
//! out, and the resource envelope a task runs under.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::UnitError;
use crate::units;

/// Top-level sandbox specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Human-readable sandbox name
    #[validate(custom(function = "crate::validate::validate_name_wrapper"))]
    pub name: String,

    /// Language/version tag (`python:3.11`) or image reference (`docker://alpine:3`)
    #[validate(custom(function = "crate::validate::validate_runtime_wrapper"))]
    pub runtime: String,

    /// Time-to-live, `<integer><s|m|h>`, 1m to 24h
    #[validate(custom(function = "crate::validate::validate_duration_wrapper"))]
    pub ttl: String,

    /// Path rules resolved against the workspace root and staged into `inputs/`
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Path rules a task's produced files must match
    #[serde(default = "default_outputs")]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub permissions: Permissions,

    /// Environment passed to the task container
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    #[validate(nested)]
    pub resources: Resources,
}

fn default_outputs() -> Vec<String> {
    vec!["outputs/".to_string()]
}

impl SandboxConfig {
    /// Minimal config with every optional field at its default
    pub fn new(name: impl Into<String>, runtime: impl Into<String>, ttl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime: runtime.into(),
            ttl: ttl.into(),
            inputs: Vec::new(),
            outputs: default_outputs(),
            permissions: Permissions::default(),
            env: BTreeMap::new(),
            resources: Resources::default(),
        }
    }

    /// TTL in whole milliseconds
    pub fn ttl_ms(&self) -> Result<u64, UnitError> {
        units::parse_duration_ms(&self.ttl)
    }

    /// Per-run execution timeout
    pub fn timeout(&self) -> Result<Duration, UnitError> {
        units::parse_std_duration(&self.resources.timeout)
    }

    /// Memory ceiling in bytes
    pub fn memory_bytes(&self) -> Result<u64, UnitError> {
        units::parse_memory(&self.resources.memory)
    }

    /// Inputs may be mounted writable only when the config asks for it and the
    /// caller separately confirms.
    pub fn inputs_writable(&self, caller_confirmed: bool) -> bool {
        self.permissions.filesystem == FilesystemPermission::ReadWrite && caller_confirmed
    }

    /// Network is enabled by the config or by an explicit caller override
    pub fn network_enabled(&self, caller_override: bool) -> bool {
        self.permissions.network || caller_override
    }

    /// Whether the outputs directory is mounted and validated at all
    pub fn outputs_enabled(&self) -> bool {
        self.permissions.filesystem != FilesystemPermission::None
    }
}

/// Filesystem, network, and cloud permissions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Permissions {
    #[serde(default)]
    pub filesystem: FilesystemPermission,

    #[serde(default)]
    pub network: bool,

    /// Carried through to metadata only; never enforced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPermissions>,
}

/// How the sandbox may touch its mounted directories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilesystemPermission {
    /// Inputs read-only, outputs writable
    #[default]
    #[serde(rename = "readonly")]
    ReadOnly,
    /// Inputs writable once the caller confirms mutation
    #[serde(rename = "readwrite")]
    ReadWrite,
    /// No inputs or outputs access expected
    #[serde(rename = "none")]
    None,
}

impl std::fmt::Display for FilesystemPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilesystemPermission::ReadOnly => write!(f, "readonly"),
            FilesystemPermission::ReadWrite => write!(f, "readwrite"),
            FilesystemPermission::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AwsRole>,

    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AwsRole {
    Readonly,
    Readwrite,
}

/// Resource envelope for a single run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    /// CPU cores, fractional allowed
    #[serde(default = "default_cpu")]
    pub cpu: f64,

    /// Memory ceiling, `<integer><M|G>`
    #[serde(default = "default_memory")]
    #[validate(custom(function = "crate::validate::validate_memory_wrapper"))]
    pub memory: String,

    /// Execution timeout, `<integer><s|m|h>`, 1m to 24h
    #[serde(default = "default_timeout")]
    #[validate(custom(function = "crate::validate::validate_duration_wrapper"))]
    pub timeout: String,
}

fn default_cpu() -> f64 {
    1.0
}

fn default_memory() -> String {
    "512M".to_string()
}

fn default_timeout() -> String {
    "10m".to_string()
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
            timeout: default_timeout(),
        }
    }
}
