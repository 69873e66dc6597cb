//! aido sandbox specification
//!
//! This crate provides the types for parsing and validating sandbox specs,
//! the path rule engine that decides which files may enter and leave a
//! sandbox, and the duration and memory-size parsers.

mod error;
pub mod path_rules;
mod types;
pub mod units;
mod validate;

pub use error::*;
pub use types::*;
pub use validate::*;

use std::path::Path;

/// Parse and validate a sandbox spec from a YAML string
pub fn from_yaml_str(yaml: &str) -> Result<SandboxConfig, SpecError> {
    let config: SandboxConfig = serde_yaml::from_str(yaml)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse and validate a sandbox spec from a YAML file
pub fn from_yaml_file(path: &Path) -> Result<SandboxConfig, SpecError> {
    let content = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_yaml_str(&content)
}
