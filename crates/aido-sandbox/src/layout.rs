//! On-disk layout of a sandbox directory

use std::path::{Path, PathBuf};

/// Name of the per-project state directory
pub const STATE_DIR_NAME: &str = ".aido";

pub const INPUTS_DIR: &str = "inputs";
pub const WORK_DIR: &str = "work";
pub const OUTPUTS_DIR: &str = "outputs";
pub const METADATA_FILE: &str = "sandbox.json";
pub const EVENTS_FILE: &str = "events.log";
pub const LATEST_RUN_FILE: &str = "run.json";
pub const LOCK_FILE: &str = ".lock";

/// Paths inside `<state>/sandboxes/<id>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLayout {
    root: PathBuf,
}

impl SandboxLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join(INPUTS_DIR)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join(WORK_DIR)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join(OUTPUTS_DIR)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join(EVENTS_FILE)
    }

    pub fn latest_run_path(&self) -> PathBuf {
        self.root.join(LATEST_RUN_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// `outputs/<relative>` as recorded in run artifacts
    pub fn output_artifact(relative: &str) -> String {
        format!("{OUTPUTS_DIR}/{relative}")
    }
}

/// Sandbox ids are lowercase alphanumerics and `-`. Anything else is never
/// turned into a path.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = SandboxLayout::new("/p/.aido/sandboxes/abc");
        assert_eq!(layout.inputs_dir(), Path::new("/p/.aido/sandboxes/abc/inputs"));
        assert_eq!(layout.metadata_path(), Path::new("/p/.aido/sandboxes/abc/sandbox.json"));
        assert_eq!(layout.latest_run_path(), Path::new("/p/.aido/sandboxes/abc/run.json"));
        assert_eq!(SandboxLayout::output_artifact("stdout.log"), "outputs/stdout.log");
    }

    #[test]
    fn test_id_validation() {
        assert!(is_valid_id("3f9a0c1b2d4e"));
        assert!(is_valid_id("run-12ab34cd"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id("ABC"));
    }
}
