//! Runtime identifier to container image and command

use std::path::Path;

/// Prefix that bypasses the image table
pub const IMAGE_OVERRIDE_PREFIX: &str = "docker://";

/// Directory the task is mounted under inside the container
pub const TASK_MOUNT_DIR: &str = "/work";

/// Known runtime tags and the images they pin to
const IMAGE_TABLE: &[(&str, &str)] = &[
    ("python", "python:3.11-slim"),
    ("python:3.12", "python:3.12-slim"),
    ("python:3.11", "python:3.11-slim"),
    ("python:3.10", "python:3.10-slim"),
    ("python:3.9", "python:3.9-slim"),
    ("node", "node:18-alpine"),
    ("node:18", "node:18-alpine"),
    ("node:20", "node:20-alpine"),
    ("bash", "bash:5"),
];

/// Map a runtime identifier to an image reference.
///
/// `docker://<image>` yields `<image>`. Known tags come from the table.
/// Anything else is used as an image reference unchanged.
pub fn resolve_image(runtime: &str) -> String {
    let runtime = runtime.trim();
    if let Some(image) = runtime.strip_prefix(IMAGE_OVERRIDE_PREFIX) {
        return image.to_string();
    }
    IMAGE_TABLE
        .iter()
        .find(|(tag, _)| *tag == runtime)
        .map(|(_, image)| (*image).to_string())
        .unwrap_or_else(|| runtime.to_string())
}

/// Interpreter family of a runtime or image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpreter {
    Python,
    Node,
    Shell,
    /// Run the task file directly
    Direct,
}

impl Interpreter {
    /// Decide from the runtime tag first, then the task's file extension
    pub fn detect(runtime: &str, task: &Path) -> Self {
        let family = runtime
            .trim()
            .trim_start_matches(IMAGE_OVERRIDE_PREFIX)
            .rsplit('/')
            .next()
            .unwrap_or_default();

        if family.starts_with("python") {
            return Interpreter::Python;
        }
        if family.starts_with("node") {
            return Interpreter::Node;
        }
        if family.starts_with("bash") {
            return Interpreter::Shell;
        }

        match task.extension().and_then(|e| e.to_str()) {
            Some("py") => Interpreter::Python,
            Some("js" | "mjs" | "cjs") => Interpreter::Node,
            Some("sh") => Interpreter::Shell,
            _ => Interpreter::Direct,
        }
    }
}

/// Path of the task inside the container
pub fn task_container_path(task: &Path) -> String {
    let name = task
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "task".to_string());
    format!("{TASK_MOUNT_DIR}/{name}")
}

/// Command that runs `task` under `runtime`
pub fn task_command(runtime: &str, task: &Path) -> Vec<String> {
    let path = task_container_path(task);
    match Interpreter::detect(runtime, task) {
        Interpreter::Python => vec!["python".to_string(), path],
        Interpreter::Node => vec!["node".to_string(), path],
        Interpreter::Shell => vec!["sh".to_string(), path],
        Interpreter::Direct => vec![path],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_runtimes() {
        assert_eq!(resolve_image("python"), "python:3.11-slim");
        assert_eq!(resolve_image("python:3.10"), "python:3.10-slim");
        assert_eq!(resolve_image("node"), "node:18-alpine");
        assert_eq!(resolve_image("node:20"), "node:20-alpine");
        assert_eq!(resolve_image("bash"), "bash:5");
    }

    #[test]
    fn test_override_and_passthrough() {
        assert_eq!(resolve_image("docker://alpine:3.19"), "alpine:3.19");
        assert_eq!(
            resolve_image("docker://ghcr.io/acme/tool:1"),
            "ghcr.io/acme/tool:1"
        );
        assert_eq!(resolve_image("ruby:3.3"), "ruby:3.3");
    }

    #[test]
    fn test_task_command_by_runtime() {
        let task = Path::new("tasks/analyze.py");
        assert_eq!(
            task_command("python:3.11", task),
            vec!["python", "/work/analyze.py"]
        );
        assert_eq!(
            task_command("node", Path::new("index.js")),
            vec!["node", "/work/index.js"]
        );
        assert_eq!(
            task_command("docker://python:3.12-slim", Path::new("x")),
            vec!["python", "/work/x"]
        );
    }

    #[test]
    fn test_task_command_by_extension() {
        assert_eq!(
            task_command("docker://alpine:3", Path::new("run.sh")),
            vec!["sh", "/work/run.sh"]
        );
        assert_eq!(
            task_command("ghcr.io/acme/base", Path::new("main.py")),
            vec!["python", "/work/main.py"]
        );
        assert_eq!(
            task_command("docker://alpine:3", Path::new("bin/tool")),
            vec!["/work/tool"]
        );
    }
}
