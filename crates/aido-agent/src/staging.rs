//! Host-side filesystem work around a run
//!
//! Copies permitted workspace files into a sandbox's `inputs/`, places the
//! task in `work/`, resets `outputs/`, and checks what the task left behind
//! against the output rules.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use aido_spec::path_rules::{self, GlobMatcher};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{AgentError, Result};

/// Output rule applied when a config lists none
const DEFAULT_OUTPUT_RULE: &str = "outputs/";

/// What [`stage_inputs`] copied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
    /// Destination paths relative to `inputs/`, in copy order
    pub staged: Vec<String>,
    /// Rules that matched nothing in the workspace
    pub unmatched: Vec<String>,
}

/// Copy every workspace file selected by `rules` into `inputs_dir`.
///
/// `inputs_dir` is emptied first. Each rule is a literal file, a directory
/// (copied recursively), or a glob walked from its search base. When two rules
/// select the same destination, the first one wins. Directories named
/// `state_dir` are never descended into.
pub fn stage_inputs(
    workspace_root: &Path,
    rules: &[String],
    inputs_dir: &Path,
    state_dir: &str,
) -> Result<StagingReport> {
    recreate_dir(inputs_dir)?;

    let mut report = StagingReport::default();
    let mut seen = HashSet::new();

    for rule in rules {
        let normalized = path_rules::normalize(rule);
        let normalized = normalized.trim_end_matches('/');
        if normalized.is_empty() || !path_rules::is_safe(normalized) {
            warn!(rule = %rule, "Skipping unsafe input rule");
            report.unmatched.push(rule.clone());
            continue;
        }

        let sources = if path_rules::is_glob(normalized) {
            glob_sources(workspace_root, normalized, state_dir)
        } else {
            literal_sources(workspace_root, normalized, state_dir)
        };

        if sources.is_empty() {
            warn!(rule = %rule, "Input rule matched no files");
            report.unmatched.push(rule.clone());
            continue;
        }

        for relative in sources {
            if !seen.insert(relative.clone()) {
                continue;
            }
            copy_file(&workspace_root.join(&relative), &inputs_dir.join(&relative))?;
            report.staged.push(relative);
        }
    }

    debug!(
        staged = report.staged.len(),
        unmatched = report.unmatched.len(),
        "Inputs staged"
    );
    Ok(report)
}

/// Copy the task into `work_dir`, returning the staged path
pub fn stage_task(task: &Path, work_dir: &Path) -> Result<PathBuf> {
    let name = task.file_name().ok_or_else(|| AgentError::TaskNotFound {
        path: task.to_path_buf(),
    })?;
    fs::create_dir_all(work_dir).map_err(AgentError::staging(work_dir))?;
    let dest = work_dir.join(name);
    fs::copy(task, &dest).map_err(AgentError::staging(task))?;
    Ok(dest)
}

/// Remove and recreate `outputs_dir`
pub fn reset_outputs(outputs_dir: &Path) -> Result<()> {
    recreate_dir(outputs_dir)
}

/// Every regular file under `dir`, as sorted `/`-separated relative paths
pub fn list_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|e| AgentError::Staging {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = relative_slash(entry.path(), dir) {
            files.push(relative);
        }
    }
    files.sort();
    Ok(files)
}

/// Files under `outputs_dir` that no output rule allows, sorted
pub fn find_unauthorized_outputs(outputs_dir: &Path, rules: &[String]) -> Result<Vec<String>> {
    let defaults = [DEFAULT_OUTPUT_RULE.to_string()];
    let rules = if rules.is_empty() { &defaults[..] } else { rules };

    Ok(list_files(outputs_dir)?
        .into_iter()
        .filter(|file| !path_rules::is_path_allowed(file, rules))
        .collect())
}

fn recreate_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(AgentError::staging(dir)(e)),
    }
    fs::create_dir_all(dir).map_err(AgentError::staging(dir))
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(AgentError::staging(parent))?;
    }
    fs::copy(source, dest).map_err(AgentError::staging(source))?;
    Ok(())
}

/// A literal rule names one file or a directory to copy whole
fn literal_sources(workspace_root: &Path, rule: &str, state_dir: &str) -> Vec<String> {
    if rule.split('/').any(|segment| segment == state_dir) {
        return Vec::new();
    }
    let path = workspace_root.join(rule);
    if !is_contained(workspace_root, &path) {
        return Vec::new();
    }
    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.is_file() => vec![rule.to_string()],
        Ok(meta) if meta.is_dir() => walk_files(workspace_root, &path, state_dir),
        _ => Vec::new(),
    }
}

/// Whether `path` is a real entry (not a symlink) that resolves inside
/// `workspace_root`
fn is_contained(workspace_root: &Path, path: &Path) -> bool {
    if path == workspace_root {
        return true;
    }
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            warn!(path = %path.display(), "Skipping symlinked input");
            return false;
        }
        Ok(_) => {}
        Err(_) => return false,
    }
    let (Ok(root), Ok(resolved)) = (workspace_root.canonicalize(), path.canonicalize()) else {
        return false;
    };
    if resolved.starts_with(&root) {
        true
    } else {
        warn!(path = %path.display(), "Skipping input outside the workspace");
        false
    }
}

fn glob_sources(workspace_root: &Path, pattern: &str, state_dir: &str) -> Vec<String> {
    let Some(matcher) = GlobMatcher::new(pattern) else {
        warn!(pattern = %pattern, "Input glob could not be compiled");
        return Vec::new();
    };
    let base = path_rules::search_base(pattern);
    let start = if base == "." {
        workspace_root.to_path_buf()
    } else {
        workspace_root.join(&base)
    };

    walk_files(workspace_root, &start, state_dir)
        .into_iter()
        .filter(|relative| matcher.is_match(relative))
        .collect()
}

/// Regular files under `start`, relative to `workspace_root`. Symlinks are not
/// followed and `state_dir` directories are pruned.
fn walk_files(workspace_root: &Path, start: &Path, state_dir: &str) -> Vec<String> {
    if !start.is_dir() || !is_contained(workspace_root, start) {
        return Vec::new();
    }
    let mut files: Vec<String> = WalkDir::new(start)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == state_dir))
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "Skipping unreadable workspace entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| relative_slash(e.path(), workspace_root))
        .collect();
    files.sort();
    files
}

fn relative_slash(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "data/a.csv", "a");
        write(dir.path(), "data/b.csv", "b");
        write(dir.path(), "data/nested/c.csv", "c");
        write(dir.path(), "data/notes.txt", "n");
        write(dir.path(), "README.md", "readme");
        write(dir.path(), ".aido/sandboxes/x/sandbox.json", "{}");
        dir
    }

    const STATE: &str = ".aido";

    fn rules(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stage_literal_file_and_directory() {
        let ws = workspace();
        let inputs = ws.path().join(".aido/sandboxes/x/inputs");

        let report = stage_inputs(ws.path(), &rules(&["README.md", "data/nested/"]), &inputs, STATE)
            .unwrap();

        assert_eq!(report.staged, vec!["README.md", "data/nested/c.csv"]);
        assert!(report.unmatched.is_empty());
        assert_eq!(fs::read_to_string(inputs.join("data/nested/c.csv")).unwrap(), "c");
    }

    #[test]
    fn test_stage_glob() {
        let ws = workspace();
        let inputs = ws.path().join("staged");

        let report = stage_inputs(ws.path(), &rules(&["data/*.csv"]), &inputs, STATE).unwrap();
        assert_eq!(report.staged, vec!["data/a.csv", "data/b.csv"]);

        let report = stage_inputs(ws.path(), &rules(&["data/**/*.csv"]), &inputs, STATE).unwrap();
        assert_eq!(
            report.staged,
            vec!["data/a.csv", "data/b.csv", "data/nested/c.csv"]
        );
        // Previous contents are cleared
        assert!(!inputs.join("data/notes.txt").exists());
    }

    #[test]
    fn test_first_writer_wins_and_unmatched() {
        let ws = workspace();
        let inputs = ws.path().join("staged");

        let report = stage_inputs(
            ws.path(),
            &rules(&["data/a.csv", "data/*.csv", "missing.txt"]),
            &inputs,
            STATE,
        )
        .unwrap();

        assert_eq!(report.staged, vec!["data/a.csv", "data/b.csv"]);
        assert_eq!(report.unmatched, vec!["missing.txt"]);
    }

    #[test]
    fn test_state_directory_is_never_staged() {
        let ws = workspace();
        let inputs = ws.path().join("staged");

        let report = stage_inputs(ws.path(), &rules(&["**/*.json", ".aido/"]), &inputs, STATE).unwrap();

        assert!(report.staged.is_empty());
        assert_eq!(report.unmatched.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_out_of_workspace_are_not_staged() {
        use std::os::unix::fs::symlink;

        let ws = workspace();
        let outside = TempDir::new().unwrap();
        write(outside.path(), "secret.env", "TOKEN=hunter2");
        symlink(outside.path(), ws.path().join("linkdir")).unwrap();
        symlink(outside.path().join("secret.env"), ws.path().join("link.env")).unwrap();
        let inputs = ws.path().join("staged");

        let report = stage_inputs(
            ws.path(),
            &rules(&["linkdir/", "link.env", "linkdir/secret.env", "linkdir/*.env"]),
            &inputs,
            STATE,
        )
        .unwrap();

        assert!(report.staged.is_empty());
        assert_eq!(report.unmatched.len(), 4);
        assert!(list_files(&inputs).unwrap().is_empty());
    }

    #[test]
    fn test_unauthorized_outputs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "report.json", "{}");
        write(dir.path(), "charts/a.png", "");
        write(dir.path(), "scratch/tmp.bin", "");

        let violations =
            find_unauthorized_outputs(dir.path(), &rules(&["outputs/report.json", "charts/"]))
                .unwrap();
        assert_eq!(violations, vec!["scratch/tmp.bin"]);

        // No rules means everything under outputs/ is allowed
        assert!(find_unauthorized_outputs(dir.path(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_reset_outputs_and_stage_task() {
        let dir = TempDir::new().unwrap();
        let outputs = dir.path().join("outputs");
        write(&outputs, "old.txt", "old");

        reset_outputs(&outputs).unwrap();
        assert!(outputs.is_dir());
        assert!(list_files(&outputs).unwrap().is_empty());

        write(dir.path(), "task.py", "print('hi')");
        let staged = stage_task(&dir.path().join("task.py"), &dir.path().join("work")).unwrap();
        assert_eq!(staged, dir.path().join("work/task.py"));
        assert_eq!(fs::read_to_string(staged).unwrap(), "print('hi')");
    }
}
