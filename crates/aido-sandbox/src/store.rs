//! Sandbox lifecycle store
//!
//! Every sandbox lives in `<state>/sandboxes/<id>/`. Nothing is cached in
//! memory: every read re-parses the files on disk, since separate CLI
//! invocations may operate on the same sandbox.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use aido_spec::{validate_config, SandboxConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::layout::{self, SandboxLayout, STATE_DIR_NAME};
use crate::lock::SandboxLock;
use crate::metadata::{events, Event, RunRecord, SandboxMetadata, SandboxStatus};

const SANDBOXES_DIR: &str = "sandboxes";
const ID_LEN: usize = 12;
const RUN_ID_LEN: usize = 8;

/// Allocate a fresh 12-character sandbox id
pub fn generate_sandbox_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..ID_LEN].to_string()
}

/// Allocate a fresh run id, `run-` followed by 8 hex characters
pub fn generate_run_id() -> String {
    format!("run-{}", &uuid::Uuid::new_v4().simple().to_string()[..RUN_ID_LEN])
}

/// Owns the on-disk state of every sandbox under one state directory
#[derive(Debug, Clone)]
pub struct SandboxStore {
    state_dir: PathBuf,
}

impl SandboxStore {
    /// Store rooted at an explicit state directory
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Store rooted at `<workspace>/.aido`
    pub fn for_workspace(workspace: &Path) -> Self {
        Self::new(workspace.join(STATE_DIR_NAME))
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn sandboxes_dir(&self) -> PathBuf {
        self.state_dir.join(SANDBOXES_DIR)
    }

    /// Paths for sandbox `id`. Does not check that it exists.
    pub fn layout(&self, id: &str) -> SandboxLayout {
        SandboxLayout::new(self.sandboxes_dir().join(id))
    }

    /// Layout of an existing sandbox, or `NotFound`
    fn existing_layout(&self, id: &str) -> Result<SandboxLayout> {
        if !layout::is_valid_id(id) {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let layout = self.layout(id);
        if !layout.metadata_path().is_file() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(layout)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Validate `config`, allocate an id, lay out the directory tree, and
    /// persist metadata with status `created`.
    ///
    /// Validation happens before anything touches the disk.
    pub fn create(&self, config: SandboxConfig) -> Result<SandboxMetadata> {
        self.create_at(config, Utc::now())
    }

    /// [`create`](Self::create) with an explicit creation time
    pub fn create_at(&self, config: SandboxConfig, now: DateTime<Utc>) -> Result<SandboxMetadata> {
        validate_config(&config)?;

        let sandboxes = self.sandboxes_dir();
        fs::create_dir_all(&sandboxes).map_err(StoreError::io(&sandboxes))?;

        let (id, layout) = loop {
            let id = generate_sandbox_id();
            let layout = self.layout(&id);
            match fs::create_dir(layout.root()) {
                Ok(()) => break (id, layout),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StoreError::io(layout.root())(e)),
            }
        };

        for dir in [layout.inputs_dir(), layout.work_dir(), layout.outputs_dir()] {
            fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
        }

        let metadata = SandboxMetadata {
            id: id.clone(),
            created_at: now,
            status: SandboxStatus::Created,
            config,
            runs: Vec::new(),
        };
        write_json_atomic(&layout.metadata_path(), &metadata)?;

        self.log_event(
            &id,
            &Event::new(events::SANDBOX_CREATED)
                .with("name", metadata.config.name.as_str())
                .with("runtime", metadata.config.runtime.as_str())
                .with("ttl", metadata.config.ttl.as_str()),
        )?;

        info!(sandbox = %id, name = %metadata.config.name, "Created sandbox");
        Ok(metadata)
    }

    /// Read `sandbox.json` for `id`
    pub fn load(&self, id: &str) -> Result<SandboxMetadata> {
        let layout = self.existing_layout(id)?;
        read_json(&layout.metadata_path())
    }

    /// Every readable sandbox, oldest first.
    ///
    /// Unreadable entries are skipped with a warning.
    pub fn list(&self) -> Result<Vec<SandboxMetadata>> {
        let dir = self.sandboxes_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir)(e)),
        };

        let mut sandboxes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(StoreError::io(&dir))?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.load(&id) {
                Ok(metadata) => sandboxes.push(metadata),
                Err(e) => warn!(sandbox = %id, error = %e, "Skipping unreadable sandbox"),
            }
        }

        sandboxes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sandboxes)
    }

    /// The most recently created sandbox
    pub fn get_latest(&self) -> Result<Option<SandboxMetadata>> {
        Ok(self.list()?.into_iter().max_by_key(|m| m.created_at))
    }

    pub fn is_expired(&self, metadata: &SandboxMetadata) -> bool {
        metadata.is_expired()
    }

    /// Append `sandbox_destroyed` and remove the sandbox directory.
    ///
    /// A second destroy of the same id fails with `NotFound`.
    pub fn destroy(&self, id: &str) -> Result<()> {
        let layout = self.existing_layout(id)?;
        {
            let _lock = SandboxLock::acquire(id, &layout.lock_path())?;
            self.log_event(id, &Event::new(events::SANDBOX_DESTROYED))?;
        }
        fs::remove_dir_all(layout.root()).map_err(StoreError::io(layout.root()))?;
        info!(sandbox = %id, "Destroyed sandbox");
        Ok(())
    }

    /// Destroy every expired sandbox, returning how many were removed
    pub fn cleanup_expired(&self) -> Result<usize> {
        self.cleanup_expired_at(Utc::now())
    }

    /// [`cleanup_expired`](Self::cleanup_expired) against an explicit clock.
    ///
    /// A failure on one sandbox is logged and does not stop the others.
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<_> = self
            .list()?
            .into_iter()
            .filter(|m| m.is_expired_at(now))
            .collect();
        Ok(self.destroy_each(expired.iter().map(|m| m.id.as_str())))
    }

    /// Destroy every sandbox, returning how many were removed
    pub fn destroy_all(&self) -> Result<usize> {
        let all = self.list()?;
        Ok(self.destroy_each(all.iter().map(|m| m.id.as_str())))
    }

    fn destroy_each<'a>(&self, ids: impl Iterator<Item = &'a str>) -> usize {
        let mut destroyed = 0;
        for id in ids {
            match self.destroy(id) {
                Ok(()) => destroyed += 1,
                Err(e) => warn!(sandbox = %id, error = %e, "Failed to destroy sandbox, continuing"),
            }
        }
        destroyed
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Locked read-modify-write of `sandbox.json`
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<SandboxMetadata>
    where
        F: FnOnce(&mut SandboxMetadata),
    {
        let layout = self.existing_layout(id)?;
        let _lock = SandboxLock::acquire(id, &layout.lock_path())?;

        let mut metadata: SandboxMetadata = read_json(&layout.metadata_path())?;
        mutate(&mut metadata);
        write_json_atomic(&layout.metadata_path(), &metadata)?;
        Ok(metadata)
    }

    pub fn set_status(&self, id: &str, status: SandboxStatus) -> Result<SandboxMetadata> {
        let metadata = self.update(id, |m| m.status = status)?;
        debug!(sandbox = %id, %status, "Sandbox status changed");
        Ok(metadata)
    }

    /// Append a run record. Existing records are never modified.
    pub fn append_run(&self, id: &str, run: RunRecord) -> Result<SandboxMetadata> {
        self.update(id, |m| m.runs.push(run))
    }

    /// Overwrite `run.json` with the latest run
    pub fn save_latest_run(&self, id: &str, run: &RunRecord) -> Result<()> {
        let layout = self.existing_layout(id)?;
        write_json_atomic(&layout.latest_run_path(), run)
    }

    /// Read `run.json`, if a run has completed
    pub fn load_latest_run(&self, id: &str) -> Result<Option<RunRecord>> {
        let layout = self.existing_layout(id)?;
        let path = layout.latest_run_path();
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Append one JSON line to `events.log`
    pub fn log_event(&self, id: &str, event: &Event) -> Result<()> {
        if !layout::is_valid_id(id) {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let layout = self.layout(id);
        if !layout.root().is_dir() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }

        let path = layout.events_path();
        let mut line = serde_json::to_string(event).map_err(StoreError::json(&path))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(StoreError::io(&path))?;
        file.write_all(line.as_bytes()).map_err(StoreError::io(&path))?;
        Ok(())
    }

    /// Every parsable event, in append order
    pub fn read_events(&self, id: &str) -> Result<Vec<Event>> {
        let layout = self.existing_layout(id)?;
        let path = layout.events_path();
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&path)(e)),
        };

        let mut out = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(StoreError::io(&path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => out.push(event),
                Err(e) => warn!(sandbox = %id, line = index + 1, error = %e, "Skipping malformed event"),
            }
        }
        Ok(out)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(StoreError::io(path))?;
    serde_json::from_str(&content).map_err(StoreError::json(path))
}

/// Write to a sibling temp file and rename over `path`
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value).map_err(StoreError::json(path))?;
    content.push('\n');

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(StoreError::io(&tmp))?;
    fs::rename(&tmp, path).map_err(StoreError::io(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::RunOutcome;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (SandboxStore, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SandboxStore::for_workspace(temp_dir.path());
        (store, temp_dir)
    }

    fn config(ttl: &str) -> SandboxConfig {
        SandboxConfig::new("demo", "python", ttl)
    }

    fn run_record(run_id: &str, exit_code: i64) -> RunRecord {
        let now = Utc::now();
        RunRecord {
            run_id: run_id.to_string(),
            task: "task.py".to_string(),
            started_at: now,
            completed_at: now,
            duration_ms: 5,
            exit_code,
            outcome: if exit_code == 0 {
                RunOutcome::Succeeded
            } else {
                RunOutcome::Failed
            },
            artifacts: vec!["outputs/stdout.log".to_string()],
        }
    }

    #[test]
    fn test_ids() {
        let id = generate_sandbox_id();
        assert_eq!(id.len(), 12);
        assert!(layout::is_valid_id(&id));
        assert_ne!(id, generate_sandbox_id());

        let run = generate_run_id();
        assert!(run.starts_with("run-"));
        assert_eq!(run.len(), 12);
    }

    #[test]
    fn test_create_lays_out_directories() {
        let (store, _dir) = create_test_store();
        let metadata = store.create(config("30m")).unwrap();

        assert_eq!(metadata.status, SandboxStatus::Created);
        let layout = store.layout(&metadata.id);
        assert!(layout.inputs_dir().is_dir());
        assert!(layout.work_dir().is_dir());
        assert!(layout.outputs_dir().is_dir());
        assert!(layout.metadata_path().is_file());

        let events = store.read_events(&metadata.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, events::SANDBOX_CREATED);
    }

    #[test]
    fn test_invalid_config_writes_nothing() {
        let (store, _dir) = create_test_store();
        let mut bad = config("30m");
        bad.inputs = vec!["../secrets.env".to_string()];
        bad.resources.memory = "huge".to_string();

        match store.create(bad) {
            Err(StoreError::InvalidConfig(err)) => assert_eq!(err.errors.len(), 2),
            other => panic!("expected invalid config, got {other:?}"),
        }
        assert!(!store.state_dir().exists());
    }

    #[test]
    fn test_load_round_trips() {
        let (store, _dir) = create_test_store();
        let created = store.create(config("30m")).unwrap();
        assert_eq!(store.load(&created.id).unwrap(), created);
    }

    #[test]
    fn test_load_missing_and_hostile_ids() {
        let (store, _dir) = create_test_store();
        assert!(store.load("000000000000").unwrap_err().is_not_found());
        assert!(store.load("../../etc").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_skips_corrupt_entries() {
        let (store, _dir) = create_test_store();
        let good = store.create(config("30m")).unwrap();

        let broken = store.sandboxes_dir().join("deadbeef0000");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("sandbox.json"), "{ not json").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good.id);
    }

    #[test]
    fn test_list_empty_workspace() {
        let (store, _dir) = create_test_store();
        assert!(store.list().unwrap().is_empty());
        assert!(store.get_latest().unwrap().is_none());
    }

    #[test]
    fn test_get_latest_picks_newest() {
        let (store, _dir) = create_test_store();
        let base = Utc::now();
        store.create_at(config("30m"), base).unwrap();
        let newest = store.create_at(config("30m"), base + Duration::seconds(5)).unwrap();
        store.create_at(config("30m"), base - Duration::seconds(5)).unwrap();

        assert_eq!(store.get_latest().unwrap().unwrap().id, newest.id);
    }

    #[test]
    fn test_destroy_twice_fails() {
        let (store, _dir) = create_test_store();
        let metadata = store.create(config("30m")).unwrap();

        store.destroy(&metadata.id).unwrap();
        assert!(!store.layout(&metadata.id).root().exists());
        assert!(store.destroy(&metadata.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_ttl_expiry_and_cleanup() {
        let (store, _dir) = create_test_store();
        let created_at = Utc::now();
        let short = store.create_at(config("1m"), created_at).unwrap();
        let long = store.create_at(config("1h"), created_at).unwrap();

        let later = created_at + Duration::seconds(61);
        assert!(short.is_expired_at(later));
        assert!(!long.is_expired_at(later));

        assert_eq!(store.cleanup_expired_at(later).unwrap(), 1);
        assert!(store.load(&short.id).unwrap_err().is_not_found());
        assert!(store.load(&long.id).is_ok());
    }

    #[test]
    fn test_cleanup_continues_past_failed_destroy() {
        let (store, _dir) = create_test_store();
        let created_at = Utc::now();
        let broken = store.create_at(config("1m"), created_at).unwrap();
        let healthy = store.create_at(config("1m"), created_at).unwrap();

        // A directory where the lock file belongs makes destroy fail
        let lock_path = store.layout(&broken.id).lock_path();
        let _ = fs::remove_file(&lock_path);
        fs::create_dir(&lock_path).unwrap();

        let later = created_at + Duration::seconds(61);
        assert_eq!(store.cleanup_expired_at(later).unwrap(), 1);
        assert!(store.load(&healthy.id).unwrap_err().is_not_found());
        assert!(store.load(&broken.id).is_ok());
    }

    #[test]
    fn test_destroy_all() {
        let (store, _dir) = create_test_store();
        store.create(config("30m")).unwrap();
        store.create(config("30m")).unwrap();

        assert_eq!(store.destroy_all().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_status_and_runs() {
        let (store, _dir) = create_test_store();
        let metadata = store.create(config("30m")).unwrap();

        store.set_status(&metadata.id, SandboxStatus::Running).unwrap();
        store.append_run(&metadata.id, run_record("run-00000001", 0)).unwrap();
        let updated = store.append_run(&metadata.id, run_record("run-00000002", 3)).unwrap();

        assert_eq!(updated.status, SandboxStatus::Running);
        assert_eq!(updated.runs.len(), 2);
        assert_eq!(updated.last_run().unwrap().exit_code, 3);
        assert_eq!(store.load(&metadata.id).unwrap(), updated);
    }

    #[test]
    fn test_latest_run_snapshot() {
        let (store, _dir) = create_test_store();
        let metadata = store.create(config("30m")).unwrap();
        assert!(store.load_latest_run(&metadata.id).unwrap().is_none());

        let run = run_record("run-0000000a", 0);
        store.save_latest_run(&metadata.id, &run).unwrap();
        assert_eq!(store.load_latest_run(&metadata.id).unwrap(), Some(run));
    }

    #[test]
    fn test_events_are_append_only() {
        let (store, _dir) = create_test_store();
        let metadata = store.create(config("30m")).unwrap();

        store
            .log_event(&metadata.id, &Event::new(events::RUN_STARTED).with("run_id", "run-1"))
            .unwrap();
        store
            .log_event(&metadata.id, &Event::new(events::RUN_COMPLETED).with("exit_code", 0))
            .unwrap();

        let content = fs::read_to_string(store.layout(&metadata.id).events_path()).unwrap();
        assert_eq!(content.lines().count(), 3);

        let names: Vec<_> = store
            .read_events(&metadata.id)
            .unwrap()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(
            names,
            vec![events::SANDBOX_CREATED, events::RUN_STARTED, events::RUN_COMPLETED]
        );
    }

    #[test]
    fn test_log_event_on_missing_sandbox() {
        let (store, _dir) = create_test_store();
        let err = store
            .log_event("abcdefabcdef", &Event::new("anything"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
