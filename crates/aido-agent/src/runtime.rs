//! Abstract container runtime interface
//!
//! Defines the Runtime trait the orchestrator drives, the container
//! description it passes down, and an in-memory mock for tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::{Mutex, Notify, RwLock};

use crate::demux::{encode_frame, StreamKind};
use crate::error::{AgentError, Result};

/// One pull progress message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullProgress {
    pub status: String,
    /// Layer id, when the message concerns a single layer
    pub id: Option<String>,
    pub progress: Option<String>,
}

/// Image pull as a stream of progress events. The stream ends when the pull
/// completes; an `Err` item means the pull failed.
pub type PullStream<'a> = BoxStream<'a, Result<PullProgress>>;

/// Host path bound into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }

    pub fn read_write(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// `source:target:ro|rw`
    pub fn bind_string(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.source.display(), self.target, mode)
    }
}

/// Network access for the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// No network namespace access at all
    None,
    /// Default bridge network
    Bridge,
}

impl NetworkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::Bridge => "bridge",
        }
    }
}

/// Kernel-enforced limits for the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU time per period, in microseconds
    pub cpu_quota: i64,
    /// Scheduling period, in microseconds
    pub cpu_period: i64,
    pub memory_bytes: i64,
    pub pids_limit: i64,
    pub no_new_privileges: bool,
}

/// Everything needed to create one task container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub limits: ResourceLimits,
    pub network: NetworkMode,
}

impl ContainerSpec {
    pub fn mount_at(&self, target: &str) -> Option<&Mount> {
        self.mounts.iter().find(|m| m.target == target)
    }
}

/// Abstract container runtime trait
///
/// Containers are addressed by the name given in [`ContainerSpec::name`].
#[async_trait::async_trait]
pub trait Runtime: Send + Sync {
    /// Check that the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// Whether `image` is present locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull `image`, yielding progress events until done
    fn pull_image<'a>(&'a self, image: &'a str) -> PullStream<'a>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    async fn start_container(&self, name: &str) -> Result<()>;

    /// Wait for the container to exit and return its exit code
    async fn wait_container(&self, name: &str) -> Result<i64>;

    /// Ask the container to stop, killing it after `grace`
    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()>;

    async fn kill_container(&self, name: &str) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Complete log output as the raw multiplexed byte stream
    async fn container_logs(&self, name: &str) -> Result<Bytes>;
}

// =============================================================================
// Mock runtime
// =============================================================================

/// Container state as tracked by [`MockRuntime`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited { code: i64 },
}

/// What a [`MockRuntime`] container does when started
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// `ping` succeeds
    pub available: bool,
    /// `image_exists` returns true
    pub image_present: bool,
    /// Pull stream ends with this error
    pub pull_error: Option<String>,
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Never exit on its own; only stop or kill ends it
    pub hang: bool,
    /// `stop_container` fails, forcing a kill
    pub stop_fails: bool,
    /// Files written under the `/outputs` mount on start, relative paths
    pub output_files: Vec<(String, Vec<u8>)>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            available: true,
            image_present: true,
            pull_error: None,
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            hang: false,
            stop_fails: false,
            output_files: Vec::new(),
        }
    }
}

/// In-memory mock runtime for testing and development
pub struct MockRuntime {
    behavior: MockBehavior,
    containers: RwLock<HashMap<String, ContainerState>>,
    created: Mutex<Vec<ContainerSpec>>,
    calls: Mutex<Vec<String>>,
    state_changed: Notify,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            containers: RwLock::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            state_changed: Notify::new(),
        }
    }

    /// Current state of `name`, `None` once removed
    pub async fn state(&self, name: &str) -> Option<ContainerState> {
        self.containers.read().await.get(name).cloned()
    }

    /// Every spec passed to `create_container`, in order
    pub async fn created_specs(&self) -> Vec<ContainerSpec> {
        self.created.lock().await.clone()
    }

    /// Names of the trait methods called, in order
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: &str) {
        self.calls.lock().await.push(call.to_string());
    }

    async fn set_state(&self, name: &str, state: ContainerState) -> Result<()> {
        let mut containers = self.containers.write().await;
        match containers.get_mut(name) {
            Some(current) => {
                *current = state;
                drop(containers);
                self.state_changed.notify_waiters();
                Ok(())
            }
            None => Err(not_found(name)),
        }
    }

    fn write_outputs(&self, spec: &ContainerSpec) -> Result<()> {
        let Some(outputs) = spec.mount_at("/outputs") else {
            return Ok(());
        };
        for (relative, content) in &self.behavior.output_files {
            let path = outputs.source.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(AgentError::staging(parent))?;
            }
            std::fs::write(&path, content).map_err(AgentError::staging(&path))?;
        }
        Ok(())
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(name: &str) -> AgentError {
    AgentError::NotFound {
        container: name.to_string(),
        reason: "container not found".to_string(),
    }
}

#[async_trait::async_trait]
impl Runtime for MockRuntime {
    async fn ping(&self) -> Result<()> {
        self.record("ping").await;
        if self.behavior.available {
            Ok(())
        } else {
            Err(AgentError::RuntimeUnavailable {
                reason: "mock runtime is offline".to_string(),
            })
        }
    }

    async fn image_exists(&self, _image: &str) -> Result<bool> {
        self.record("image_exists").await;
        Ok(self.behavior.image_present)
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> PullStream<'a> {
        let mut events = vec![Ok(PullProgress {
            status: format!("Pulling from {image}"),
            id: None,
            progress: None,
        })];
        if let Some(reason) = &self.behavior.pull_error {
            events.push(Err(AgentError::PullFailed {
                image: image.to_string(),
                reason: reason.clone(),
            }));
        } else {
            events.push(Ok(PullProgress {
                status: "Download complete".to_string(),
                id: Some("layer0".to_string()),
                progress: None,
            }));
        }
        stream::iter(events).boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        self.record("create_container").await;
        self.created.lock().await.push(spec.clone());
        self.containers
            .write()
            .await
            .insert(spec.name.clone(), ContainerState::Created);
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.record("start_container").await;
        let spec = self
            .created
            .lock()
            .await
            .iter()
            .rev()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| not_found(name))?;
        self.write_outputs(&spec)?;
        self.set_state(name, ContainerState::Running).await
    }

    async fn wait_container(&self, name: &str) -> Result<i64> {
        self.record("wait_container").await;
        loop {
            let changed = self.state_changed.notified();
            match self.state(name).await {
                None => return Err(not_found(name)),
                Some(ContainerState::Exited { code }) => return Ok(code),
                Some(_) if !self.behavior.hang => {
                    let code = self.behavior.exit_code;
                    self.set_state(name, ContainerState::Exited { code }).await?;
                    return Ok(code);
                }
                Some(_) => changed.await,
            }
        }
    }

    async fn stop_container(&self, name: &str, _grace: Duration) -> Result<()> {
        self.record("stop_container").await;
        if self.behavior.stop_fails {
            return Err(AgentError::Runtime(format!(
                "mock refused to stop container '{name}'"
            )));
        }
        self.set_state(name, ContainerState::Exited { code: 143 }).await
    }

    async fn kill_container(&self, name: &str) -> Result<()> {
        self.record("kill_container").await;
        self.set_state(name, ContainerState::Exited { code: 137 }).await
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.record("remove_container").await;
        let removed = self.containers.write().await.remove(name);
        self.state_changed.notify_waiters();
        removed.map(|_| ()).ok_or_else(|| not_found(name))
    }

    async fn container_logs(&self, name: &str) -> Result<Bytes> {
        self.record("container_logs").await;
        if self.state(name).await.is_none() {
            return Err(not_found(name));
        }
        let mut raw = encode_frame(StreamKind::Stdout, &self.behavior.stdout);
        raw.extend(encode_frame(StreamKind::Stderr, &self.behavior.stderr));
        Ok(Bytes::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::demultiplex;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "python:3.11-slim".to_string(),
            command: vec!["python".to_string(), "/work/task.py".to_string()],
            working_dir: "/work".to_string(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            limits: ResourceLimits {
                cpu_quota: 100_000,
                cpu_period: 100_000,
                memory_bytes: 512 * 1024 * 1024,
                pids_limit: 100,
                no_new_privileges: true,
            },
            network: NetworkMode::None,
        }
    }

    #[tokio::test]
    async fn test_mock_runtime_lifecycle() {
        let runtime = MockRuntime::with_behavior(MockBehavior {
            exit_code: 3,
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
            ..MockBehavior::default()
        });

        runtime.create_container(&spec("c1")).await.unwrap();
        runtime.start_container("c1").await.unwrap();
        assert_eq!(runtime.state("c1").await, Some(ContainerState::Running));

        assert_eq!(runtime.wait_container("c1").await.unwrap(), 3);
        let logs = demultiplex(&runtime.container_logs("c1").await.unwrap());
        assert_eq!(logs.stdout, b"out");
        assert_eq!(logs.stderr, b"err");

        runtime.remove_container("c1").await.unwrap();
        assert!(runtime.state("c1").await.is_none());
        assert!(runtime.remove_container("c1").await.is_err());
    }

    #[tokio::test]
    async fn test_hanging_container_exits_on_kill() {
        let runtime = std::sync::Arc::new(MockRuntime::with_behavior(MockBehavior {
            hang: true,
            ..MockBehavior::default()
        }));
        runtime.create_container(&spec("c2")).await.unwrap();
        runtime.start_container("c2").await.unwrap();

        let waiter = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.wait_container("c2").await })
        };
        tokio::task::yield_now().await;

        runtime.kill_container("c2").await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 137);
    }

    #[tokio::test]
    async fn test_pull_stream_reports_failure() {
        let runtime = MockRuntime::with_behavior(MockBehavior {
            pull_error: Some("manifest unknown".to_string()),
            ..MockBehavior::default()
        });
        let events: Vec<_> = runtime.pull_image("nope:latest").collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(AgentError::PullFailed { .. })));
    }

    #[test]
    fn test_bind_string() {
        assert_eq!(
            Mount::read_only("/tmp/in", "/inputs").bind_string(),
            "/tmp/in:/inputs:ro"
        );
        assert_eq!(
            Mount::read_write("/tmp/out", "/outputs").bind_string(),
            "/tmp/out:/outputs:rw"
        );
    }
}
