//! Docker-based container runtime using bollard

use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::instrument;

use crate::demux::{encode_frame, StreamKind};
use crate::error::{AgentError, Result};
use crate::runtime::{ContainerSpec, PullProgress, PullStream, Runtime};

#[cfg(unix)]
use super::engine::EngineLogClient;

/// Socket used when `DOCKER_HOST` is unset
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Docker-based container runtime using bollard
///
/// Lifecycle calls go through bollard. Logs are read raw from the engine
/// socket when one is known, so they can be demultiplexed by the caller.
pub struct DockerRuntime {
    docker: Docker,
    #[cfg(unix)]
    engine: Option<EngineLogClient>,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime").finish_non_exhaustive()
    }
}

impl DockerRuntime {
    /// Connect to the Docker daemon.
    ///
    /// With `socket` set, that Unix socket is used. Otherwise the socket comes
    /// from `DOCKER_HOST` (`unix://...`) or the platform default; non-socket
    /// hosts fall back to bollard's local defaults.
    ///
    /// Connecting is lazy: reachability is checked by [`Runtime::ping`].
    pub fn connect(socket: Option<&Path>) -> Result<Self> {
        let socket = socket.map(Path::to_path_buf).or_else(local_socket_path);

        match socket {
            Some(path) => {
                let docker = Docker::connect_with_unix(
                    &path.to_string_lossy(),
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
                .map_err(|e| AgentError::RuntimeUnavailable {
                    reason: format!("failed to connect to {}: {e}", path.display()),
                })?;
                tracing::debug!(socket = %path.display(), "Using Docker socket");
                Ok(Self {
                    docker,
                    #[cfg(unix)]
                    engine: Some(EngineLogClient::new(&path)),
                })
            }
            None => {
                let docker = Docker::connect_with_local_defaults().map_err(|e| {
                    AgentError::RuntimeUnavailable {
                        reason: format!("failed to connect to Docker: {e}"),
                    }
                })?;
                Ok(Self::with_client(docker))
            }
        }
    }

    /// Wrap a pre-configured bollard client. Logs are read through bollard.
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            #[cfg(unix)]
            engine: None,
        }
    }

    /// Read logs through bollard and re-frame them
    async fn logs_via_api(&self, name: &str) -> Result<Bytes> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            timestamps: false,
            ..Default::default()
        };

        let mut stream = self.docker.logs(name, Some(options));
        let mut raw = Vec::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdErr { message }) => {
                    raw.extend(encode_frame(StreamKind::Stderr, &message))
                }
                Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                    raw.extend(encode_frame(StreamKind::Stdout, &message))
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => {
                    return Err(AgentError::Runtime(format!(
                        "failed to get logs for '{name}': {e}"
                    )))
                }
            }
        }
        Ok(Bytes::from(raw))
    }
}

/// Unix socket named by `DOCKER_HOST`, or the default socket if it exists
fn local_socket_path() -> Option<PathBuf> {
    match std::env::var("DOCKER_HOST") {
        Ok(host) => host.strip_prefix("unix://").map(PathBuf::from),
        Err(_) => {
            let path = PathBuf::from(DEFAULT_DOCKER_SOCKET);
            path.exists().then_some(path)
        }
    }
}

/// Parse an image reference into name and tag
fn parse_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    if let Some((name, tag)) = image.rsplit_once(':') {
        // `localhost:5000/image` has a registry port, not a tag
        if !tag.contains('/') {
            return (name, tag);
        }
    }
    (image, "latest")
}

/// Translate a container spec into the engine's create body
fn build_create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let host_config = HostConfig {
        binds: Some(spec.mounts.iter().map(|m| m.bind_string()).collect()),
        network_mode: Some(spec.network.as_str().to_string()),
        cpu_quota: Some(spec.limits.cpu_quota),
        cpu_period: Some(spec.limits.cpu_period),
        memory: Some(spec.limits.memory_bytes),
        pids_limit: Some(spec.limits.pids_limit),
        security_opt: spec
            .limits
            .no_new_privileges
            .then(|| vec!["no-new-privileges".to_string()]),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        env: if env.is_empty() { None } else { Some(env) },
        working_dir: Some(spec.working_dir.clone()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait::async_trait]
impl Runtime for DockerRuntime {
    #[instrument(skip(self), fields(otel.name = "engine.ping"))]
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| AgentError::RuntimeUnavailable {
                reason: format!("Docker ping failed: {e}"),
            })
    }

    #[instrument(skip(self), fields(otel.name = "image.inspect", container.image.name = %image))]
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(AgentError::Runtime(format!(
                "failed to inspect image '{image}': {e}"
            ))),
        }
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> PullStream<'a> {
        let (name, tag) = parse_image_ref(image);
        tracing::info!(image = %image, name = %name, tag = %tag, "pulling image");

        let options = CreateImageOptions {
            from_image: Some(name.to_string()),
            tag: if tag.is_empty() {
                None
            } else {
                Some(tag.to_string())
            },
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .map(move |result| match result {
                Ok(info) => Ok(PullProgress {
                    status: info.status.unwrap_or_default(),
                    id: info.id,
                    progress: info.progress,
                }),
                Err(e) => Err(AgentError::PullFailed {
                    image: image.to_string(),
                    reason: e.to_string(),
                }),
            })
            .boxed()
    }

    #[instrument(
        skip(self, spec),
        fields(
            otel.name = "container.create",
            container.id = %spec.name,
            container.image.name = %spec.image,
        )
    )]
    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            platform: String::new(),
        };

        tracing::info!(container = %spec.name, image = %spec.image, "creating container");

        self.docker
            .create_container(Some(options), build_create_body(spec))
            .await
            .map_err(|e| AgentError::CreateFailed {
                id: spec.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    #[instrument(skip(self), fields(otel.name = "container.start", container.id = %name))]
    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(|e| AgentError::StartFailed {
                id: name.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(container = %name, "container started");
        Ok(())
    }

    #[instrument(skip(self), fields(otel.name = "container.wait", container.id = %name))]
    async fn wait_container(&self, name: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };

        let mut stream = self.docker.wait_container(name, Some(options));
        let exit_code = match stream.next().await {
            Some(Ok(response)) => response.status_code,
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                return Err(AgentError::Runtime(format!(
                    "failed to wait for container '{name}': {e}"
                )))
            }
            None => {
                return Err(AgentError::NotFound {
                    container: name.to_string(),
                    reason: "wait stream closed unexpectedly".to_string(),
                })
            }
        };

        tracing::info!(container = %name, exit_code, "container exited");
        Ok(exit_code)
    }

    #[instrument(
        skip(self),
        fields(otel.name = "container.stop", container.id = %name, grace_ms = %grace.as_millis())
    )]
    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: Some(i32::try_from(grace.as_secs()).unwrap_or(i32::MAX)),
            signal: None,
        };
        self.docker
            .stop_container(name, Some(options))
            .await
            .map_err(|e| AgentError::Runtime(format!("failed to stop container '{name}': {e}")))
    }

    #[instrument(skip(self), fields(otel.name = "container.kill", container.id = %name))]
    async fn kill_container(&self, name: &str) -> Result<()> {
        self.docker
            .kill_container(name, None::<KillContainerOptions>)
            .await
            .map_err(|e| AgentError::Runtime(format!("failed to kill container '{name}': {e}")))
    }

    #[instrument(skip(self), fields(otel.name = "container.remove", container.id = %name))]
    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| AgentError::NotFound {
                container: name.to_string(),
                reason: format!("failed to remove container: {e}"),
            })
    }

    #[instrument(skip(self), fields(otel.name = "container.logs", container.id = %name))]
    async fn container_logs(&self, name: &str) -> Result<Bytes> {
        #[cfg(unix)]
        {
            if let Some(engine) = &self.engine {
                tracing::debug!(socket = %engine.socket_path().display(), "reading raw logs");
                return engine.raw_logs(name).await;
            }
        }
        self.logs_via_api(name).await
    }
}
