//! Container runtime implementations

#[cfg(feature = "docker")]
mod docker;
#[cfg(all(feature = "docker", unix))]
mod engine;

#[cfg(feature = "docker")]
pub use docker::{DockerRuntime, DEFAULT_DOCKER_SOCKET};

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::runtime::Runtime;

/// Connect to the container engine this build supports.
///
/// `socket` overrides the engine socket; see [`DockerRuntime::connect`].
#[cfg(feature = "docker")]
pub fn connect_runtime(socket: Option<&Path>) -> Result<Arc<dyn Runtime>> {
    Ok(Arc::new(DockerRuntime::connect(socket)?))
}

/// Connect to the container engine this build supports.
///
/// Built without the `docker` feature, there is none.
#[cfg(not(feature = "docker"))]
pub fn connect_runtime(_socket: Option<&Path>) -> Result<Arc<dyn Runtime>> {
    Err(crate::error::AgentError::RuntimeUnavailable {
        reason: "aido was built without the docker feature".to_string(),
    })
}
