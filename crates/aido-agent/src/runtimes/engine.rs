//! Raw Docker Engine API access over the Unix socket
//!
//! bollard demultiplexes log streams itself. The orchestrator needs the raw
//! framed bytes, so logs are fetched here with a plain HTTP/1 client routed
//! to the engine socket.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::UnixStream;

use crate::error::{AgentError, Result};

/// A [`tower::Service`] connector that sends every request to one Unix socket,
/// whatever the URI's host.
#[derive(Clone)]
struct UnixConnector {
    socket_path: PathBuf,
}

impl tower::Service<Uri> for UnixConnector {
    type Response = TokioIo<UnixStream>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        let path = self.socket_path.clone();
        Box::pin(async move {
            let stream = UnixStream::connect(&path).await?;
            Ok(TokioIo::new(stream))
        })
    }
}

/// Fetches raw container logs from the engine socket
pub(crate) struct EngineLogClient {
    client: Client<UnixConnector, Full<Bytes>>,
    socket_path: PathBuf,
}

impl EngineLogClient {
    pub(crate) fn new(socket_path: &Path) -> Self {
        let connector = UnixConnector {
            socket_path: socket_path.to_path_buf(),
        };
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            socket_path: socket_path.to_path_buf(),
        }
    }

    pub(crate) fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Entire stdout and stderr history of `container`, still framed
    pub(crate) async fn raw_logs(&self, container: &str) -> Result<Bytes> {
        let path = logs_path(container);
        let uri: Uri = format!("http://localhost{path}")
            .parse()
            .map_err(|e| AgentError::Internal(format!("invalid log request path {path}: {e}")))?;

        let req = hyper::Request::builder()
            .method(hyper::Method::GET)
            .uri(uri)
            .header("Host", "localhost")
            .body(Full::new(Bytes::new()))
            .map_err(|e| AgentError::Internal(format!("failed to build log request: {e}")))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| AgentError::Runtime(format!("GET {path} failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| AgentError::Runtime(format!("failed to read log body: {e}")))?
            .to_bytes();

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::NOT_FOUND => Err(AgentError::NotFound {
                container: container.to_string(),
                reason: String::from_utf8_lossy(&body).trim().to_string(),
            }),
            s => Err(AgentError::Runtime(format!(
                "engine returned {s} for logs of '{container}': {}",
                String::from_utf8_lossy(&body).trim()
            ))),
        }
    }
}

fn logs_path(container: &str) -> String {
    format!("/containers/{container}/logs?stdout=1&stderr=1&follow=0&timestamps=0")
}
