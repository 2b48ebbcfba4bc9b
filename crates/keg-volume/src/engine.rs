//! Container engine client.
//!
//! Discovery needs three things from the engine: proof it is alive, the set
//! of containers that can currently hold volumes, and each container's mount
//! list. [`ContainerEngine`] is the seam for that; [`DockerEngine`] is the
//! production implementation speaking the engine's HTTP API over its local
//! admin unix socket at a pinned API version.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use hyper::client::connect::{Connected, Connection};
use hyper::service::Service;
use hyper::{Body, Client, Method, Request, Uri, header};
use keg_common::{KegError, KegResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UnixStream;

use crate::config::ENGINE_API_VERSION;

/// Identifying header sent with every engine API request.
const USER_AGENT: &str = "keg-volume-client/1.0";

/// Run states of containers that can hold volume mounts. Stopped and removed
/// containers are irrelevant to refcounts.
const ACTIVE_STATES: [&str; 3] = ["running", "paused", "restarting"];

/// Basic engine identification returned by a ping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineInfo {
    /// Engine server version.
    #[serde(default, rename = "ServerVersion")]
    pub server_version: String,
    /// Engine data root directory.
    #[serde(default, rename = "DockerRootDir")]
    pub root_dir: String,
    /// Host operating system.
    #[serde(default, rename = "OperatingSystem")]
    pub operating_system: String,
}

/// One container from the engine's container list.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSummary {
    /// Container ID.
    #[serde(rename = "Id")]
    pub id: String,
    /// Container names (the engine reports each with a leading slash).
    #[serde(default, rename = "Names")]
    pub names: Vec<String>,
    /// Run state, e.g. `running` or `paused`.
    #[serde(default, rename = "State")]
    pub state: String,
}

/// One named-volume mount from a container inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMount {
    /// Volume name.
    pub name: String,
    /// Volume driver serving the mount.
    pub driver: String,
    /// Host path backing the mount.
    pub source: String,
}

/// Operations discovery needs from the container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check the engine is reachable and return its identification.
    async fn ping(&self) -> KegResult<EngineInfo>;

    /// List containers whose run state can hold volume mounts
    /// (running, paused or restarting).
    async fn list_active_containers(&self) -> KegResult<Vec<ContainerSummary>>;

    /// Inspect one container and return its named-volume mounts.
    async fn inspect_container(&self, id: &str) -> KegResult<Vec<ContainerMount>>;
}

/// Engine client over the local Docker admin socket.
pub struct DockerEngine {
    client: Client<UnixConnector, Body>,
}

impl DockerEngine {
    /// Create a client for the engine socket at `socket`.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::Config`] when the socket path is empty or not
    /// absolute. A missing or unresponsive socket is not an error here; it
    /// surfaces from [`ContainerEngine::ping`].
    pub fn new(socket: impl Into<PathBuf>) -> KegResult<Self> {
        let socket = socket.into();
        if socket.as_os_str().is_empty() || !socket.is_absolute() {
            return Err(KegError::Config {
                message: format!(
                    "Engine socket path must be absolute: '{}'",
                    socket.display()
                ),
            });
        }
        let connector = UnixConnector { path: socket };
        Ok(Self {
            client: Client::builder().build(connector),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> KegResult<T> {
        // The connector ignores the authority and dials the socket; the URI
        // only needs to be well-formed.
        let uri: Uri =
            format!("http://localhost/{ENGINE_API_VERSION}{path_and_query}")
                .parse()
                .map_err(|err| KegError::Engine {
                    message: format!("Invalid engine URI for {path_and_query}: {err}"),
                })?;
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::HOST, "localhost")
            .header(header::USER_AGENT, USER_AGENT)
            .body(Body::empty())
            .map_err(|err| KegError::Engine {
                message: format!("Failed to build engine request: {err}"),
            })?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|err| KegError::Engine {
                message: format!("Engine request GET {path_and_query} failed: {err}"),
            })?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|err| KegError::Engine {
                message: format!("Failed to read engine response body: {err}"),
            })?;
        if !status.is_success() {
            return Err(KegError::Engine {
                message: format!("GET {path_and_query} returned {status}"),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> KegResult<EngineInfo> {
        self.get_json("/info").await
    }

    async fn list_active_containers(&self) -> KegResult<Vec<ContainerSummary>> {
        // The unfiltered list already excludes stopped containers; the state
        // check keeps API version drift from widening it.
        let containers: Vec<ContainerSummary> = self.get_json("/containers/json").await?;
        Ok(containers
            .into_iter()
            .filter(|ct| is_active_state(&ct.state))
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> KegResult<Vec<ContainerMount>> {
        let detail: ContainerDetail = self.get_json(&format!("/containers/{id}/json")).await?;
        Ok(detail
            .mounts
            .into_iter()
            .filter_map(|m| match (m.name, m.driver) {
                (Some(name), Some(driver)) => Some(ContainerMount {
                    name,
                    driver,
                    source: m.source.unwrap_or_default(),
                }),
                // Bind mounts carry no volume name or driver.
                _ => None,
            })
            .collect())
    }
}

fn is_active_state(state: &str) -> bool {
    ACTIVE_STATES.contains(&state)
}

#[derive(Debug, Deserialize)]
struct ContainerDetail {
    #[serde(default, rename = "Mounts")]
    mounts: Vec<MountPoint>,
}

#[derive(Debug, Deserialize)]
struct MountPoint {
    #[serde(default, rename = "Name")]
    name: Option<String>,
    #[serde(default, rename = "Driver")]
    driver: Option<String>,
    #[serde(default, rename = "Source")]
    source: Option<String>,
}

/// Hyper connector dialing a fixed unix socket regardless of the URI.
#[derive(Debug, Clone)]
struct UnixConnector {
    path: PathBuf,
}

impl Service<Uri> for UnixConnector {
    type Response = UnixConn;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = std::io::Result<UnixConn>> + Send + 'static>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        let path = self.path.clone();
        Box::pin(async move { UnixStream::connect(path).await.map(UnixConn) })
    }
}

/// A connected unix stream usable as a hyper transport.
struct UnixConn(UnixStream);

impl Connection for UnixConn {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl AsyncRead for UnixConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UnixConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}
