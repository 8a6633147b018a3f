//! containerd client over its unix domain socket
//!
//! containerd serves gRPC on `/run/containerd/containerd.sock`. tonic needs
//! an `http://` URI for every channel, so the URI below is a placeholder:
//! the custom connector ignores it and dials the socket path instead.
//!
//! Every call carries the `containerd-namespace` header; Kubernetes
//! (via the CRI plugin) keeps all of its containers in `k8s.io`.

use std::path::PathBuf;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Code, Request, Status};
use tower::service_fn;
use tracing::debug;

use super::proto::{
    GetRequest, HealthCheckRequest, HealthClient, ServingStatus, TasksClient,
};
use super::{RuntimeConnector, RuntimeError, RuntimeSession};

/// Default containerd socket path
pub const DEFAULT_CONTAINERD_SOCKET: &str = "/run/containerd/containerd.sock";

/// containerd namespace used by the Kubernetes CRI plugin
pub const DEFAULT_RUNTIME_NAMESPACE: &str = "k8s.io";

/// Metadata key containerd reads the namespace from
const NAMESPACE_HEADER: &str = "containerd-namespace";

/// Opens one [`ContainerdSession`] per call to [`RuntimeConnector::connect`]
#[derive(Debug, Clone)]
pub struct ContainerdConnector {
    socket: PathBuf,
}

impl ContainerdConnector {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }
}

impl Default for ContainerdConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONTAINERD_SOCKET)
    }
}

#[tonic::async_trait]
impl RuntimeConnector for ContainerdConnector {
    async fn connect(&self) -> Result<Box<dyn RuntimeSession>, RuntimeError> {
        let session = ContainerdSession::connect(self.socket.clone()).await?;
        Ok(Box::new(session))
    }
}

/// A live gRPC channel to containerd
#[derive(Debug, Clone)]
pub struct ContainerdSession {
    tasks: TasksClient<Channel>,
    health: HealthClient<Channel>,
}

impl ContainerdSession {
    /// Dial the containerd socket
    ///
    /// The connection is established eagerly so a missing or dead socket is
    /// reported here rather than on the first call.
    pub async fn connect(socket: PathBuf) -> Result<Self, RuntimeError> {
        let path = socket.clone();

        let channel = Endpoint::from_static("http://[::]:50051")
            .connect_with_connector(service_fn(move |_: Uri| {
                let p = path.clone();
                async move {
                    let stream = UnixStream::connect(p).await?;
                    Ok::<_, std::io::Error>(TokioIo::new(stream))
                }
            }))
            .await
            .map_err(|source| RuntimeError::Connect {
                path: socket.clone(),
                source,
            })?;

        debug!(socket = %socket.display(), "Connected to containerd");
        Ok(Self {
            tasks: TasksClient::new(channel.clone()),
            health: HealthClient::new(channel),
        })
    }
}

#[tonic::async_trait]
impl RuntimeSession for ContainerdSession {
    async fn is_serving(&self) -> Result<bool, RuntimeError> {
        let response = self
            .health
            .clone()
            .check(HealthCheckRequest::default())
            .await?
            .into_inner();
        Ok(response.status == ServingStatus::Serving as i32)
    }

    async fn resolve_pid(&self, namespace: &str, container_id: &str) -> Result<u32, RuntimeError> {
        let mut request = Request::new(GetRequest {
            container_id: container_id.to_string(),
            exec_id: String::new(),
        });
        let value = namespace
            .parse::<MetadataValue<Ascii>>()
            .map_err(|_| RuntimeError::InvalidNamespace(namespace.to_string()))?;
        request.metadata_mut().insert(NAMESPACE_HEADER, value);

        let response = self
            .tasks
            .clone()
            .get(request)
            .await
            .map_err(|status| task_error(container_id, status))?
            .into_inner();

        response
            .process
            .map(|process| process.pid)
            .ok_or_else(|| RuntimeError::NoProcess(container_id.to_string()))
    }
}

/// Map a Tasks/Get failure onto a [`RuntimeError`]
fn task_error(container_id: &str, status: Status) -> RuntimeError {
    match status.code() {
        Code::NotFound => RuntimeError::TaskNotFound(container_id.to_string()),
        _ => RuntimeError::Grpc(status),
    }
}
