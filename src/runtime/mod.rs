//! Container runtime task resolution
//!
//! Maps a container id from a pod's status to the OS pid of the container's
//! main task by asking the container runtime.
//!
//! # Flow
//!
//! ```text
//! pod status: containerd://abc123
//!                 │ strip scheme
//!                 ▼
//!           RuntimeConnector::connect()   ← one session per batch
//!                 │
//!           RuntimeSession::is_serving()  ← liveness gate
//!                 │
//!           RuntimeSession::resolve_pid("k8s.io", "abc123")
//!                 │
//!                 ▼
//!              pid 4242
//! ```

pub mod containerd;
pub mod proto;

use std::path::PathBuf;

pub use containerd::{
    ContainerdConnector, ContainerdSession, DEFAULT_CONTAINERD_SOCKET, DEFAULT_RUNTIME_NAMESPACE,
};

/// Error type for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to connect to container runtime at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: tonic::transport::Error,
    },

    /// No task exists for the container (it has usually already exited)
    #[error("task for container {0} not found")]
    TaskNotFound(String),

    #[error("task for container {0} has no process")]
    NoProcess(String),

    #[error("invalid runtime namespace {0:?}")]
    InvalidNamespace(String),

    #[error("container runtime call failed: {0}")]
    Grpc(#[from] tonic::Status),
}

/// Opens sessions to the container runtime
#[tonic::async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RuntimeSession>, RuntimeError>;
}

/// One connection to the container runtime's control plane
#[tonic::async_trait]
pub trait RuntimeSession: Send + Sync {
    /// Whether the runtime reports itself as serving
    async fn is_serving(&self) -> Result<bool, RuntimeError>;

    /// pid of the main task of `container_id` within `namespace`
    async fn resolve_pid(&self, namespace: &str, container_id: &str) -> Result<u32, RuntimeError>;
}
