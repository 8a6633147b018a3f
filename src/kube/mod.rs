//! Kubernetes API access
//!
//! - `client` - REST client (get/list/watch pods, Lease CRUD)
//! - `types` - the subset of Pod and Lease this agent reads
//! - `leader` - Lease-based leader election
//!
//! The reconcile pipeline only sees [`PodSource`], so it can be driven by a
//! fake in tests.

pub mod client;
pub mod leader;
pub mod types;

use std::io;
use std::path::PathBuf;

pub use client::{KubeClient, WatchStream};
pub use leader::{LeaderElector, LeaderError};
pub use types::{Pod, PodList, WatchEvent};

use crate::reconcile::{WorkloadKey, WorkloadSnapshot};

/// Error type for Kubernetes API operations
#[derive(Debug, thiserror::Error)]
pub enum KubeError {
    #[error("kubernetes client configuration: {0}")]
    Config(String),

    #[error("kubernetes request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("kubernetes API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode kubernetes response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The watch's resourceVersion is too old; the caller must re-list
    #[error("resource version expired")]
    Gone,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads the current state of a pod
#[tonic::async_trait]
pub trait PodSource: Send + Sync {
    /// `Ok(None)` when the pod does not exist
    async fn get(&self, key: &WorkloadKey) -> Result<Option<WorkloadSnapshot>, KubeError>;
}

#[tonic::async_trait]
impl PodSource for KubeClient {
    async fn get(&self, key: &WorkloadKey) -> Result<Option<WorkloadSnapshot>, KubeError> {
        Ok(self.get_pod(key).await?.map(Pod::into_snapshot))
    }
}
