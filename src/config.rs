//! Process configuration
//!
//! Two layers:
//! - [`Args`] - command-line flags (each also readable from the environment)
//! - [`EnhancerConfig`] - the fixed values the reconcile pipeline needs,
//!   handed to [`Reconciler`](crate::reconcile::Reconciler) and
//!   [`Enforcer`](crate::reconcile::Enforcer) at construction

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::cgroups::manager::{DEFAULT_CGROUP_ROOT, DEFAULT_PROC_ROOT};
use crate::runtime::{DEFAULT_CONTAINERD_SOCKET, DEFAULT_RUNTIME_NAMESPACE};

/// Annotation whose value is the block-device access pattern to grant
pub const DEFAULT_ANNOTATION_KEY: &str = "cgroup-enhancer.device.allow.block";

/// Deadline for one enforcement batch
pub const DEFAULT_ENFORCE_TIMEOUT_SECS: u64 = 30;

/// Configuration for the reconcile pipeline
#[derive(Debug, Clone)]
pub struct EnhancerConfig {
    /// Pod annotation carrying the access pattern
    pub annotation_key: String,
    /// containerd namespace holding Kubernetes containers
    pub runtime_namespace: String,
    /// containerd gRPC socket
    pub containerd_socket: PathBuf,
    /// Mount point of the cgroup filesystem
    pub cgroup_root: PathBuf,
    /// Mount point of procfs
    pub proc_root: PathBuf,
    /// Deadline for one enforcement batch; expiry aborts the batch
    pub enforce_timeout: Duration,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            annotation_key: DEFAULT_ANNOTATION_KEY.to_string(),
            runtime_namespace: DEFAULT_RUNTIME_NAMESPACE.to_string(),
            containerd_socket: PathBuf::from(DEFAULT_CONTAINERD_SOCKET),
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            enforce_timeout: Duration::from_secs(DEFAULT_ENFORCE_TIMEOUT_SECS),
        }
    }
}

/// Grants block-device access to running pods by editing their devices cgroup
#[derive(Debug, Clone, Parser)]
#[command(name = "cgroup-enhancer", version, about)]
pub struct Args {
    /// Address the metrics endpoint binds to
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: SocketAddr,

    /// Address the health and readiness probes bind to
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: SocketAddr,

    /// Address the runtime debug endpoint binds to
    #[arg(long, env = "PPROF_BIND_ADDRESS", default_value = "0.0.0.0:6066")]
    pub pprof_bind_address: SocketAddr,

    /// Enable leader election. Only the lease holder reconciles pods.
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    /// Name of the Lease object used for leader election
    #[arg(long, env = "LEADER_ELECTION_ID", default_value = "f8bbece0.cgroup-enhancer")]
    pub leader_election_id: String,

    /// Namespace of the leader election Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    /// Node whose pods are watched
    #[arg(long, env = "KUBERNETES_NODE_NAME")]
    pub node_name: String,

    /// Kubernetes API URL (e.g. from `kubectl proxy`). In-cluster config is used when unset.
    #[arg(long, env = "KUBE_API_URL")]
    pub kube_api_url: Option<String>,

    /// containerd gRPC socket
    #[arg(long, env = "CONTAINERD_SOCKET", default_value = DEFAULT_CONTAINERD_SOCKET)]
    pub containerd_socket: PathBuf,

    /// containerd namespace of Kubernetes containers
    #[arg(long, env = "CONTAINERD_NAMESPACE", default_value = DEFAULT_RUNTIME_NAMESPACE)]
    pub containerd_namespace: String,

    /// Pod annotation holding the block-device access pattern
    #[arg(long, env = "ANNOTATION_KEY", default_value = DEFAULT_ANNOTATION_KEY)]
    pub annotation_key: String,

    /// Mount point of the host cgroup filesystem
    #[arg(long, env = "CGROUP_ROOT", default_value = DEFAULT_CGROUP_ROOT)]
    pub cgroup_root: PathBuf,

    /// Mount point of the host procfs
    #[arg(long, env = "PROC_ROOT", default_value = DEFAULT_PROC_ROOT)]
    pub proc_root: PathBuf,

    /// Seconds one enforcement batch may run before it is aborted
    #[arg(long, env = "ENFORCE_TIMEOUT_SECS", default_value_t = DEFAULT_ENFORCE_TIMEOUT_SECS)]
    pub enforce_timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// OTLP collector endpoint; traces are exported when set
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Args {
    /// Pipeline configuration derived from the flags
    pub fn enhancer_config(&self) -> EnhancerConfig {
        EnhancerConfig {
            annotation_key: self.annotation_key.clone(),
            runtime_namespace: self.containerd_namespace.clone(),
            containerd_socket: self.containerd_socket.clone(),
            cgroup_root: self.cgroup_root.clone(),
            proc_root: self.proc_root.clone(),
            enforce_timeout: Duration::from_secs(self.enforce_timeout_secs),
        }
    }
}
