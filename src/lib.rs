//! cgroup-enhancer - per-node agent granting block-device access to pods
//!
//! Pods opt in with an annotation carrying an access pattern (`r`, `rw`,
//! `rwm`, ...). For every running, annotated pod on the node the agent asks
//! containerd for each container's init pid and appends `b *:* <access>` to
//! that process's cgroup v1 `devices.allow`.
//!
//! # Modules
//!
//! - `config` - CLI flags and pipeline configuration
//! - `kube` - Kubernetes API client, pod watch, leader election
//! - `controller` - list/watch loop feeding the reconciler
//! - `reconcile` - the admission gate and the detached enforcer
//! - `runtime` - containerd task lookup over gRPC
//! - `cgroups` - devices controller rules and cgroupfs writes
//! - `probes` - health, metrics and debug HTTP endpoints
//! - `metrics` - Prometheus metrics for observability
//! - `security` - capability preflight
//! - `tracing` - log and trace setup
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use cgroup_enhancer::{ContainerdConnector, EnhancerConfig, Enforcer, HostCgroups};
//!
//! let config = EnhancerConfig::default();
//! let enforcer = Enforcer::new(
//!     Arc::new(ContainerdConnector::new(&config.containerd_socket)),
//!     Arc::new(HostCgroups::new(&config.proc_root, &config.cgroup_root)),
//!     &config,
//! );
//! ```

pub mod cgroups;
pub mod config;
pub mod controller;
pub mod kube;
pub mod metrics;
pub mod probes;
pub mod reconcile;
pub mod runtime;
pub mod security;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use cgroups::{allow_all_block, DeviceAccess, DeviceRule, HostCgroups};
pub use config::{Args, EnhancerConfig};
pub use reconcile::{Enforcer, ReconcileAction, Reconciler, WorkloadKey};
pub use runtime::ContainerdConnector;
