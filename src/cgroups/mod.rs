//! cgroup v1 device-access enforcement
//!
//! This module grants device access to a running container by writing a
//! rule straight into the devices cgroup of its main process, bypassing the
//! container runtime's resource-spec pipeline.
//!
//! # Example Usage
//!
//! ```ignore
//! use cgroup_enhancer::cgroups::{allow_all_block, apply_rule, DeviceAccess, HostCgroups};
//!
//! let host = HostCgroups::default();
//! let rule = allow_all_block(DeviceAccess::parse("rwm")?)?;
//!
//! // pid of the container's main task, from the runtime
//! match apply_rule(&host, 4242, &rule)? {
//!     ApplyOutcome::Applied => println!("granted"),
//!     ApplyOutcome::Deleted => println!("container already gone"),
//! }
//! ```

pub mod devices;
pub mod manager;

use std::io;
use std::path::PathBuf;

pub use devices::{allow_all_block, DeviceAccess, DeviceRule};
pub use manager::{
    apply_rule, ApplyOutcome, CgroupControl, CgroupLoader, CgroupState, DevicesCgroup,
    HostCgroups,
};

/// Error type for cgroup operations
#[derive(Debug, thiserror::Error)]
pub enum CgroupError {
    /// The access pattern is empty or has flags other than r, w, m
    #[error("invalid device access pattern {0:?} (expected a combination of r, w, m)")]
    InvalidAccess(String),

    #[error("invalid device rule: {0}")]
    InvalidRule(String),

    /// The process is not attached to a v1 devices hierarchy
    #[error("pid {pid} has no devices cgroup (cgroup v2 host or controller not mounted)")]
    DevicesControllerMissing { pid: u32 },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
