//! Loading a process's devices cgroup and writing rules into it
//!
//! # How the devices controller works (cgroup v1)
//!
//! ```text
//! /proc/4242/cgroup                         ← which cgroup the pid lives in
//!   ...
//!   5:devices:/kubepods/pod-uid/abc123      ← hierarchy:controllers:path
//!   ...
//!
//! /sys/fs/cgroup/devices/                   ← devices hierarchy mount
//! └── kubepods/pod-uid/abc123/              ← the container's cgroup
//!     ├── devices.allow                     ← write "b *:* rwm" to grant
//!     ├── devices.deny                      ← write a rule to revoke
//!     └── devices.list                      ← current effective rules
//! ```
//!
//! Writing to `devices.allow` is additive and idempotent: granting the
//! same rule twice leaves `devices.list` unchanged.

use std::fs;
use std::io;
use std::path::PathBuf;

use super::devices::control_file;
use super::{CgroupError, DeviceRule};

/// Base path for the cgroup filesystem
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Base path for procfs
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Name of the v1 controller that governs device access
const DEVICES_CONTROLLER: &str = "devices";

/// Observable state of a loaded cgroup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupState {
    /// The cgroup exists and accepts updates
    Active,
    /// The cgroup directory is gone (the container exited)
    Deleted,
}

/// A loaded cgroup that can take device rules
pub trait CgroupControl: Send {
    fn state(&self) -> CgroupState;

    fn update(&self, rule: &DeviceRule) -> Result<(), CgroupError>;
}

/// Resolves a process id to the cgroup that governs it
pub trait CgroupLoader: Send + Sync {
    fn load(&self, pid: u32) -> Result<Box<dyn CgroupControl>, CgroupError>;
}

/// Result of a successful [`apply_rule`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The rule was written
    Applied,
    /// The cgroup no longer exists; nothing to enforce
    Deleted,
}

/// Load the cgroup for `pid` and grant `rule` on it
///
/// A cgroup in the `Deleted` state is not an error: the container went away
/// between task lookup and now, so there is nothing left to enforce.
pub fn apply_rule(
    loader: &dyn CgroupLoader,
    pid: u32,
    rule: &DeviceRule,
) -> Result<ApplyOutcome, CgroupError> {
    let control = loader.load(pid)?;

    if control.state() == CgroupState::Deleted {
        return Ok(ApplyOutcome::Deleted);
    }

    control.update(rule)?;
    Ok(ApplyOutcome::Applied)
}

/// [`CgroupLoader`] backed by the host's procfs and cgroup filesystem
///
/// Both roots are configurable so the agent can run with the host's
/// filesystems mounted somewhere other than `/proc` and `/sys/fs/cgroup`.
#[derive(Debug, Clone)]
pub struct HostCgroups {
    proc_root: PathBuf,
    cgroup_root: PathBuf,
}

impl HostCgroups {
    pub fn new(proc_root: impl Into<PathBuf>, cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Path of the devices cgroup a process belongs to
    ///
    /// Reads `/proc/{pid}/cgroup` and joins the devices hierarchy's path
    /// onto `{cgroup_root}/devices`.
    pub fn devices_path(&self, pid: u32) -> Result<PathBuf, CgroupError> {
        let proc_file = self.proc_root.join(pid.to_string()).join("cgroup");
        let content = fs::read_to_string(&proc_file).map_err(|source| CgroupError::Io {
            path: proc_file.clone(),
            source,
        })?;

        let relative = devices_hierarchy_path(&content)
            .ok_or(CgroupError::DevicesControllerMissing { pid })?;

        Ok(self
            .cgroup_root
            .join(DEVICES_CONTROLLER)
            .join(relative.trim_start_matches('/')))
    }
}

impl Default for HostCgroups {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT, DEFAULT_CGROUP_ROOT)
    }
}

impl CgroupLoader for HostCgroups {
    fn load(&self, pid: u32) -> Result<Box<dyn CgroupControl>, CgroupError> {
        let path = self.devices_path(pid)?;
        Ok(Box::new(DevicesCgroup { path }))
    }
}

/// Find the path of the `devices` hierarchy in a `/proc/{pid}/cgroup` listing
///
/// Each line is `hierarchy-id:controller-list:path`. On a pure cgroup v2 host
/// the only line is `0::/path`, which carries no devices controller.
fn devices_hierarchy_path(content: &str) -> Option<&str> {
    content.lines().find_map(|line| {
        let mut parts = line.splitn(3, ':');
        let _hierarchy = parts.next()?;
        let controllers = parts.next()?;
        let path = parts.next()?;
        controllers
            .split(',')
            .any(|c| c == DEVICES_CONTROLLER)
            .then_some(path)
    })
}

/// Handle to one devices cgroup directory
#[derive(Debug)]
pub struct DevicesCgroup {
    path: PathBuf,
}

impl CgroupControl for DevicesCgroup {
    fn state(&self) -> CgroupState {
        match fs::symlink_metadata(&self.path) {
            Ok(_) => CgroupState::Active,
            Err(e) if e.kind() == io::ErrorKind::NotFound => CgroupState::Deleted,
            // Anything other than "gone" still lets update() report the real error
            Err(_) => CgroupState::Active,
        }
    }

    fn update(&self, rule: &DeviceRule) -> Result<(), CgroupError> {
        let path = self.path.join(control_file(rule));
        fs::write(&path, rule.to_string()).map_err(|source| CgroupError::Io {
            path,
            source,
        })
    }
}
