//! Startup security checks
//!
//! The agent edits other processes' cgroups, so it runs privileged. This
//! module verifies the privileges are actually there before the first pod
//! is reconciled:
//! - Capability preflight (`CAP_SYS_ADMIN` for `devices.allow`)

pub mod capabilities;

pub use capabilities::{preflight, CapabilityReport, REQUIRED_CAPS};
