//! Capability preflight
//!
//! Writing `devices.allow` needs `CAP_SYS_ADMIN` in the writer's effective
//! set. Without it every update fails with EPERM, which would otherwise only
//! show up as a stream of per-container errors after the first annotated pod.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  REQUIRED CAPABILITIES                                    │
//! │                                                           │
//! │  CAP_SYS_ADMIN  ← write devices.allow / devices.deny      │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use caps::{CapSet, Capability};

/// Capabilities the enforcer needs at runtime
pub const REQUIRED_CAPS: &[Capability] = &[Capability::CAP_SYS_ADMIN];

/// Result of checking the process's effective capabilities
#[derive(Debug, Clone)]
pub struct CapabilityReport {
    /// Effective set, as readable names
    pub effective: Vec<String>,
    /// Entries of [`REQUIRED_CAPS`] that are not effective
    pub missing: Vec<Capability>,
}

impl CapabilityReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Read the effective set and compare it against [`REQUIRED_CAPS`]
pub fn preflight() -> Result<CapabilityReport, caps::errors::CapsError> {
    let effective = caps::read(None, CapSet::Effective)?;

    let mut names: Vec<String> = effective.iter().map(|c| c.to_string()).collect();
    names.sort();

    Ok(CapabilityReport {
        effective: names,
        missing: missing_from(&effective, REQUIRED_CAPS),
    })
}

/// Entries of `required` absent from `effective`
fn missing_from(effective: &HashSet<Capability>, required: &[Capability]) -> Vec<Capability> {
    required
        .iter()
        .filter(|cap| !effective.contains(cap))
        .copied()
        .collect()
}
