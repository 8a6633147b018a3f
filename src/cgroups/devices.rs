//! Device-cgroup rules
//!
//! A device rule is one line written to a v1 `devices.allow` / `devices.deny`
//! file. The kernel format is `{type} {major}:{minor} {access}`:
//!
//! ```text
//! b *:* rwm      ← all block devices, read + write + mknod
//! c 1:3 rw       ← /dev/null, read + write
//! ```
//!
//! Rules are OCI `LinuxDeviceCgroup` values, whose string form is exactly
//! that line. This agent only ever builds the first form: a block-device
//! grant with no major/minor restriction.

use std::fmt;

use oci_spec::runtime::{LinuxDeviceCgroupBuilder, LinuxDeviceType};

use super::CgroupError;

/// One device-cgroup rule
pub use oci_spec::runtime::LinuxDeviceCgroup as DeviceRule;

/// Access pattern granted by a rule
///
/// A non-empty combination of:
/// - `r` - read
/// - `w` - write
/// - `m` - mknod (create device nodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAccess {
    read: bool,
    write: bool,
    mknod: bool,
}

impl DeviceAccess {
    /// Parse an access pattern such as `"rwm"`, `"r"` or `"mr"`.
    ///
    /// Surrounding whitespace is ignored and repeated flags collapse, so
    /// `" rrw "` parses the same as `"rw"`. Any other character, or an empty
    /// pattern, is rejected.
    pub fn parse(pattern: &str) -> Result<Self, CgroupError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(CgroupError::InvalidAccess(pattern.to_string()));
        }

        let mut access = DeviceAccess {
            read: false,
            write: false,
            mknod: false,
        };
        for flag in trimmed.chars() {
            match flag {
                'r' => access.read = true,
                'w' => access.write = true,
                'm' => access.mknod = true,
                _ => return Err(CgroupError::InvalidAccess(pattern.to_string())),
            }
        }

        Ok(access)
    }
}

impl fmt::Display for DeviceAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            f.write_str("r")?;
        }
        if self.write {
            f.write_str("w")?;
        }
        if self.mknod {
            f.write_str("m")?;
        }
        Ok(())
    }
}

/// Grant `access` on every block device
pub fn allow_all_block(access: DeviceAccess) -> Result<DeviceRule, CgroupError> {
    LinuxDeviceCgroupBuilder::default()
        .allow(true)
        .typ(LinuxDeviceType::B)
        .access(access.to_string())
        .build()
        .map_err(|e| CgroupError::InvalidRule(e.to_string()))
}

/// Name of the control file `rule` is written to
pub(crate) fn control_file(rule: &DeviceRule) -> &'static str {
    if rule.allow() {
        "devices.allow"
    } else {
        "devices.deny"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_access() {
        assert_eq!(DeviceAccess::parse("rwm").unwrap().to_string(), "rwm");
    }

    #[test]
    fn test_parse_normalizes_order_and_duplicates() {
        assert_eq!(DeviceAccess::parse(" mrr ").unwrap().to_string(), "rm");
        assert_eq!(DeviceAccess::parse("w").unwrap().to_string(), "w");
    }

    #[test]
    fn test_parse_rejects_empty_and_unknown_flags() {
        assert!(DeviceAccess::parse("").is_err());
        assert!(DeviceAccess::parse("   ").is_err());
        assert!(DeviceAccess::parse("rwx").is_err());
        assert!(DeviceAccess::parse("r w").is_err());
    }

    #[test]
    fn test_block_rule_line() {
        let rule = allow_all_block(DeviceAccess::parse("mr").unwrap()).unwrap();
        assert!(rule.allow());
        assert_eq!(rule.typ(), Some(LinuxDeviceType::B));
        assert_eq!(rule.major(), None);
        assert_eq!(rule.minor(), None);
        assert_eq!(rule.to_string(), "b *:* rm");
        assert_eq!(control_file(&rule), "devices.allow");
    }

    #[test]
    fn test_deny_rule_goes_to_deny_file() {
        let rule = LinuxDeviceCgroupBuilder::default()
            .allow(false)
            .typ(LinuxDeviceType::C)
            .major(1i64)
            .minor(3i64)
            .access("rw")
            .build()
            .unwrap();
        assert_eq!(rule.to_string(), "c 1:3 rw");
        assert_eq!(control_file(&rule), "devices.deny");
    }
}
