//! Workload snapshot types consumed by the gate and the enforcer

use std::collections::BTreeMap;
use std::fmt;

/// `namespace/name` reference to a pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pod lifecycle phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
    /// A phase this agent does not know about
    Other(String),
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            "" | "Unknown" => PodPhase::Unknown,
            other => PodPhase::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodPhase::Pending => f.write_str("Pending"),
            PodPhase::Running => f.write_str("Running"),
            PodPhase::Succeeded => f.write_str("Succeeded"),
            PodPhase::Failed => f.write_str("Failed"),
            PodPhase::Unknown => f.write_str("Unknown"),
            PodPhase::Other(phase) => f.write_str(phase),
        }
    }
}

/// One entry of a pod's container statuses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    /// Runtime-qualified id, e.g. `containerd://abc123`
    pub container_id: String,
}

impl ContainerStatus {
    pub fn new(name: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container_id: container_id.into(),
        }
    }

    /// The bare runtime id with the `scheme://` prefix stripped
    ///
    /// Returns `None` when the separator is missing or either side of it is
    /// empty (a container that has not started yet reports an empty id).
    pub fn runtime_id(&self) -> Option<&str> {
        let (scheme, id) = self.container_id.split_once("://")?;
        if scheme.is_empty() || id.is_empty() {
            return None;
        }
        Some(id)
    }
}

/// Immutable read of a pod at notification time
#[derive(Debug, Clone)]
pub struct WorkloadSnapshot {
    pub key: WorkloadKey,
    pub phase: PodPhase,
    /// Set once the pod has been asked to terminate
    pub deletion_timestamp: Option<String>,
    pub containers: Vec<ContainerStatus>,
    pub annotations: BTreeMap<String, String>,
}

impl WorkloadSnapshot {
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_id_strips_scheme() {
        let status = ContainerStatus::new("app", "containerd://abc123");
        assert_eq!(status.runtime_id(), Some("abc123"));

        // only the first separator counts
        let status = ContainerStatus::new("app", "docker://a://b");
        assert_eq!(status.runtime_id(), Some("a://b"));
    }

    #[test]
    fn test_runtime_id_rejects_malformed() {
        for id in ["abc123", "", "containerd:/abc", "://abc", "containerd://"] {
            let status = ContainerStatus::new("app", id);
            assert_eq!(status.runtime_id(), None, "{:?} should be malformed", id);
        }
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!(PodPhase::parse("Running"), PodPhase::Running);
        assert_eq!(PodPhase::parse(""), PodPhase::Unknown);
        assert_eq!(
            PodPhase::parse("Evicted"),
            PodPhase::Other("Evicted".to_string())
        );
        assert_eq!(PodPhase::parse("Pending").to_string(), "Pending");
    }

    #[test]
    fn test_key_display() {
        assert_eq!(WorkloadKey::new("ns", "a").to_string(), "ns/a");
    }
}
