//! Kubernetes object shapes
//!
//! Only the fields this agent reads are modelled; serde skips the rest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::reconcile::{ContainerStatus, PodPhase, WorkloadKey, WorkloadSnapshot};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default)]
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub container_statuses: Vec<PodContainerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodContainerStatus {
    #[serde(default)]
    pub name: String,
    /// Empty until the container has been created
    #[serde(default, rename = "containerID")]
    pub container_id: String,
}

impl Pod {
    pub fn key(&self) -> WorkloadKey {
        WorkloadKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Convert into the snapshot the reconcile pipeline reads
    pub fn into_snapshot(self) -> WorkloadSnapshot {
        let key = self.key();
        WorkloadSnapshot {
            key,
            phase: PodPhase::parse(&self.status.phase),
            deletion_timestamp: self.metadata.deletion_timestamp,
            containers: self
                .status
                .container_statuses
                .into_iter()
                .map(|c| ContainerStatus::new(c.name, c.container_id))
                .collect(),
            annotations: self.metadata.annotations,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<Pod>,
}

/// `metav1.Status`, returned for failed requests and watch errors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// One line of a watch response
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent {
    Added(Pod),
    Modified(Pod),
    Deleted(Pod),
    /// Carries only `metadata.resourceVersion`
    Bookmark(Pod),
    Error(Status),
}

/// `coordination.k8s.io/v1` Lease
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    #[serde(default = "Lease::api_version")]
    pub api_version: String,
    #[serde(default = "Lease::kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: LeaseSpec,
}

impl Lease {
    fn api_version() -> String {
        "coordination.k8s.io/v1".to_string()
    }

    fn kind() -> String {
        "Lease".to_string()
    }

    pub fn new(namespace: &str, name: &str, spec: LeaseSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..ObjectMeta::default()
            },
            spec,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_transitions: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING_POD: &str = r#"{
        "metadata": {
            "name": "a",
            "namespace": "ns",
            "resourceVersion": "1234",
            "annotations": {"cgroup-enhancer.device.allow.block": "rwm"}
        },
        "spec": {"nodeName": "node-1"},
        "status": {
            "phase": "Running",
            "containerStatuses": [
                {"name": "app", "containerID": "containerd://abc123", "ready": true},
                {"name": "sidecar", "ready": false}
            ]
        }
    }"#;

    #[test]
    fn test_pod_into_snapshot() {
        let pod: Pod = serde_json::from_str(RUNNING_POD).unwrap();
        let snapshot = pod.into_snapshot();

        assert_eq!(snapshot.key, WorkloadKey::new("ns", "a"));
        assert_eq!(snapshot.phase, PodPhase::Running);
        assert!(!snapshot.is_deleting());
        assert_eq!(
            snapshot.annotation("cgroup-enhancer.device.allow.block"),
            Some("rwm")
        );
        assert_eq!(snapshot.containers.len(), 2);
        assert_eq!(snapshot.containers[0].runtime_id(), Some("abc123"));
        assert_eq!(snapshot.containers[1].runtime_id(), None);
    }

    #[test]
    fn test_pod_without_status() {
        let pod: Pod =
            serde_json::from_str(r#"{"metadata": {"name": "a", "namespace": "ns"}}"#).unwrap();
        let snapshot = pod.into_snapshot();
        assert_eq!(snapshot.phase, PodPhase::Unknown);
        assert!(snapshot.containers.is_empty());
    }

    #[test]
    fn test_watch_event_variants() {
        let line = format!(r#"{{"type": "MODIFIED", "object": {}}}"#, RUNNING_POD);
        match serde_json::from_str::<WatchEvent>(&line).unwrap() {
            WatchEvent::Modified(pod) => assert_eq!(pod.metadata.resource_version.as_deref(), Some("1234")),
            other => panic!("unexpected event {:?}", other),
        }

        let gone = r#"{"type": "ERROR", "object": {"kind": "Status", "code": 410, "reason": "Expired", "message": "too old resource version"}}"#;
        match serde_json::from_str::<WatchEvent>(gone).unwrap() {
            WatchEvent::Error(status) => assert_eq!(status.code, 410),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_lease_serializes_api_fields() {
        let lease = Lease::new(
            "kube-system",
            "lock",
            LeaseSpec {
                holder_identity: Some("node-1_x".to_string()),
                lease_duration_seconds: Some(15),
                ..LeaseSpec::default()
            },
        );
        let value = serde_json::to_value(&lease).unwrap();
        assert_eq!(value["apiVersion"], "coordination.k8s.io/v1");
        assert_eq!(value["kind"], "Lease");
        assert_eq!(value["metadata"]["namespace"], "kube-system");
        assert_eq!(value["spec"]["holderIdentity"], "node-1_x");
        assert!(value["spec"].get("renewTime").is_none());
    }
}
