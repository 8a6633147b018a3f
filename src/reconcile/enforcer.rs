//! Enforcer - applies one device rule to every container of a pod
//!
//! Each batch owns its own runtime session. Containers are processed one by
//! one, and every container's parse → resolve → apply chain ends in a
//! [`ContainerOutcome`]; no outcome stops the loop.
//!
//! ```text
//!            connect ──fail──► Aborted(Connect)
//!               │
//!          is_serving ──no───► Aborted(NotServing)
//!               │
//!   ┌───────────┴───────────────────────────────────────────┐
//!   │ for each container                                    │
//!   │   runtime_id()  ──none──► MalformedId                 │
//!   │   resolve_pid() ──err───► TaskNotFound / ResolveFailed│
//!   │   apply_rule()  ──err───► ApplyFailed                 │
//!   │                 ──gone──► CgroupDeleted               │
//!   │                 ──ok────► Applied                     │
//!   └───────────────────────────────────────────────────────┘
//! ```
//!
//! The whole batch runs under a deadline; expiry aborts it like a failed
//! connect.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::cgroups::{apply_rule, ApplyOutcome, CgroupLoader, DeviceRule};
use crate::config::EnhancerConfig;
use crate::metrics::{
    BATCH_ABORTS_TOTAL, CONTAINER_OUTCOMES_TOTAL, ENFORCEMENTS_IN_FLIGHT, ENFORCEMENT_DURATION,
};
use crate::runtime::{RuntimeConnector, RuntimeError, RuntimeSession};

use super::workload::{ContainerStatus, WorkloadKey};

/// Terminal state of one container within a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutcome {
    /// The rule was written to the container's cgroup
    Applied { pid: u32 },
    /// The container's cgroup was already gone
    CgroupDeleted { pid: u32 },
    /// The container id had no `scheme://` prefix
    MalformedId,
    /// The runtime has no task for the container
    TaskNotFound,
    ResolveFailed { error: String },
    ApplyFailed { pid: u32, error: String },
}

impl ContainerOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            ContainerOutcome::Applied { .. } => "applied",
            ContainerOutcome::CgroupDeleted { .. } => "cgroup_deleted",
            ContainerOutcome::MalformedId => "malformed_id",
            ContainerOutcome::TaskNotFound => "task_not_found",
            ContainerOutcome::ResolveFailed { .. } => "resolve_failed",
            ContainerOutcome::ApplyFailed { .. } => "apply_failed",
        }
    }
}

/// Outcome for one container, as recorded by the enforcer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerReport {
    pub name: String,
    pub container_id: String,
    pub outcome: ContainerOutcome,
}

/// Why a whole batch was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAbort {
    /// The runtime session could not be established
    Connect(String),
    /// The runtime answered the health check with a non-serving status
    NotServing,
    /// The health check call itself failed
    HealthCheck(String),
    /// The batch did not finish before the deadline
    TimedOut(Duration),
}

impl BatchAbort {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            BatchAbort::Connect(_) => "connect",
            BatchAbort::NotServing => "not_serving",
            BatchAbort::HealthCheck(_) => "health_check",
            BatchAbort::TimedOut(_) => "timeout",
        }
    }
}

impl fmt::Display for BatchAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchAbort::Connect(msg) => write!(f, "runtime session failed: {}", msg),
            BatchAbort::NotServing => write!(f, "runtime is not serving"),
            BatchAbort::HealthCheck(msg) => write!(f, "runtime health check failed: {}", msg),
            BatchAbort::TimedOut(d) => write!(f, "batch exceeded deadline of {:?}", d),
        }
    }
}

/// What happened to one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReport {
    Aborted(BatchAbort),
    Completed(Vec<ContainerReport>),
}

impl BatchReport {
    /// Number of containers the rule was written to
    pub fn applied(&self) -> usize {
        match self {
            BatchReport::Aborted(_) => 0,
            BatchReport::Completed(reports) => reports
                .iter()
                .filter(|r| matches!(r.outcome, ContainerOutcome::Applied { .. }))
                .count(),
        }
    }
}

/// Applies device rules to a pod's containers
pub struct Enforcer {
    connector: Arc<dyn RuntimeConnector>,
    loader: Arc<dyn CgroupLoader>,
    runtime_namespace: String,
    timeout: Duration,
}

impl Enforcer {
    /// Create a new enforcer
    ///
    /// # Arguments
    /// * `connector` - opens one runtime session per batch
    /// * `loader` - resolves pids to cgroups
    /// * `config` - supplies the runtime namespace and the batch deadline
    pub fn new(
        connector: Arc<dyn RuntimeConnector>,
        loader: Arc<dyn CgroupLoader>,
        config: &EnhancerConfig,
    ) -> Self {
        Self {
            connector,
            loader,
            runtime_namespace: config.runtime_namespace.clone(),
            timeout: config.enforce_timeout,
        }
    }

    /// Grant `rule` on every container in `containers`
    ///
    /// Never fails: a batch either completes with one report per container or
    /// is aborted as a whole. Both cases are logged here.
    pub async fn enforce(
        &self,
        key: &WorkloadKey,
        containers: &[ContainerStatus],
        rule: &DeviceRule,
    ) -> BatchReport {
        let start = Instant::now();
        ENFORCEMENTS_IN_FLIGHT.inc();

        let report =
            match tokio::time::timeout(self.timeout, self.run_batch(key, containers, rule)).await {
                Ok(report) => report,
                Err(_) => BatchReport::Aborted(BatchAbort::TimedOut(self.timeout)),
            };

        ENFORCEMENTS_IN_FLIGHT.dec();
        ENFORCEMENT_DURATION.observe(start.elapsed().as_secs_f64());

        match &report {
            BatchReport::Aborted(reason) => {
                BATCH_ABORTS_TOTAL.with_label_values(&[reason.label()]).inc();
                error!(pod = %key, reason = %reason, "Enforcement batch aborted");
            }
            BatchReport::Completed(reports) => {
                info!(
                    pod = %key,
                    containers = reports.len(),
                    applied = report.applied(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Enforcement batch finished"
                );
            }
        }

        report
    }

    async fn run_batch(
        &self,
        key: &WorkloadKey,
        containers: &[ContainerStatus],
        rule: &DeviceRule,
    ) -> BatchReport {
        let session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => return BatchReport::Aborted(BatchAbort::Connect(e.to_string())),
        };

        match session.is_serving().await {
            Ok(true) => {}
            Ok(false) => return BatchReport::Aborted(BatchAbort::NotServing),
            Err(e) => return BatchReport::Aborted(BatchAbort::HealthCheck(e.to_string())),
        }

        let mut reports = Vec::with_capacity(containers.len());
        for status in containers {
            let outcome = self.enforce_container(session.as_ref(), status, rule).await;
            log_outcome(key, status, rule, &outcome);
            CONTAINER_OUTCOMES_TOTAL
                .with_label_values(&[outcome.label()])
                .inc();
            reports.push(ContainerReport {
                name: status.name.clone(),
                container_id: status.container_id.clone(),
                outcome,
            });
        }

        BatchReport::Completed(reports)
    }

    async fn enforce_container(
        &self,
        session: &dyn RuntimeSession,
        status: &ContainerStatus,
        rule: &DeviceRule,
    ) -> ContainerOutcome {
        let Some(runtime_id) = status.runtime_id() else {
            return ContainerOutcome::MalformedId;
        };

        let pid = match session
            .resolve_pid(&self.runtime_namespace, runtime_id)
            .await
        {
            Ok(pid) => pid,
            Err(RuntimeError::TaskNotFound(_)) => return ContainerOutcome::TaskNotFound,
            Err(e) => {
                return ContainerOutcome::ResolveFailed {
                    error: e.to_string(),
                }
            }
        };

        // cgroupfs reads and writes block; keep them off the async workers
        let loader = Arc::clone(&self.loader);
        let rule = rule.clone();
        match tokio::task::spawn_blocking(move || apply_rule(loader.as_ref(), pid, &rule)).await {
            Ok(Ok(ApplyOutcome::Applied)) => ContainerOutcome::Applied { pid },
            Ok(Ok(ApplyOutcome::Deleted)) => ContainerOutcome::CgroupDeleted { pid },
            Ok(Err(e)) => ContainerOutcome::ApplyFailed {
                pid,
                error: e.to_string(),
            },
            Err(e) => ContainerOutcome::ApplyFailed {
                pid,
                error: format!("cgroup task panicked: {}", e),
            },
        }
    }
}

fn log_outcome(
    key: &WorkloadKey,
    status: &ContainerStatus,
    rule: &DeviceRule,
    outcome: &ContainerOutcome,
) {
    let container = status.name.as_str();
    let container_id = status.container_id.as_str();

    match outcome {
        ContainerOutcome::Applied { pid } => info!(
            pod = %key, container, container_id, pid, rule = rule.to_string(),
            "Device access granted"
        ),
        ContainerOutcome::CgroupDeleted { pid } => info!(
            pod = %key, container, container_id, pid,
            "Cgroup already deleted, skipping"
        ),
        ContainerOutcome::MalformedId => info!(
            pod = %key, container, container_id,
            "Container id has no runtime scheme, skipping"
        ),
        ContainerOutcome::TaskNotFound => info!(
            pod = %key, container, container_id,
            "No runtime task for container, skipping"
        ),
        ContainerOutcome::ResolveFailed { error } => error!(
            pod = %key, container, container_id, error = %error,
            "Failed to resolve container task"
        ),
        ContainerOutcome::ApplyFailed { pid, error } => error!(
            pod = %key, container, container_id, pid, error = %error,
            "Failed to update devices cgroup"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applied_count() {
        let report = BatchReport::Completed(vec![
            ContainerReport {
                name: "a".to_string(),
                container_id: "containerd://a".to_string(),
                outcome: ContainerOutcome::Applied { pid: 1 },
            },
            ContainerReport {
                name: "b".to_string(),
                container_id: "b".to_string(),
                outcome: ContainerOutcome::MalformedId,
            },
        ]);
        assert_eq!(report.applied(), 1);
        assert_eq!(BatchReport::Aborted(BatchAbort::NotServing).applied(), 0);
    }

    #[test]
    fn test_labels_are_distinct() {
        let outcomes = [
            ContainerOutcome::Applied { pid: 1 },
            ContainerOutcome::CgroupDeleted { pid: 1 },
            ContainerOutcome::MalformedId,
            ContainerOutcome::TaskNotFound,
            ContainerOutcome::ResolveFailed {
                error: String::new(),
            },
            ContainerOutcome::ApplyFailed {
                pid: 1,
                error: String::new(),
            },
        ];
        let mut labels: Vec<_> = outcomes.iter().map(|o| o.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), outcomes.len());
    }

    #[test]
    fn test_abort_display() {
        let abort = BatchAbort::TimedOut(Duration::from_secs(30));
        assert_eq!(abort.label(), "timeout");
        assert!(abort.to_string().contains("30s"));
    }
}
