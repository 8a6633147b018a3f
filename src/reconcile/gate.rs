//! Reconciler - decides whether a pod notification needs enforcement
//!
//! Filters run in order and the first one that fails ends the cycle:
//!
//! ```text
//! get pod ──not found──► Skipped(NotFound)
//!    │    ──error──────► Skipped(FetchFailed)
//!    ▼
//! deletion timestamp? ─► Skipped(Deleting)
//! phase != Running? ───► Skipped(NotRunning)
//!    ▼
//! annotation missing/empty ─► Skipped(NoAnnotation)
//! annotation not r/w/m ─────► Skipped(InvalidAnnotation)
//!    ▼
//! tokio::spawn(enforcer.enforce(...))  ──► Dispatched
//! ```
//!
//! `reconcile` never returns an error. The caller only learns whether work
//! was dispatched; enforcement results end up in logs and metrics.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cgroups::{allow_all_block, DeviceAccess, DeviceRule};
use crate::config::EnhancerConfig;
use crate::kube::PodSource;
use crate::metrics::RECONCILES_TOTAL;

use super::enforcer::{BatchReport, Enforcer};
use super::workload::{PodPhase, WorkloadKey, WorkloadSnapshot};

/// Why a notification did not lead to enforcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The pod no longer exists
    NotFound,
    /// The pod could not be read
    FetchFailed(String),
    /// The pod carries a deletion timestamp
    Deleting,
    NotRunning(PodPhase),
    /// The policy annotation is absent or empty
    NoAnnotation,
    /// The policy annotation is not a valid access pattern
    InvalidAnnotation(String),
}

impl SkipReason {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NotFound => "not_found",
            SkipReason::FetchFailed(_) => "fetch_failed",
            SkipReason::Deleting => "deleting",
            SkipReason::NotRunning(_) => "not_running",
            SkipReason::NoAnnotation => "no_annotation",
            SkipReason::InvalidAnnotation(_) => "invalid_annotation",
        }
    }
}

/// Result of one reconcile call
#[derive(Debug)]
pub enum ReconcileAction {
    Skipped(SkipReason),
    /// Enforcement is running on a detached task
    ///
    /// Dropping the handle does not cancel the task.
    Dispatched(JoinHandle<BatchReport>),
}

/// Check a snapshot against the eligibility filters
///
/// Returns the rule to enforce, or the first filter that rejected the pod.
pub fn evaluate(snapshot: &WorkloadSnapshot, annotation_key: &str) -> Result<DeviceRule, SkipReason> {
    if snapshot.is_deleting() {
        return Err(SkipReason::Deleting);
    }
    if snapshot.phase != PodPhase::Running {
        return Err(SkipReason::NotRunning(snapshot.phase.clone()));
    }

    let value = match snapshot.annotation(annotation_key) {
        Some(value) if !value.trim().is_empty() => value,
        _ => return Err(SkipReason::NoAnnotation),
    };

    DeviceAccess::parse(value)
        .and_then(allow_all_block)
        .map_err(|_| SkipReason::InvalidAnnotation(value.to_string()))
}

/// Entry point for pod notifications
pub struct Reconciler {
    source: Arc<dyn PodSource>,
    enforcer: Arc<Enforcer>,
    annotation_key: String,
}

impl Reconciler {
    pub fn new(source: Arc<dyn PodSource>, enforcer: Arc<Enforcer>, config: &EnhancerConfig) -> Self {
        Self {
            source,
            enforcer,
            annotation_key: config.annotation_key.clone(),
        }
    }

    /// Handle one notification for `key`
    ///
    /// Returns as soon as the gate has decided; OS and runtime work happens
    /// on a spawned task.
    pub async fn reconcile(&self, key: &WorkloadKey) -> ReconcileAction {
        debug!(pod = %key, "Reconciling pod");

        let action = match self.source.get(key).await {
            Ok(None) => ReconcileAction::Skipped(SkipReason::NotFound),
            Err(e) => ReconcileAction::Skipped(SkipReason::FetchFailed(e.to_string())),
            Ok(Some(snapshot)) => match evaluate(&snapshot, &self.annotation_key) {
                Ok(rule) => ReconcileAction::Dispatched(self.dispatch(snapshot, rule)),
                Err(reason) => ReconcileAction::Skipped(reason),
            },
        };

        match &action {
            ReconcileAction::Dispatched(_) => {
                RECONCILES_TOTAL.with_label_values(&["dispatched"]).inc();
            }
            ReconcileAction::Skipped(reason) => {
                RECONCILES_TOTAL.with_label_values(&[reason.label()]).inc();
                log_skip(key, reason);
            }
        }

        action
    }

    fn dispatch(&self, snapshot: WorkloadSnapshot, rule: DeviceRule) -> JoinHandle<BatchReport> {
        let trace_id = Uuid::now_v7().to_string();
        info!(
            pod = %snapshot.key,
            trace_id = %trace_id,
            rule = rule.to_string(),
            containers = snapshot.containers.len(),
            "Dispatching device access update"
        );

        let span = info_span!(
            "enforce",
            pod = %snapshot.key,
            trace_id = %trace_id,
            access = rule.access().as_deref().unwrap_or_default()
        );
        let enforcer = Arc::clone(&self.enforcer);

        tokio::spawn(
            async move {
                enforcer
                    .enforce(&snapshot.key, &snapshot.containers, &rule)
                    .await
            }
            .instrument(span),
        )
    }
}

fn log_skip(key: &WorkloadKey, reason: &SkipReason) {
    match reason {
        SkipReason::NotFound => info!(pod = %key, "Pod not found"),
        SkipReason::FetchFailed(error) => warn!(pod = %key, error = %error, "Failed to fetch pod"),
        SkipReason::Deleting => info!(pod = %key, "Pod is being deleted"),
        SkipReason::NotRunning(phase) => info!(pod = %key, phase = %phase, "Pod is not running"),
        SkipReason::NoAnnotation => debug!(pod = %key, "Pod has no device access annotation"),
        SkipReason::InvalidAnnotation(value) => warn!(
            pod = %key,
            value = %value,
            "Ignoring device access annotation (expected a combination of r, w, m)"
        ),
    }
}
