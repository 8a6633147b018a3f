//! Prometheus metrics for the enforcement pipeline
//!
//! All metrics live in the default registry and are rendered by the
//! `/metrics` endpoint (see [`crate::probes`]).
//!
//! ```text
//! reconciles_total{decision}          ← every notification, by gate decision
//! container_outcomes_total{outcome}   ← every container in a dispatched batch
//! batch_aborts_total{reason}          ← batches dropped before any container
//! enforcement_duration_seconds        ← wall time of one detached batch
//! enforcements_in_flight              ← detached batches still running
//! ```

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref RECONCILES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cgroup_enhancer_reconciles_total",
        "Pod notifications handled, by gate decision",
        &["decision"]
    )
    .unwrap();

    pub static ref CONTAINER_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cgroup_enhancer_container_outcomes_total",
        "Per-container enforcement results",
        &["outcome"]
    )
    .unwrap();

    pub static ref BATCH_ABORTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cgroup_enhancer_batch_aborts_total",
        "Enforcement batches aborted before completion",
        &["reason"]
    )
    .unwrap();

    pub static ref ENFORCEMENT_DURATION: Histogram = register_histogram!(
        "cgroup_enhancer_enforcement_duration_seconds",
        "Time spent enforcing one pod's containers",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    pub static ref ENFORCEMENTS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "cgroup_enhancer_enforcements_in_flight",
        "Detached enforcement batches currently running"
    )
    .unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
