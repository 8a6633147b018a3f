//! Reconciliation and enforcement pipeline
//!
//! This module turns pod notifications into device-cgroup updates:
//! - `gate` - eligibility filters and detached dispatch ([`Reconciler`])
//! - `enforcer` - per-container resolve + apply with failure isolation ([`Enforcer`])
//! - `workload` - the pod snapshot both of them read
//!
//! # Architecture
//!
//! ```text
//! pod notification ─► Reconciler::reconcile ─► (eligible) ─► tokio::spawn
//!                                                                 │
//!                                                    Enforcer::enforce
//!                                                                 │
//!                              ┌──────────────────────────────────┤
//!                              ▼                                  ▼
//!                   RuntimeSession::resolve_pid          cgroups::apply_rule
//! ```
//!
//! Every cycle starts from scratch. Nothing is cached between notifications,
//! and granting the same rule again is a no-op at the kernel level, so a
//! later notification for the same pod simply re-converges.

pub mod enforcer;
pub mod gate;
pub mod workload;

pub use enforcer::{BatchAbort, BatchReport, ContainerOutcome, ContainerReport, Enforcer};
pub use gate::{evaluate, ReconcileAction, Reconciler, SkipReason};
pub use workload::{ContainerStatus, PodPhase, WorkloadKey, WorkloadSnapshot};
