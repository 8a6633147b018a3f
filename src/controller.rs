//! Pod watch loop
//!
//! Turns the node's pod events into reconcile calls:
//!
//! ```text
//! list pods (fieldSelector=spec.nodeName=<node>) ──► enqueue every key
//!       │
//!       ▼
//! watch from list resourceVersion ──event──► enqueue key
//!       │          │
//!       │          └── 410 Gone / error ──► re-list
//!       └── server closes watch ──► re-watch from last resourceVersion
//!
//! queue ──► Reconciler::reconcile (one at a time)
//! ```
//!
//! Reconciles run sequentially from a single queue, so at most one
//! reconcile per pod is ever in flight. A key already waiting in the queue
//! is not queued again; the reconcile that eventually runs reads the pod's
//! latest state anyway. Each call returns as soon as the gate has decided;
//! enforcement itself runs detached.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::kube::{KubeClient, KubeError, WatchEvent};
use crate::reconcile::{ReconcileAction, Reconciler, WorkloadKey};

/// Pause before re-listing after a failed list or watch
const RELIST_BACKOFF: Duration = Duration::from_secs(5);

/// Watches one node's pods and reconciles each change
pub struct Controller {
    client: Arc<KubeClient>,
    reconciler: Arc<Reconciler>,
    field_selector: String,
}

impl Controller {
    pub fn new(client: Arc<KubeClient>, reconciler: Arc<Reconciler>, node_name: &str) -> Self {
        Self {
            client,
            reconciler,
            field_selector: node_field_selector(node_name),
        }
    }

    /// Run until the watch task stops
    pub async fn run(self) {
        info!(field_selector = %self.field_selector, "Starting pod controller");

        let (queue, mut pending) = work_queue();
        let watcher = tokio::spawn(watch_loop(
            Arc::clone(&self.client),
            self.field_selector.clone(),
            queue,
        ));

        while let Some(key) = pending.next().await {
            match self.reconciler.reconcile(&key).await {
                // The handle is dropped; the enforcement task keeps running
                ReconcileAction::Dispatched(_) => {}
                ReconcileAction::Skipped(reason) => {
                    debug!(pod = %key, reason = reason.label(), "Reconcile skipped")
                }
            }
        }

        watcher.abort();
        warn!("Pod controller stopped");
    }
}

/// Producer side of the reconcile queue
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<WorkloadKey>,
    queued: Arc<Mutex<HashSet<WorkloadKey>>>,
}

/// Consumer side of the reconcile queue
pub struct PendingKeys {
    rx: mpsc::UnboundedReceiver<WorkloadKey>,
    queued: Arc<Mutex<HashSet<WorkloadKey>>>,
}

/// Create a queue that holds each key at most once
pub fn work_queue() -> (WorkQueue, PendingKeys) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = Arc::new(Mutex::new(HashSet::new()));
    (
        WorkQueue {
            tx,
            queued: Arc::clone(&queued),
        },
        PendingKeys { rx, queued },
    )
}

impl WorkQueue {
    /// Queue `key` unless it is already waiting
    ///
    /// Returns `false` once the consumer is gone.
    pub fn push(&self, key: WorkloadKey) -> bool {
        let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
        if queued.contains(&key) {
            return !self.tx.is_closed();
        }
        if self.tx.send(key.clone()).is_err() {
            return false;
        }
        queued.insert(key);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PendingKeys {
    /// Next key to reconcile
    ///
    /// The key leaves the pending set here, so an event arriving while it
    /// is being reconciled queues it again.
    pub async fn next(&mut self) -> Option<WorkloadKey> {
        let key = self.rx.recv().await?;
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Some(key)
    }
}

/// Field selector restricting pods to one node
pub fn node_field_selector(node_name: &str) -> String {
    format!("spec.nodeName={}", node_name)
}

async fn watch_loop(
    client: Arc<KubeClient>,
    field_selector: String,
    queue: WorkQueue,
) {
    while !queue.is_closed() {
        let resource_version = match client.list_pods(&field_selector).await {
            Ok(list) => {
                debug!(pods = list.items.len(), "Listed pods");
                for pod in &list.items {
                    if !queue.push(pod.key()) {
                        return;
                    }
                }
                list.metadata.resource_version.unwrap_or_default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to list pods");
                tokio::time::sleep(RELIST_BACKOFF).await;
                continue;
            }
        };

        match follow(&client, &field_selector, resource_version, &queue).await {
            Ok(()) => return,
            Err(KubeError::Gone) => info!("Watch expired, re-listing pods"),
            Err(e) => {
                warn!(error = %e, "Pod watch failed, re-listing");
                tokio::time::sleep(RELIST_BACKOFF).await;
            }
        }
    }
}

/// Follow the watch from `resource_version`, re-watching whenever the server
/// closes the stream. Returns `Ok(())` only when the queue is closed.
async fn follow(
    client: &KubeClient,
    field_selector: &str,
    mut resource_version: String,
    queue: &WorkQueue,
) -> Result<(), KubeError> {
    loop {
        let mut events = client.watch_pods(field_selector, &resource_version).await?;

        while let Some(event) = events.next().await {
            let pod = match event? {
                WatchEvent::Added(pod) | WatchEvent::Modified(pod) | WatchEvent::Deleted(pod) => pod,
                WatchEvent::Bookmark(pod) => {
                    if let Some(rv) = pod.metadata.resource_version {
                        resource_version = rv;
                    }
                    continue;
                }
                WatchEvent::Error(status) if status.code == 410 => return Err(KubeError::Gone),
                WatchEvent::Error(status) => {
                    return Err(KubeError::Api {
                        status: status.code,
                        message: status.message,
                    })
                }
            };

            if let Some(rv) = &pod.metadata.resource_version {
                resource_version = rv.clone();
            }
            if !queue.push(pod.key()) {
                return Ok(());
            }
        }
    }
}
