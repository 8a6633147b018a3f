//! Lease-based leader election
//!
//! Same protocol as client-go's `leaderelection` package, so the agent can
//! share a Lease with other controllers that speak it:
//!
//! ```text
//! acquire():  loop every retry_period
//!               lease missing            → create it with us as holder
//!               held by us / expired     → replace with us as holder
//!               held by someone else     → wait
//!
//! hold():     loop every retry_period
//!               renew (replace renewTime)
//!               not renewed within renew_deadline, or taken over → return error
//! ```
//!
//! Optimistic concurrency comes from `metadata.resourceVersion`: a stale
//! replace is rejected with 409 and counts as "not acquired this round".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{Lease, LeaseSpec};
use super::{KubeClient, KubeError};

/// How long a lease is valid without renewal
pub const LEASE_DURATION: Duration = Duration::from_secs(15);
/// How long the holder keeps trying to renew before giving up
pub const RENEW_DEADLINE: Duration = Duration::from_secs(10);
/// Interval between acquire/renew attempts
pub const RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Error type for leader election
#[derive(Debug, thiserror::Error)]
pub enum LeaderError {
    #[error("lease {0} was taken over by another holder")]
    Lost(String),

    #[error("failed to renew lease {name} within {deadline:?}")]
    RenewDeadline { name: String, deadline: Duration },
}

/// Competes for and holds one Lease
pub struct LeaderElector {
    client: Arc<KubeClient>,
    namespace: String,
    name: String,
    identity: String,
}

impl LeaderElector {
    /// # Arguments
    /// * `client` - API client
    /// * `namespace` / `name` - the Lease object
    /// * `identity` - unique holder id for this process
    pub fn new(
        client: Arc<KubeClient>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
            identity: identity.into(),
        }
    }

    /// Block until this process holds the lease
    pub async fn acquire(&self) {
        info!(
            lease = %self.name,
            namespace = %self.namespace,
            identity = %self.identity,
            "Attempting to acquire leader lease"
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(lease = %self.name, identity = %self.identity, "Acquired leader lease");
                    return;
                }
                Ok(false) => debug!(lease = %self.name, "Lease held by another instance"),
                Err(e) => warn!(lease = %self.name, error = %e, "Failed to acquire lease"),
            }
            tokio::time::sleep(RETRY_PERIOD).await;
        }
    }

    /// Keep renewing the lease; returns only when leadership is lost
    pub async fn hold(&self) -> LeaderError {
        let mut last_renew = Instant::now();

        loop {
            tokio::time::sleep(RETRY_PERIOD).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => last_renew = Instant::now(),
                Ok(false) => return LeaderError::Lost(self.name.clone()),
                Err(e) => warn!(lease = %self.name, error = %e, "Failed to renew lease"),
            }

            if last_renew.elapsed() > RENEW_DEADLINE {
                return LeaderError::RenewDeadline {
                    name: self.name.clone(),
                    deadline: RENEW_DEADLINE,
                };
            }
        }
    }

    /// One round of the protocol; `Ok(true)` when we hold the lease afterwards
    async fn try_acquire_or_renew(&self) -> Result<bool, KubeError> {
        let now = Utc::now();

        let Some(existing) = self.client.get_lease(&self.namespace, &self.name).await? else {
            let lease = Lease::new(
                &self.namespace,
                &self.name,
                LeaseSpec {
                    holder_identity: Some(self.identity.clone()),
                    lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i64),
                    acquire_time: Some(micro_time(now)),
                    renew_time: Some(micro_time(now)),
                    lease_transitions: Some(0),
                },
            );
            return Ok(self.client.create_lease(&lease).await?.is_some());
        };

        if !can_take(&existing.spec, &self.identity, now) {
            return Ok(false);
        }

        let mut lease = existing;
        let previous_holder = lease.spec.holder_identity.clone();
        if previous_holder.as_deref() != Some(self.identity.as_str()) {
            lease.spec.acquire_time = Some(micro_time(now));
            lease.spec.lease_transitions = Some(lease.spec.lease_transitions.unwrap_or(0) + 1);
            if let Some(holder) = previous_holder.filter(|h| !h.is_empty()) {
                info!(lease = %self.name, previous = %holder, "Taking over expired lease");
            }
        }
        lease.spec.holder_identity = Some(self.identity.clone());
        lease.spec.lease_duration_seconds = Some(LEASE_DURATION.as_secs() as i64);
        lease.spec.renew_time = Some(micro_time(now));

        Ok(self.client.replace_lease(&lease).await?.is_some())
    }
}

/// Whether `identity` may write itself into a lease at `now`
///
/// True when nobody holds it, we already hold it, or the holder has not
/// renewed within its lease duration. An unparseable renew time counts as
/// expired.
pub fn can_take(spec: &LeaseSpec, identity: &str, now: DateTime<Utc>) -> bool {
    let holder = spec.holder_identity.as_deref().unwrap_or("");
    if holder.is_empty() || holder == identity {
        return true;
    }

    let Some(renew_time) = spec
        .renew_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
    else {
        return true;
    };

    let duration = chrono::Duration::seconds(
        spec.lease_duration_seconds
            .unwrap_or(LEASE_DURATION.as_secs() as i64),
    );
    renew_time.with_timezone(&Utc) + duration < now
}

/// RFC 3339 with microseconds, the `metav1.MicroTime` wire format
fn micro_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}
