//! Lease-backed leader election (spec §4.9): a single-writer election over a
//! `coordination.v1/Lease` object named after the runner deployment,
//! matching client-go's `LeaderElector` timings (15s lease, 10s renew
//! deadline, 2s retry) and release-on-cancel behavior. Grounded in
//! `original_source/src/pkg/leaderElection.go`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub namespace: String,
    pub lease_name: String,
    /// This process's identity — typically the runner id.
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl LeaderElectionConfig {
    /// The timings named in spec §4.9.
    pub fn new(namespace: impl Into<String>, lease_name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            lease_name: lease_name.into(),
            identity: identity.into(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

/// Leadership callbacks (spec §4.9). All three may be invoked from the
/// election task; implementations must be internally synchronized if they
/// touch shared state beyond what's passed in.
#[async_trait]
pub trait LeaderCallbacks: Send + Sync {
    async fn on_started_leading(&self);
    async fn on_stopped_leading(&self);
    async fn on_new_leader(&self, identity: &str);
}

/// Runs one election loop, renewing or contending for a single
/// `coordination.v1/Lease`. `leader_flag` is exposed so callers (notably the
/// autoscaler) can make authorization-style checks under the same
/// read-write guard spec §4.9 mandates, without re-deriving leadership
/// themselves.
pub struct LeaseElector {
    leases: Api<Lease>,
    config: LeaderElectionConfig,
    leader_flag: Arc<RwLock<bool>>,
}

impl LeaseElector {
    pub fn new(client: Client, config: LeaderElectionConfig) -> Self {
        let leases = Api::namespaced(client, &config.namespace);
        Self { leases, config, leader_flag: Arc::new(RwLock::new(false)) }
    }

    pub fn leader_flag(&self) -> Arc<RwLock<bool>> {
        self.leader_flag.clone()
    }

    pub fn is_leader(&self) -> bool {
        *self.leader_flag.read()
    }

    async fn set_leader(&self, value: bool, callbacks: &dyn LeaderCallbacks) {
        let was_leader = {
            let mut flag = self.leader_flag.write();
            let was = *flag;
            *flag = value;
            was
        };
        if value && !was_leader {
            callbacks.on_started_leading().await;
        } else if !value && was_leader {
            callbacks.on_stopped_leading().await;
        }
    }

    /// One acquire-or-renew attempt. Returns the holder identity after the
    /// attempt (whether or not it is us) so the caller can detect
    /// leadership transitions.
    async fn tick(&self) -> Result<String, kube::Error> {
        let now = Utc::now();
        match self.leases.get(&self.config.lease_name).await {
            Ok(existing) => {
                let holder = existing.spec.as_ref().and_then(|s| s.holder_identity.clone());
                let renew_time =
                    existing.spec.as_ref().and_then(|s| s.renew_time.as_ref()).map(|t| t.0);
                let duration_secs =
                    existing.spec.as_ref().and_then(|s| s.lease_duration_seconds).unwrap_or(15);
                let expired = renew_time
                    .map(|t| now.signed_duration_since(t).num_seconds() > duration_secs as i64)
                    .unwrap_or(true);

                if holder.as_deref() == Some(self.config.identity.as_str()) || expired {
                    let mut updated = existing.clone();
                    let spec = updated.spec.get_or_insert_with(LeaseSpec::default);
                    let is_new_holder = holder.as_deref() != Some(self.config.identity.as_str());
                    spec.holder_identity = Some(self.config.identity.clone());
                    spec.lease_duration_seconds = Some(self.config.lease_duration.as_secs() as i32);
                    spec.renew_time = Some(MicroTime(now));
                    if is_new_holder {
                        spec.acquire_time = Some(MicroTime(now));
                        spec.lease_transitions =
                            Some(spec.lease_transitions.unwrap_or(0) + 1);
                    }
                    self.leases.replace(&self.config.lease_name, &PostParams::default(), &updated).await?;
                    Ok(self.config.identity.clone())
                } else {
                    Ok(holder.unwrap_or_default())
                }
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(self.config.lease_name.clone()),
                        namespace: Some(self.config.namespace.clone()),
                        ..Default::default()
                    },
                    spec: Some(LeaseSpec {
                        holder_identity: Some(self.config.identity.clone()),
                        lease_duration_seconds: Some(self.config.lease_duration.as_secs() as i32),
                        acquire_time: Some(MicroTime(now)),
                        renew_time: Some(MicroTime(now)),
                        lease_transitions: Some(0),
                        ..Default::default()
                    }),
                };
                self.leases.create(&PostParams::default(), &lease).await?;
                Ok(self.config.identity.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Releases the lease if we currently hold it — best-effort, matching
    /// client-go's `ReleaseOnCancel`.
    async fn release(&self) {
        if !self.is_leader() {
            return;
        }
        if let Ok(existing) = self.leases.get(&self.config.lease_name).await {
            let mut updated = existing;
            if let Some(spec) = updated.spec.as_mut() {
                spec.holder_identity = None;
            }
            let _ = self.leases.replace(&self.config.lease_name, &PostParams::default(), &updated).await;
        }
        tracing::info!(identity = %self.config.identity, "released leader lease on shutdown");
    }

    /// Runs the election loop until `cancel` fires; stops scaling actions
    /// immediately on loss of leadership by invoking `on_stopped_leading`
    /// before returning control to the retry loop (spec §4.9, §5).
    pub async fn run(&self, cancel: CancellationToken, callbacks: Arc<dyn LeaderCallbacks>) {
        let mut last_known_holder: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.tick().await {
                Ok(holder) => {
                    let became_leader = holder == self.config.identity;
                    self.set_leader(became_leader, callbacks.as_ref()).await;
                    if last_known_holder.as_deref() != Some(holder.as_str()) {
                        last_known_holder = Some(holder.clone());
                        callbacks.on_new_leader(&holder).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "leader election tick failed");
                    self.set_leader(false, callbacks.as_ref()).await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_period) => {}
                _ = cancel.cancelled() => break,
            }
        }

        self.release().await;
        self.set_leader(false, callbacks.as_ref()).await;
    }
}
