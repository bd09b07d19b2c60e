//! Leader-elected autoscaler (spec §4.9): while leader, periodically asks
//! the Control Plane for a recommended replica count and reconciles the
//! runner `Deployment`, retrying on update conflict by re-fetching the
//! latest object each attempt. Grounded in
//! `original_source/src/pkg/leaderElection.go` plus the cluster-client
//! scale-with-retry idiom.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use parking_lot::Mutex;
use runner_core::{ReplicaRecommendation, RunnerId};
use runner_wire::ControlPlaneClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::leader::LeaderCallbacks;

const TICK_INTERVAL: Duration = Duration::from_secs(60);
const MAX_CONFLICT_RETRIES: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct AutoscalerLimits {
    pub min_replicas: i32,
    pub max_replicas: i32,
    /// Multiplied against configured job concurrency to derive the
    /// "desired concurrency" term of the `RunnerScale` call (spec §4.9).
    pub concurrency_factor: f64,
}

pub struct Autoscaler {
    deployments: Api<Deployment>,
    deployment_name: String,
    control_plane: Arc<dyn ControlPlaneClient>,
    runner_id: RunnerId,
    job_concurrency: i32,
    limits: AutoscalerLimits,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Autoscaler {
    pub fn new(
        client: kube::Client,
        namespace: &str,
        deployment_name: impl Into<String>,
        control_plane: Arc<dyn ControlPlaneClient>,
        runner_id: RunnerId,
        job_concurrency: i32,
        limits: AutoscalerLimits,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            deployments: Api::namespaced(client, namespace),
            deployment_name: deployment_name.into(),
            control_plane,
            runner_id,
            job_concurrency,
            limits,
            cancel,
            ticker: Mutex::new(None),
        }
    }

    async fn current_replicas(&self) -> Result<i32, kube::Error> {
        let deployment = self.deployments.get(&self.deployment_name).await?;
        Ok(deployment.spec.and_then(|s| s.replicas).unwrap_or(0))
    }

    /// One tick: read current replicas, ask the Control Plane for a
    /// recommendation, clamp it, and apply it with retry-on-conflict.
    async fn reconcile_once(&self) {
        let current = match self.current_replicas().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "autoscaler failed to read deployment, skipping tick");
                return;
            }
        };

        let desired_concurrency =
            (self.job_concurrency as f64 * self.limits.concurrency_factor).round() as i32;

        let recommended =
            match self.control_plane.runner_scale(&self.runner_id, current, desired_concurrency).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "runnerScale call failed, skipping tick");
                    return;
                }
            };

        let clamped = ReplicaRecommendation {
            current,
            recommended,
            min: self.limits.min_replicas,
            max: self.limits.max_replicas,
        }
        .clamped();

        if clamped == current {
            return;
        }

        if let Err(e) = self.apply_replica_count(clamped).await {
            tracing::warn!(error = %e, "autoscaler failed to update deployment replica count");
        } else {
            tracing::info!(from = current, to = clamped, "reconciled runner deployment replica count");
        }
    }

    async fn apply_replica_count(&self, replicas: i32) -> Result<(), kube::Error> {
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let mut deployment = self.deployments.get(&self.deployment_name).await?;
            if let Some(spec) = deployment.spec.as_mut() {
                spec.replicas = Some(replicas);
            }
            match self.deployments.replace(&self.deployment_name, &PostParams::default(), &deployment).await
            {
                Ok(_) => return Ok(()),
                Err(kube::Error::Api(ae)) if ae.code == 409 && attempt + 1 < MAX_CONFLICT_RETRIES => {
                    tracing::debug!(attempt, "deployment update conflict, re-fetching and retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop always returns on its last iteration")
    }

    async fn run_ticks(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => self.reconcile_once().await,
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

#[async_trait::async_trait]
impl LeaderCallbacks for Arc<Autoscaler> {
    async fn on_started_leading(&self) {
        tracing::info!("became leader, starting autoscaler ticker");
        let handle = tokio::spawn(Arc::clone(self).run_ticks());
        *self.ticker.lock() = Some(handle);
    }

    async fn on_stopped_leading(&self) {
        tracing::info!("lost leadership, stopping autoscaler ticker");
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }

    async fn on_new_leader(&self, identity: &str) {
        tracing::info!(leader = %identity, "observed leader transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_clamps_within_configured_bounds() {
        let rec = ReplicaRecommendation { current: 3, recommended: 50, min: 1, max: 10 };
        assert_eq!(rec.clamped(), 10);
        let rec = ReplicaRecommendation { current: 3, recommended: -2, min: 1, max: 10 };
        assert_eq!(rec.clamped(), 1);
    }
}
