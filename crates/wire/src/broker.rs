//! Broker mode (spec §9): an alternative transport where `AppendJobLog` and
//! `ReportJobOutcome` calls are enqueued locally instead of sent straight to
//! the Control Plane, and jobs arrive pre-addressed rather than through
//! `GetPendingJob`.

use async_trait::async_trait;
use parking_lot::Mutex;
use runner_core::{Job, RunnerId, RunnerIdentity};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::client::{ControlPlaneClient, ControlPlaneError};
use crate::types::{BrokerJobFields, LogBatch, OutcomeReport, PendingJobResponse};

/// One deferred call, queued by `BrokerControlPlaneClient` for an external
/// broker process to drain.
#[derive(Debug, Clone)]
pub enum BrokerEnvelope {
    AppendJobLog(LogBatch),
    ReportJobOutcome(OutcomeReport),
}

/// Sink for envelopes a `BrokerControlPlaneClient` produces. The in-memory
/// `VecDeque` implementation below is sufficient for a single-process broker;
/// a networked broker would implement this trait over its own transport.
pub trait JobQueue: Send + Sync {
    fn push(&self, envelope: BrokerEnvelope);
}

/// Simple FIFO `JobQueue` backed by a mutex-guarded deque.
#[derive(Default)]
pub struct InMemoryJobQueue {
    inner: Mutex<VecDeque<BrokerEnvelope>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<BrokerEnvelope> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobQueue for InMemoryJobQueue {
    fn push(&self, envelope: BrokerEnvelope) {
        self.inner.lock().push_back(envelope);
    }
}

/// Where a broker-mode runner gets its next job from, instead of polling
/// `GetPendingJob`. A job source is handed a `Job` with only broker-specific
/// fields populated; `BrokerJobFields::merge_into` fills in the rest.
#[async_trait]
pub trait BrokerJobSource: Send + Sync {
    async fn next_job(&self) -> Option<(Job, BrokerJobFields)>;
}

/// `ControlPlaneClient` implementation for broker mode: registration and
/// scaling calls still go straight to the real Control Plane through `inner`,
/// but job logs and outcomes land on `queue` for local drain instead.
pub struct BrokerControlPlaneClient<C> {
    inner: C,
    queue: Arc<dyn JobQueue>,
}

impl<C> BrokerControlPlaneClient<C> {
    pub fn new(inner: C, queue: Arc<dyn JobQueue>) -> Self {
        Self { inner, queue }
    }
}

#[async_trait]
impl<C: ControlPlaneClient> ControlPlaneClient for BrokerControlPlaneClient<C> {
    async fn register(&self, queue: Option<&str>) -> Result<RunnerIdentity, ControlPlaneError> {
        self.inner.register(queue).await
    }

    async fn deregister(&self, runner_id: &RunnerId) -> Result<(), ControlPlaneError> {
        self.inner.deregister(runner_id).await
    }

    async fn get_pending_job(
        &self,
        runner_id: &RunnerId,
        last_token: &str,
    ) -> Result<PendingJobResponse, ControlPlaneError> {
        // Broker mode does not poll; callers should be driving off a
        // `BrokerJobSource` instead. Report "nothing pending" rather than
        // reaching the real Control Plane.
        let _ = (runner_id, last_token);
        Ok(PendingJobResponse::empty(last_token.to_string()))
    }

    async fn append_job_log(&self, batch: LogBatch) -> Result<(), ControlPlaneError> {
        self.queue.push(BrokerEnvelope::AppendJobLog(batch));
        Ok(())
    }

    async fn report_job_outcome(&self, report: OutcomeReport) -> Result<(), ControlPlaneError> {
        self.queue.push(BrokerEnvelope::ReportJobOutcome(report));
        Ok(())
    }

    async fn runner_scale(
        &self,
        runner_id: &RunnerId,
        current_replicas: i32,
        desired_concurrency: i32,
    ) -> Result<i32, ControlPlaneError> {
        self.inner.runner_scale(runner_id, current_replicas, desired_concurrency).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runner_core::JobOutcome;

    struct StubClient;

    #[async_trait]
    impl ControlPlaneClient for StubClient {
        async fn register(&self, _queue: Option<&str>) -> Result<RunnerIdentity, ControlPlaneError> {
            Ok(RunnerIdentity { id: "r-1".into(), token: "tok".into() })
        }
        async fn deregister(&self, _runner_id: &RunnerId) -> Result<(), ControlPlaneError> {
            Ok(())
        }
        async fn get_pending_job(
            &self,
            _runner_id: &RunnerId,
            _last_token: &str,
        ) -> Result<PendingJobResponse, ControlPlaneError> {
            Ok(PendingJobResponse::empty("tok"))
        }
        async fn append_job_log(&self, _batch: LogBatch) -> Result<(), ControlPlaneError> {
            panic!("should be intercepted by broker client")
        }
        async fn report_job_outcome(&self, _report: OutcomeReport) -> Result<(), ControlPlaneError> {
            panic!("should be intercepted by broker client")
        }
        async fn runner_scale(
            &self,
            _runner_id: &RunnerId,
            current_replicas: i32,
            _desired_concurrency: i32,
        ) -> Result<i32, ControlPlaneError> {
            Ok(current_replicas)
        }
    }

    #[tokio::test]
    async fn append_and_outcome_calls_land_on_the_queue_not_inner() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let client = BrokerControlPlaneClient::new(StubClient, queue.clone());

        client
            .append_job_log(LogBatch {
                runner_id: "r-1".into(),
                runner_job_id: "j-1".into(),
                sent_at: "2026-07-28T00:00:00Z".to_string(),
                base64_lines: vec!["aGVsbG8=".to_string()],
            })
            .await
            .unwrap();

        client
            .report_job_outcome(OutcomeReport {
                runner_id: "r-1".into(),
                runner_job_id: "j-1".into(),
                outcome: JobOutcome::success(),
            })
            .await
            .unwrap();

        assert_eq!(queue.len(), 2);
        let drained = queue.drain();
        assert!(matches!(drained[0], BrokerEnvelope::AppendJobLog(_)));
        assert!(matches!(drained[1], BrokerEnvelope::ReportJobOutcome(_)));
        assert!(queue.is_empty());
    }
}
