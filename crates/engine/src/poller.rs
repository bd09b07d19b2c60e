//! Poller (spec §4.8): repeatedly asks the Control Plane for the next
//! pending job and forwards it onto the job channel, backing off to a sleep
//! once the Control Plane reports nothing pending. Grounded in
//! `original_source/src/cmd/run.go`'s poll loop.

use std::sync::Arc;
use std::time::Duration;

use runner_core::{Job, RunnerId};
use runner_wire::ControlPlaneClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Poller {
    client: Arc<dyn ControlPlaneClient>,
    runner_id: RunnerId,
    poll_interval: Duration,
}

impl Poller {
    pub fn new(client: Arc<dyn ControlPlaneClient>, runner_id: RunnerId, poll_interval: Duration) -> Self {
        Self { client, runner_id, poll_interval }
    }

    /// Runs until `cancel` fires, then drops `tx` (closing the channel) and
    /// returns. Never sends after the channel has been dropped (spec §8
    /// invariant 6) — the single `tx.send` call site is guarded by the same
    /// `select!` that observes cancellation.
    pub async fn run(self, tx: mpsc::Sender<Job>, cancel: CancellationToken) {
        let mut last_token = String::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            loop {
                match self.client.get_pending_job(&self.runner_id, &last_token).await {
                    Err(e) => {
                        tracing::warn!(error = %e, "poll for pending job failed, will retry next tick");
                        break;
                    }
                    Ok(resp) => {
                        last_token = resp.next_token;
                        let job = match resp.job {
                            Some(job) if !job.is_empty_sentinel() => job,
                            _ => break,
                        };

                        tokio::select! {
                            result = tx.send(job) => {
                                if result.is_err() {
                                    // All workers are gone; nothing left to do.
                                    return;
                                }
                            }
                            _ = cancel.cancelled() => return,
                        }
                    }
                }

                if cancel.is_cancelled() {
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        drop(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use runner_core::RunnerIdentity;
    use runner_wire::{ControlPlaneError, LogBatch, OutcomeReport, PendingJobResponse};
    use std::collections::VecDeque;

    struct StubClient {
        responses: Mutex<VecDeque<Result<PendingJobResponse, ControlPlaneError>>>,
    }

    #[async_trait]
    impl ControlPlaneClient for StubClient {
        async fn register(&self, _queue: Option<&str>) -> Result<RunnerIdentity, ControlPlaneError> {
            unimplemented!()
        }
        async fn deregister(&self, _runner_id: &RunnerId) -> Result<(), ControlPlaneError> {
            unimplemented!()
        }
        async fn get_pending_job(
            &self,
            _runner_id: &RunnerId,
            _last_token: &str,
        ) -> Result<PendingJobResponse, ControlPlaneError> {
            self.responses.lock().pop_front().unwrap_or_else(|| Ok(PendingJobResponse::empty("tok")))
        }
        async fn append_job_log(&self, _batch: LogBatch) -> Result<(), ControlPlaneError> {
            unimplemented!()
        }
        async fn report_job_outcome(&self, _report: OutcomeReport) -> Result<(), ControlPlaneError> {
            unimplemented!()
        }
        async fn runner_scale(
            &self,
            _runner_id: &RunnerId,
            _current_replicas: i32,
            _desired_concurrency: i32,
        ) -> Result<i32, ControlPlaneError> {
            unimplemented!()
        }
    }

    fn job(id: &str) -> Job {
        Job {
            id: id.into(),
            number: "1".to_string(),
            image: "alpine".to_string(),
            commands: vec![],
            variables: vec![],
            files: vec![],
        }
    }

    #[tokio::test]
    async fn sends_jobs_until_empty_sentinel_then_sleeps() {
        let client = Arc::new(StubClient {
            responses: Mutex::new(VecDeque::from([
                Ok(PendingJobResponse { job: Some(job("j1")), next_token: "t1".to_string() }),
                Ok(PendingJobResponse::empty("t2")),
            ])),
        });
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let poller = Poller::new(client, "r1".into(), Duration::from_millis(20));

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(poller.run(tx, cancel_clone));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id.as_str(), "j1");

        cancel.cancel();
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn never_sends_after_cancellation_closes_the_channel() {
        let client = Arc::new(StubClient { responses: Mutex::new(VecDeque::new()) });
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let poller = Poller::new(client, "r1".into(), Duration::from_millis(10));
        poller.run(tx, cancel).await;

        assert!(rx.recv().await.is_none());
    }
}
