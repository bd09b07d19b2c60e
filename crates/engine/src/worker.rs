//! Worker loop (spec §4.8): pulls jobs off the shared receiver, builds the
//! per-job processor chain, drives the workload through to a terminal
//! outcome, and reports metrics/error-reporting side effects. Grounded in
//! `original_source/src/cmd/run.go`'s worker goroutine body.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use runner_core::{Clock, Job, RunnerId};
use runner_wire::{ControlPlaneClient, ErrorReporter};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::Instrument;

use runner_adapters::log::{MirrorProcessor, PrefixProcessor, SanitizeProcessor, ShipProcessor};
use runner_adapters::{LogProcessor, LogStreamer, OutcomeVariableProcessor, WorkloadDriver};

use crate::metrics::JobMetricsSink;

/// Shared, cloneable dependencies every worker task needs. `client` and
/// `driver` are trait objects so tests can substitute
/// `runner_adapters::FakeWorkloadDriver` and a stub Control Plane client.
pub struct WorkerDeps<C: Clock> {
    pub client: Arc<dyn ControlPlaneClient>,
    pub driver: Arc<dyn WorkloadDriver>,
    pub metrics: Arc<dyn JobMetricsSink>,
    pub error_reporter: Arc<dyn ErrorReporter>,
    pub runner_id: RunnerId,
    pub clock: C,
    /// Enabled only under trace logging (spec §4.4).
    pub mirror_enabled: bool,
    pub ship_max_bytes: usize,
    pub ship_max_time: Duration,
}

impl<C: Clock> Clone for WorkerDeps<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            driver: self.driver.clone(),
            metrics: self.metrics.clone(),
            error_reporter: self.error_reporter.clone(),
            runner_id: self.runner_id.clone(),
            clock: self.clock.clone(),
            mirror_enabled: self.mirror_enabled,
            ship_max_bytes: self.ship_max_bytes,
            ship_max_time: self.ship_max_time,
        }
    }
}

/// Receives jobs from the single poller-fed channel until it closes
/// (spec §4.8: "Worker loop. Receives Jobs from the channel until it is
/// closed."). The receiver is shared across workers behind an async mutex —
/// each worker holds the lock only long enough to pull its next job, which
/// is the multi-consumer equivalent of Go's `range` over a shared channel.
pub async fn worker_loop<C: Clock>(
    index: usize,
    jobs: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    deps: WorkerDeps<C>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };
        run_job(index, job, &deps).await;
    }
}

/// Runs one job through the full pipeline (processor chain, driver, metrics,
/// error-reporting) and returns its terminal outcome. Exposed so the
/// one-shot self-test mode (SPEC_FULL §6.2) can run a single job outside the
/// worker pool and use the outcome to pick a process exit code.
pub async fn run_job<C: Clock>(worker_index: usize, job: Job, deps: &WorkerDeps<C>) -> runner_core::JobOutcome {
    let span = tracing::info_span!(
        "job",
        job_id = %job.id,
        job_number = %job.number,
        worker = worker_index,
        outcome = tracing::field::Empty,
    );

    deps.metrics.job_started();
    let start = deps.clock.now();

    let (outcome, ring_lines) = run_job_inner(worker_index, &job, deps).instrument(span.clone()).await;

    span.record("outcome", outcome.kind.to_string().as_str());
    deps.metrics.job_finished(outcome.kind, deps.clock.now().saturating_duration_since(start));

    if !outcome.is_success() {
        deps.error_reporter.report(
            &format!(
                "job {} finished with outcome {}: {}\nrunner_logs:\n{}",
                job.id,
                outcome.kind,
                outcome.message,
                ring_lines.join("\n")
            ),
            HashMap::from([
                ("outcome".to_string(), outcome.kind.to_string()),
                ("job".to_string(), job.id.to_string()),
                ("context".to_string(), "runner_logs".to_string()),
            ]),
        );
    }

    outcome
}

/// Returns the terminal outcome plus a snapshot of the streamer's retained
/// ring-buffer lines, so `run_job` can forward recent output to the
/// error-reporting sink on non-success outcomes (spec §4.8).
async fn run_job_inner<C: Clock>(
    worker_index: usize,
    job: &Job,
    deps: &WorkerDeps<C>,
) -> (runner_core::JobOutcome, Vec<String>) {
    // Order follows spec §8's round-trip law literally: "sanitized,
    // outcome-stripped, prefix-stamped stream" — sanitizer first, then the
    // outcome-variable capturer, then the prefix stamper, then the optional
    // mirror, then the shipper last so it only ever sees the fully
    // transformed line.
    let outcome_processor = Arc::new(OutcomeVariableProcessor::new(
        deps.client.clone(),
        deps.runner_id.clone(),
        job.id.clone(),
        job.number.clone(),
    ));
    let sanitizer = Arc::new(SanitizeProcessor::new(&job.variables));
    let prefix_text = format!("[{}] [w{}] ", chrono::Utc::now().to_rfc3339(), worker_index);
    let prefix = Arc::new(PrefixProcessor::new(prefix_text));
    let shipper = Arc::new(ShipProcessor::new(
        deps.client.clone(),
        deps.runner_id.clone(),
        job.id.clone(),
        deps.ship_max_bytes,
        deps.ship_max_time,
        deps.clock.clone(),
    ));

    let mut processors: Vec<Arc<dyn LogProcessor>> =
        vec![sanitizer, outcome_processor, prefix];
    if deps.mirror_enabled {
        processors.push(Arc::new(MirrorProcessor::new()));
    }
    processors.push(shipper);

    let streamer = LogStreamer::new(processors);
    streamer.start();

    let outcome = deps.driver.run(job, &streamer).await;
    streamer.flush(&outcome).await;
    let ring_lines = streamer.ring_snapshot();
    (outcome, ring_lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use runner_core::{FakeClock, JobOutcome, OutcomeKind, RunnerIdentity};
    use runner_wire::{ControlPlaneError, LogBatch, OutcomeReport, PendingJobResponse};
    use runner_adapters::FakeWorkloadDriver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullClient;

    #[async_trait]
    impl ControlPlaneClient for NullClient {
        async fn register(&self, _queue: Option<&str>) -> Result<RunnerIdentity, ControlPlaneError> {
            unimplemented!()
        }
        async fn deregister(&self, _runner_id: &RunnerId) -> Result<(), ControlPlaneError> {
            Ok(())
        }
        async fn get_pending_job(
            &self,
            _runner_id: &RunnerId,
            _last_token: &str,
        ) -> Result<PendingJobResponse, ControlPlaneError> {
            Ok(PendingJobResponse::empty(""))
        }
        async fn append_job_log(&self, _batch: LogBatch) -> Result<(), ControlPlaneError> {
            Ok(())
        }
        async fn report_job_outcome(&self, _report: OutcomeReport) -> Result<(), ControlPlaneError> {
            Ok(())
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

    struct CountingReporter(AtomicUsize);

    impl ErrorReporter for CountingReporter {
        fn report(&self, _message: &str, _tags: HashMap<String, String>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job() -> Job {
        Job {
            id: "j1".into(),
            number: "1".to_string(),
            image: "alpine".to_string(),
            commands: vec!["echo hi".to_string()],
            variables: vec![],
            files: vec![],
        }
    }

    #[tokio::test]
    async fn successful_job_does_not_report_to_error_sink() {
        let reporter = Arc::new(CountingReporter(AtomicUsize::new(0)));
        let deps = WorkerDeps {
            client: Arc::new(NullClient),
            driver: Arc::new(FakeWorkloadDriver::new(JobOutcome::success())),
            metrics: Arc::new(crate::metrics::NoopMetricsSink),
            error_reporter: reporter.clone(),
            runner_id: "r1".into(),
            clock: FakeClock::new(),
            mirror_enabled: false,
            ship_max_bytes: 1024,
            ship_max_time: Duration::from_secs(5),
        };

        run_job(0, job(), &deps).await;
        assert_eq!(reporter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_job_reports_to_error_sink_with_expected_tags() {
        let reporter = Arc::new(CountingReporter(AtomicUsize::new(0)));
        let deps = WorkerDeps {
            client: Arc::new(NullClient),
            driver: Arc::new(FakeWorkloadDriver::new(JobOutcome::failed("boom"))),
            metrics: Arc::new(crate::metrics::NoopMetricsSink),
            error_reporter: reporter.clone(),
            runner_id: "r1".into(),
            clock: FakeClock::new(),
            mirror_enabled: false,
            ship_max_bytes: 1024,
            ship_max_time: Duration::from_secs(5),
        };

        run_job(0, job(), &deps).await;
        assert_eq!(reporter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_loop_exits_once_channel_closes() {
        let (tx, rx) = mpsc::channel(1);
        let jobs = Arc::new(AsyncMutex::new(rx));
        let deps = WorkerDeps {
            client: Arc::new(NullClient),
            driver: Arc::new(FakeWorkloadDriver::new(JobOutcome::success())),
            metrics: Arc::new(crate::metrics::NoopMetricsSink),
            error_reporter: Arc::new(CountingReporter(AtomicUsize::new(0))),
            runner_id: "r1".into(),
            clock: FakeClock::new(),
            mirror_enabled: false,
            ship_max_bytes: 1024,
            ship_max_time: Duration::from_secs(5),
        };

        tx.send(job()).await.unwrap();
        drop(tx);

        worker_loop(0, jobs, deps).await;
    }

    #[allow(dead_code)]
    fn assert_outcome_kind(kind: OutcomeKind) {
        let _ = kind;
    }
}
