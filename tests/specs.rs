//! Cross-crate integration tests for properties that only hold once several
//! crates are wired together — the per-crate unit tests already cover each
//! piece in isolation. Grounded in spec §8's invariants and round-trip laws.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use runner_adapters::log::{PrefixProcessor, SanitizeProcessor, ShipProcessor};
use runner_adapters::{FakeWorkloadDriver, LogProcessor, LogStreamer, OutcomeVariableProcessor};
use runner_core::{FakeClock, Job, JobOutcome, RunnerId, RunnerIdentity, Variable};
use runner_engine::{worker_loop, WorkerDeps};
use runner_wire::{ControlPlaneClient, ControlPlaneError, ErrorReporter, LogBatch, OutcomeReport, PendingJobResponse};

/// Records every call instead of reaching a real Control Plane, so tests can
/// assert on exactly what crossed the `ControlPlaneClient` seam.
#[derive(Default)]
struct RecordingClient {
    outcomes: Mutex<Vec<OutcomeReport>>,
    log_batches: Mutex<Vec<LogBatch>>,
}

#[async_trait]
impl ControlPlaneClient for RecordingClient {
    async fn register(&self, _queue: Option<&str>) -> Result<RunnerIdentity, ControlPlaneError> {
        Ok(RunnerIdentity { id: "r-1".into(), token: "tok".into() })
    }

    async fn deregister(&self, _runner_id: &RunnerId) -> Result<(), ControlPlaneError> {
        Ok(())
    }

    async fn get_pending_job(
        &self,
        _runner_id: &RunnerId,
        last_token: &str,
    ) -> Result<PendingJobResponse, ControlPlaneError> {
        Ok(PendingJobResponse::empty(last_token.to_string()))
    }

    async fn append_job_log(&self, batch: LogBatch) -> Result<(), ControlPlaneError> {
        self.log_batches.lock().push(batch);
        Ok(())
    }

    async fn report_job_outcome(&self, report: OutcomeReport) -> Result<(), ControlPlaneError> {
        self.outcomes.lock().push(report);
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

struct NoopReporter;

impl ErrorReporter for NoopReporter {
    fn report(&self, _message: &str, _tags: HashMap<String, String>) {}
}

fn job(id: &str, variables: Vec<Variable>) -> Job {
    Job {
        id: id.into(),
        number: "1".to_string(),
        image: "alpine".to_string(),
        commands: vec![],
        variables,
        files: vec![],
    }
}

/// Spec §8 invariant 1: for every accepted job, exactly one outcome is
/// reported to the Control Plane — regardless of whether the job succeeds or
/// fails.
#[tokio::test]
async fn exactly_one_outcome_is_reported_per_job() {
    for outcome in [JobOutcome::success(), JobOutcome::failed("boom")] {
        let client = Arc::new(RecordingClient::default());
        let deps = WorkerDeps {
            client: client.clone(),
            driver: Arc::new(FakeWorkloadDriver::new(outcome)),
            metrics: Arc::new(runner_engine::NoopMetricsSink),
            error_reporter: Arc::new(NoopReporter),
            runner_id: "r-1".into(),
            clock: FakeClock::new(),
            mirror_enabled: false,
            ship_max_bytes: 4096,
            ship_max_time: Duration::from_secs(5),
        };

        // The shipper (not exercised by FakeWorkloadDriver, which writes no
        // lines) is responsible for `report_job_outcome`-equivalent
        // behavior in the real pipeline via `OutcomeVariableProcessor`;
        // here we drive the worker loop end to end and assert on the one
        // channel every job outcome must cross: the per-job `flush` that
        // the outcome-variable processor uses to ship its final report.
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let jobs = Arc::new(tokio::sync::Mutex::new(rx));
        tx.send(job("j1", vec![])).await.unwrap();
        drop(tx);

        worker_loop(0, jobs, deps).await;

        assert_eq!(client.outcomes.lock().len(), 1, "exactly one outcome must be reported per job");
    }
}

/// Spec §8 round-trip law: base64-decoding the shipped log batches, in
/// order, and concatenating with newlines yields a prefix of the sanitized,
/// prefix-stamped stream of the job's stdout.
#[tokio::test]
async fn shipped_batches_decode_to_the_sanitized_prefixed_stream() {
    let client = Arc::new(RecordingClient::default());
    let variables = vec![Variable { key: "b".to_string(), value: "World".to_string(), sensitive: true }];

    let sanitizer = Arc::new(SanitizeProcessor::new(&variables));
    let outcome_processor = Arc::new(OutcomeVariableProcessor::new(
        client.clone(),
        RunnerId::from("r-1"),
        runner_core::JobId::from("j-1"),
        "1".to_string(),
    ));
    let prefix = Arc::new(PrefixProcessor::new("[w0] "));
    let shipper = Arc::new(ShipProcessor::new(
        client.clone(),
        "r-1".into(),
        "j-1".into(),
        4096,
        Duration::from_secs(30),
        FakeClock::new(),
    ));

    let processors: Vec<Arc<dyn LogProcessor>> = vec![sanitizer, outcome_processor, prefix, shipper];
    let streamer = LogStreamer::new(processors);

    streamer.stdout_sink().append(b"Hello World\nplain line\n");
    streamer.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    streamer.flush(&JobOutcome::success()).await;

    use base64::Engine;
    let batches = client.log_batches.lock();
    let mut decoded = Vec::new();
    for batch in batches.iter() {
        for line in &batch.base64_lines {
            let bytes = base64::engine::general_purpose::STANDARD.decode(line).unwrap();
            decoded.push(String::from_utf8(bytes).unwrap());
        }
    }

    assert_eq!(decoded, vec!["[w0] Hello **********".to_string(), "[w0] plain line".to_string()]);
}

/// Spec §8 invariant 6: the poller never sends on the job channel after it
/// has closed it. Covers the whole worker-pool wiring rather than the
/// poller in isolation.
#[tokio::test]
async fn pool_join_settles_after_cancellation_with_no_late_sends() {
    let client = Arc::new(RecordingClient::default());
    let deps = WorkerDeps {
        client: client.clone(),
        driver: Arc::new(FakeWorkloadDriver::new(JobOutcome::success())),
        metrics: Arc::new(runner_engine::NoopMetricsSink),
        error_reporter: Arc::new(NoopReporter),
        runner_id: "r-1".into(),
        clock: FakeClock::new(),
        mirror_enabled: false,
        ship_max_bytes: 4096,
        ship_max_time: Duration::from_secs(5),
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = runner_engine::spawn(
        client.clone(),
        "r-1".into(),
        2,
        Duration::from_millis(20),
        deps,
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    handle.join().await;

    // No pending-job responses were ever queued (the stub always reports
    // "nothing pending"), so no outcomes should have been recorded either —
    // this only proves the pool actually joined rather than hanging.
    assert!(client.outcomes.lock().is_empty());
}

/// Spec §8 boundary behavior: zero or negative configured concurrency is
/// clamped to 1, verified at the call site `runner-daemon` actually uses.
#[test]
fn concurrency_is_clamped_before_spawning_workers() {
    assert_eq!(runner_engine::clamp_concurrency(0), 1);
    assert_eq!(runner_engine::clamp_concurrency(-10), 1);
}
