use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use runner_core::clock::FakeClock;
use runner_core::{JobId, JobOutcome, RunnerId, RunnerIdentity};
use runner_wire::{ControlPlaneClient, ControlPlaneError, LogBatch, OutcomeReport, PendingJobResponse};

use super::*;

/// Records every batch it receives; never fails.
struct RecordingClient {
    batches: Mutex<Vec<LogBatch>>,
    calls: AtomicUsize,
}

impl RecordingClient {
    fn new() -> Self {
        Self { batches: Mutex::new(Vec::new()), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ControlPlaneClient for RecordingClient {
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
        unimplemented!()
    }

    async fn append_job_log(&self, batch: LogBatch) -> Result<(), ControlPlaneError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.batches.lock().push(batch);
        Ok(())
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

fn shipper(
    client: Arc<RecordingClient>,
    max_bytes: usize,
    max_time: Duration,
    clock: FakeClock,
) -> ShipProcessor<FakeClock> {
    ShipProcessor::new(
        client as Arc<dyn ControlPlaneClient>,
        RunnerId::from("runner-1"),
        JobId::from("job-1"),
        max_bytes,
        max_time,
        clock,
    )
}

#[tokio::test]
async fn first_line_ships_immediately() {
    let client = Arc::new(RecordingClient::new());
    let ship = shipper(client.clone(), 1_000_000, Duration::from_secs(3600), FakeClock::new());

    ship.process_stdout("hello").await;

    assert_eq!(client.calls.load(Ordering::Relaxed), 1);
    let batches = client.batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].base64_lines.len(), 1);
}

#[tokio::test]
async fn subsequent_lines_buffer_until_a_trigger() {
    let client = Arc::new(RecordingClient::new());
    let ship = shipper(client.clone(), 1_000_000, Duration::from_secs(3600), FakeClock::new());

    ship.process_stdout("one").await;
    ship.process_stdout("two").await;
    ship.process_stdout("three").await;

    // Only the first-line submit fired; "two" and "three" are still buffered.
    assert_eq!(client.calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn max_bytes_trips_a_submit_before_the_over_limit_line_is_counted() {
    let client = Arc::new(RecordingClient::new());
    // Small enough that the second line overflows it.
    let ship = shipper(client.clone(), 5, Duration::from_secs(3600), FakeClock::new());

    ship.process_stdout("ab").await; // first-line submit: ships "ab" alone
    assert_eq!(client.calls.load(Ordering::Relaxed), 1);

    ship.process_stdout("cdefgh").await; // exceeds max_bytes on its own -> submits empty buffer, then buffers itself
    // The pre-check submit sees an empty buffer and is a no-op; the line is
    // buffered regardless of how large it is.
    let batches = client.batches.lock();
    assert_eq!(batches.len(), 1);
}

#[tokio::test]
async fn max_time_elapsed_trips_a_submit() {
    let client = Arc::new(RecordingClient::new());
    let clock = FakeClock::new();
    let ship = shipper(client.clone(), 1_000_000, Duration::from_millis(100), clock.clone());

    ship.process_stdout("one").await; // first-line submit
    assert_eq!(client.calls.load(Ordering::Relaxed), 1);

    ship.process_stdout("two").await; // buffered, no trigger yet
    assert_eq!(client.calls.load(Ordering::Relaxed), 1);

    clock.advance(Duration::from_millis(200));
    ship.process_stdout("three").await; // elapsed > max_time -> submits "two"
    assert_eq!(client.calls.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn lines_are_dropped_from_the_buffer_after_a_submit_attempt() {
    let client = Arc::new(RecordingClient::new());
    let ship = shipper(client.clone(), 1_000_000, Duration::from_secs(3600), FakeClock::new());

    ship.process_stdout("one").await;
    ship.flush(&JobOutcome::success()).await;

    let batches = client.batches.lock();
    // first-line submit shipped "one" alone; flush's submit saw an empty
    // buffer and shipped nothing further.
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].base64_lines.len(), 1);
}

#[tokio::test]
async fn flush_ships_any_remaining_buffered_lines() {
    let client = Arc::new(RecordingClient::new());
    let ship = shipper(client.clone(), 1_000_000, Duration::from_secs(3600), FakeClock::new());

    ship.process_stdout("one").await; // first-line submit
    ship.process_stdout("two").await; // buffered
    ship.flush(&JobOutcome::success()).await;

    let batches = client.batches.lock();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].base64_lines.len(), 1);
}
