//! Batched log shipper (spec §4.6): buffers transformed lines as
//! base64-encoded strings, trips a submit on size, first-line, or time
//! thresholds, and drops lines after a submit attempt regardless of whether
//! the Control Plane acknowledged it. Grounded in
//! `original_source/src/pkg/opslevelAppendLogProcessor.go`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use runner_core::{Clock, JobId, JobOutcome, RunnerId, SystemClock};
use runner_wire::{ControlPlaneClient, LogBatch};

use super::LogProcessor;

/// Ships log lines to the Control Plane's `AppendJobLog` endpoint in
/// size/time-bounded batches.
pub struct ShipProcessor<C: Clock = SystemClock> {
    client: Arc<dyn ControlPlaneClient>,
    runner_id: RunnerId,
    job_id: JobId,
    max_bytes: usize,
    max_time: Duration,
    clock: C,
    lines: Mutex<Vec<String>>,
    bytes: AtomicU64,
    shipped_first_line: AtomicBool,
    last_submit: Mutex<std::time::Instant>,
    failures: AtomicU64,
}

impl<C: Clock> ShipProcessor<C> {
    pub fn new(
        client: Arc<dyn ControlPlaneClient>,
        runner_id: RunnerId,
        job_id: JobId,
        max_bytes: usize,
        max_time: Duration,
        clock: C,
    ) -> Self {
        let last_submit = clock.now();
        Self {
            client,
            runner_id,
            job_id,
            max_bytes,
            max_time,
            clock,
            lines: Mutex::new(Vec::new()),
            bytes: AtomicU64::new(0),
            shipped_first_line: AtomicBool::new(false),
            last_submit: Mutex::new(last_submit),
            failures: AtomicU64::new(0),
        }
    }

    /// Count of submit attempts that failed; exposed for diagnostics/tests,
    /// not part of the four named Prometheus series (spec §6.5).
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn process(&self, line: &str) -> String {
        let line_bytes = line.len();

        if self.bytes.load(Ordering::Relaxed) as usize + line_bytes > self.max_bytes {
            self.submit().await;
        }

        self.bytes.fetch_add(line_bytes as u64, Ordering::Relaxed);
        self.lines.lock().push(base64::engine::general_purpose::STANDARD.encode(line.as_bytes()));

        if !self.shipped_first_line.swap(true, Ordering::Relaxed) {
            self.submit().await;
        }

        let elapsed = self.clock.now().duration_since(*self.last_submit.lock());
        if elapsed > self.max_time {
            self.submit().await;
        }

        line.to_string()
    }

    /// Drains the buffer and submits, dropping the lines whether or not the
    /// Control Plane acknowledges them (spec §4.6, §7: best-effort,
    /// at-least-once at the submit level only).
    async fn submit(&self) {
        let lines = std::mem::take(&mut *self.lines.lock());
        self.bytes.store(0, Ordering::Relaxed);
        *self.last_submit.lock() = self.clock.now();
        if lines.is_empty() {
            return;
        }

        let batch = LogBatch {
            runner_id: self.runner_id.clone(),
            runner_job_id: self.job_id.clone(),
            sent_at: chrono::Utc::now().to_rfc3339(),
            base64_lines: lines,
        };
        let line_count = batch.base64_lines.len();
        if let Err(e) = self.client.append_job_log(batch).await {
            tracing::error!(error = %e, line_count, "failed to append job log batch");
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl<C: Clock> LogProcessor for ShipProcessor<C> {
    async fn process_stdout(&self, line: &str) -> String {
        self.process(line).await
    }

    async fn process_stderr(&self, line: &str) -> String {
        self.process(line).await
    }

    async fn flush(&self, _outcome: &JobOutcome) {
        // Smooth out a last-chunk race with any straggler lines (spec §4.6).
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.submit().await;
    }
}

#[cfg(test)]
#[path = "shipper_tests.rs"]
mod tests;
