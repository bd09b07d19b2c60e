//! Log streamer (spec §4.3): owns the stdout/stderr safe buffers, drains
//! completed lines through the processor chain on a ~50ms tick, retains a
//! ring of recent lines for post-mortem diagnostics on failure, and
//! coordinates the end-of-job flush. Grounded in `original_source/src/pkg/
//! logs.go`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use runner_core::JobOutcome;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::{ReadResult, SafeBuffer};

use super::LogProcessor;

const DRAIN_TICK: Duration = Duration::from_millis(50);
const RING_CAPACITY: usize = 20;
const FLUSH_CEILING: Duration = Duration::from_secs(30);
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the two safe buffers an exec channel writes into and drains
/// completed lines through an ordered processor chain.
pub struct LogStreamer {
    stdout: Arc<SafeBuffer>,
    stderr: Arc<SafeBuffer>,
    processors: Arc<Vec<Arc<dyn LogProcessor>>>,
    ring: Arc<Mutex<VecDeque<String>>>,
    cancel: CancellationToken,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl LogStreamer {
    pub fn new(processors: Vec<Arc<dyn LogProcessor>>) -> Self {
        Self {
            stdout: Arc::new(SafeBuffer::new()),
            stderr: Arc::new(SafeBuffer::new()),
            processors: Arc::new(processors),
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY))),
            cancel: CancellationToken::new(),
            drain_task: Mutex::new(None),
        }
    }

    pub fn stdout_sink(&self) -> Arc<SafeBuffer> {
        self.stdout.clone()
    }

    pub fn stderr_sink(&self) -> Arc<SafeBuffer> {
        self.stderr.clone()
    }

    /// Snapshot of the retained ring-buffer lines, oldest first — forwarded
    /// to the error-reporting sink on non-success outcomes (spec §4.8).
    pub fn ring_snapshot(&self) -> Vec<String> {
        self.ring.lock().iter().cloned().collect()
    }

    /// Starts the drain loop. Call once per job.
    pub fn start(&self) {
        let stdout = self.stdout.clone();
        let stderr = self.stderr.clone();
        let processors = self.processors.clone();
        let ring = self.ring.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(DRAIN_TICK);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {
                        Self::drain_once(&stderr, &processors, &ring, false).await;
                        Self::drain_once(&stdout, &processors, &ring, true).await;
                    }
                }
            }
        });
        *self.drain_task.lock() = Some(handle);
    }

    /// Drains completed lines and feeds each through the chain in order. The
    /// first processor in the chain is always the sanitizer (spec §8
    /// invariant 4 requires secrets scrubbed from every retained diagnostic
    /// buffer), so the ring only ever records a line after that first
    /// processor has had a chance to redact it — never the raw line.
    async fn drain_once(
        buffer: &SafeBuffer,
        processors: &[Arc<dyn LogProcessor>],
        ring: &Mutex<VecDeque<String>>,
        is_stdout: bool,
    ) {
        loop {
            let line = match buffer.read_until(b'\n') {
                ReadResult::Line(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                ReadResult::Partial(_) => return,
            };

            let mut current = line;
            for (i, p) in processors.iter().enumerate() {
                current = if is_stdout {
                    p.process_stdout(&current).await
                } else {
                    p.process_stderr(&current).await
                };
                if i == 0 {
                    let mut ring = ring.lock();
                    if ring.len() == RING_CAPACITY {
                        ring.pop_front();
                    }
                    ring.push_back(current.clone());
                }
                if current.is_empty() {
                    break;
                }
            }

            if processors.is_empty() {
                let mut ring = ring.lock();
                if ring.len() == RING_CAPACITY {
                    ring.pop_front();
                }
                ring.push_back(current);
            }
        }
    }

    /// Polls until both buffers are empty or the 30-second ceiling is hit,
    /// stops the drain loop, then flushes every processor in reverse order
    /// so terminal processors (shipper, outcome reporter) see a stable world.
    pub async fn flush(&self, outcome: &JobOutcome) {
        let start = tokio::time::Instant::now();
        loop {
            if self.stdout.is_empty() && self.stderr.is_empty() {
                break;
            }
            if start.elapsed() > FLUSH_CEILING {
                tracing::warn!("log streamer drain did not settle within the flush ceiling");
                break;
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }

        self.cancel.cancel();
        if let Some(handle) = self.drain_task.lock().take() {
            let _ = handle.await;
        }

        for p in self.processors.iter().rev() {
            p.flush(outcome).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{PrefixProcessor, SanitizeProcessor};
    use runner_core::Variable;

    #[tokio::test]
    async fn drains_stdout_and_stderr_through_the_chain_in_line_order() {
        let streamer = LogStreamer::new(vec![Arc::new(PrefixProcessor::new("> "))]);
        streamer.stdout_sink().append(b"one\ntwo\n");
        streamer.start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        streamer.flush(&JobOutcome::success()).await;

        let ring = streamer.ring_snapshot();
        assert_eq!(ring, vec!["> one".to_string(), "> two".to_string()]);
    }

    #[tokio::test]
    async fn ring_buffer_never_retains_a_sensitive_value() {
        let vars = vec![Variable { key: "b".to_string(), value: "topsecret".to_string(), sensitive: true }];
        let streamer = LogStreamer::new(vec![
            Arc::new(SanitizeProcessor::new(&vars)),
            Arc::new(PrefixProcessor::new("> ")),
        ]);
        streamer.stdout_sink().append(b"the password is topsecret\n");
        streamer.start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        streamer.flush(&JobOutcome::success()).await;

        let ring = streamer.ring_snapshot();
        assert_eq!(ring, vec!["the password is **********".to_string()]);
    }

    #[tokio::test]
    async fn ring_buffer_retains_only_the_most_recent_entries() {
        let streamer = LogStreamer::new(vec![]);
        let mut input = String::new();
        for i in 0..(RING_CAPACITY + 5) {
            input.push_str(&format!("line-{i}\n"));
        }
        streamer.stdout_sink().append(input.as_bytes());
        streamer.start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        streamer.flush(&JobOutcome::success()).await;

        let ring = streamer.ring_snapshot();
        assert_eq!(ring.len(), RING_CAPACITY);
        assert_eq!(ring[0], "line-5");
    }

    #[tokio::test]
    async fn flush_with_empty_buffers_returns_promptly() {
        let streamer = LogStreamer::new(vec![]);
        streamer.start();
        let start = tokio::time::Instant::now();
        streamer.flush(&JobOutcome::success()).await;
        assert!(start.elapsed() < FLUSH_CEILING);
    }
}
