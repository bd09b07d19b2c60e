//! Mirror-to-logger processor (spec §4.4): optionally emits each non-empty
//! line to the process logger at INFO. Enabled only under trace logging, so
//! construction is gated by the caller rather than by a runtime check here.
//! Grounded in `original_source/src/pkg/loggerLogProcessor.go`.

use async_trait::async_trait;
use runner_core::JobOutcome;

use super::LogProcessor;

pub struct MirrorProcessor;

impl Default for MirrorProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorProcessor {
    pub fn new() -> Self {
        Self
    }

    fn mirror(&self, line: &str) -> String {
        if !line.is_empty() {
            tracing::info!(target: "runner::job_output", "{line}");
        }
        line.to_string()
    }
}

#[async_trait]
impl LogProcessor for MirrorProcessor {
    async fn process_stdout(&self, line: &str) -> String {
        self.mirror(line)
    }

    async fn process_stderr(&self, line: &str) -> String {
        self.mirror(line)
    }

    async fn flush(&self, _outcome: &JobOutcome) {}
}
