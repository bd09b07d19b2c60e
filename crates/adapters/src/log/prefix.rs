//! Prefix-stamping processor (spec §4.4): prepends a caller-supplied dynamic
//! prefix — typically a UTC timestamp and worker index — to every non-empty
//! line. Grounded in `original_source/src/pkg/prefixLogProcessor.go`.

use async_trait::async_trait;
use runner_core::JobOutcome;

use super::LogProcessor;

pub struct PrefixProcessor {
    prefix: String,
}

impl PrefixProcessor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn stamp(&self, line: &str) -> String {
        if line.is_empty() {
            line.to_string()
        } else {
            format!("{}{}", self.prefix, line)
        }
    }
}

#[async_trait]
impl LogProcessor for PrefixProcessor {
    async fn process_stdout(&self, line: &str) -> String {
        self.stamp(line)
    }

    async fn process_stderr(&self, line: &str) -> String {
        self.stamp(line)
    }

    async fn flush(&self, _outcome: &JobOutcome) {}
}
