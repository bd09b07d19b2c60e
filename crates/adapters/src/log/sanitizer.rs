//! Sanitizing processor (spec §4.4 scenario 5): redacts sensitive variable
//! values out of job output. Grounded in
//! `original_source/src/pkg/sanitizeLogProcessor.go`.

use async_trait::async_trait;
use runner_core::{JobOutcome, Variable};

use super::LogProcessor;

pub const REDACTION_TOKEN: &str = "**********";

/// Retains only `sensitive = true` variables with a non-empty value — an
/// empty sensitive value is never installed as a secret (spec §8 boundary
/// behavior), since replacing every occurrence of `""` would corrupt every
/// line.
pub struct SanitizeProcessor {
    secrets: Vec<String>,
}

impl SanitizeProcessor {
    pub fn new(variables: &[Variable]) -> Self {
        let secrets = variables
            .iter()
            .filter(|v| v.sensitive && !v.value.is_empty())
            .map(|v| v.value.clone())
            .collect();
        Self { secrets }
    }

    fn scrub(&self, line: &str) -> String {
        let mut scrubbed = line.to_string();
        for secret in &self.secrets {
            scrubbed = scrubbed.replace(secret.as_str(), REDACTION_TOKEN);
        }
        scrubbed
    }
}

#[async_trait]
impl LogProcessor for SanitizeProcessor {
    async fn process_stdout(&self, line: &str) -> String {
        self.scrub(line)
    }

    async fn process_stderr(&self, line: &str) -> String {
        self.scrub(line)
    }

    async fn flush(&self, _outcome: &JobOutcome) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(key: &str, value: &str, sensitive: bool) -> Variable {
        Variable { key: key.to_string(), value: value.to_string(), sensitive }
    }

    #[tokio::test]
    async fn redacts_sensitive_values_only() {
        let vars = vec![var("a", "Hello", false), var("b", "World", true)];
        let sanitizer = SanitizeProcessor::new(&vars);

        assert_eq!(sanitizer.process_stdout("lorum ipsum").await, "lorum ipsum");
        assert_eq!(sanitizer.process_stdout("Hello Everyone").await, "Hello Everyone");
        assert_eq!(sanitizer.process_stdout("Hello World").await, "Hello **********");
    }

    #[tokio::test]
    async fn empty_sensitive_value_is_never_installed_as_a_secret() {
        let vars = vec![var("b", "", true)];
        let sanitizer = SanitizeProcessor::new(&vars);
        assert_eq!(sanitizer.process_stdout("anything at all").await, "anything at all");
    }

    #[tokio::test]
    async fn redacts_every_occurrence_on_a_line() {
        let vars = vec![var("b", "tok", true)];
        let sanitizer = SanitizeProcessor::new(&vars);
        assert_eq!(
            sanitizer.process_stdout("tok and tok again").await,
            "********** and ********** again"
        );
    }
}
