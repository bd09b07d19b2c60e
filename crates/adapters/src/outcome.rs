//! Outcome-variable protocol (spec §4.5): a regex-driven state machine that
//! recognizes `::set-outcome-var`, `::start-multiline-outcome-var`, and
//! `::end-multiline-outcome-var` directives in job output, exempts shell
//! trace lines (`^\+\s`), and supports genuinely nested multi-line blocks —
//! grounded in `original_source/src/pkg/setOutcomeVarLogProcessor.go` and its
//! faktory-mode sibling, extended to match the nesting behavior pinned down
//! by spec §8 scenario 4 (a `start` seen while another block is open pushes
//! its own nested block rather than being folded into the outer text).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use runner_core::{JobId, JobOutcome, OutcomeVariable, RunnerId};
use runner_wire::{ControlPlaneClient, OutcomeReport};

use crate::log::LogProcessor;
use crate::stack::Stack;

const END_DIRECTIVE: &str = "::end-multiline-outcome-var";

// Allow expect here as these are compile-time-constant patterns verified by tests.
#[allow(clippy::expect_used)]
fn trace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+\s").expect("trace regex is valid"))
}

#[allow(clippy::expect_used)]
fn set_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^::set-outcome-var\s(?P<key>[\w-]+)=(?P<value>.*)")
            .expect("set-outcome-var regex is valid")
    })
}

#[allow(clippy::expect_used)]
fn start_multiline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^::start-multiline-outcome-var\s(?P<key>[\w-]+)")
            .expect("start-multiline-outcome-var regex is valid")
    })
}

#[derive(Default)]
struct State {
    /// Final values, insertion-ordered; re-setting a key overwrites in place
    /// (spec invariant 3).
    order: Vec<String>,
    values: HashMap<String, String>,
    /// Keys of multi-line blocks currently open, innermost last.
    open_keys: Stack<String>,
    /// Accumulated text for each currently-open multi-line key.
    open_buffers: HashMap<String, String>,
}

impl State {
    fn set(&mut self, key: String, value: String) {
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value);
    }

    fn variables(&self) -> Vec<OutcomeVariable> {
        self.order
            .iter()
            .map(|key| OutcomeVariable {
                key: key.clone(),
                value: self.values.get(key).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

/// Captures outcome variables out of the job's stdout/stderr stream and
/// reports the terminal outcome exactly once, on flush. Matching directive
/// lines are consumed (return empty downstream); everything else passes
/// through unchanged.
pub struct OutcomeVariableProcessor {
    state: Mutex<State>,
    client: Arc<dyn ControlPlaneClient>,
    runner_id: RunnerId,
    job_id: JobId,
    job_number: String,
    reported: AtomicBool,
}

impl OutcomeVariableProcessor {
    pub fn new(
        client: Arc<dyn ControlPlaneClient>,
        runner_id: RunnerId,
        job_id: JobId,
        job_number: impl Into<String>,
    ) -> Self {
        Self {
            state: Mutex::new(State::default()),
            client,
            runner_id,
            job_id,
            job_number: job_number.into(),
            reported: AtomicBool::new(false),
        }
    }

    /// Snapshot of the captured variables, in first-seen order.
    pub fn variables(&self) -> Vec<OutcomeVariable> {
        self.state.lock().variables()
    }

    fn process_line(&self, line: &str) -> String {
        if trace_re().is_match(line) {
            return line.to_string();
        }

        let mut state = self.state.lock();

        if !state.open_keys.is_empty() {
            if line == END_DIRECTIVE {
                let key = state.open_keys.pop();
                if !key.is_empty() {
                    let buf = state.open_buffers.remove(&key).unwrap_or_default();
                    let trimmed = buf.strip_suffix('\n').unwrap_or(&buf).to_string();
                    state.set(key, trimmed);
                }
                return String::new();
            }
            if let Some(caps) = start_multiline_re().captures(line) {
                let key = caps["key"].to_string();
                state.open_keys.push(key.clone());
                state.open_buffers.insert(key, String::new());
                return String::new();
            }
            // Any other line — including a nested `set-outcome-var` — is
            // literal text inside the innermost open block.
            let top = state.open_keys.peek();
            let buf = state.open_buffers.entry(top).or_default();
            buf.push_str(line);
            buf.push('\n');
            return String::new();
        }

        if let Some(caps) = start_multiline_re().captures(line) {
            let key = caps["key"].to_string();
            state.open_keys.push(key.clone());
            state.open_buffers.insert(key, String::new());
            return String::new();
        }
        if line == END_DIRECTIVE {
            // No block open: pop is a documented no-op (bounded stack default).
            return String::new();
        }
        if let Some(caps) = set_var_re().captures(line) {
            state.set(caps["key"].to_string(), caps["value"].to_string());
            return String::new();
        }

        line.to_string()
    }
}

#[async_trait]
impl LogProcessor for OutcomeVariableProcessor {
    async fn process_stdout(&self, line: &str) -> String {
        self.process_line(line)
    }

    async fn process_stderr(&self, line: &str) -> String {
        self.process_line(line)
    }

    /// Materializes the captured variables onto `outcome` and reports it to
    /// the Control Plane exactly once per job (spec §8 invariant 1), warning
    /// when the terminal kind is not success.
    async fn flush(&self, outcome: &JobOutcome) {
        if self.reported.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut reported = outcome.clone();
        reported.outcome_variables = self.variables();

        if !reported.is_success() {
            tracing::warn!(
                job_number = %self.job_number,
                kind = %reported.kind,
                message = %reported.message,
                "job finished with a non-success outcome"
            );
        }

        let report = OutcomeReport {
            runner_id: self.runner_id.clone(),
            runner_job_id: self.job_id.clone(),
            outcome: reported,
        };
        if let Err(e) = self.client.report_job_outcome(report).await {
            tracing::error!(job_number = %self.job_number, error = %e, "failed to report job outcome");
        }
    }
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
