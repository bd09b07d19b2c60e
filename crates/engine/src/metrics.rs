//! Metrics seam (SPEC_FULL §10.3): the worker loop and autoscaler report
//! through this trait rather than depending on `prometheus` directly, so the
//! real registration lives in `runner-daemon` and engine unit tests can use
//! the no-op implementation below.

use std::time::Duration;

use runner_core::OutcomeKind;

/// Job-lifecycle counters/histograms the worker loop updates once per job.
/// Named after the four series in spec §6.5 (`opslevel_runner_jobs_*`).
pub trait JobMetricsSink: Send + Sync {
    fn job_started(&self);
    fn job_finished(&self, outcome: OutcomeKind, duration: Duration);
}

/// Discards everything; used by tests and as the default before a real
/// `PrometheusMetricsSink` (in `runner-daemon`) is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl JobMetricsSink for NoopMetricsSink {
    fn job_started(&self) {}
    fn job_finished(&self, _outcome: OutcomeKind, _duration: Duration) {}
}
