//! Metrics endpoint (spec §6.5, SPEC_FULL §10.3): registers the four
//! `opslevel_runner_jobs_*` series with a constant `runner` label and serves
//! them at `GET /metrics` in Prometheus exposition format. Grounded in
//! `original_source/src/pkg/metrics.go` (direct `client_golang` use) for the
//! series themselves; the `axum` HTTP wiring follows the one pack repo with
//! an HTTP server dependency (`adamtc007-ob-poc`'s `axum`/`tower-http` stack).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};
use runner_core::OutcomeKind;
use runner_engine::JobMetricsSink;

const DURATION_BUCKETS: &[f64] = &[5.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1200.0];

pub struct PrometheusMetricsSink {
    registry: Registry,
    started: IntCounter,
    duration: Histogram,
    finished: CounterVec,
    processing: IntGauge,
}

impl PrometheusMetricsSink {
    // Allow expect here: opts/registration only fail on malformed metric names or
    // duplicate registration, both of which are fixed at compile time for this
    // constant series list (`original_source/src/pkg/metrics.go` has no
    // corresponding error path either).
    #[allow(clippy::expect_used)]
    pub fn new(runner_id: &str) -> Self {
        let registry = Registry::new();
        let const_labels = [("runner".to_string(), runner_id.to_string())].into_iter().collect();

        let started = IntCounter::with_opts(
            Opts::new("opslevel_runner_jobs_started", "Total jobs started")
                .const_labels(const_labels.clone()),
        )
        .expect("valid counter opts");

        let duration = Histogram::with_opts(
            HistogramOpts::new("opslevel_runner_jobs_duration", "Job duration in seconds")
                .const_labels(const_labels.clone())
                .buckets(DURATION_BUCKETS.to_vec()),
        )
        .expect("valid histogram opts");

        let finished = CounterVec::new(
            Opts::new("opslevel_runner_jobs_finished", "Total jobs finished by outcome")
                .const_labels(const_labels.clone()),
            &["outcome"],
        )
        .expect("valid counter-vec opts");

        let processing = IntGauge::with_opts(
            Opts::new("opslevel_runner_jobs_processing", "Jobs currently being processed")
                .const_labels(const_labels),
        )
        .expect("valid gauge opts");

        registry.register(Box::new(started.clone())).expect("register counter");
        registry.register(Box::new(duration.clone())).expect("register histogram");
        registry.register(Box::new(finished.clone())).expect("register counter-vec");
        registry.register(Box::new(processing.clone())).expect("register gauge");

        Self { registry, started, duration, finished, processing }
    }

    fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl JobMetricsSink for PrometheusMetricsSink {
    fn job_started(&self) {
        self.started.inc();
        self.processing.inc();
    }

    fn job_finished(&self, outcome: OutcomeKind, duration: Duration) {
        self.duration.observe(duration.as_secs_f64());
        self.finished.with_label_values(&[&outcome.to_string()]).inc();
        self.processing.dec();
    }
}

async fn metrics_handler(Extension(sink): Extension<Arc<PrometheusMetricsSink>>) -> Response {
    match sink.render() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response()
        }
    }
}

/// Binds and serves `GET /metrics` until the returned future is dropped or
/// the process exits; callers spawn this as a background task.
pub async fn serve(sink: Arc<PrometheusMetricsSink>, port: u16) -> std::io::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler)).layer(Extension(sink));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics endpoint listening");
    axum::serve(listener, app).await
}
