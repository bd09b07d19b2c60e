// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! runner-daemon: the long-running process entry point. Loads
//! configuration, registers with the Control Plane, wires the worker pool
//! and (optionally) the leader-elected autoscaler, serves `/metrics`, and
//! handles graceful shutdown on signal (spec §4.8-§4.9, §6, SPEC_FULL §10).

pub mod cli;
pub mod config;
pub mod metrics;
pub mod registration;
pub mod signal;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use runner_adapters::KubernetesWorkloadDriver;
use runner_core::{Job, SystemClock};
use runner_engine::{AutoscalerLimits, JobMetricsSink, LeaderElectionConfig, LeaseElector};
use runner_wire::{BrokerControlPlaneClient, ControlPlaneClient, GraphqlControlPlaneClient, InMemoryJobQueue, TracingErrorReporter};
use tokio_util::sync::CancellationToken;

use cli::Cli;
use config::{Mode, RunnerConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the Control Plane client for the configured mode. Broker mode
/// wraps the same HTTP client so `register`/`deregister`/`runner_scale`
/// still reach the real Control Plane, while log/outcome calls are
/// intercepted onto an in-process queue (spec §9, SPEC_FULL §6.4).
fn build_control_plane_client(config: &RunnerConfig) -> Arc<dyn ControlPlaneClient> {
    let inner =
        GraphqlControlPlaneClient::new(&config.control_plane.api_url, &config.control_plane.api_token, VERSION);
    match config.mode {
        Mode::ControlPlane => Arc::new(inner),
        Mode::Broker => Arc::new(BrokerControlPlaneClient::new(inner, Arc::new(InMemoryJobQueue::new()))),
    }
}

pub fn init_tracing(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match cli.log_format {
        cli::LogFormat::Json => subscriber.json().init(),
        cli::LogFormat::Text => subscriber.init(),
    }
}

/// Runs the daemon to completion (or the one-shot job-file mode), returning
/// the process exit code (spec §6: 0 on clean shutdown, non-zero on
/// configuration/registration failure or, in one-shot mode, a non-success
/// job outcome).
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = RunnerConfig::load(cli.config.as_deref(), &cli).context("loading configuration")?;
    let control_plane = build_control_plane_client(&config);

    let mirror_enabled = cli.log_level.eq_ignore_ascii_case("trace");

    if let Some(job_file) = &cli.job_file {
        return run_one_shot(job_file, &config, control_plane, mirror_enabled).await;
    }

    run_daemon(&config, control_plane, mirror_enabled).await
}

async fn run_one_shot(
    job_file: &std::path::Path,
    config: &RunnerConfig,
    control_plane: Arc<dyn ControlPlaneClient>,
    mirror_enabled: bool,
) -> anyhow::Result<i32> {
    let text = std::fs::read_to_string(job_file)
        .with_context(|| format!("reading job file {}", job_file.display()))?;
    let job: Job = serde_yaml::from_str(&text).context("parsing job file")?;

    let identity = registration::register(control_plane.as_ref(), None)
        .await
        .context("registering with the control plane")?;

    let kube_client =
        kube::Client::try_default().await.context("building kubernetes client")?;
    let driver = Arc::new(KubernetesWorkloadDriver::new(
        kube_client,
        identity.id.clone(),
        config.workload.clone(),
        SystemClock,
    ));

    let deps = runner_engine::WorkerDeps {
        client: control_plane.clone(),
        driver,
        metrics: Arc::new(runner_engine::NoopMetricsSink),
        error_reporter: Arc::new(TracingErrorReporter),
        runner_id: identity.id.clone(),
        clock: SystemClock,
        mirror_enabled,
        ship_max_bytes: 64 * 1024,
        ship_max_time: Duration::from_secs(5),
    };

    let outcome = runner_engine::run_job(0, job, &deps).await;
    registration::deregister(control_plane.as_ref(), &identity).await;

    Ok(if outcome.is_success() { 0 } else { 1 })
}

async fn run_daemon(
    config: &RunnerConfig,
    control_plane: Arc<dyn ControlPlaneClient>,
    mirror_enabled: bool,
) -> anyhow::Result<i32> {
    let identity = registration::register(control_plane.as_ref(), None)
        .await
        .context("registering with the control plane")?;

    let kube_client = kube::Client::try_default().await.context("building kubernetes client")?;

    let driver: Arc<dyn runner_adapters::WorkloadDriver> = Arc::new(KubernetesWorkloadDriver::new(
        kube_client.clone(),
        identity.id.clone(),
        config.workload.clone(),
        SystemClock,
    ));

    let metrics_sink = Arc::new(metrics::PrometheusMetricsSink::new(identity.id.as_str()));
    let metrics_port = config.metrics.port;
    let metrics_sink_for_server = metrics_sink.clone();
    let metrics_task = tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_sink_for_server, metrics_port).await {
            tracing::error!(error = %e, "metrics server exited");
        }
    });

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(signal::wait_and_cancel(signal_cancel));

    let metrics_trait_sink: Arc<dyn JobMetricsSink> = metrics_sink;
    let worker_deps = runner_engine::WorkerDeps {
        client: control_plane.clone(),
        driver,
        metrics: metrics_trait_sink,
        error_reporter: Arc::new(TracingErrorReporter),
        runner_id: identity.id.clone(),
        clock: SystemClock,
        mirror_enabled,
        ship_max_bytes: 64 * 1024,
        ship_max_time: Duration::from_secs(5),
    };

    let concurrency = runner_engine::clamp_concurrency(config.control_plane.concurrency);
    let pool_handle = runner_engine::spawn(
        control_plane.clone(),
        identity.id.clone(),
        concurrency,
        Duration::from_secs(config.control_plane.poll_interval_seconds),
        worker_deps,
        cancel.clone(),
    );

    let deployment_name =
        std::env::var("RUNNER_DEPLOYMENT_NAME").unwrap_or_else(|_| "runner-daemon".to_string());
    let autoscaler = Arc::new(runner_engine::Autoscaler::new(
        kube_client.clone(),
        &config.workload.namespace,
        deployment_name.clone(),
        control_plane.clone(),
        identity.id.clone(),
        config.control_plane.concurrency as i32,
        AutoscalerLimits { min_replicas: 1, max_replicas: 10, concurrency_factor: 1.0 },
        cancel.clone(),
    ));
    let elector = LeaseElector::new(
        kube_client,
        LeaderElectionConfig::new(&config.workload.namespace, deployment_name, identity.id.as_str()),
    );
    let election_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { elector.run(cancel, autoscaler).await }
    });

    pool_handle.join().await;
    cancel.cancel();
    let _ = election_task.await;
    signal_task.abort();
    metrics_task.abort();

    registration::deregister(control_plane.as_ref(), &identity).await;

    Ok(0)
}
