//! Container workload driver (spec §4.7): builds the per-job Kubernetes
//! manifest (configuration blob, disruption guard, pod with init+main
//! containers), waits for readiness, execs the job's commands, and tears
//! everything down on every exit path. Grounded in
//! `original_source/src/pkg/k8s.go`, generalized with the configuration
//! blob/disruption-budget/init-container shape described in the component
//! design, and in the pod-building idiom of
//! `examples/alfredjeanlab-oddjobs/crates/daemon/src/adapters/agent/k8s/pod.rs`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar,
    PodSecurityContext, PodSpec, ResourceRequirements, SecurityContext as K8sSecurityContext,
    Volume, VolumeMount,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{AttachParams, DeleteParams, PostParams};
use kube::{Api, Client};
use runner_core::{Clock, Job, JobOutcome, RunnerId, SystemClock, WorkloadConfig};
use thiserror::Error;

use crate::log::streamer::LogStreamer;

type Pod = k8s_openapi::api::core::v1::Pod;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("pod did not reach Running within the configured ceiling")]
    PodTimeout,
    #[error("pod ran to completion before becoming ready")]
    PodRanToCompletion,
}

/// The identifier and label set computed for one job's workload, exposed so
/// callers (and tests) can correlate a driver run with its cluster objects
/// without re-deriving the naming scheme.
#[derive(Debug, Clone)]
pub struct WorkloadHandle {
    pub identifier: String,
    pub labels: BTreeMap<String, String>,
}

impl WorkloadHandle {
    fn new<C: Clock>(runner_id: &RunnerId, job: &Job, clock: &C) -> Self {
        let identifier = format!("workload-{}-{}", job.number, clock.unix_seconds());
        let mut labels = BTreeMap::new();
        labels.insert("instance".to_string(), identifier.clone());
        labels.insert("managed-by".to_string(), format!("runner-{runner_id}"));
        Self { identifier, labels }
    }

    fn selector(&self) -> LabelSelector {
        LabelSelector { match_labels: Some(self.labels.clone().into_iter().collect()), ..Default::default() }
    }
}

/// What the driver runs for one job: build the manifest, wait, exec, tear
/// down. Abstracted so `runner-engine`'s worker loop can be tested against
/// `FakeWorkloadDriver` without a live cluster.
#[async_trait]
pub trait WorkloadDriver: Send + Sync {
    async fn run(&self, job: &Job, streamer: &LogStreamer) -> JobOutcome;
}

enum Created {
    ConfigMap(String),
    Pdb(String),
    Pod(String),
}

pub struct KubernetesWorkloadDriver<C: Clock = SystemClock> {
    client: Client,
    runner_id: RunnerId,
    config: WorkloadConfig,
    clock: C,
}

impl<C: Clock> KubernetesWorkloadDriver<C> {
    pub fn new(client: Client, runner_id: RunnerId, config: WorkloadConfig, clock: C) -> Self {
        Self { client, runner_id, config, clock }
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn pdbs(&self) -> Api<PodDisruptionBudget> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn work_dir(&self, job: &Job) -> String {
        format!("{}/{}", self.config.working_dir.trim_end_matches('/'), job.id.as_str())
    }

    fn build_config_map(&self, handle: &WorkloadHandle, job: &Job) -> ConfigMap {
        let data = job.files.iter().map(|f| (f.name.clone(), f.contents.clone())).collect();
        ConfigMap {
            metadata: meta(&handle.identifier, &self.config.namespace, &handle.labels),
            data: Some(data),
            immutable: Some(true),
            ..Default::default()
        }
    }

    fn build_pdb(&self, handle: &WorkloadHandle) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: meta(&handle.identifier, &self.config.namespace, &handle.labels),
            spec: Some(PodDisruptionBudgetSpec {
                max_unavailable: Some(IntOrString::Int(0)),
                selector: Some(handle.selector()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build_pod(&self, handle: &WorkloadHandle, job: &Job) -> Pod {
        let shared_volume = "runner-bin";
        let config_volume = "runner-config";

        let env: Vec<EnvVar> = job
            .variables
            .iter()
            .map(|v| EnvVar { name: v.key.clone(), value: Some(v.value.clone()), ..Default::default() })
            .collect();

        let init_container = Container {
            name: "copy-runner".to_string(),
            image: Some(self.config.runner_image.clone()),
            command: Some(vec![
                "cp".to_string(),
                "/usr/local/bin/runner-daemon".to_string(),
                "/shared/runner-daemon".to_string(),
            ]),
            volume_mounts: Some(vec![VolumeMount {
                name: shared_volume.to_string(),
                mount_path: "/shared".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let security_context = self.container_security_context();

        let main_container = Container {
            name: "job".to_string(),
            image: Some(job.image.clone()),
            image_pull_policy: Some(self.config.pull_policy.clone()),
            command: Some(vec![self.config.shell.clone()]),
            args: Some(vec!["-c".to_string(), format!("sleep {}", self.config.lifetime)]),
            env: Some(env),
            resources: Some(self.resource_requirements()),
            security_context,
            volume_mounts: Some(vec![
                VolumeMount {
                    name: shared_volume.to_string(),
                    mount_path: "/shared".to_string(),
                    ..Default::default()
                },
                VolumeMount {
                    name: config_volume.to_string(),
                    mount_path: "/config".to_string(),
                    read_only: Some(true),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let volumes = vec![
            Volume {
                name: shared_volume.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
            Volume {
                name: config_volume.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(handle.identifier.clone()),
                    default_mode: Some(0o755),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];

        let node_selector = if self.config.node_selector.is_empty() {
            None
        } else {
            Some(self.config.node_selector.clone())
        };

        let mut metadata = meta(&handle.identifier, &self.config.namespace, &handle.labels);
        if !self.config.annotations.is_empty() {
            metadata.annotations = Some(self.config.annotations.clone().into_iter().collect());
        }

        Pod {
            metadata,
            spec: Some(PodSpec {
                init_containers: Some(vec![init_container]),
                containers: vec![main_container],
                volumes: Some(volumes),
                restart_policy: Some("Never".to_string()),
                node_selector,
                service_account_name: self.config.service_account_name.clone(),
                termination_grace_period_seconds: Some(self.config.termination_grace_period_seconds),
                dns_policy: self.config.dns_policy.clone(),
                security_context: if self.config.agent_mode {
                    Some(PodSecurityContext { run_as_user: Some(0), ..Default::default() })
                } else {
                    None
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn container_security_context(&self) -> Option<K8sSecurityContext> {
        if self.config.agent_mode {
            return Some(K8sSecurityContext {
                privileged: Some(true),
                run_as_user: Some(0),
                ..Default::default()
            });
        }
        self.config
            .security_context
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn resource_requirements(&self) -> ResourceRequirements {
        let mut requests = BTreeMap::new();
        let mut limits = BTreeMap::new();
        if let Some(cpu) = self.config.resources.requests.cpu_millicores {
            requests.insert("cpu".to_string(), Quantity(format!("{cpu}m")));
        }
        if let Some(mem) = self.config.resources.requests.memory_mib {
            requests.insert("memory".to_string(), Quantity(format!("{mem}Mi")));
        }
        if let Some(cpu) = self.config.resources.limits.cpu_millicores {
            limits.insert("cpu".to_string(), Quantity(format!("{cpu}m")));
        }
        if let Some(mem) = self.config.resources.limits.memory_mib {
            limits.insert("memory".to_string(), Quantity(format!("{mem}Mi")));
        }
        ResourceRequirements {
            requests: (!requests.is_empty()).then_some(requests),
            limits: (!limits.is_empty()).then_some(limits),
            ..Default::default()
        }
    }

    async fn wait_for_running(&self, name: &str) -> Result<(), WorkloadError> {
        let ceiling = Duration::from_secs(self.config.pod_max_wait_seconds);
        let start = tokio::time::Instant::now();
        loop {
            let pod = self.pods().get(name).await?;
            match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
                Some("Running") => return Ok(()),
                Some("Failed") | Some("Succeeded") => return Err(WorkloadError::PodRanToCompletion),
                _ => {}
            }
            if start.elapsed() > ceiling {
                return Err(WorkloadError::PodTimeout);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Runs the job's commands over the exec attach stream, piping stdout and
    /// stderr into the streamer's safe buffers for shipping while also
    /// mirroring stderr into a local capture buffer, so a failing exec can
    /// report trimmed stderr alongside the channel error (spec §4.7 step 7,
    /// §7): `original_source/src/pkg/k8s.go`'s `bytes.Buffer` stderr capture.
    async fn exec(
        &self,
        name: &str,
        job: &Job,
        streamer: &LogStreamer,
    ) -> Result<(), (WorkloadError, String)> {
        let work_dir = self.work_dir(job);
        let mut lines = vec![format!("mkdir -p {work_dir}"), format!("cd {work_dir}"), "set -xv".to_string()];
        lines.extend(job.commands.iter().cloned());
        let script = lines.join(";\n");

        let command = vec![self.config.shell.clone(), "-e".to_string(), "-c".to_string(), script];
        let ap = AttachParams::default().container("job").stdout(true).stderr(true);
        let mut attached = match self.pods().exec(name, command, &ap).await {
            Ok(attached) => attached,
            Err(e) => return Err((WorkloadError::Kube(e), String::new())),
        };

        let stdout_sink = streamer.stdout_sink();
        let stderr_sink = streamer.stderr_sink();
        let stderr_capture = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let out_task = attached.stdout().map(|reader| {
            tokio::spawn(async move {
                let mut stream = tokio_util::io::ReaderStream::new(reader);
                while let Some(Ok(chunk)) = stream.next().await {
                    stdout_sink.append(&chunk);
                }
            })
        });
        let err_task = attached.stderr().map(|reader| {
            let stderr_capture = stderr_capture.clone();
            tokio::spawn(async move {
                let mut stream = tokio_util::io::ReaderStream::new(reader);
                while let Some(Ok(chunk)) = stream.next().await {
                    stderr_sink.append(&chunk);
                    stderr_capture.lock().extend_from_slice(&chunk);
                }
            })
        });

        let result = attached.join().await;
        if let Some(t) = out_task {
            let _ = t.await;
        }
        if let Some(t) = err_task {
            let _ = t.await;
        }

        let stderr_text = String::from_utf8_lossy(&stderr_capture.lock()).trim_end_matches('\n').to_string();
        result.map_err(|e| (WorkloadError::Kube(e), stderr_text))
    }

    async fn execute(
        &self,
        job: &Job,
        streamer: &LogStreamer,
        created: &mut Vec<Created>,
    ) -> JobOutcome {
        let handle = WorkloadHandle::new(&self.runner_id, job, &self.clock);

        let config_map = self.build_config_map(&handle, job);
        if let Err(e) = self.config_maps().create(&PostParams::default(), &config_map).await {
            return JobOutcome::failed(format!("failed to create configuration blob: {e}"));
        }
        created.push(Created::ConfigMap(handle.identifier.clone()));

        let pdb = self.build_pdb(&handle);
        if let Err(e) = self.pdbs().create(&PostParams::default(), &pdb).await {
            return JobOutcome::failed(format!("failed to create disruption budget: {e}"));
        }
        created.push(Created::Pdb(handle.identifier.clone()));

        let pod = self.build_pod(&handle, job);
        if let Err(e) = self.pods().create(&PostParams::default(), &pod).await {
            return JobOutcome::failed(format!("failed to create pod: {e}"));
        }
        created.push(Created::Pod(handle.identifier.clone()));

        match self.wait_for_running(&handle.identifier).await {
            Ok(()) => {}
            Err(WorkloadError::PodTimeout) => {
                return JobOutcome::pod_timeout(format!(
                    "pod {} was not ready within {}s",
                    handle.identifier, self.config.pod_max_wait_seconds
                ));
            }
            Err(e) => return JobOutcome::failed(e.to_string()),
        }

        match self.exec(&handle.identifier, job, streamer).await {
            Ok(()) => JobOutcome::success(),
            Err((e, stderr)) => {
                JobOutcome::failed(format!("pod execution failed REASON: {stderr} {e}"))
            }
        }
    }

    async fn teardown(&self, created: &[Created]) {
        let dp = DeleteParams::default();
        for resource in created.iter().rev() {
            let result = match resource {
                Created::ConfigMap(name) => self.config_maps().delete(name, &dp).await.map(drop),
                Created::Pdb(name) => self.pdbs().delete(name, &dp).await.map(drop),
                Created::Pod(name) => self.pods().delete(name, &dp).await.map(drop),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to tear down workload resource");
            }
        }
    }
}

#[async_trait]
impl<C: Clock> WorkloadDriver for KubernetesWorkloadDriver<C> {
    async fn run(&self, job: &Job, streamer: &LogStreamer) -> JobOutcome {
        let mut created = Vec::new();
        let outcome = self.execute(job, streamer, &mut created).await;
        self.teardown(&created).await;
        outcome
    }
}

fn meta(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
    k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone().into_iter().collect()),
        ..Default::default()
    }
}

/// Test double standing in for a live cluster: returns a configured outcome
/// without ever constructing a Kubernetes client, for `runner-engine`'s
/// worker-loop tests.
#[cfg(feature = "test-support")]
pub struct FakeWorkloadDriver {
    outcome: JobOutcome,
}

#[cfg(feature = "test-support")]
impl FakeWorkloadDriver {
    pub fn new(outcome: JobOutcome) -> Self {
        Self { outcome }
    }
}

#[cfg(feature = "test-support")]
#[async_trait]
impl WorkloadDriver for FakeWorkloadDriver {
    async fn run(&self, _job: &Job, _streamer: &LogStreamer) -> JobOutcome {
        self.outcome.clone()
    }
}
