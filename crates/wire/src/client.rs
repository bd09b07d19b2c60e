//! `ControlPlaneClient`: the trait every worker and the autoscaler consume,
//! plus the concrete HTTP-backed implementation.

use async_trait::async_trait;
use runner_core::{RunnerId, RunnerIdentity};
use thiserror::Error;

use crate::types::{LogBatch, OutcomeReport, PendingJobResponse};

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("control plane request failed: {0}")]
    Request(String),
    #[error("control plane rejected registration: {0}")]
    RegistrationRejected(String),
    #[error("control plane returned an unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// The minimum interface the core consumes from the Control Plane (spec §6).
/// `register`/`deregister` are called once each at process lifetime edges;
/// the rest are called per-poll-cycle or per-job.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    async fn register(&self, queue: Option<&str>) -> Result<RunnerIdentity, ControlPlaneError>;

    async fn deregister(&self, runner_id: &RunnerId) -> Result<(), ControlPlaneError>;

    async fn get_pending_job(
        &self,
        runner_id: &RunnerId,
        last_token: &str,
    ) -> Result<PendingJobResponse, ControlPlaneError>;

    async fn append_job_log(&self, batch: LogBatch) -> Result<(), ControlPlaneError>;

    async fn report_job_outcome(&self, report: OutcomeReport) -> Result<(), ControlPlaneError>;

    /// Returns the Control Plane's recommended replica count, unclamped —
    /// clamping to `[min, max]` is the autoscaler's responsibility (spec §4.9).
    async fn runner_scale(
        &self,
        runner_id: &RunnerId,
        current_replicas: i32,
        desired_concurrency: i32,
    ) -> Result<i32, ControlPlaneError>;
}

/// HTTP-backed Control Plane client. Each call is a single JSON POST naming
/// the call and its arguments — standing in for the real GraphQL client,
/// whose schema generation is out of scope (spec §1).
pub struct GraphqlControlPlaneClient {
    http: reqwest::Client,
    api_url: String,
    api_token: String,
    user_agent: String,
}

impl GraphqlControlPlaneClient {
    pub fn new(api_url: impl Into<String>, api_token: impl Into<String>, version: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            api_token: api_token.into(),
            user_agent: format!("runner-daemon-{version}"),
        }
    }

    async fn post<B: serde::Serialize + Sync, R: for<'de> serde::Deserialize<'de>>(
        &self,
        op: &str,
        body: &B,
    ) -> Result<R, ControlPlaneError> {
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_token)
            .header("User-Agent", &self.user_agent)
            .json(&serde_json::json!({ "operation": op, "input": body }))
            .send()
            .await
            .map_err(|e| ControlPlaneError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ControlPlaneError::Request(format!(
                "{op} returned status {}",
                resp.status()
            )));
        }

        resp.json::<R>()
            .await
            .map_err(|e| ControlPlaneError::UnexpectedResponse(e.to_string()))
    }
}

#[async_trait]
impl ControlPlaneClient for GraphqlControlPlaneClient {
    async fn register(&self, queue: Option<&str>) -> Result<RunnerIdentity, ControlPlaneError> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Resp {
            runner_id: String,
            token: String,
        }
        let resp: Resp = self.post("register", &serde_json::json!({ "queue": queue })).await?;
        Ok(RunnerIdentity { id: resp.runner_id.into(), token: resp.token.into() })
    }

    async fn deregister(&self, runner_id: &RunnerId) -> Result<(), ControlPlaneError> {
        let _: serde_json::Value =
            self.post("deregister", &serde_json::json!({ "runnerId": runner_id.as_str() })).await?;
        Ok(())
    }

    async fn get_pending_job(
        &self,
        runner_id: &RunnerId,
        last_token: &str,
    ) -> Result<PendingJobResponse, ControlPlaneError> {
        self.post(
            "getPendingJob",
            &serde_json::json!({ "runnerId": runner_id.as_str(), "lastToken": last_token }),
        )
        .await
    }

    async fn append_job_log(&self, batch: LogBatch) -> Result<(), ControlPlaneError> {
        let _: serde_json::Value = self.post("appendJobLog", &batch).await?;
        Ok(())
    }

    async fn report_job_outcome(&self, report: OutcomeReport) -> Result<(), ControlPlaneError> {
        let _: serde_json::Value = self.post("reportJobOutcome", &report).await?;
        Ok(())
    }

    async fn runner_scale(
        &self,
        runner_id: &RunnerId,
        current_replicas: i32,
        desired_concurrency: i32,
    ) -> Result<i32, ControlPlaneError> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Resp {
            recommended_replica_count: i32,
        }
        let resp: Resp = self
            .post(
                "runnerScale",
                &serde_json::json!({
                    "runnerId": runner_id.as_str(),
                    "currentReplicas": current_replicas,
                    "desiredConcurrency": desired_concurrency,
                }),
            )
            .await?;
        Ok(resp.recommended_replica_count)
    }
}
