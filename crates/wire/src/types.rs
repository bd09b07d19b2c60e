//! Wire-level request/response shapes for the six Control Plane calls named
//! in spec §6. Deliberately not a full GraphQL schema — the GraphQL/REST
//! surface beyond these calls is out of scope (spec §1).

use runner_core::{Job, JobId, JobOutcome, RunnerId};
use serde::{Deserialize, Serialize};

/// Response to `GetPendingJob`. An empty `job.id` (or `job: None`) is the
/// "no job available" sentinel (spec §4.8, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingJobResponse {
    pub job: Option<Job>,
    pub next_token: String,
}

impl PendingJobResponse {
    pub fn empty(next_token: impl Into<String>) -> Self {
        Self { job: None, next_token: next_token.into() }
    }
}

/// One batch of base64-encoded log lines shipped to `AppendJobLog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub runner_id: RunnerId,
    pub runner_job_id: JobId,
    /// RFC 3339 timestamp of submission.
    pub sent_at: String,
    pub base64_lines: Vec<String>,
}

/// Payload for `ReportJobOutcome`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReport {
    pub runner_id: RunnerId,
    pub runner_job_id: JobId,
    pub outcome: JobOutcome,
}

/// Auxiliary fields merged additively into a `Job` when it arrives via
/// broker mode instead of `GetPendingJob` (spec §9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerJobFields {
    #[serde(rename = "runner-job-id")]
    pub runner_job_id: Option<String>,
    #[serde(rename = "runner-image")]
    pub runner_image: Option<String>,
    #[serde(rename = "runner-commands")]
    pub runner_commands: Option<Vec<String>>,
    #[serde(rename = "runner-extra-vars")]
    pub runner_extra_vars: Option<Vec<runner_core::Variable>>,
    #[serde(rename = "runner-files")]
    pub runner_files: Option<Vec<runner_core::JobFile>>,
}

impl BrokerJobFields {
    /// Merge these fields additively onto `job`: present fields override or
    /// extend, absent fields leave `job` untouched.
    pub fn merge_into(self, mut job: Job) -> Job {
        if let Some(id) = self.runner_job_id {
            job.id = id.into();
        }
        if let Some(image) = self.runner_image {
            job.image = image;
        }
        if let Some(mut commands) = self.runner_commands {
            job.commands.append(&mut commands);
        }
        if let Some(mut vars) = self.runner_extra_vars {
            job.variables.append(&mut vars);
        }
        if let Some(mut files) = self.runner_files {
            job.files.append(&mut files);
        }
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_additive_not_replacing() {
        let job = Job {
            id: "base".into(),
            number: "1".to_string(),
            image: "alpine".to_string(),
            commands: vec!["echo hi".to_string()],
            variables: vec![],
            files: vec![],
        };
        let fields = BrokerJobFields {
            runner_job_id: Some("override-id".to_string()),
            runner_image: None,
            runner_commands: Some(vec!["echo bye".to_string()]),
            runner_extra_vars: None,
            runner_files: None,
        };
        let merged = fields.merge_into(job);
        assert_eq!(merged.id.as_str(), "override-id");
        assert_eq!(merged.image, "alpine"); // untouched
        assert_eq!(merged.commands, vec!["echo hi", "echo bye"]);
    }

    #[test]
    fn empty_pending_job_is_the_none_sentinel() {
        let resp = PendingJobResponse::empty("tok-2");
        assert!(resp.job.is_none());
        assert_eq!(resp.next_token, "tok-2");
    }
}
