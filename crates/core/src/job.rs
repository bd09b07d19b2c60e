//! Job data model: the unit of work accepted from the Control Plane.

use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// A job variable, as supplied by the Control Plane. Sensitive values are
/// redacted from shipped logs and retained diagnostics (see
/// `runner_adapters::log::sanitizer`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub sensitive: bool,
}

/// A file to be materialized into the job's ephemeral workload as a
/// configuration blob entry keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFile {
    pub name: String,
    pub contents: String,
}

/// A job pulled from the queue: exactly one worker observes it, from
/// acceptance to terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Human-facing display number (distinct from `id`), used in workload
    /// identifiers and log messages.
    pub number: String,
    pub image: String,
    pub commands: Vec<String>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub files: Vec<JobFile>,
}

impl Job {
    /// `true` when this is the "no job available" sentinel returned by
    /// `GetPendingJob` (empty job id).
    pub fn is_empty_sentinel(&self) -> bool {
        self.id.is_empty()
    }
}

/// A single captured outcome variable (§4.5). Multi-line values keep
/// interior newlines with the trailing newline trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeVariable {
    pub key: String,
    pub value: String,
}

/// The terminal result of running a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failed,
    PodTimeout,
    Canceled,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Failed => "failed",
            OutcomeKind::PodTimeout => "pod_timeout",
            OutcomeKind::Canceled => "canceled",
        })
    }
}

/// Produced once per job, passed to every processor's `flush` and reported
/// to the Control Plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub kind: OutcomeKind,
    pub message: String,
    #[serde(default)]
    pub outcome_variables: Vec<OutcomeVariable>,
}

impl JobOutcome {
    pub fn success() -> Self {
        Self { kind: OutcomeKind::Success, message: String::new(), outcome_variables: Vec::new() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { kind: OutcomeKind::Failed, message: message.into(), outcome_variables: Vec::new() }
    }

    pub fn pod_timeout(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::PodTimeout,
            message: message.into(),
            outcome_variables: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

/// A clamped replica recommendation computed by one autoscaler tick (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaRecommendation {
    pub current: i32,
    pub recommended: i32,
    pub min: i32,
    pub max: i32,
}

impl ReplicaRecommendation {
    /// The recommendation clamped to `[min, max]`.
    pub fn clamped(&self) -> i32 {
        self.recommended.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sentinel_detects_missing_id() {
        let job = Job {
            id: JobId::default(),
            number: String::new(),
            image: String::new(),
            commands: vec![],
            variables: vec![],
            files: vec![],
        };
        assert!(job.is_empty_sentinel());
    }

    #[test]
    fn clamp_respects_bounds_both_directions() {
        let low = ReplicaRecommendation { current: 2, recommended: -5, min: 1, max: 10 };
        assert_eq!(low.clamped(), 1);
        let high = ReplicaRecommendation { current: 2, recommended: 99, min: 1, max: 10 };
        assert_eq!(high.clamped(), 10);
        let mid = ReplicaRecommendation { current: 2, recommended: 4, min: 1, max: 10 };
        assert_eq!(mid.clamped(), 4);
    }
}
