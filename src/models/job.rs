// Evaluation job data models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScoredResult;

/// Remote job names are limited to 63 characters by most managed platforms.
pub const MAX_JOB_NAME_LEN: usize = 63;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Expired,
}

impl JobState {
    /// Forward edges of the lifecycle. `Failed -> Pending` is deliberately
    /// absent: it is only reachable through an operator release.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Failed)
                | (Submitted, Running)
                | (Submitted, Succeeded)
                | (Submitted, Failed)
                | (Submitted, Expired)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Expired)
                // scoring failure on a finished job
                | (Succeeded, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Expired)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, JobState::Submitted | JobState::Running)
    }

    pub fn parse(value: &str) -> Option<JobState> {
        serde_json::from_value(serde_json::Value::String(value.to_lowercase())).ok()
    }
}

/// Why a job ended up `Failed`. Consumed by operator cleanup tooling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The deployed model itself crashed; candidate for takedown.
    AlgorithmError,
    ResourceExhausted,
    Timeout,
    InvalidInput,
    RemoteFailure,
    RemoteRejected,
    RemoteJobMissing,
    DatasetUnavailable,
    SchedulerUnreachable,
    MetricComputationError,
}

impl FailureCause {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCause::AlgorithmError => "algorithm_error",
            FailureCause::ResourceExhausted => "resource_exhausted",
            FailureCause::Timeout => "timeout",
            FailureCause::InvalidInput => "invalid_input",
            FailureCause::RemoteFailure => "remote_failure",
            FailureCause::RemoteRejected => "remote_rejected",
            FailureCause::RemoteJobMissing => "remote_job_missing",
            FailureCause::DatasetUnavailable => "dataset_unavailable",
            FailureCause::SchedulerUnreachable => "scheduler_unreachable",
            FailureCause::MetricComputationError => "metric_computation_error",
        }
    }
}

/// Everything needed to create a job record.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_name: String,
    pub model_id: u64,
    pub endpoint_name: String,
    pub dataset_id: String,
    pub instance_type: Option<String>,
    pub instance_count: Option<u32>,
}

impl JobSpec {
    pub fn new(model_id: u64, endpoint_name: &str, dataset_id: &str) -> Self {
        Self {
            job_name: job_name_for(model_id, dataset_id),
            model_id,
            endpoint_name: endpoint_name.to_string(),
            dataset_id: dataset_id.to_string(),
            instance_type: None,
            instance_count: None,
        }
    }
}

/// Deterministic correlation key so redelivered intake messages land on the
/// same job.
pub fn job_name_for(model_id: u64, dataset_id: &str) -> String {
    let raw = format!("eval-{}-{}", model_id, dataset_id).to_lowercase();
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    name.truncate(MAX_JOB_NAME_LEN);
    while name.ends_with('-') {
        name.pop();
    }
    name
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub job_name: String,
    pub model_id: u64,
    pub endpoint_name: String,
    pub dataset_id: String,
    pub state: JobState,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub instance_count: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last time `state` changed; drives the expiry window.
    pub state_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_status: Option<serde_json::Value>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Release generation; bumps every time a failed job is retried.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub output_location: Option<String>,
    #[serde(default)]
    pub failure_cause: Option<FailureCause>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scored_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<ScoredResult>,
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: String, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_name: spec.job_name,
            model_id: spec.model_id,
            endpoint_name: spec.endpoint_name,
            dataset_id: spec.dataset_id,
            state: JobState::Pending,
            instance_type: spec.instance_type,
            instance_count: spec.instance_count,
            created_at: now,
            submitted_at: None,
            last_polled_at: None,
            completed_at: None,
            state_changed_at: now,
            raw_status: None,
            retry_count: 0,
            next_attempt_at: None,
            attempt: 0,
            output_location: None,
            failure_cause: None,
            claimed_at: None,
            scored_at: None,
            result: None,
            reported_at: None,
        }
    }

    /// Name used for the remote submission of the current attempt.
    pub fn remote_job_name(&self) -> String {
        if self.attempt == 0 {
            return self.job_name.clone();
        }
        let suffix = format!("-r{}", self.attempt);
        let mut base = self.job_name.clone();
        base.truncate(MAX_JOB_NAME_LEN - suffix.len());
        format!("{}{}", base, suffix)
    }

    /// Succeeded, not yet handed to the computer and not yet scored.
    pub fn is_ready(&self) -> bool {
        self.state == JobState::Succeeded && self.claimed_at.is_none() && self.scored_at.is_none()
    }

    pub fn is_scored(&self) -> bool {
        self.scored_at.is_some()
    }

    pub fn backoff_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Structural checks a restored job must pass before it is trusted.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.job_name.is_empty() {
            return Err(format!("job {} has an empty job_name", self.id));
        }
        if self.state != JobState::Pending && self.submitted_at.is_none() && self.failure_cause.is_none() {
            return Err(format!("job {} is {:?} without submitted_at", self.id, self.state));
        }
        if self.state == JobState::Succeeded && self.output_location.is_none() {
            return Err(format!("job {} succeeded without output_location", self.id));
        }
        if self.state == JobState::Pending && self.output_location.is_some() {
            return Err(format!("job {} is pending but has output_location", self.id));
        }
        if self.scored_at.is_some() && self.result.is_none() {
            return Err(format!("job {} is scored without a result", self.id));
        }
        Ok(())
    }
}
