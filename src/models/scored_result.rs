// Metric computation outputs
use super::dataset::AccessType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredResult {
    pub job_id: String,
    pub model_id: u64,
    pub dataset_id: String,
    pub perf_metric: String,
    pub perf: f64,
    pub perf_by_metric: BTreeMap<String, f64>,
    pub output_location: String,
    pub example_count: usize,
    pub computed_at: DateTime<Utc>,
}

/// Payload handed to the score ingestion service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreReport {
    pub job_id: String,
    pub model_id: u64,
    pub dataset_id: String,
    pub perf: f64,
    pub perf_by_metric: BTreeMap<String, f64>,
    pub timestamp: i64,
    /// Visibility of the dataset, for the ingestion side to enforce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<AccessType>,
}

impl From<&ScoredResult> for ScoreReport {
    fn from(result: &ScoredResult) -> Self {
        Self {
            job_id: result.job_id.clone(),
            model_id: result.model_id,
            dataset_id: result.dataset_id.clone(),
            perf: result.perf,
            perf_by_metric: result.perf_by_metric.clone(),
            timestamp: result.computed_at.timestamp(),
            access_type: None,
        }
    }
}
