// Dataset registry data models
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Counts towards the leaderboard score.
    Scoring,
    Standard,
    /// Scored and reported like the others; the ingestion side keeps it off
    /// public views.
    Hidden,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStorage {
    /// Inputs handed to the remote batch-inference run.
    pub input_location: String,
    /// JSON lines of `{"id": .., "label": ..}`.
    pub labels_location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub task: String,
    pub access_type: AccessType,
    pub storage: DatasetStorage,
    /// Metric used for the primary `perf` number.
    pub perf_metric: String,
    #[serde(default)]
    pub delta_metrics: Vec<String>,
}

impl Dataset {
    /// Primary metric first, then the auxiliary ones without repeats.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names = vec![self.perf_metric.clone()];
        for name in &self.delta_metrics {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}
