// Metrics Computer: scores succeeded jobs on the worker pool

use super::work::score_job;
use crate::datasets::DatasetRegistry;
use crate::error::MetricError;
use crate::metrics::MetricRegistry;
use crate::models::{Job, ScoredResult, Settings};
use crate::process_manager::{MetricPool, WorkerMessage};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

pub type ScoreOutcome = Result<ScoredResult, MetricError>;

/// Owns the worker pool. Workers never touch the job store: finished results
/// are handed back to the caller through `collect_completed`.
pub struct MetricsComputer {
    pool: MetricPool<ScoreOutcome>,
    datasets: Arc<DatasetRegistry>,
    metrics: Arc<MetricRegistry>,
    default_instance_type: String,
}

impl MetricsComputer {
    pub fn new(
        handle: Handle,
        datasets: Arc<DatasetRegistry>,
        metrics: Arc<MetricRegistry>,
        settings: &Settings,
    ) -> Self {
        let workers = settings.worker_count();
        debug!("Metric pool sized to {} workers", workers);
        Self {
            pool: MetricPool::new(handle, workers),
            datasets,
            metrics,
            default_instance_type: settings.platform.instance_type.clone(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.pool.has_capacity()
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Queue `job` for scoring and return immediately.
    pub fn compute_one_async(&self, job: &Job) -> Result<(), MetricError> {
        let job = job.clone();
        let job_id = job.id.clone();
        let datasets = Arc::clone(&self.datasets);
        let metrics = Arc::clone(&self.metrics);
        let default_instance_type = self.default_instance_type.clone();

        self.pool
            .submit(job_id.clone(), move || {
                score_job(&job, &datasets, &metrics, &default_instance_type)
            })
            .map_err(|_| MetricError::Worker(format!("no free worker for job {}", job_id)))
    }

    /// Results finished since the last call, keyed by job id.
    pub fn collect_completed(&mut self) -> Vec<(String, ScoreOutcome)> {
        let messages = self.pool.try_collect();
        messages.into_iter().map(into_outcome).collect()
    }

    /// Wait up to `timeout` for in-flight work, e.g. during shutdown.
    pub fn drain(&mut self, timeout: Duration) -> Vec<(String, ScoreOutcome)> {
        let deadline = std::time::Instant::now() + timeout;
        let mut finished = Vec::new();
        while self.pool.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                warn!("{} metric tasks still running at shutdown", self.pool.in_flight());
                break;
            }
            finished.extend(self.pool.collect_timeout(remaining).into_iter().map(into_outcome));
        }
        finished
    }
}

fn into_outcome(message: WorkerMessage<ScoreOutcome>) -> (String, ScoreOutcome) {
    match message {
        WorkerMessage::Result { task_id, data } => (task_id, data),
        WorkerMessage::Error { task_id, message } => (task_id, Err(MetricError::Worker(message))),
    }
}
