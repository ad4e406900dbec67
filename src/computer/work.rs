// The per-job scoring work unit, run on a metric worker thread

use crate::datasets::{record_id, DatasetRegistry};
use crate::error::MetricError;
use crate::file_manager::read_json_lines;
use crate::metrics::{job_signals, MetricRegistry};
use crate::models::{Job, ScoredResult};
use chrono::Utc;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

/// Fetch the job's raw predictions, join them to the dataset's ground truth
/// by id and evaluate the dataset's metrics.
pub fn score_job(
    job: &Job,
    datasets: &DatasetRegistry,
    metrics: &MetricRegistry,
    default_instance_type: &str,
) -> Result<ScoredResult, MetricError> {
    let output_location = job
        .output_location
        .clone()
        .ok_or_else(|| MetricError::MissingOutput(format!("job {} has no output location", job.id)))?;
    let dataset = datasets
        .get(&job.dataset_id)
        .map_err(|e| MetricError::MissingGroundTruth(e.to_string()))?;

    let records = read_json_lines(&output_location).map_err(MetricError::MissingOutput)?;
    let mut predictions = index_predictions(records)?;
    let targets = datasets
        .load_targets(&dataset.name)
        .map_err(|e| MetricError::MissingGroundTruth(e.to_string()))?;

    let mut preds = Vec::with_capacity(targets.len());
    let mut labels = Vec::with_capacity(targets.len());
    for target in targets {
        let pred = predictions
            .remove(&target.id)
            .ok_or_else(|| MetricError::MissingPrediction(target.id.clone()))?;
        preds.push(pred);
        labels.push(target.label);
    }
    if !predictions.is_empty() {
        debug!(
            "Job {}: ignoring {} predictions without ground truth",
            job.id,
            predictions.len()
        );
    }

    let mut perf_by_metric = metrics.evaluate(&dataset.metric_names(), &preds, &labels)?;
    let perf = perf_by_metric
        .get(&dataset.perf_metric)
        .copied()
        .ok_or_else(|| MetricError::UnknownMetric(dataset.perf_metric.clone()))?;
    for (name, value) in job_signals(job, preds.len(), default_instance_type) {
        perf_by_metric.entry(name).or_insert(value);
    }

    Ok(ScoredResult {
        job_id: job.id.clone(),
        model_id: job.model_id,
        dataset_id: job.dataset_id.clone(),
        perf_metric: dataset.perf_metric.clone(),
        perf,
        perf_by_metric,
        output_location,
        example_count: preds.len(),
        computed_at: Utc::now(),
    })
}

fn index_predictions(records: Vec<Value>) -> Result<HashMap<String, Value>, MetricError> {
    let mut by_id = HashMap::with_capacity(records.len());
    for (index, mut record) in records.into_iter().enumerate() {
        let id = record
            .get("id")
            .and_then(record_id)
            .ok_or_else(|| MetricError::Malformed(format!("prediction {} has no id", index + 1)))?;
        let pred = record
            .get_mut("pred")
            .map(Value::take)
            .ok_or_else(|| MetricError::Malformed(format!("prediction {} has no pred", id)))?;
        if by_id.insert(id.clone(), pred).is_some() {
            return Err(MetricError::Malformed(format!("duplicate prediction id {}", id)));
        }
    }
    Ok(by_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessType, Dataset, DatasetStorage, JobSpec};
    use chrono::Duration;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lines(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file
    }

    fn registry(labels: &NamedTempFile) -> DatasetRegistry {
        DatasetRegistry::new(vec![Dataset {
            name: "sst2".to_string(),
            task: "sentiment".to_string(),
            access_type: AccessType::Scoring,
            storage: DatasetStorage {
                input_location: "unused".to_string(),
                labels_location: labels.path().to_str().unwrap().to_string(),
            },
            perf_metric: "accuracy".to_string(),
            delta_metrics: vec!["macro_f1".to_string()],
        }])
    }

    fn finished_job(output: &NamedTempFile) -> Job {
        let now = Utc::now();
        let mut job = Job::new("job-1".to_string(), JobSpec::new(8, "ep-8", "sst2"), now);
        job.submitted_at = Some(now);
        job.completed_at = Some(now + Duration::seconds(2));
        job.output_location = Some(output.path().to_str().unwrap().to_string());
        job
    }

    #[test]
    fn test_joins_by_id_regardless_of_order() {
        let labels = lines(&[
            r#"{"id": 1, "label": "pos"}"#,
            r#"{"id": 2, "label": "neg"}"#,
            r#"{"id": 3, "label": "pos"}"#,
            r#"{"id": 4, "label": "neg"}"#,
        ]);
        let output = lines(&[
            r#"{"id": "4", "pred": "neg"}"#,
            r#"{"id": "3", "pred": "neg"}"#,
            r#"{"id": "2", "pred": "neg"}"#,
            r#"{"id": "1", "pred": "pos"}"#,
        ]);

        let result = score_job(&finished_job(&output), &registry(&labels), &MetricRegistry::default(), "ml.m5.xlarge")
            .unwrap();

        assert_eq!(result.perf, 0.75);
        assert_eq!(result.perf_metric, "accuracy");
        assert_eq!(result.example_count, 4);
        assert!(result.perf_by_metric.contains_key("macro_f1"));
        assert_eq!(result.perf_by_metric["examples_per_second"], 2.0);
        assert_eq!(result.perf_by_metric["instance_memory_gib"], 16.0);
    }

    #[test]
    fn test_missing_prediction_is_an_error() {
        let labels = lines(&[r#"{"id": 1, "label": "pos"}"#, r#"{"id": 2, "label": "neg"}"#]);
        let output = lines(&[r#"{"id": 1, "pred": "pos"}"#]);

        let result = score_job(&finished_job(&output), &registry(&labels), &MetricRegistry::default(), "ml.m5.xlarge");

        assert_eq!(result, Err(MetricError::MissingPrediction("2".to_string())));
    }

    #[test]
    fn test_malformed_output() {
        let labels = lines(&[r#"{"id": 1, "label": "pos"}"#]);
        let output = lines(&[r#"{"id": 1, "prediction": "pos"}"#]);

        let result = score_job(&finished_job(&output), &registry(&labels), &MetricRegistry::default(), "ml.m5.xlarge");

        assert!(matches!(result, Err(MetricError::Malformed(_))));
    }

    #[test]
    fn test_missing_ground_truth() {
        let labels = lines(&[r#"{"id": 1, "label": "pos"}"#]);
        let output = lines(&[r#"{"id": 1, "pred": "pos"}"#]);
        let registry = registry(&labels);
        let mut job = finished_job(&output);
        job.dataset_id = "retired".to_string();

        let result = score_job(&job, &registry, &MetricRegistry::default(), "ml.m5.xlarge");

        assert!(matches!(result, Err(MetricError::MissingGroundTruth(_))));
    }

    #[test]
    fn test_same_inputs_same_score() {
        let labels = lines(&[r#"{"id": 1, "label": "pos"}"#, r#"{"id": 2, "label": "neg"}"#]);
        let output = lines(&[r#"{"id": 1, "pred": "pos"}"#, r#"{"id": 2, "pred": "pos"}"#]);
        let registry = registry(&labels);
        let job = finished_job(&output);

        let first = score_job(&job, &registry, &MetricRegistry::default(), "ml.m5.xlarge").unwrap();
        let second = score_job(&job, &registry, &MetricRegistry::default(), "ml.m5.xlarge").unwrap();

        assert_eq!(first.perf, second.perf);
        assert_eq!(first.perf_by_metric, second.perf_by_metric);
    }
}
