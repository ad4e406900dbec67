use crate::error::DatasetError;
use crate::file_manager::{read_json_file, read_json_lines};
use crate::models::Dataset;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// One ground-truth record.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub id: String,
    pub label: Value,
}

/// Normalise a record id so `1` and `"1"` join.
pub fn record_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read-only view over the registered datasets.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: BTreeMap<String, Dataset>,
}

impl DatasetRegistry {
    pub fn new(datasets: Vec<Dataset>) -> Self {
        Self {
            datasets: datasets.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    /// Load the registry exported to `datasets.json`.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let datasets: Vec<Dataset> = read_json_file(path).map_err(DatasetError::Unreadable)?;
        let mut names = std::collections::HashSet::new();
        for dataset in &datasets {
            if !names.insert(dataset.name.as_str()) {
                return Err(DatasetError::DuplicateName(dataset.name.clone()));
            }
        }
        Ok(Self::new(datasets))
    }

    pub fn get(&self, name: &str) -> Result<&Dataset, DatasetError> {
        self.datasets
            .get(name)
            .ok_or_else(|| DatasetError::NotFound(name.to_string()))
    }

    /// All datasets a model of `task` is evaluated on, in name order.
    pub fn for_task(&self, task: &str) -> Vec<&Dataset> {
        self.datasets.values().filter(|d| d.task == task).collect()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn input_location(&self, name: &str) -> Result<String, DatasetError> {
        Ok(self.get(name)?.storage.input_location.clone())
    }

    /// Ground truth for `name`, in file order. Duplicate ids are rejected.
    pub fn load_targets(&self, name: &str) -> Result<Vec<LabeledExample>, DatasetError> {
        let dataset = self.get(name)?;
        let ground_truth = |reason: String| DatasetError::GroundTruth {
            dataset: name.to_string(),
            reason,
        };

        let records = read_json_lines(&dataset.storage.labels_location).map_err(ground_truth)?;
        let mut seen = std::collections::HashSet::new();
        let mut examples = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let id = record
                .get("id")
                .and_then(record_id)
                .ok_or_else(|| ground_truth(format!("record {} has no id", index + 1)))?;
            let label = record
                .get("label")
                .cloned()
                .ok_or_else(|| ground_truth(format!("record {} has no label", id)))?;
            if !seen.insert(id.clone()) {
                return Err(ground_truth(format!("duplicate id {}", id)));
            }
            examples.push(LabeledExample { id, label });
        }
        Ok(examples)
    }
}
