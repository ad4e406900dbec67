use super::functions;
use crate::error::MetricError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Pure function from (predictions, targets) to a score.
pub type MetricFn = fn(&[Value], &[Value]) -> Result<f64, MetricError>;

/// Named metric functions, selected per dataset.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    metrics: BTreeMap<String, MetricFn>,
}

impl MetricRegistry {
    pub fn empty() -> Self {
        Self {
            metrics: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, metric: MetricFn) {
        self.metrics.insert(name.to_string(), metric);
    }

    pub fn get(&self, name: &str) -> Result<MetricFn, MetricError> {
        self.metrics
            .get(name)
            .copied()
            .ok_or_else(|| MetricError::UnknownMetric(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.keys().map(String::as_str).collect()
    }

    /// Evaluate each named metric; fails on the first unknown or failing one.
    pub fn evaluate(
        &self,
        names: &[String],
        predictions: &[Value],
        targets: &[Value],
    ) -> Result<BTreeMap<String, f64>, MetricError> {
        let mut scores = BTreeMap::new();
        for name in names {
            let metric = self.get(name)?;
            scores.insert(name.clone(), metric(predictions, targets)?);
        }
        Ok(scores)
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("accuracy", functions::accuracy);
        registry.register("macro_f1", functions::macro_f1);
        registry.register("exact_match", functions::exact_match);
        registry.register("token_f1", functions::token_f1);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_registry_contents() {
        let registry = MetricRegistry::default();
        assert_eq!(registry.names(), vec!["accuracy", "exact_match", "macro_f1", "token_f1"]);
    }

    #[test]
    fn test_evaluate_reports_unknown_metric() {
        let registry = MetricRegistry::default();
        let preds = vec![json!("a")];
        let result = registry.evaluate(&["bleu".to_string()], &preds, &preds);
        assert_eq!(result, Err(MetricError::UnknownMetric("bleu".to_string())));
    }

    #[test]
    fn test_evaluate_multiple() {
        let registry = MetricRegistry::default();
        let preds = vec![json!("a"), json!("b")];
        let gold = vec![json!("a"), json!("a")];
        let scores = registry
            .evaluate(&["accuracy".to_string(), "macro_f1".to_string()], &preds, &gold)
            .unwrap();
        assert_eq!(scores["accuracy"], 0.5);
        assert!(scores.contains_key("macro_f1"));
    }
}
