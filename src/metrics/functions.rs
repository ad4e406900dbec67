// Metric formulas. Every function here is pure: same inputs, same score.

use crate::error::MetricError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

fn check_lengths(predictions: &[Value], targets: &[Value]) -> Result<(), MetricError> {
    if targets.is_empty() {
        return Err(MetricError::Empty);
    }
    if predictions.len() != targets.len() {
        return Err(MetricError::LengthMismatch {
            predictions: predictions.len(),
            targets: targets.len(),
        });
    }
    Ok(())
}

/// Labels compare by their text so `"1"` and `1` are the same class.
fn label_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// A target may list several acceptable answers.
fn answers(target: &Value) -> Vec<String> {
    match target {
        Value::Array(items) => items.iter().map(label_text).collect(),
        other => vec![label_text(other)],
    }
}

/// Lowercase, drop punctuation and articles, collapse whitespace.
fn normalize_answer(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    lowered
        .split_whitespace()
        .filter(|token| !matches!(*token, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn accuracy(predictions: &[Value], targets: &[Value]) -> Result<f64, MetricError> {
    check_lengths(predictions, targets)?;
    let correct = predictions
        .iter()
        .zip(targets)
        .filter(|(p, t)| label_text(p) == label_text(t))
        .count();
    Ok(correct as f64 / targets.len() as f64)
}

/// Unweighted mean of per-class F1 over every class seen in either side.
pub fn macro_f1(predictions: &[Value], targets: &[Value]) -> Result<f64, MetricError> {
    check_lengths(predictions, targets)?;

    let mut counts: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();
    for (p, t) in predictions.iter().zip(targets) {
        let (p, t) = (label_text(p), label_text(t));
        if p == t {
            counts.entry(p).or_default().0 += 1;
        } else {
            counts.entry(p).or_default().1 += 1;
            counts.entry(t).or_default().2 += 1;
        }
    }

    let total: f64 = counts
        .values()
        .map(|&(tp, fp, fn_)| {
            let denom = 2 * tp + fp + fn_;
            if denom == 0 {
                0.0
            } else {
                (2 * tp) as f64 / denom as f64
            }
        })
        .sum();
    Ok(total / counts.len() as f64)
}

pub fn exact_match(predictions: &[Value], targets: &[Value]) -> Result<f64, MetricError> {
    check_lengths(predictions, targets)?;
    let hits = predictions
        .iter()
        .zip(targets)
        .filter(|(p, t)| {
            let guess = normalize_answer(&label_text(p));
            answers(t).iter().any(|a| normalize_answer(a) == guess)
        })
        .count();
    Ok(hits as f64 / targets.len() as f64)
}

fn token_overlap_f1(prediction: &str, answer: &str) -> f64 {
    let pred = normalize_answer(prediction);
    let gold = normalize_answer(answer);
    let pred_tokens: Vec<&str> = pred.split_whitespace().collect();
    let gold_tokens: Vec<&str> = gold.split_whitespace().collect();
    if pred_tokens.is_empty() || gold_tokens.is_empty() {
        return if pred_tokens == gold_tokens { 1.0 } else { 0.0 };
    }

    let mut gold_counts: HashMap<&str, usize> = HashMap::new();
    for token in &gold_tokens {
        *gold_counts.entry(token).or_default() += 1;
    }
    let mut common = 0usize;
    for token in &pred_tokens {
        if let Some(count) = gold_counts.get_mut(token) {
            if *count > 0 {
                *count -= 1;
                common += 1;
            }
        }
    }
    if common == 0 {
        return 0.0;
    }
    let precision = common as f64 / pred_tokens.len() as f64;
    let recall = common as f64 / gold_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// SQuAD-style token F1, best match over the acceptable answers.
pub fn token_f1(predictions: &[Value], targets: &[Value]) -> Result<f64, MetricError> {
    check_lengths(predictions, targets)?;
    let total: f64 = predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| {
            let guess = label_text(p);
            answers(t)
                .iter()
                .map(|a| token_overlap_f1(&guess, a))
                .fold(0.0, f64::max)
        })
        .sum();
    Ok(total / targets.len() as f64)
}
