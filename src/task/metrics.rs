//! Evaluation metrics attached to a task result
//!
//! The backend scores each answer on a few named axes (clarity, accuracy,
//! conciseness, plus their average). Scores are shown at one decimal. An
//! `error` entry is diagnostic text from the evaluator and never a score.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric name reserved for evaluator diagnostics
pub const ERROR_METRIC: &str = "error";

/// Single metric value as sent by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Score(f64),
    Text(String),
    Other(serde_json::Value),
}

impl MetricValue {
    pub fn as_score(&self) -> Option<f64> {
        match self {
            MetricValue::Score(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }
}

/// Metrics in the order the backend sent them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(IndexMap<String, MetricValue>);

/// One metric ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMetric {
    pub label: String,
    pub value: String,
}

impl fmt::Display for RenderedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.value)
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: MetricValue) {
        self.0.insert(name.into(), value);
    }

    pub fn with_score(mut self, name: impl Into<String>, score: f64) -> Self {
        self.insert(name, MetricValue::Score(score));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Numeric score for a metric, never for `error`
    pub fn score(&self, name: &str) -> Option<f64> {
        if name == ERROR_METRIC {
            return None;
        }
        self.0.get(name).and_then(MetricValue::as_score)
    }

    /// Numeric scores in backend order
    pub fn scores(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0
            .iter()
            .filter(|(name, _)| name.as_str() != ERROR_METRIC)
            .filter_map(|(name, value)| value.as_score().map(|v| (name.as_str(), v)))
    }

    /// Evaluator diagnostic carried under `error`
    pub fn diagnostic(&self) -> Option<String> {
        match self.0.get(ERROR_METRIC)? {
            MetricValue::Text(text) => Some(text.clone()),
            MetricValue::Score(v) => Some(v.to_string()),
            MetricValue::Other(value) => Some(value.to_string()),
        }
    }

    /// Scores formatted at one decimal with a capitalized label
    pub fn render(&self) -> Vec<RenderedMetric> {
        self.scores()
            .map(|(name, value)| RenderedMetric {
                label: capitalize(name),
                value: format!("{:.1}", value),
            })
            .collect()
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Metrics {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_error_metric_excluded_from_scores() {
        let metrics = parse(r#"{"quality": 9.0, "error": "minor"}"#);

        let rendered = metrics.render();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].label, "Quality");
        assert_eq!(rendered[0].value, "9.0");
        assert_eq!(metrics.diagnostic().as_deref(), Some("minor"));
        assert!(metrics.score("error").is_none());
    }

    #[test]
    fn test_numeric_error_is_still_diagnostic() {
        let metrics = parse(r#"{"error": 1, "average": 0}"#);
        assert_eq!(metrics.render().len(), 1);
        assert_eq!(metrics.diagnostic().as_deref(), Some("1"));
    }

    #[test]
    fn test_render_one_decimal_in_backend_order() {
        let metrics = parse(
            r#"{"clarity": 8, "accuracy": 7.24, "conciseness": 9.96, "average": 8.403}"#,
        );
        let rendered: Vec<String> = metrics.render().iter().map(|m| m.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "Clarity: 8.0",
                "Accuracy: 7.2",
                "Conciseness: 10.0",
                "Average: 8.4",
            ]
        );
    }

    #[test]
    fn test_non_numeric_values_skipped() {
        let metrics = parse(r#"{"quality": "high", "speed": null, "depth": 6.5}"#);
        let scores: Vec<(&str, f64)> = metrics.scores().collect();
        assert_eq!(scores, vec![("depth", 6.5)]);
    }

    #[test]
    fn test_builder_and_lookup() {
        let metrics = Metrics::new().with_score("quality", 9.0);
        assert_eq!(metrics.score("quality"), Some(9.0));
        assert_eq!(metrics.len(), 1);
        assert!(metrics.diagnostic().is_none());
    }
}
