use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use taskfn_core::FieldMap;

/// Scores a produced prediction against an expected example, in [0, 1] by convention.
#[async_trait]
pub trait Metric: Send + Sync {
    async fn score(&self, expected: &FieldMap, prediction: &Value) -> Result<f32>;
    fn name(&self) -> &'static str;
}

/// Field-wise exact match over the expected keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatch;

#[async_trait]
impl Metric for ExactMatch {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn score(&self, expected: &FieldMap, prediction: &Value) -> Result<f32> {
        Ok(exact_match(expected, prediction))
    }

    fn name(&self) -> &'static str {
        "exact_match"
    }
}

/// Fraction of expected fields the prediction reproduces exactly.
///
/// Non-object predictions are coerced first: arrays to `output_{i}`, scalars to `output`.
/// With nothing expected, only an empty prediction scores 1.0.
pub fn exact_match(expected: &FieldMap, prediction: &Value) -> f32 {
    if expected.is_empty() {
        return if is_empty(prediction) { 1.0 } else { 0.0 };
    }
    let coerced = coerce(prediction);
    let matched = expected
        .iter()
        .filter(|(k, v)| coerced.get(k.as_str()) == Some(*v))
        .count();
    matched as f32 / expected.len() as f32
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn coerce(prediction: &Value) -> FieldMap {
    match prediction {
        Value::Object(m) => m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("output_{i}"), v.clone()))
            .collect(),
        other => {
            let mut m = FieldMap::new();
            m.insert("output".to_string(), other.clone());
            m
        }
    }
}

type ScoreFn = dyn Fn(&FieldMap, &Value) -> f32 + Send + Sync;

/// Adapts a plain scoring function.
pub struct FnMetric {
    name: &'static str,
    f: Box<ScoreFn>,
}

impl FnMetric {
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&FieldMap, &Value) -> f32 + Send + Sync + 'static,
    {
        Self {
            name,
            f: Box::new(f),
        }
    }
}

impl std::fmt::Debug for FnMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMetric").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Metric for FnMetric {
    async fn score(&self, expected: &FieldMap, prediction: &Value) -> Result<f32> {
        Ok((self.f)(expected, prediction))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
