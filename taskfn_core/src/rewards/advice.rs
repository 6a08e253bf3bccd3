use crate::Result;
use crate::backend::{SharedLm, TaskUnit};
use crate::models::{CallerKind, FieldMap};
use crate::rewards::tracker::AdviceExample;
use crate::schema::SchemaBuilder;
use crate::{Error, RetryPolicy};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Turns ranked positive/negative examples into short written advice.
#[derive(Debug, Clone)]
pub struct AdviceGenerator {
    unit: TaskUnit,
}

impl AdviceGenerator {
    pub fn new(lm: SharedLm) -> Result<Self> {
        let schema = SchemaBuilder::new(
            vec![
                "examples".to_string(),
                "example_types".to_string(),
                "impacts".to_string(),
            ],
            vec!["advice".to_string()],
        )
        .require_output(true)
        .build()?;
        Ok(Self {
            unit: TaskUnit::new(Arc::new(schema), CallerKind::ChainOfThought, lm),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.unit = self.unit.with_retry(retry);
        self
    }

    #[tracing::instrument(level = "info", skip_all, fields(examples = examples.len()))]
    pub async fn generate(&self, examples: &[AdviceExample]) -> Result<String> {
        let inputs = advice_inputs(examples);
        let pred = self.unit.execute(&inputs).await?;
        match pred.get("advice") {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(Error::MissingOutput {
                field: "advice".to_string(),
            }),
        }
    }
}

fn advice_inputs(examples: &[AdviceExample]) -> FieldMap {
    let lines: Vec<String> = examples
        .iter()
        .map(|ex| {
            format!(
                "- Example ({}, impact={:.2}): {}",
                ex.kind, ex.impact, ex.example
            )
        })
        .collect();
    let kinds: BTreeSet<&str> = examples.iter().map(|ex| ex.kind.as_str()).collect();
    let impacts: Vec<String> = examples.iter().map(|ex| format!("{:.2}", ex.impact)).collect();

    let mut inputs = FieldMap::new();
    inputs.insert("examples".to_string(), Value::String(lines.join("\n")));
    inputs.insert(
        "example_types".to_string(),
        Value::String(kinds.into_iter().collect::<Vec<_>>().join(", ")),
    );
    inputs.insert("impacts".to_string(), Value::String(impacts.join(", ")));
    inputs
}
