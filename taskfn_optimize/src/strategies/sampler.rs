use crate::Result;
use crate::models::InstructionVariant;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use taskfn_core::{CallerKind, FieldMap, SchemaBuilder, SharedLm, TaskUnit};

const REWRITE_INSTRUCTIONS: &str = "Rewrite these instructions to be clearer and more specific, \
    preserving intent. Output only the rewritten instructions.";

/// Proposes instruction variants derived from a base.
#[async_trait]
pub trait InstructionSampler: Send + Sync {
    async fn generate_variants(
        &self,
        base: &InstructionVariant,
        rewriter: Option<&TaskUnit>,
        n: usize,
        seed: u64,
    ) -> Result<Vec<InstructionVariant>>;

    fn name(&self) -> &'static str;
}

/// Task unit that rewrites one instruction text through the backend.
pub fn rewriter(lm: SharedLm) -> Result<TaskUnit> {
    let schema = SchemaBuilder::new(
        vec!["instructions".to_string()],
        vec!["rewritten_instructions".to_string()],
    )
    .description(Some(REWRITE_INSTRUCTIONS.to_string()))
    .build()?;
    Ok(TaskUnit::new(Arc::new(schema), CallerKind::Predict, lm))
}

/// Deterministic textual mutations, with every fourth candidate rewritten by the backend.
#[derive(Debug, Default)]
pub struct BasicSampler;

impl BasicSampler {
    pub fn new() -> Self {
        Self
    }

    async fn rewrite(&self, text: &str, rewriter: Option<&TaskUnit>) -> String {
        let Some(unit) = rewriter else {
            return format!("{text}\n\nBe explicit.");
        };
        let mut inputs = FieldMap::new();
        inputs.insert("instructions".to_string(), Value::String(text.to_string()));
        match unit.execute(&inputs).await {
            Ok(pred) => match pred.get("rewritten_instructions") {
                Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
                _ => text.to_string(),
            },
            // A failed rewrite keeps the base text instead of failing the batch.
            Err(e) => {
                tracing::warn!(error = %e, "instruction rewrite failed");
                text.to_string()
            }
        }
    }
}

#[async_trait]
impl InstructionSampler for BasicSampler {
    #[tracing::instrument(level = "debug", skip_all, fields(n = n, seed = seed))]
    async fn generate_variants(
        &self,
        base: &InstructionVariant,
        rewriter: Option<&TaskUnit>,
        n: usize,
        seed: u64,
    ) -> Result<Vec<InstructionVariant>> {
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let mut instructions = Vec::with_capacity(base.instructions.len());
            for text in &base.instructions {
                let mutated = match i % 4 {
                    0 => format!("You are precise and concise.\n\n{text}"),
                    1 => format!(
                        "{text}\n\nConstraints:\n- Use short sentences.\n- Avoid extra commentary."
                    ),
                    2 => format!("{text}\n\nReturn format:\n- Answer only.\n- No preamble."),
                    _ => self.rewrite(text, rewriter).await,
                };
                instructions.push(mutated);
            }
            out.push(InstructionVariant::new(
                instructions,
                Some(base.id),
                format!("basic-mutation-{seed}-{i}"),
            ));
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "basic"
    }
}
