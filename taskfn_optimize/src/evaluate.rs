use crate::dataset::Example;
use crate::metric::Metric;
use crate::{OptimizeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskfn_core::Program;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub mean_score: f32,
    pub per_example: Vec<f32>,
}

/// Run `program` over every example and score each prediction with `metric`.
///
/// Program failures propagate, and so does a metric that returns a non-finite score.
#[tracing::instrument(
    level = "info",
    skip_all,
    fields(metric = metric.name(), examples = examples.len())
)]
pub async fn evaluate(
    program: &dyn Program,
    examples: &[Example],
    metric: &dyn Metric,
) -> Result<EvalSummary> {
    if examples.is_empty() {
        return Err(OptimizeError::InvalidArgument(
            "dataset has no examples".to_string(),
        ));
    }

    let mut scores = Vec::with_capacity(examples.len());
    for (i, ex) in examples.iter().enumerate() {
        let pred = program.forward(&ex.inputs).await?;
        let produced = Value::Object(pred.fields.into_iter().collect());
        let score = metric.score(&ex.expected, &produced).await?;
        if !score.is_finite() {
            return Err(OptimizeError::Unexpected(format!(
                "metric '{}' scored example {i} as {score}",
                metric.name()
            )));
        }
        scores.push(score);
    }

    // Summed in f64 so a mean of finite scores stays finite.
    let total: f64 = scores.iter().copied().map(f64::from).sum();
    let mean_score = (total / scores.len() as f64) as f32;
    tracing::debug!(mean_score, "evaluation finished");
    Ok(EvalSummary {
        mean_score,
        per_example: scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Trainset;
    use crate::metric::{ExactMatch, FnMetric};
    use serde_json::json;
    use std::sync::Arc;
    use taskfn_core::testing::{EchoModel, FailingModel};
    use taskfn_core::{
        BackendErrorKind, CallerKind, FieldMap, LanguageModel, LmParams, SchemaBuilder, SharedLm,
        TaskUnit,
    };

    fn echo_unit(backend: Arc<dyn LanguageModel>) -> TaskUnit {
        let schema = SchemaBuilder::new(vec!["text".to_string()], vec!["label".to_string()])
            .build()
            .unwrap();
        TaskUnit::new(
            Arc::new(schema),
            CallerKind::Predict,
            SharedLm::new(backend, LmParams::default()),
        )
    }

    fn trainset(pairs: &[(&str, &str)]) -> Trainset {
        let records: Vec<FieldMap> = pairs
            .iter()
            .map(|(t, l)| {
                let mut m = FieldMap::new();
                m.insert("text".to_string(), json!(t));
                m.insert("label".to_string(), json!(l));
                m
            })
            .collect();
        Trainset::from_records(&records, &["text".to_string()]).unwrap()
    }

    #[tokio::test]
    async fn averages_per_example_scores() {
        let unit = echo_unit(Arc::new(EchoModel));
        // Echo copies the input, so only examples labeled with their own text match.
        let set = trainset(&[("a", "a"), ("b", "x"), ("c", "c"), ("d", "y")]);
        let summary = evaluate(&unit, &set.examples, &ExactMatch).await.unwrap();
        assert_eq!(summary.per_example, vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(summary.mean_score, 0.5);
    }

    #[tokio::test]
    async fn rejects_empty_and_non_finite() {
        let unit = echo_unit(Arc::new(EchoModel));
        assert!(evaluate(&unit, &[], &ExactMatch).await.is_err());

        let nan = FnMetric::new("nan", |_, _| f32::NAN);
        let set = trainset(&[("a", "a"), ("b", "b")]);
        let err = evaluate(&unit, &set.examples, &nan).await.unwrap_err();
        assert!(matches!(err, OptimizeError::Unexpected(_)));
        assert!(err.to_string().contains("metric 'nan' scored example 0"));
    }

    #[tokio::test]
    async fn propagates_program_failures() {
        let unit = echo_unit(Arc::new(FailingModel::new(BackendErrorKind::Auth)));
        let set = trainset(&[("a", "a")]);
        let err = evaluate(&unit, &set.examples, &ExactMatch).await.unwrap_err();
        assert!(matches!(err, OptimizeError::Core(_)));
    }
}
