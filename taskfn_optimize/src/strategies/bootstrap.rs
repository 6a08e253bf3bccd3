use crate::Result;
use crate::config::StrategyParams;
use crate::dataset::Example;
use crate::metric::Metric;
use crate::strategies::Compiler;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use taskfn_core::{Demonstration, Program, Trace};

/// Runs the program over the trainset and keeps the unit traces of successful runs
/// as demonstrations, topped up with raw labeled examples.
#[derive(Debug, Default, Clone, Copy)]
pub struct BootstrapFewShot;

/// Per-unit demonstrations collected from successful runs, plus the example indices used.
pub(crate) async fn collect_traces(
    program: &dyn Program,
    trainset: &[Example],
    metric: &dyn Metric,
    params: &StrategyParams,
) -> Result<(Vec<Vec<Demonstration>>, HashSet<usize>)> {
    let n_units = program.units().len();
    let mut traced: Vec<Vec<Demonstration>> = vec![Vec::new(); n_units];
    let mut used = HashSet::new();
    let full = |traced: &[Vec<Demonstration>]| {
        traced
            .iter()
            .all(|d| d.len() >= params.max_bootstrapped_demos)
    };

    'rounds: for round in 0..params.max_rounds {
        for (i, ex) in trainset.iter().enumerate() {
            if full(&traced) {
                break 'rounds;
            }
            if used.contains(&i) {
                continue;
            }
            let mut trace = Trace::new();
            let pred = match program.run(&ex.inputs, &mut trace).await {
                Ok(pred) => pred,
                Err(e) => {
                    tracing::warn!(example = i, round, error = %e, "bootstrap run failed");
                    continue;
                }
            };
            let produced = Value::Object(pred.fields.into_iter().collect());
            let score = metric.score(&ex.expected, &produced).await?;
            if !params.passes(score) {
                continue;
            }
            used.insert(i);
            for entry in trace {
                let Some(slot) = traced.get_mut(entry.unit_index) else {
                    continue;
                };
                if slot.len() < params.max_bootstrapped_demos {
                    let mut fields = entry.inputs;
                    fields.extend(entry.outputs);
                    slot.push(Demonstration(fields));
                }
            }
        }
    }
    Ok((traced, used))
}

/// Traced demos first, then unused labeled examples up to `max_labeled_demos` in total.
pub(crate) fn attach_demos(
    compiled: &mut dyn Program,
    traced: Vec<Vec<Demonstration>>,
    used: &HashSet<usize>,
    trainset: &[Example],
    params: &StrategyParams,
) {
    for (unit, mut demos) in compiled.units_mut().into_iter().zip(traced) {
        let raw = params.max_labeled_demos.saturating_sub(demos.len());
        demos.extend(
            trainset
                .iter()
                .enumerate()
                .filter(|(i, _)| !used.contains(i))
                .take(raw)
                .map(|(_, ex)| ex.to_demo()),
        );
        unit.set_demos(demos);
    }
}

#[async_trait]
impl Compiler for BootstrapFewShot {
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(metric = metric.name(), examples = trainset.len())
    )]
    async fn compile(
        &self,
        program: &dyn Program,
        trainset: &[Example],
        metric: Arc<dyn Metric>,
        params: &StrategyParams,
    ) -> Result<Box<dyn Program>> {
        let (traced, used) = collect_traces(program, trainset, metric.as_ref(), params).await?;
        tracing::info!(successes = used.len(), "bootstrap traces collected");
        let mut compiled = program.clone_program();
        attach_demos(compiled.as_mut(), traced, &used, trainset, params);
        Ok(compiled)
    }

    fn name(&self) -> &'static str {
        "bootstrap_few_shot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Trainset;
    use crate::metric::ExactMatch;
    use serde_json::json;
    use taskfn_core::testing::FnModel;
    use taskfn_core::{
        BackendError, BackendErrorKind, CallerKind, FieldMap, LmParams, Pipeline, PipelineStep,
        Prediction, SchemaBuilder, SharedLm, TaskUnit,
    };

    /// Uppercases the single input into every output; refuses inputs containing "bad".
    fn upper_model() -> FnModel {
        FnModel::new(|req| {
            let input = req
                .inputs
                .values()
                .next()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let answer = if input.contains("bad") {
                "???".to_string()
            } else {
                input.to_uppercase()
            };
            let mut fields = FieldMap::new();
            for out in req.schema.output_names() {
                fields.insert(out, json!(answer));
            }
            Ok(Prediction::new(fields))
        })
    }

    fn unit(input: &str, output: &str, lm: &SharedLm) -> TaskUnit {
        let schema = SchemaBuilder::new(vec![input.to_string()], vec![output.to_string()])
            .build()
            .unwrap();
        TaskUnit::new(Arc::new(schema), CallerKind::Predict, lm.clone())
    }

    fn trainset(questions: &[&str]) -> Trainset {
        let records: Vec<FieldMap> = questions
            .iter()
            .map(|q| {
                let mut m = FieldMap::new();
                m.insert("q".to_string(), json!(q));
                m.insert("a".to_string(), json!(q.to_uppercase()));
                m
            })
            .collect();
        Trainset::from_records(&records, &["q".to_string()]).unwrap()
    }

    #[tokio::test]
    async fn keeps_successful_traces_then_fills_with_labels() {
        let lm = SharedLm::new(Arc::new(upper_model()), LmParams::default());
        let program = unit("q", "a", &lm);
        let set = trainset(&["a", "bad1", "b", "c", "d"]);
        let params = StrategyParams {
            max_bootstrapped_demos: 2,
            max_labeled_demos: 4,
            ..StrategyParams::default()
        };

        let compiled = BootstrapFewShot
            .compile(&program, &set.examples, Arc::new(ExactMatch), &params)
            .await
            .unwrap();
        let units = compiled.units();
        let demos = units[0].demos();
        let questions: Vec<&Value> = demos.iter().filter_map(|d| d.get("q")).collect();
        assert_eq!(questions, vec![&json!("a"), &json!("b"), &json!("bad1"), &json!("c")]);
        assert_eq!(demos[0].get("a"), Some(&json!("A")));
        // Raw demos carry the label, not the model's answer.
        assert_eq!(demos[2].get("a"), Some(&json!("BAD1")));
        assert!(program.demos().is_empty());
    }

    #[tokio::test]
    async fn failed_runs_are_skipped() {
        let lm = SharedLm::new(
            Arc::new(FnModel::new(|_| {
                Err(BackendError::new(BackendErrorKind::Auth, "denied"))
            })),
            LmParams::default(),
        );
        let program = unit("q", "a", &lm);
        let set = trainset(&["a", "b"]);
        let compiled = BootstrapFewShot
            .compile(&program, &set.examples, Arc::new(ExactMatch), &StrategyParams::default())
            .await
            .unwrap();
        // Nothing traced, so every slot goes to labeled examples.
        assert_eq!(compiled.units()[0].demos().len(), 2);
    }

    #[tokio::test]
    async fn pipeline_units_get_their_own_traces() {
        let lm = SharedLm::new(Arc::new(upper_model()), LmParams::default());
        let pipeline = Pipeline::from_steps(vec![
            PipelineStep::new(
                vec!["q".to_string()],
                vec!["mid".to_string()],
                unit("q", "mid", &lm),
            ),
            PipelineStep::new(
                vec!["mid".to_string()],
                vec!["a".to_string()],
                unit("mid", "a", &lm),
            ),
        ])
        .unwrap();
        let set = trainset(&["x", "y"]);
        let params = StrategyParams {
            max_bootstrapped_demos: 1,
            max_labeled_demos: 1,
            ..StrategyParams::default()
        };

        let compiled = BootstrapFewShot
            .compile(&pipeline, &set.examples, Arc::new(ExactMatch), &params)
            .await
            .unwrap();
        let units = compiled.units();
        assert_eq!(units[0].demos().len(), 1);
        assert_eq!(units[0].demos()[0].get("mid"), Some(&json!("X")));
        assert_eq!(units[1].demos()[0].get("mid"), Some(&json!("X")));
        assert_eq!(units[1].demos()[0].get("a"), Some(&json!("X")));
    }
}
