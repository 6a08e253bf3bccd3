use crate::config::StrategyParams;
use crate::dataset::{Example, Trainset};
use crate::evaluate::evaluate;
use crate::metric::Metric;
use crate::models::{CandidateScore, InstructionVariant, OptimizationReport, SearchRound};
use crate::strategies::Compiler;
use crate::strategies::bootstrap::{attach_demos, collect_traces};
use crate::strategies::sampler::{BasicSampler, InstructionSampler, rewriter};
use crate::{OptimizeError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use taskfn_core::Program;

/// Bootstraps demonstrations, then searches unit instructions against a held-out split.
pub struct InstructionSearch {
    sampler: Arc<dyn InstructionSampler>,
}

impl Default for InstructionSearch {
    fn default() -> Self {
        Self::new(Arc::new(BasicSampler::new()))
    }
}

impl std::fmt::Debug for InstructionSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionSearch")
            .field("sampler", &self.sampler.name())
            .finish()
    }
}

fn with_instructions(program: &dyn Program, instructions: &[String]) -> Result<Box<dyn Program>> {
    let mut compiled = program.clone_program();
    let units = compiled.units_mut();
    if units.len() != instructions.len() {
        return Err(OptimizeError::Unexpected(format!(
            "candidate has {} instructions for {} units",
            instructions.len(),
            units.len()
        )));
    }
    for (unit, text) in units.into_iter().zip(instructions) {
        unit.set_instructions(text.clone());
    }
    Ok(compiled)
}

impl InstructionSearch {
    pub fn new(sampler: Arc<dyn InstructionSampler>) -> Self {
        Self { sampler }
    }

    pub fn sampler(&self) -> &Arc<dyn InstructionSampler> {
        &self.sampler
    }

    /// Run the search and return the best program with the full report.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(metric = metric.name(), examples = trainset.len())
    )]
    pub async fn search(
        &self,
        program: &dyn Program,
        trainset: &[Example],
        metric: &dyn Metric,
        params: &StrategyParams,
    ) -> Result<(Box<dyn Program>, OptimizationReport)> {
        params.validate()?;
        let split =
            Trainset::new(trainset.to_vec()).holdout_split(params.holdout_ratio, params.seed)?;

        let (traced, used) = collect_traces(program, &split.train, metric, params).await?;
        let mut base = program.clone_program();
        attach_demos(base.as_mut(), traced, &used, &split.train, params);

        let initial: Vec<String> = base
            .units()
            .iter()
            .map(|u| u.schema().instructions.clone())
            .collect();
        let rewrite_unit = match base.units().first() {
            Some(unit) => Some(rewriter(unit.lm().clone())?.with_retry(unit.retry().clone())),
            None => None,
        };

        let mut report = OptimizationReport::new(initial.clone());
        let baseline = evaluate(base.as_ref(), &split.holdout, metric).await?;
        let mut best = InstructionVariant::new(initial, None, "initial");
        let mut best_score = baseline.mean_score;
        let mut no_improve_rounds = 0usize;
        report.baseline_score = best_score;
        report.best_score = best_score;

        for round_no in 0..params.max_iterations {
            let candidates = self
                .sampler
                .generate_variants(
                    &best,
                    rewrite_unit.as_ref(),
                    params.num_candidates,
                    params.seed.wrapping_add(round_no as u64),
                )
                .await?;
            if candidates.is_empty() {
                return Err(OptimizeError::Unexpected(
                    "sampler returned no candidates".to_string(),
                ));
            }

            let mut scored = Vec::with_capacity(candidates.len());
            for c in &candidates {
                let candidate = with_instructions(base.as_ref(), &c.instructions)?;
                let summary = evaluate(candidate.as_ref(), &split.holdout, metric).await?;
                scored.push(CandidateScore {
                    variant: c.id,
                    description: c.description.clone(),
                    score: summary.mean_score,
                });
            }

            let to_beat = best_score + params.min_improvement;
            let round = SearchRound::from_scores(round_no, scored, to_beat)
                .ok_or_else(|| OptimizeError::Unexpected("no scored candidates".to_string()))?;
            if round.improved {
                best = candidates
                    .iter()
                    .find(|c| c.id == round.leader)
                    .cloned()
                    .ok_or_else(|| OptimizeError::Unexpected("round leader vanished".to_string()))?;
                best_score = round.leader_score;
                no_improve_rounds = 0;
            } else {
                no_improve_rounds += 1;
            }
            tracing::debug!(
                round = round_no,
                leader_score = round.leader_score,
                improved = round.improved,
                "search round"
            );
            report.rounds.push(round);
            report.best_score = best_score;
            report.best_instructions = best.instructions.clone();

            if no_improve_rounds >= params.early_stop_rounds {
                break;
            }
        }

        let compiled = with_instructions(base.as_ref(), &best.instructions)?;
        Ok((compiled, report.finish()))
    }
}

#[async_trait]
impl Compiler for InstructionSearch {
    async fn compile(
        &self,
        program: &dyn Program,
        trainset: &[Example],
        metric: Arc<dyn Metric>,
        params: &StrategyParams,
    ) -> Result<Box<dyn Program>> {
        let (compiled, report) = self.search(program, trainset, metric.as_ref(), params).await?;
        tracing::info!(
            run_id = %report.run_id,
            baseline = report.baseline_score,
            best = report.best_score,
            rounds = report.rounds.len(),
            "instruction search finished"
        );
        Ok(compiled)
    }

    fn name(&self) -> &'static str {
        "mipro"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::ExactMatch;
    use serde_json::json;
    use taskfn_core::testing::FnModel;
    use taskfn_core::{
        CallerKind, FieldMap, LmParams, Prediction, SchemaBuilder, SharedLm, TaskUnit,
    };

    /// Answers correctly only when the instructions ask for the bare answer.
    fn picky_model() -> FnModel {
        FnModel::new(|req| {
            let mut fields = FieldMap::new();
            if req
                .schema
                .output_names()
                .iter()
                .any(|n| n == "rewritten_instructions")
            {
                fields.insert("rewritten_instructions".to_string(), json!("Rewritten."));
                return Ok(Prediction::new(fields));
            }
            let q = req.inputs.get("q").and_then(|v| v.as_str()).unwrap_or_default();
            let answer = if req.schema.instructions.contains("Answer only.") {
                q.to_uppercase()
            } else {
                "wrong".to_string()
            };
            fields.insert("a".to_string(), json!(answer));
            Ok(Prediction::new(fields))
        })
    }

    fn setup() -> (TaskUnit, Trainset) {
        let schema = SchemaBuilder::new(vec!["q".to_string()], vec!["a".to_string()])
            .build()
            .unwrap();
        let unit = TaskUnit::new(
            Arc::new(schema),
            CallerKind::Predict,
            SharedLm::new(Arc::new(picky_model()), LmParams::default()),
        );
        let records: Vec<FieldMap> = (0..10)
            .map(|i| {
                let mut m = FieldMap::new();
                m.insert("q".to_string(), json!(format!("item{i}")));
                m.insert("a".to_string(), json!(format!("ITEM{i}")));
                m
            })
            .collect();
        let set = Trainset::from_records(&records, &["q".to_string()]).unwrap();
        (unit, set)
    }

    #[tokio::test]
    async fn finds_instructions_that_beat_the_baseline() {
        let (unit, set) = setup();
        let params = StrategyParams {
            num_candidates: 4,
            ..StrategyParams::default()
        };
        let (compiled, report) = InstructionSearch::default()
            .search(&unit, &set.examples, &ExactMatch, &params)
            .await
            .unwrap();

        assert_eq!(report.baseline_score, 0.0);
        assert_eq!(report.best_score, 1.0);
        assert!(report.improved());
        assert!(report.rounds[0].improved);
        // One improving round, then early stop.
        assert_eq!(report.rounds.len(), 1 + params.early_stop_rounds);
        assert_eq!(report.rounds[0].candidates.len(), 4);
        assert_eq!(report.rounds[0].leader_score, 1.0);
        assert!(report.finished_at >= report.started_at);

        let units = compiled.units();
        let instructions = &units[0].schema().instructions;
        assert!(instructions.contains("Answer only."));
        assert_eq!(report.best_instructions[0], *instructions);
        assert!(!unit.schema().instructions.contains("Answer only."));
        // Nothing bootstrapped, so the train split fills the labeled slots.
        assert_eq!(compiled.units()[0].demos().len(), 4);
    }

    #[tokio::test]
    async fn keeps_initial_instructions_when_nothing_helps() {
        let (unit, set) = setup();
        let metric = crate::metric::FnMetric::new("zero", |_, _| 0.0);
        let params = StrategyParams {
            num_candidates: 2,
            early_stop_rounds: 2,
            ..StrategyParams::default()
        };
        let (compiled, report) = InstructionSearch::default()
            .search(&unit, &set.examples, &metric, &params)
            .await
            .unwrap();
        assert_eq!(report.rounds.len(), 2);
        assert!(!report.improved());
        assert_eq!(report.best_instructions, report.initial_instructions);
        assert_eq!(
            compiled.units()[0].schema().instructions,
            unit.schema().instructions
        );
    }

    #[tokio::test]
    async fn needs_enough_examples_to_split() {
        let (unit, set) = setup();
        let err = InstructionSearch::default()
            .compile(
                &unit,
                &set.examples[..1],
                Arc::new(ExactMatch),
                &StrategyParams::default(),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OptimizeError::InvalidArgument(_)));
    }
}
