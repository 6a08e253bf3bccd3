use crate::Result;
use crate::config::StrategyParams;
use crate::dataset::Example;
use crate::metric::Metric;
use crate::strategies::Compiler;
use async_trait::async_trait;
use std::sync::Arc;
use taskfn_core::{Demonstration, Program};

/// Attaches the first `max_labeled_demos` examples, unchanged, to every unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct LabeledFewShot;

pub(crate) fn labeled_demos(trainset: &[Example], k: usize) -> Vec<Demonstration> {
    trainset.iter().take(k).map(Example::to_demo).collect()
}

#[async_trait]
impl Compiler for LabeledFewShot {
    #[tracing::instrument(level = "info", skip_all, fields(examples = trainset.len()))]
    async fn compile(
        &self,
        program: &dyn Program,
        trainset: &[Example],
        _metric: Arc<dyn Metric>,
        params: &StrategyParams,
    ) -> Result<Box<dyn Program>> {
        let demos = labeled_demos(trainset, params.max_labeled_demos);
        let mut compiled = program.clone_program();
        for unit in compiled.units_mut() {
            unit.set_demos(demos.clone());
        }
        tracing::debug!(demos = demos.len(), "labeled demos attached");
        Ok(compiled)
    }

    fn name(&self) -> &'static str {
        "labeled_few_shot"
    }
}
