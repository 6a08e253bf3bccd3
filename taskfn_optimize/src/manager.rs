use crate::config::StrategyParams;
use crate::dataset::Trainset;
use crate::metric::{ExactMatch, Metric};
use crate::strategies::{BootstrapFewShot, Compiler, InstructionSearch, LabeledFewShot};
use crate::{OptimizeError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use taskfn_core::{FieldMap, Program};

pub const DEFAULT_STRATEGY: &str = "bootstrap_few_shot";

/// Selects a compilation strategy and metric, and applies them to programs.
pub struct OptimizationManager {
    strategy: String,
    metric: Arc<dyn Metric>,
    params: StrategyParams,
    registry: BTreeMap<String, Arc<dyn Compiler>>,
}

impl Default for OptimizationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OptimizationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationManager")
            .field("strategy", &self.strategy)
            .field("metric", &self.metric.name())
            .field("params", &self.params)
            .field("strategies", &self.strategies())
            .finish()
    }
}

impl OptimizationManager {
    /// Registry preloaded with the built-in strategies; exact-match metric.
    pub fn new() -> Self {
        let mut manager = Self {
            strategy: DEFAULT_STRATEGY.to_string(),
            metric: Arc::new(ExactMatch),
            params: StrategyParams::default(),
            registry: BTreeMap::new(),
        };
        manager.register_strategy(Arc::new(LabeledFewShot));
        manager.register_strategy(Arc::new(BootstrapFewShot));
        manager.register_strategy(Arc::new(InstructionSearch::default()));
        manager
    }

    /// Select strategy, metric and parameters for later `optimize` calls.
    ///
    /// `None` keeps the current metric. Strategy names are resolved at optimize time.
    #[tracing::instrument(level = "debug", skip(self, metric, params))]
    pub fn configure(
        &mut self,
        strategy: &str,
        metric: Option<Arc<dyn Metric>>,
        params: StrategyParams,
    ) -> Result<()> {
        params.validate()?;
        self.strategy = strategy.to_string();
        if let Some(metric) = metric {
            self.metric = metric;
        }
        self.params = params;
        Ok(())
    }

    /// Register under the compiler's own name, replacing any previous entry.
    pub fn register_strategy(&mut self, compiler: Arc<dyn Compiler>) {
        self.registry.insert(compiler.name().to_string(), compiler);
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn metric(&self) -> &Arc<dyn Metric> {
        &self.metric
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn strategies(&self) -> Vec<&str> {
        self.registry.keys().map(String::as_str).collect()
    }

    /// Compile `program` against `trainset` with the configured strategy.
    ///
    /// Records are split into inputs and expected outputs by the program's input names.
    /// The program's step registry, if any, is cleared afterwards, whether or not
    /// compilation succeeds.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(strategy = %self.strategy, examples = trainset.len())
    )]
    pub async fn optimize(
        &self,
        program: &dyn Program,
        trainset: &[FieldMap],
    ) -> Result<Box<dyn Program>> {
        let compiler = self
            .registry
            .get(&self.strategy)
            .ok_or_else(|| OptimizeError::StrategyNotFound(self.strategy.clone()))?;
        let examples = match Trainset::from_records(trainset, &program.input_names()) {
            Ok(examples) => examples,
            Err(e) => {
                program.reset_registry();
                return Err(e);
            }
        };
        let outcome = compiler
            .compile(program, &examples.examples, Arc::clone(&self.metric), &self.params)
            .await;
        program.reset_registry();
        let compiled = outcome?;
        tracing::info!(units = compiled.units().len(), "program compiled");
        Ok(compiled)
    }
}
