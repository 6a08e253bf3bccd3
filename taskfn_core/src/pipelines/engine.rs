use crate::backend::TaskUnit;
use crate::models::{CallOutput, FieldMap, Prediction};
use crate::pipelines::models::{PipelineState, PipelineStep};
use crate::program::{Program, Trace, TraceEntry};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Ordered step registry. Clones share the same list.
#[derive(Clone, Default)]
pub struct PipelineBuilder {
    steps: Arc<Mutex<Vec<PipelineStep>>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(level = "debug", skip(self, unit))]
    pub fn register_step(&self, inputs: Vec<String>, outputs: Vec<String>, unit: TaskUnit) {
        self.steps
            .lock()
            .push(PipelineStep::new(inputs, outputs, unit));
    }

    /// Discard every registered step.
    pub fn reset(&self) {
        self.steps.lock().clear();
    }

    pub fn state(&self) -> PipelineState {
        if self.steps.lock().is_empty() {
            PipelineState::Empty
        } else {
            PipelineState::StepsRegistered
        }
    }

    pub fn len(&self) -> usize {
        self.steps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.lock().is_empty()
    }

    /// Snapshot the current steps into a runnable pipeline.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn assemble(&self) -> Result<Pipeline> {
        let steps = self.steps.lock().clone();
        if steps.is_empty() {
            return Err(Error::Pipeline("no steps in pipeline".to_string()));
        }
        Ok(Pipeline {
            steps,
            origin: Some(self.clone()),
        })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("steps", &self.len())
            .finish()
    }
}

/// Linear chain of task units threading one data map through every step.
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    origin: Option<PipelineBuilder>,
}

impl Pipeline {
    /// A pipeline not tied to any builder.
    pub fn from_steps(steps: Vec<PipelineStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::Pipeline("no steps in pipeline".to_string()));
        }
        Ok(Self {
            steps,
            origin: None,
        })
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Run and shape the final step's outputs like a direct call would.
    pub async fn call(&self, inputs: &FieldMap) -> Result<CallOutput> {
        let pred = self.forward(inputs).await?;
        let names = self.output_names();
        let values = pred
            .select(&names)
            .map_err(|field| Error::Pipeline(format!("output field '{field}' not produced")))?;
        Ok(CallOutput::from_values(values))
    }

    /// Run and return every value produced by any step.
    pub async fn run_all(&self, inputs: &FieldMap) -> Result<FieldMap> {
        let mut trace = Trace::new();
        let (_, produced) = self.execute(inputs, &mut trace).await?;
        Ok(produced)
    }

    #[tracing::instrument(level = "info", skip_all, fields(steps = self.steps.len()))]
    async fn execute(
        &self,
        inputs: &FieldMap,
        trace: &mut Trace,
    ) -> Result<(FieldMap, FieldMap)> {
        let mut data = inputs.clone();
        let mut produced = FieldMap::new();
        let mut last = FieldMap::new();

        for (i, step) in self.steps.iter().enumerate() {
            let mut step_inputs = FieldMap::new();
            for name in &step.inputs {
                let value = data.get(name).ok_or_else(|| {
                    Error::Pipeline(format!("Pipeline Step {i}: Missing input '{name}'"))
                })?;
                step_inputs.insert(name.clone(), value.clone());
            }

            let pred = step.unit.execute(&step_inputs).await?;

            last.clear();
            for name in &step.outputs {
                let value = pred.get(name).cloned().ok_or_else(|| {
                    Error::Pipeline(format!("Pipeline Step {i}: Output field '{name}' not found"))
                })?;
                data.insert(name.clone(), value.clone());
                produced.insert(name.clone(), value.clone());
                last.insert(name.clone(), value);
            }
            tracing::debug!(step = i, "pipeline step complete");
            trace.push(TraceEntry {
                unit_index: i,
                inputs: step_inputs,
                outputs: pred.fields,
            });
        }
        Ok((last, produced))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Program for Pipeline {
    async fn run(&self, inputs: &FieldMap, trace: &mut Trace) -> Result<Prediction> {
        let (last, _) = self.execute(inputs, trace).await?;
        Ok(Prediction::new(last))
    }

    /// Every field some step reads before any earlier step has produced it.
    fn input_names(&self) -> Vec<String> {
        let mut produced = HashSet::new();
        let mut external = Vec::new();
        for step in &self.steps {
            for name in &step.inputs {
                if !produced.contains(name) && !external.contains(name) {
                    external.push(name.clone());
                }
            }
            produced.extend(step.outputs.iter());
        }
        external
    }

    fn output_names(&self) -> Vec<String> {
        self.steps
            .last()
            .map(|s| s.outputs.clone())
            .unwrap_or_default()
    }

    fn units(&self) -> Vec<&TaskUnit> {
        self.steps.iter().map(|s| &s.unit).collect()
    }

    fn units_mut(&mut self) -> Vec<&mut TaskUnit> {
        self.steps.iter_mut().map(|s| &mut s.unit).collect()
    }

    fn clone_program(&self) -> Box<dyn Program> {
        Box::new(self.clone())
    }

    fn reset_registry(&self) {
        if let Some(origin) = &self.origin {
            origin.reset();
        }
    }
}
