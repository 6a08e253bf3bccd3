use crate::Result;
use crate::backend::TaskUnit;
use crate::models::{FieldMap, Prediction};
use async_trait::async_trait;

/// One task unit execution observed while running a program.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    /// Position of the unit in [`Program::units`].
    pub unit_index: usize,
    pub inputs: FieldMap,
    pub outputs: FieldMap,
}

pub type Trace = Vec<TraceEntry>;

/// Anything made of task units that maps named inputs to a prediction.
///
/// Implemented by [`TaskUnit`] and [`crate::Pipeline`]; optimization strategies
/// work against this trait.
#[async_trait]
pub trait Program: Send + Sync {
    /// Execute, appending one trace entry per unit execution.
    async fn run(&self, inputs: &FieldMap, trace: &mut Trace) -> Result<Prediction>;

    async fn forward(&self, inputs: &FieldMap) -> Result<Prediction> {
        let mut trace = Trace::new();
        self.run(inputs, &mut trace).await
    }

    fn input_names(&self) -> Vec<String>;

    fn output_names(&self) -> Vec<String>;

    fn units(&self) -> Vec<&TaskUnit>;

    fn units_mut(&mut self) -> Vec<&mut TaskUnit>;

    fn clone_program(&self) -> Box<dyn Program>;

    /// Clear any step registry this program was assembled from.
    fn reset_registry(&self) {}
}

#[async_trait]
impl Program for TaskUnit {
    async fn run(&self, inputs: &FieldMap, trace: &mut Trace) -> Result<Prediction> {
        let pred = self.execute(inputs).await?;
        let declared = self.schema().input_names();
        trace.push(TraceEntry {
            unit_index: 0,
            inputs: inputs
                .iter()
                .filter(|(k, _)| declared.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            outputs: pred.fields.clone(),
        });
        Ok(pred)
    }

    fn input_names(&self) -> Vec<String> {
        self.schema().input_names()
    }

    fn output_names(&self) -> Vec<String> {
        self.schema().output_names()
    }

    fn units(&self) -> Vec<&TaskUnit> {
        vec![self]
    }

    fn units_mut(&mut self) -> Vec<&mut TaskUnit> {
        vec![self]
    }

    fn clone_program(&self) -> Box<dyn Program> {
        Box::new(self.clone())
    }
}
