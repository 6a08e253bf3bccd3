use crate::backend::TaskUnit;
use serde::{Deserialize, Serialize};

/// One registered call: which fields it reads, which it writes, and the unit that runs it.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub unit: TaskUnit,
}

impl PipelineStep {
    pub fn new(inputs: Vec<String>, outputs: Vec<String>, unit: TaskUnit) -> Self {
        Self {
            inputs,
            outputs,
            unit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Empty,
    StepsRegistered,
}
