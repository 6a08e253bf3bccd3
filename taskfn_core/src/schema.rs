use crate::models::FieldType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Name of the rationale field requested from the backend in reasoning mode.
pub const RATIONALE_FIELD: &str = "reasoning";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub ty: Option<FieldType>,
    /// Human-readable purpose shown to the backend.
    pub desc: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: Option<FieldType>) -> Self {
        let name = name.into();
        let desc = name.replace('_', " ");
        Self { name, ty, desc }
    }
}

/// Declarative contract of a task: ordered inputs, ordered outputs, instructions.
///
/// Built once and never mutated; variants are derived with `with_*` methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskSchema {
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
    pub instructions: String,
}

impl TaskSchema {
    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|f| f.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|f| f.name.clone()).collect()
    }

    /// Copy of this schema with different instructions.
    pub fn with_instructions(&self, instructions: impl Into<String>) -> Self {
        Self {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            instructions: instructions.into(),
        }
    }

    /// Copy of this schema that also asks for a leading rationale output.
    ///
    /// No-op when a field with that name is already declared.
    pub fn with_rationale(&self) -> Self {
        if self.outputs.iter().any(|f| f.name == RATIONALE_FIELD) {
            return self.clone();
        }
        let mut outputs = Vec::with_capacity(self.outputs.len() + 1);
        outputs.push(FieldSpec {
            name: RATIONALE_FIELD.to_string(),
            ty: Some(FieldType::Text),
            desc: "think step by step in order to produce the outputs".to_string(),
        });
        outputs.extend(self.outputs.iter().cloned());
        Self {
            inputs: self.inputs.clone(),
            outputs,
            instructions: self.instructions.clone(),
        }
    }
}

/// Builds a [`TaskSchema`] from names, optional types and an optional description.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    inputs: Vec<String>,
    outputs: Vec<String>,
    input_types: BTreeMap<String, FieldType>,
    output_types: BTreeMap<String, FieldType>,
    description: Option<String>,
    require_output: bool,
}

impl SchemaBuilder {
    pub fn new(inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            inputs,
            outputs,
            ..Self::default()
        }
    }

    pub fn input_types(mut self, types: BTreeMap<String, FieldType>) -> Self {
        self.input_types = types;
        self
    }

    pub fn output_types(mut self, types: BTreeMap<String, FieldType>) -> Self {
        self.output_types = types;
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    /// Reject schemas without outputs (for calling conventions that return a value).
    pub fn require_output(mut self, require: bool) -> Self {
        self.require_output = require;
        self
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn build(self) -> Result<TaskSchema> {
        ensure_unique("input", &self.inputs)?;
        ensure_unique("output", &self.outputs)?;
        if self.require_output && self.outputs.is_empty() {
            return Err(Error::Validation(
                "at least one output field is required".to_string(),
            ));
        }

        let instructions = self
            .description
            .unwrap_or_else(|| default_instructions(&self.inputs, &self.outputs));
        let inputs = self
            .inputs
            .iter()
            .map(|n| FieldSpec::new(n, self.input_types.get(n).cloned()))
            .collect();
        let outputs = self
            .outputs
            .iter()
            .map(|n| FieldSpec::new(n, self.output_types.get(n).cloned()))
            .collect();

        Ok(TaskSchema {
            inputs,
            outputs,
            instructions,
        })
    }
}

fn ensure_unique(kind: &str, names: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for n in names {
        if n.trim().is_empty() {
            return Err(Error::Validation(format!("{kind} field name is empty")));
        }
        if !seen.insert(n.as_str()) {
            return Err(Error::Validation(format!(
                "duplicate {kind} field name: {n}"
            )));
        }
    }
    Ok(())
}

fn default_instructions(inputs: &[String], outputs: &[String]) -> String {
    match (inputs.is_empty(), outputs.is_empty()) {
        (false, false) => format!(
            "Given {}, produce {}.",
            inputs.join(", "),
            outputs.join(", ")
        ),
        (false, true) => format!("Given {}.", inputs.join(", ")),
        (true, false) => format!("Produce {}.", outputs.join(", ")),
        (true, true) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builds_fields_in_order_with_default_description() {
        let schema = SchemaBuilder::new(names(&["question", "context"]), names(&["answer"]))
            .build()
            .unwrap();
        assert_eq!(schema.input_names(), names(&["question", "context"]));
        assert_eq!(schema.output_names(), names(&["answer"]));
        assert_eq!(schema.instructions, "Given question, context, produce answer.");
        assert_eq!(schema.inputs[0].desc, "question");
    }

    #[test]
    fn explicit_description_and_types() {
        let mut out_types = BTreeMap::new();
        out_types.insert("count".to_string(), FieldType::Integer);
        let schema = SchemaBuilder::new(names(&["text"]), names(&["count"]))
            .output_types(out_types)
            .description(Some("Count the words".to_string()))
            .build()
            .unwrap();
        assert_eq!(schema.instructions, "Count the words");
        assert_eq!(schema.outputs[0].ty, Some(FieldType::Integer));
        assert_eq!(schema.inputs[0].ty, None);
    }

    #[test]
    fn name_may_appear_on_both_sides() {
        let schema = SchemaBuilder::new(names(&["draft"]), names(&["draft"]))
            .build()
            .unwrap();
        assert_eq!(schema.input_names(), schema.output_names());
    }

    #[test]
    fn rejects_duplicates() {
        let err = SchemaBuilder::new(names(&["a", "a"]), names(&["b"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn zero_outputs_only_rejected_when_required() {
        assert!(SchemaBuilder::new(names(&["a"]), vec![]).build().is_ok());
        let err = SchemaBuilder::new(names(&["a"]), vec![])
            .require_output(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rationale_is_prepended_once() {
        let schema = SchemaBuilder::new(names(&["q"]), names(&["a"]))
            .build()
            .unwrap();
        let cot = schema.with_rationale().with_rationale();
        assert_eq!(cot.output_names(), names(&[RATIONALE_FIELD, "a"]));
    }
}
