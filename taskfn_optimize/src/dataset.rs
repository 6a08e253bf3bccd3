use crate::{OptimizeError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use taskfn_core::{Demonstration, FieldMap};

/// A training record split into program inputs and expected outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub inputs: FieldMap,
    pub expected: FieldMap,
}

impl Example {
    /// Fields named in `input_names` become inputs; everything else is expected output.
    pub fn from_record(record: &FieldMap, input_names: &[String]) -> Self {
        let (inputs, expected) = record
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(k, _)| input_names.contains(k));
        Self { inputs, expected }
    }

    /// Inputs and expected outputs as one labeled demonstration.
    pub fn to_demo(&self) -> Demonstration {
        let mut fields = self.inputs.clone();
        fields.extend(self.expected.iter().map(|(k, v)| (k.clone(), v.clone())));
        Demonstration(fields)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trainset {
    pub examples: Vec<Example>,
}

impl Trainset {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples }
    }

    /// Split raw records by the program's input names.
    ///
    /// Every record must carry every input.
    #[tracing::instrument(level = "debug", skip(records), fields(records = records.len()))]
    pub fn from_records(records: &[FieldMap], input_names: &[String]) -> Result<Self> {
        let mut examples = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if let Some(missing) = input_names.iter().find(|n| !record.contains_key(*n)) {
                return Err(OptimizeError::InvalidArgument(format!(
                    "example {i} is missing input '{missing}'"
                )));
            }
            examples.push(Example::from_record(record, input_names));
        }
        Ok(Self { examples })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Set aside a seeded random sample of examples for scoring instruction candidates.
    ///
    /// Both halves keep the original example order, and neither half is ever empty.
    #[tracing::instrument(level = "debug", skip(self), fields(examples = self.examples.len()))]
    pub fn holdout_split(&self, holdout_ratio: f32, seed: u64) -> Result<Split> {
        if !(holdout_ratio > 0.0 && holdout_ratio < 1.0) {
            return Err(OptimizeError::InvalidArgument(format!(
                "holdout ratio {holdout_ratio} is outside (0, 1)"
            )));
        }
        let n = self.examples.len();
        if n < 2 {
            return Err(OptimizeError::InvalidArgument(format!(
                "need at least 2 examples to hold some out, got {n}"
            )));
        }

        let wanted = ((n as f32) * holdout_ratio).round() as usize;
        let mut rng = StdRng::seed_from_u64(seed);
        let held: HashSet<usize> = sample(&mut rng, n, wanted.clamp(1, n - 1))
            .into_iter()
            .collect();

        let mut split = Split::default();
        for (i, example) in self.examples.iter().enumerate() {
            if held.contains(&i) {
                split.holdout.push(example.clone());
            } else {
                split.train.push(example.clone());
            }
        }
        Ok(split)
    }
}

/// Examples used to bootstrap demonstrations, and the ones kept back to score candidates.
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub train: Vec<Example>,
    pub holdout: Vec<Example>,
}
