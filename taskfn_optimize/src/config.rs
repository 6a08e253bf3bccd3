use crate::{OptimizeError, Result};
use serde::{Deserialize, Serialize};

/// Knobs shared by every strategy; each reads the ones it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    pub max_bootstrapped_demos: usize,
    pub max_labeled_demos: usize,
    /// Minimum metric score for a trace to count as a success. `None`: any score above zero.
    pub metric_threshold: Option<f32>,
    /// Passes over the trainset while collecting traces.
    pub max_rounds: usize,
    pub num_candidates: usize,
    /// In (0, 1). Example: 0.2 means 80% train, 20% holdout.
    pub holdout_ratio: f32,
    pub max_iterations: usize,
    /// Stop after this many consecutive iterations without improvement.
    pub early_stop_rounds: usize,
    /// Minimum delta to count as improvement.
    pub min_improvement: f32,
    /// RNG seed for deterministic splits and sampling.
    pub seed: u64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            max_bootstrapped_demos: 4,
            max_labeled_demos: 4,
            metric_threshold: None,
            max_rounds: 1,
            num_candidates: 8,
            holdout_ratio: 0.2,
            max_iterations: 10,
            early_stop_rounds: 3,
            min_improvement: 1e-6,
            seed: 0,
        }
    }
}

impl StrategyParams {
    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(OptimizeError::InvalidConfig(
                "max_rounds must be > 0".to_string(),
            ));
        }
        if self.num_candidates == 0 {
            return Err(OptimizeError::InvalidConfig(
                "num_candidates must be > 0".to_string(),
            ));
        }
        if !(0.0 < self.holdout_ratio && self.holdout_ratio < 1.0) {
            return Err(OptimizeError::InvalidConfig(
                "holdout_ratio must be in (0,1)".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(OptimizeError::InvalidConfig(
                "max_iterations must be > 0".to_string(),
            ));
        }
        if self.early_stop_rounds == 0 {
            return Err(OptimizeError::InvalidConfig(
                "early_stop_rounds must be > 0".to_string(),
            ));
        }
        if self.min_improvement < 0.0 {
            return Err(OptimizeError::InvalidConfig(
                "min_improvement must be >= 0".to_string(),
            ));
        }
        if self.metric_threshold.is_some_and(|t| !t.is_finite()) {
            return Err(OptimizeError::InvalidConfig(
                "metric_threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a metric score counts as a successful trace.
    pub fn passes(&self, score: f32) -> bool {
        match self.metric_threshold {
            Some(t) => score >= t,
            None => score > 0.0,
        }
    }
}
