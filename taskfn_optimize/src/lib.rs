//! taskfn_optimize: compile taskfn programs into better ones from a training set.
//!
//! Strategies attach demonstrations or search over instructions; the manager picks
//! one by name and applies it with a metric.

#![forbid(unsafe_code)]

pub mod config;
pub mod dataset;
pub mod evaluate;
pub mod manager;
pub mod metric;
pub mod models;
pub mod strategies;

pub type Result<T> = std::result::Result<T, OptimizeError>;

#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    #[error(transparent)]
    Core(#[from] taskfn_core::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub use config::StrategyParams;
pub use dataset::{Example, Split, Trainset};
pub use evaluate::{EvalSummary, evaluate};
pub use manager::{DEFAULT_STRATEGY, OptimizationManager};
pub use metric::{ExactMatch, FnMetric, Metric, exact_match};
pub use models::{CandidateScore, InstructionVariant, OptimizationReport, SearchRound};
pub use strategies::{
    BasicSampler, BootstrapFewShot, Compiler, InstructionSampler, InstructionSearch,
    LabeledFewShot,
};
