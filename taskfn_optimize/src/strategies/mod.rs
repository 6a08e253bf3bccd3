//! Compilation strategies: each turns a program plus examples into an improved copy.

pub mod bootstrap;
pub mod instruction_search;
pub mod labeled;
pub mod sampler;

use crate::Result;
use crate::config::StrategyParams;
use crate::dataset::Example;
use crate::metric::Metric;
use async_trait::async_trait;
use std::sync::Arc;
use taskfn_core::Program;

pub use bootstrap::BootstrapFewShot;
pub use instruction_search::InstructionSearch;
pub use labeled::LabeledFewShot;
pub use sampler::{BasicSampler, InstructionSampler};

/// A named strategy. The input program is never modified; a compiled copy is returned.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(
        &self,
        program: &dyn Program,
        trainset: &[Example],
        metric: Arc<dyn Metric>,
        params: &StrategyParams,
    ) -> Result<Box<dyn Program>>;

    fn name(&self) -> &'static str;
}
