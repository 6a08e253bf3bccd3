pub mod engine;
pub mod models;

pub use engine::{Pipeline, PipelineBuilder};
pub use models::{PipelineState, PipelineStep};
