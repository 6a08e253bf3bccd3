//! taskfn core: turn an ordinary function call into a language-model-backed task.
//!
//! Positional values go in, named outputs come out. Around the model call sits the
//! invocation pipeline: call-site inference, schema building, demonstrations, retry,
//! result logging and linear pipeline composition.

#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod demos;
pub mod error;
pub mod evaluation;
pub mod facade;
pub mod inference;
pub mod logging;
pub mod models;
pub mod pipelines;
pub mod program;
pub mod retry;
pub mod rewards;
pub mod schema;
pub mod telemetry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use backend::{
    BackendError, BackendErrorKind, LanguageModel, LmParams, PredictRequest, SharedLm, TaskUnit,
};
pub use config::Settings;
pub use demos::{DemoLoader, DemoSelector, Demonstration};
pub use error::{Error, Result};
pub use evaluation::Scorer;
pub use facade::{Args, CallOptions, Caller, Runtime, RuntimeBuilder, task_name};
pub use inference::{CallSite, ResolvedNames};
pub use logging::{JsonlStore, LogRecord, MemoryStore, RecordStore, ResultLogger, Section};
pub use models::{CallOutput, CallerKind, FieldMap, FieldType, Prediction};
pub use pipelines::{Pipeline, PipelineBuilder, PipelineState, PipelineStep};
pub use program::{Program, Trace, TraceEntry};
pub use retry::RetryPolicy;
pub use rewards::{AdviceExample, AdviceGenerator, AdviceKind, RewardEntry, RewardTracker};
pub use schema::{FieldSpec, SchemaBuilder, TaskSchema};
