//! Caller-facing entry point: turn positional values into a model-backed task call.

pub mod caller;
pub mod runtime;

pub use caller::{Args, CallOptions, Caller, task_name};
pub use runtime::{Runtime, RuntimeBuilder};
