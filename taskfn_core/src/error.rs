use crate::backend::BackendError;
use std::error::Error as StdError;

/// Common error type for `taskfn_core`.
///
/// Argument and structural problems (`Validation`, `MissingOutput`, `Pipeline`,
/// `Configuration`) are never retried. Execution failures carry the last backend
/// failure as their source.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("output field '{field}' not found in prediction result")]
    MissingOutput { field: String },

    #[error("execution failed after {attempts} attempts: {source}")]
    ExecutionFailed {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {context}")]
    Store {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "taskfn.error.store", skip(source))]
    pub fn store(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True for failures where repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ExecutionFailed { .. } => true,
            Error::Backend(e) => e.kind.is_transient(),
            Error::Store { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
