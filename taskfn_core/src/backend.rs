//! Model backend seam and the task unit that binds a schema to it.

use crate::demos::Demonstration;
use crate::models::{CallerKind, FieldMap, Prediction};
use crate::retry::RetryPolicy;
use crate::schema::TaskSchema;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    RateLimited,
    Timeout,
    Unavailable,
    /// The backend answered but the response could not be parsed.
    Malformed,
    Auth,
    InvalidRequest,
    Other,
}

impl BackendErrorKind {
    pub fn is_transient(self) -> bool {
        !matches!(self, BackendErrorKind::Auth | BackendErrorKind::InvalidRequest)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Tunable backend parameters. `None` leaves the backend default in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LmParams {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl LmParams {
    /// Overlay every value set in `other` on top of `self`.
    pub fn merged(&self, other: &LmParams) -> LmParams {
        let mut out = self.clone();
        if other.model.is_some() {
            out.model = other.model.clone();
        }
        if other.temperature.is_some() {
            out.temperature = other.temperature;
        }
        if other.max_tokens.is_some() {
            out.max_tokens = other.max_tokens;
        }
        for (k, v) in &other.extra {
            out.extra.insert(k.clone(), v.clone());
        }
        out
    }
}

/// Everything the backend gets for one prediction.
#[derive(Debug, Clone, Copy)]
pub struct PredictRequest<'a> {
    pub schema: &'a TaskSchema,
    pub inputs: &'a FieldMap,
    pub demos: &'a [Demonstration],
    pub params: &'a LmParams,
}

/// External model backend: maps a schema and flat inputs to a structured prediction.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn predict(&self, request: PredictRequest<'_>)
    -> std::result::Result<Prediction, BackendError>;

    fn name(&self) -> &'static str;
}

/// A backend plus the parameters shared by every caller that uses it.
#[derive(Clone)]
pub struct SharedLm {
    backend: Arc<dyn LanguageModel>,
    params: Arc<RwLock<LmParams>>,
}

impl std::fmt::Debug for SharedLm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLm")
            .field("backend", &self.backend.name())
            .field("params", &*self.params.read())
            .finish()
    }
}

impl SharedLm {
    pub fn new(backend: Arc<dyn LanguageModel>, params: LmParams) -> Self {
        Self {
            backend,
            params: Arc::new(RwLock::new(params)),
        }
    }

    pub fn backend(&self) -> &Arc<dyn LanguageModel> {
        &self.backend
    }

    pub fn params(&self) -> LmParams {
        self.params.read().clone()
    }

    pub fn set_params(&self, params: LmParams) {
        *self.params.write() = params;
    }
}

/// A schema bound to a backend, with optional demonstrations and a retry policy.
#[derive(Debug, Clone)]
pub struct TaskUnit {
    schema: Arc<TaskSchema>,
    kind: CallerKind,
    lm: SharedLm,
    demos: Vec<Demonstration>,
    retry: RetryPolicy,
    params: Option<LmParams>,
}

impl TaskUnit {
    pub fn new(schema: Arc<TaskSchema>, kind: CallerKind, lm: SharedLm) -> Self {
        Self {
            schema,
            kind,
            lm,
            demos: Vec::new(),
            retry: RetryPolicy::single_attempt(),
            params: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overlay `params` on the shared backend parameters for this unit only.
    pub fn with_params(mut self, params: LmParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn set_params(&mut self, params: Option<LmParams>) {
        self.params = params;
    }

    /// Shared parameters with this unit's overrides applied.
    pub fn params(&self) -> LmParams {
        match &self.params {
            Some(overrides) => self.lm.params().merged(overrides),
            None => self.lm.params(),
        }
    }

    pub fn schema(&self) -> &TaskSchema {
        &self.schema
    }

    pub fn kind(&self) -> CallerKind {
        self.kind
    }

    pub fn lm(&self) -> &SharedLm {
        &self.lm
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn demos(&self) -> &[Demonstration] {
        &self.demos
    }

    /// Replace the attached demonstrations; the previous set is discarded.
    pub fn set_demos(&mut self, demos: Vec<Demonstration>) {
        self.demos = demos;
    }

    /// Replace the schema instructions, keeping fields and demonstrations.
    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        self.schema = Arc::new(self.schema.with_instructions(instructions));
    }

    /// Schema actually sent to the backend (reasoning mode adds a rationale field).
    pub fn effective_schema(&self) -> TaskSchema {
        match self.kind {
            CallerKind::Predict => (*self.schema).clone(),
            CallerKind::ChainOfThought => self.schema.with_rationale(),
        }
    }

    /// One backend attempt, no retry.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = %self.kind))]
    pub async fn execute_once(
        &self,
        inputs: &FieldMap,
    ) -> std::result::Result<Prediction, BackendError> {
        let schema = self.effective_schema();
        let params = self.params();
        self.lm
            .backend
            .predict(PredictRequest {
                schema: &schema,
                inputs,
                demos: &self.demos,
                params: &params,
            })
            .await
    }

    /// Execute under this unit's retry policy.
    #[tracing::instrument(level = "info", skip_all, fields(kind = %self.kind))]
    pub async fn execute(&self, inputs: &FieldMap) -> Result<Prediction> {
        for input in &self.schema.inputs {
            if !inputs.contains_key(&input.name) {
                return Err(Error::Validation(format!(
                    "missing input field '{}'",
                    input.name
                )));
            }
        }
        self.retry.run(|_attempt| self.execute_once(inputs)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use crate::testing::{EchoModel, RecordingModel};
    use serde_json::json;

    fn unit(kind: CallerKind, lm: SharedLm) -> TaskUnit {
        let schema = SchemaBuilder::new(vec!["x".to_string()], vec!["y".to_string()])
            .build()
            .unwrap();
        TaskUnit::new(Arc::new(schema), kind, lm)
    }

    #[tokio::test]
    async fn unit_params_overlay_shared_params_without_mutating_them() {
        let model = Arc::new(RecordingModel::new(EchoModel));
        let lm = SharedLm::new(
            model.clone(),
            LmParams {
                temperature: Some(0.0),
                ..LmParams::default()
            },
        );
        let u = unit(CallerKind::Predict, lm.clone()).with_params(LmParams {
            temperature: Some(0.9),
            max_tokens: Some(10),
            ..LmParams::default()
        });
        let mut inputs = FieldMap::new();
        inputs.insert("x".to_string(), json!("hi"));
        u.execute(&inputs).await.unwrap();

        let seen = &model.requests()[0].params;
        assert_eq!(seen.temperature, Some(0.9));
        assert_eq!(seen.max_tokens, Some(10));
        assert_eq!(lm.params().temperature, Some(0.0));
        assert_eq!(lm.params().max_tokens, None);
    }

    #[tokio::test]
    async fn reasoning_mode_requests_rationale() {
        let model = Arc::new(RecordingModel::new(EchoModel));
        let lm = SharedLm::new(model.clone(), LmParams::default());
        let u = unit(CallerKind::ChainOfThought, lm);
        let mut inputs = FieldMap::new();
        inputs.insert("x".to_string(), json!("hi"));
        let pred = u.execute(&inputs).await.unwrap();
        assert_eq!(pred.get("y"), Some(&json!("hi")));
        let seen = model.schemas();
        assert_eq!(seen[0].output_names(), vec!["reasoning", "y"]);
    }

    #[tokio::test]
    async fn missing_input_is_validation_error() {
        let lm = SharedLm::new(Arc::new(EchoModel), LmParams::default());
        let u = unit(CallerKind::Predict, lm);
        let err = u.execute(&FieldMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
