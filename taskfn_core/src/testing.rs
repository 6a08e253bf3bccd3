//! Deterministic model backends for tests.

use crate::backend::{BackendError, BackendErrorKind, LanguageModel, LmParams, PredictRequest};
use crate::demos::Demonstration;
use crate::models::{FieldMap, Prediction};
use crate::schema::{RATIONALE_FIELD, TaskSchema};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn echo(request: &PredictRequest<'_>) -> Prediction {
    let input_names = request.schema.input_names();
    let mut fields = FieldMap::new();
    let mut position = 0usize;
    for out in &request.schema.outputs {
        if out.name == RATIONALE_FIELD {
            fields.insert(out.name.clone(), Value::String("echoing inputs".to_string()));
            continue;
        }
        let value = request.inputs.get(&out.name).cloned().or_else(|| {
            let idx = position.min(input_names.len().saturating_sub(1));
            input_names
                .get(idx)
                .and_then(|name| request.inputs.get(name))
                .cloned()
        });
        fields.insert(out.name.clone(), value.unwrap_or(Value::Null));
        position += 1;
    }
    Prediction::new(fields)
}

/// Answers each output with the same-named input, else the input at the same position.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    async fn predict(&self, request: PredictRequest<'_>) -> Result<Prediction, BackendError> {
        Ok(echo(&request))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Owned copy of one request seen by a [`RecordingModel`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub schema: TaskSchema,
    pub inputs: FieldMap,
    pub demos: Vec<Demonstration>,
    pub params: LmParams,
}

/// Wraps another backend and keeps every request it forwards.
pub struct RecordingModel<M> {
    inner: M,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl<M> RecordingModel<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn schemas(&self) -> Vec<TaskSchema> {
        self.requests.lock().iter().map(|r| r.schema.clone()).collect()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for RecordingModel<M> {
    async fn predict(&self, request: PredictRequest<'_>) -> Result<Prediction, BackendError> {
        self.requests.lock().push(RecordedRequest {
            schema: request.schema.clone(),
            inputs: request.inputs.clone(),
            demos: request.demos.to_vec(),
            params: request.params.clone(),
        });
        self.inner.predict(request).await
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Waits `delay` on the tokio clock before forwarding to the wrapped backend.
pub struct DelayedModel<M> {
    inner: M,
    delay: Duration,
}

impl<M> DelayedModel<M> {
    pub fn new(inner: M, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for DelayedModel<M> {
    async fn predict(&self, request: PredictRequest<'_>) -> Result<Prediction, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.predict(request).await
    }

    fn name(&self) -> &'static str {
        "delayed"
    }
}

/// Plays back queued responses in order; echoes once the queue is empty.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<FieldMap, BackendError>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(script: impl IntoIterator<Item = Result<FieldMap, BackendError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail `n` times with `kind`, then echo.
    pub fn failing_then_echo(n: usize, kind: BackendErrorKind) -> Self {
        Self::new((0..n).map(|i| Err(BackendError::new(kind, format!("scripted failure {i}")))))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn predict(&self, request: PredictRequest<'_>) -> Result<Prediction, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(fields)) => Ok(Prediction::new(fields)),
            Some(Err(e)) => Err(e),
            None => Ok(echo(&request)),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Always fails with the same kind.
#[derive(Debug, Default)]
pub struct FailingModel {
    kind: Option<BackendErrorKind>,
    calls: AtomicUsize,
}

impl FailingModel {
    pub fn new(kind: BackendErrorKind) -> Self {
        Self {
            kind: Some(kind),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FailingModel {
    async fn predict(&self, _request: PredictRequest<'_>) -> Result<Prediction, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(BackendError::new(
            self.kind.unwrap_or(BackendErrorKind::Unavailable),
            format!("failure #{n}"),
        ))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Echoes, but leaves one output field out of the result.
#[derive(Debug, Clone)]
pub struct OmitFieldModel {
    pub field: String,
}

impl OmitFieldModel {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for OmitFieldModel {
    async fn predict(&self, request: PredictRequest<'_>) -> Result<Prediction, BackendError> {
        let mut pred = echo(&request);
        pred.fields.remove(&self.field);
        Ok(pred)
    }

    fn name(&self) -> &'static str {
        "omit_field"
    }
}

type PredictFn = dyn Fn(&PredictRequest<'_>) -> Result<Prediction, BackendError> + Send + Sync;

/// Backend driven by a closure.
#[derive(Clone)]
pub struct FnModel {
    f: Arc<PredictFn>,
}

impl FnModel {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&PredictRequest<'_>) -> Result<Prediction, BackendError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl LanguageModel for FnModel {
    async fn predict(&self, request: PredictRequest<'_>) -> Result<Prediction, BackendError> {
        (self.f)(&request)
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}
