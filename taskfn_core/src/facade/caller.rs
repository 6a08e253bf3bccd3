use crate::backend::{LmParams, TaskUnit};
use crate::demos::Demonstration;
use crate::facade::runtime::Runtime;
use crate::inference::{self, CallSite, ResolvedNames};
use crate::logging::LogRecord;
use crate::models::{CallOutput, CallerKind, FieldMap, FieldType};
use crate::pipelines::PipelineBuilder;
use crate::rewards::RewardEntry;
use crate::schema::{SchemaBuilder, TaskSchema};
use crate::{Error, Result};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Positional call arguments, converted to JSON values as they are added.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<Value>,
    error: Option<String>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a serializable value. A serialization failure is reported by the call.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => self.values.push(v),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(format!(
                        "argument {} is not serializable: {e}",
                        self.values.len()
                    ));
                }
                self.values.push(Value::Null);
            }
        }
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.values.push(value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self {
            values,
            error: None,
        }
    }
}

/// Optional knobs for one call. Everything left unset is inferred or defaulted.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub inputs: Option<Vec<String>>,
    pub outputs: Option<Vec<String>>,
    pub description: Option<String>,
    /// Task name used for logging and demonstrations.
    pub name: Option<String>,
    /// Demonstrations to use instead of the logged training records.
    pub trainset: Option<Vec<FieldMap>>,
    /// Backend parameters applied for this call only.
    pub lm_params: Option<LmParams>,
    /// Passed to the scorer when the interaction is logged.
    pub evaluation_instructions: Vec<String>,
    pub reward_group: Option<String>,
    pub call_site: Option<CallSite>,
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl CallOptions {
    pub fn inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = Some(strings(names));
        self
    }

    pub fn outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(strings(names));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn trainset(mut self, trainset: Vec<FieldMap>) -> Self {
        self.trainset = Some(trainset);
        self
    }

    pub fn lm_params(mut self, params: LmParams) -> Self {
        self.lm_params = Some(params);
        self
    }

    pub fn evaluation_instructions<I, S>(mut self, instructions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evaluation_instructions = strings(instructions);
        self
    }

    pub fn reward_group(mut self, group: impl Into<String>) -> Self {
        self.reward_group = Some(group.into());
        self
    }

    pub fn call_site(mut self, site: CallSite) -> Self {
        self.call_site = Some(site);
        self
    }
}

/// `"{outputs}__{kind}__{inputs}"`, names joined by `_`.
pub fn task_name(outputs: &[String], kind: CallerKind, inputs: &[String]) -> String {
    format!("{}__{}__{}", outputs.join("_"), kind.as_str(), inputs.join("_"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SchemaKey {
    inputs: Vec<String>,
    outputs: Vec<String>,
    input_types: Vec<(String, FieldType)>,
    output_types: Vec<(String, FieldType)>,
    description: Option<String>,
}

impl SchemaKey {
    fn new(names: &ResolvedNames, description: Option<&str>) -> Self {
        Self {
            inputs: names.inputs.clone(),
            outputs: names.outputs.clone(),
            input_types: names.input_types.clone().into_iter().collect(),
            output_types: names.output_types.clone().into_iter().collect(),
            description: description.map(str::to_string),
        }
    }
}

/// Turns positional values into a task call against the runtime's backend.
///
/// `Predict` asks for the declared outputs directly; `ChainOfThought` also asks for
/// a rationale that is not returned to the caller.
#[derive(Clone)]
pub struct Caller {
    kind: CallerKind,
    runtime: Arc<Runtime>,
    pipeline: Option<PipelineBuilder>,
    schemas: Arc<DashMap<SchemaKey, Arc<TaskSchema>>>,
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller")
            .field("kind", &self.kind)
            .field("pipeline", &self.pipeline)
            .field("cached_schemas", &self.schemas.len())
            .finish()
    }
}

impl Caller {
    pub fn new(kind: CallerKind, runtime: Arc<Runtime>) -> Self {
        Self {
            kind,
            runtime,
            pipeline: None,
            schemas: Arc::new(DashMap::new()),
        }
    }

    pub fn predict(runtime: Arc<Runtime>) -> Self {
        Self::new(CallerKind::Predict, runtime)
    }

    pub fn chain_of_thought(runtime: Arc<Runtime>) -> Self {
        Self::new(CallerKind::ChainOfThought, runtime)
    }

    /// Register every successful call as a step of `pipeline`.
    pub fn with_pipeline(mut self, pipeline: PipelineBuilder) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn kind(&self) -> CallerKind {
        self.kind
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn cached_schemas(&self) -> usize {
        self.schemas.len()
    }

    /// Run one call: resolve names, build the schema, attach demonstrations, execute
    /// with retry, check outputs, log, and shape the result.
    ///
    /// Returns a single value when one output is declared, otherwise a tuple in
    /// output order.
    #[tracing::instrument(level = "info", skip_all, fields(kind = %self.kind, args = args.len()))]
    pub async fn call(&self, args: Args, options: CallOptions) -> Result<CallOutput> {
        if let Some(err) = args.error {
            return Err(Error::Validation(err));
        }
        if args.values.is_empty() {
            return Err(Error::Validation(
                "At least one argument is required".to_string(),
            ));
        }
        if options.outputs.as_ref().is_some_and(|o| o.is_empty()) {
            return Err(Error::Validation(
                "outputs must name at least one field".to_string(),
            ));
        }

        let names = inference::resolve(
            args.values.len(),
            options.inputs.as_deref(),
            options.outputs.as_deref(),
            options.call_site.as_ref(),
        )?;
        let schema = self.schema_for(&names, options.description.as_deref())?;
        let task = options
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| task_name(&names.outputs, self.kind, &names.inputs));

        let inputs: FieldMap = names.inputs.iter().cloned().zip(args.values).collect();
        let mut unit = TaskUnit::new(schema, self.kind, self.runtime.lm().clone())
            .with_retry(self.runtime.retry().clone());
        unit.set_demos(self.demonstrations(&task, options.trainset.as_deref()));

        unit.set_params(options.lm_params.clone());
        let prediction = unit.execute(&inputs).await?;
        unit.set_params(None);

        let values = prediction
            .select(&names.outputs)
            .map_err(|field| Error::MissingOutput { field })?;
        let outputs: FieldMap = names
            .outputs
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect();

        if let Some(pipeline) = &self.pipeline {
            pipeline.register_step(names.inputs.clone(), names.outputs.clone(), unit);
        }

        self.record(&task, &inputs, &outputs, &options).await;
        Ok(CallOutput::from_values(values))
    }

    fn schema_for(
        &self,
        names: &ResolvedNames,
        description: Option<&str>,
    ) -> Result<Arc<TaskSchema>> {
        let key = SchemaKey::new(names, description);
        if let Some(hit) = self.schemas.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }
        let schema = SchemaBuilder::new(names.inputs.clone(), names.outputs.clone())
            .input_types(names.input_types.clone())
            .output_types(names.output_types.clone())
            .description(description.map(str::to_string))
            .require_output(true)
            .build()?;
        let schema = Arc::new(schema);
        self.schemas.insert(key, Arc::clone(&schema));
        Ok(schema)
    }

    /// An explicit trainset wins outright; otherwise logged training records are used.
    fn demonstrations(&self, task: &str, trainset: Option<&[FieldMap]>) -> Vec<Demonstration> {
        if let Some(trainset) = trainset {
            return trainset.iter().cloned().map(Demonstration::from).collect();
        }
        match self.runtime.demo_loader().load(task) {
            Ok(demos) => demos,
            Err(e) => {
                tracing::warn!(task, error = %e, "failed to load demonstrations");
                Vec::new()
            }
        }
    }

    /// Score, log and track rewards. Failures here never fail the call.
    async fn record(
        &self,
        task: &str,
        inputs: &FieldMap,
        outputs: &FieldMap,
        options: &CallOptions,
    ) {
        let logger = self.runtime.logger();
        if !logger.is_enabled() && options.reward_group.is_none() {
            return;
        }

        let score = match self.runtime.scorer() {
            Some(scorer) => match scorer
                .score(inputs, outputs, &options.evaluation_instructions)
                .await
            {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(task, scorer = scorer.name(), error = %e, "scoring failed");
                    None
                }
            },
            None => None,
        };

        let mut record = LogRecord::new(task, inputs, outputs, options.description.as_deref());
        record.score = score;
        record.reward_group = options.reward_group.clone();
        record.instructions = options.evaluation_instructions.clone();

        let section = self.runtime.selector().section_for(score);
        if let Err(e) = logger.append(section, &record) {
            tracing::warn!(task, error = %e, "failed to log interaction");
        }

        if let (Some(group), Some(score)) = (&options.reward_group, score) {
            let example = format!(
                "Inputs: {}, Outputs: {}",
                serde_json::to_string(inputs).unwrap_or_default(),
                serde_json::to_string(outputs).unwrap_or_default()
            );
            self.runtime.reward_tracker().add_entry(
                group,
                RewardEntry {
                    score: f64::from(score),
                    timestamp: record.timestamp.epoch_seconds(),
                    example: Some(example),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendErrorKind, LanguageModel};
    use crate::evaluation::Scorer;
    use crate::logging::{MemoryStore, RecordStore, Section};
    use crate::retry::RetryPolicy;
    use crate::rewards::RewardTracker;
    use crate::testing::{
        DelayedModel, EchoModel, FailingModel, OmitFieldModel, RecordingModel, ScriptedModel,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct FixedScorer(f32);

    #[async_trait]
    impl Scorer for FixedScorer {
        async fn score(&self, _: &FieldMap, _: &FieldMap, _: &[String]) -> Result<f32> {
            Ok(self.0)
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    fn runtime(backend: Arc<dyn LanguageModel>, store: Arc<MemoryStore>) -> Arc<Runtime> {
        Runtime::builder(backend)
            .store(store)
            .retry(fast_retry(3))
            .build()
            .unwrap()
    }

    fn args2() -> Args {
        Args::new().arg("one").arg("two")
    }

    #[tokio::test]
    async fn single_output_returns_a_single_value() {
        let rt = runtime(Arc::new(EchoModel), Arc::new(MemoryStore::default()));
        let out = Caller::predict(rt)
            .call(
                Args::new().arg("hello"),
                CallOptions::default().inputs(["text"]).outputs(["copy"]),
            )
            .await
            .unwrap();
        assert_eq!(out, CallOutput::Single(json!("hello")));
    }

    #[tokio::test]
    async fn multiple_outputs_follow_declared_order() {
        let rt = runtime(Arc::new(EchoModel), Arc::new(MemoryStore::default()));
        let out = Caller::predict(rt)
            .call(
                args2(),
                CallOptions::default().inputs(["a", "b"]).outputs(["b", "a"]),
            )
            .await
            .unwrap();
        assert_eq!(out, CallOutput::Tuple(vec![json!("two"), json!("one")]));
    }

    #[tokio::test]
    async fn missing_output_names_each_field() {
        for field in ["x", "y", "z"] {
            let rt = runtime(
                Arc::new(OmitFieldModel::new(field)),
                Arc::new(MemoryStore::default()),
            );
            let err = Caller::predict(rt)
                .call(
                    Args::new().arg(&1),
                    CallOptions::default().inputs(["n"]).outputs(["x", "y", "z"]),
                )
                .await
                .unwrap_err();
            match &err {
                Error::MissingOutput { field: f } => assert_eq!(f, field),
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(
                err.to_string(),
                format!("output field '{field}' not found in prediction result")
            );
        }
    }

    #[tokio::test]
    async fn validation_happens_before_the_backend() {
        let model = Arc::new(RecordingModel::new(EchoModel));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        let caller = Caller::predict(rt);

        let err = caller
            .call(args2(), CallOptions::default().inputs(["only_one"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Expected 2 input names, got 1"));

        let err = caller
            .call(Args::new(), CallOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("At least one argument is required"));

        let err = caller
            .call(args2(), CallOptions::default().outputs(Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!err.is_transient());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn tuple_assignment_names_the_outputs() {
        let model = Arc::new(RecordingModel::new(EchoModel));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        let site = CallSite::from_source_line("q, r = call(v1, v2)", &["v1", "v2"]);
        let out = Caller::predict(rt)
            .call(args2(), CallOptions::default().call_site(site))
            .await
            .unwrap();
        assert_eq!(out, CallOutput::Tuple(vec![json!("one"), json!("two")]));
        let schema = &model.schemas()[0];
        assert_eq!(schema.input_names(), vec!["v1", "v2"]);
        assert_eq!(schema.output_names(), vec!["q", "r"]);
    }

    #[tokio::test]
    async fn invoke_macro_captures_argument_names() {
        let model = Arc::new(RecordingModel::new(EchoModel));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        let caller = Caller::predict(rt);
        let text = "some words";
        let summary = crate::invoke!(caller, text).await.unwrap();
        assert_eq!(summary.as_str(), Some("some words"));
        let schema = &model.schemas()[0];
        assert_eq!(schema.input_names(), vec!["text"]);
        assert_eq!(schema.output_names(), vec!["summary"]);
    }

    #[tokio::test]
    async fn without_assignment_output_is_generic() {
        let model = Arc::new(RecordingModel::new(EchoModel));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        let site = CallSite::from_source_line("call(v1).await?;", &["v1"]);
        Caller::predict(rt)
            .call(Args::new().arg("x"), CallOptions::default().call_site(site))
            .await
            .unwrap();
        assert_eq!(model.schemas()[0].output_names(), vec!["output"]);
    }

    #[tokio::test]
    async fn reasoning_mode_hides_the_rationale() {
        let model = Arc::new(RecordingModel::new(EchoModel));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        let out = Caller::chain_of_thought(rt)
            .call(
                Args::new().arg("q"),
                CallOptions::default().inputs(["question"]).outputs(["answer"]),
            )
            .await
            .unwrap();
        assert_eq!(out.as_str(), Some("q"));
        assert_eq!(
            model.schemas()[0].output_names(),
            vec!["reasoning", "answer"]
        );
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let model = Arc::new(ScriptedModel::failing_then_echo(2, BackendErrorKind::Timeout));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        let out = Caller::predict(rt)
            .call(
                Args::new().arg("v"),
                CallOptions::default().inputs(["a"]).outputs(["b"]),
            )
            .await
            .unwrap();
        assert_eq!(out.as_str(), Some("v"));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_execution_failure() {
        let model = Arc::new(FailingModel::new(BackendErrorKind::Unavailable));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        let err = Caller::predict(rt)
            .call(
                Args::new().arg("v"),
                CallOptions::default().inputs(["a"]).outputs(["b"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed { attempts: 3, .. }));
        assert!(err.is_transient());
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn lm_params_are_restored_after_success_and_failure() {
        let ok = runtime(Arc::new(EchoModel), Arc::new(MemoryStore::default()));
        let overrides = LmParams {
            temperature: Some(1.0),
            ..LmParams::default()
        };
        Caller::predict(ok.clone())
            .call(
                Args::new().arg("v"),
                CallOptions::default()
                    .inputs(["a"])
                    .outputs(["b"])
                    .lm_params(overrides.clone()),
            )
            .await
            .unwrap();
        assert_eq!(ok.lm().params().temperature, None);

        let failing = runtime(
            Arc::new(FailingModel::new(BackendErrorKind::Auth)),
            Arc::new(MemoryStore::default()),
        );
        let _ = Caller::predict(failing.clone())
            .call(
                Args::new().arg("v"),
                CallOptions::default()
                    .inputs(["a"])
                    .outputs(["b"])
                    .lm_params(overrides),
            )
            .await
            .unwrap_err();
        assert_eq!(failing.lm().params().temperature, None);
    }

    #[tokio::test]
    async fn override_is_visible_to_the_backend() {
        let model = Arc::new(RecordingModel::new(EchoModel));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        Caller::predict(rt)
            .call(
                Args::new().arg("v"),
                CallOptions::default()
                    .inputs(["a"])
                    .outputs(["b"])
                    .lm_params(LmParams {
                        max_tokens: Some(64),
                        ..LmParams::default()
                    }),
            )
            .await
            .unwrap();
        assert_eq!(model.requests()[0].params.max_tokens, Some(64));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_overrides_stay_with_their_own_call() {
        let model = Arc::new(RecordingModel::new(DelayedModel::new(
            EchoModel,
            Duration::from_millis(100),
        )));
        let rt = runtime(model.clone(), Arc::new(MemoryStore::default()));
        let caller = Caller::predict(rt.clone());
        let hot = CallOptions::default()
            .inputs(["a"])
            .outputs(["b"])
            .lm_params(LmParams {
                temperature: Some(0.9),
                ..LmParams::default()
            });
        let short = CallOptions::default()
            .inputs(["c"])
            .outputs(["d"])
            .lm_params(LmParams {
                max_tokens: Some(5),
                ..LmParams::default()
            });

        let (first, second) = tokio::join!(caller.call(Args::new().arg("x"), hot), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            caller.call(Args::new().arg("y"), short).await
        });
        first.unwrap();
        second.unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].params.temperature, Some(0.9));
        assert_eq!(requests[0].params.max_tokens, None);
        assert_eq!(requests[1].params.temperature, None);
        assert_eq!(requests[1].params.max_tokens, Some(5));
        assert_eq!(rt.lm().params(), LmParams::default());
    }

    #[tokio::test]
    async fn trainset_takes_precedence_over_logged_demos() {
        let store = Arc::new(MemoryStore::default());
        let logged = json!({"inputs": {"a": "logged"}, "outputs": {"b": "logged"}});
        store
            .append("b__predict__a", Section::Training, &logged.to_string())
            .unwrap();
        let model = Arc::new(RecordingModel::new(EchoModel));
        let caller = Caller::predict(runtime(model.clone(), store));
        let opts = CallOptions::default().inputs(["a"]).outputs(["b"]);

        caller
            .call(Args::new().arg("v"), opts.clone())
            .await
            .unwrap();
        let mut example = FieldMap::new();
        example.insert("a".to_string(), json!("given"));
        example.insert("b".to_string(), json!("given"));
        caller
            .call(Args::new().arg("v"), opts.trainset(vec![example.clone()]))
            .await
            .unwrap();

        let requests = model.requests();
        assert_eq!(requests[0].demos.len(), 1);
        assert_eq!(requests[0].demos[0].get("a"), Some(&json!("logged")));
        assert_eq!(requests[1].demos, vec![Demonstration::from(example)]);
    }

    #[tokio::test]
    async fn logging_writes_records_by_section() {
        let store = Arc::new(MemoryStore::default());
        let rt = Runtime::builder(Arc::new(EchoModel))
            .store(store.clone())
            .logging(true)
            .build()
            .unwrap();
        Caller::predict(rt)
            .call(
                Args::new().arg("v"),
                CallOptions::default()
                    .inputs(["a"])
                    .outputs(["b"])
                    .description("copy it"),
            )
            .await
            .unwrap();
        let lines = store.read("b__predict__a", Section::Logged).unwrap();
        assert_eq!(lines.len(), 1);
        let rec: LogRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(rec.module, "b__predict__a");
        assert_eq!(rec.description.as_deref(), Some("copy it"));
        assert_eq!(rec.outputs[0].value, json!("v"));
        assert!(rec.score.is_none());
    }

    #[tokio::test]
    async fn scored_records_meeting_threshold_become_training_data() {
        let store = Arc::new(MemoryStore::default());
        let tracker = Arc::new(RewardTracker::default());
        let settings = crate::Settings {
            logging_enabled: true,
            demo_min_score: Some(5.0),
            ..crate::Settings::default()
        };
        let rt = Runtime::builder(Arc::new(EchoModel))
            .settings(settings)
            .store(store.clone())
            .scorer(Arc::new(FixedScorer(8.0)))
            .reward_tracker(tracker.clone())
            .build()
            .unwrap();
        let caller = Caller::predict(rt);
        let opts = CallOptions::default()
            .inputs(["a"])
            .outputs(["b"])
            .name("copier")
            .reward_group("copying")
            .evaluation_instructions(["prefer exact copies"]);
        caller.call(Args::new().arg("v"), opts.clone()).await.unwrap();

        assert!(store.read("copier", Section::Logged).unwrap().is_empty());
        let training = store.read("copier", Section::Training).unwrap();
        let rec: LogRecord = serde_json::from_str(&training[0]).unwrap();
        assert_eq!(rec.score, Some(8.0));
        assert_eq!(rec.instructions, vec!["prefer exact copies"]);
        assert_eq!(tracker.entries("copying").len(), 1);

        // The promoted record now steers the next call.
        let model = Arc::new(RecordingModel::new(EchoModel));
        let rt2 = Runtime::builder(model.clone())
            .store(store.clone())
            .build()
            .unwrap();
        Caller::predict(rt2)
            .call(Args::new().arg("w"), opts)
            .await
            .unwrap();
        assert_eq!(model.requests()[0].demos.len(), 1);
    }

    #[tokio::test]
    async fn disabled_logging_writes_nothing() {
        let store = Arc::new(MemoryStore::default());
        let rt = runtime(Arc::new(EchoModel), store.clone());
        Caller::predict(rt)
            .call(
                Args::new().arg("v"),
                CallOptions::default().inputs(["a"]).outputs(["b"]),
            )
            .await
            .unwrap();
        assert!(store.read("b__predict__a", Section::Logged).unwrap().is_empty());
    }

    #[tokio::test]
    async fn reward_group_records_are_kept_with_logging_disabled() {
        let store = Arc::new(MemoryStore::default());
        let tracker = Arc::new(RewardTracker::default());
        let rt = Runtime::builder(Arc::new(EchoModel))
            .store(store.clone())
            .logging(false)
            .scorer(Arc::new(FixedScorer(3.0)))
            .reward_tracker(tracker.clone())
            .build()
            .unwrap();
        let caller = Caller::predict(rt);
        let opts = CallOptions::default().inputs(["a"]).outputs(["b"]);
        caller
            .call(Args::new().arg("v"), opts.clone().reward_group("copying"))
            .await
            .unwrap();
        caller.call(Args::new().arg("w"), opts).await.unwrap();

        let lines = store.read("b__predict__a", Section::Logged).unwrap();
        assert_eq!(lines.len(), 1);
        let rec: LogRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(rec.reward_group.as_deref(), Some("copying"));
        assert_eq!(rec.score, Some(3.0));
        assert_eq!(tracker.entries("copying").len(), 1);
    }

    #[tokio::test]
    async fn low_scored_training_records_are_not_used_as_demos() {
        let store = Arc::new(MemoryStore::default());
        for (q, score) in [("low", Some(2.0)), ("high", Some(9.0)), ("unscored", None)] {
            let mut record = json!({"inputs": {"a": q}, "outputs": {"b": q}});
            if let Some(score) = score {
                record["score"] = json!(score);
            }
            store
                .append("b__predict__a", Section::Training, &record.to_string())
                .unwrap();
        }
        let model = Arc::new(RecordingModel::new(EchoModel));
        let settings = crate::Settings {
            demo_min_score: Some(5.0),
            ..crate::Settings::default()
        };
        let rt = Runtime::builder(model.clone())
            .settings(settings)
            .store(store)
            .build()
            .unwrap();
        Caller::predict(rt)
            .call(
                Args::new().arg("v"),
                CallOptions::default().inputs(["a"]).outputs(["b"]),
            )
            .await
            .unwrap();

        let demos = &model.requests()[0].demos;
        let seen: Vec<&Value> = demos.iter().filter_map(|d| d.get("a")).collect();
        assert_eq!(seen, vec![&json!("high"), &json!("unscored")]);
    }

    #[tokio::test]
    async fn attached_pipeline_records_each_call() {
        let rt = runtime(Arc::new(EchoModel), Arc::new(MemoryStore::default()));
        let builder = PipelineBuilder::new();
        let caller = Caller::predict(rt).with_pipeline(builder.clone());
        caller
            .call(
                Args::new().arg("start"),
                CallOptions::default().inputs(["a"]).outputs(["b"]),
            )
            .await
            .unwrap();
        caller
            .call(
                Args::new().arg("start"),
                CallOptions::default().inputs(["b"]).outputs(["c"]),
            )
            .await
            .unwrap();
        assert_eq!(builder.len(), 2);

        let pipeline = builder.assemble().unwrap();
        let mut inputs = FieldMap::new();
        inputs.insert("a".to_string(), json!("again"));
        assert_eq!(pipeline.call(&inputs).await.unwrap().as_str(), Some("again"));
    }

    #[tokio::test]
    async fn schema_is_cached_per_call_shape() {
        let rt = runtime(Arc::new(EchoModel), Arc::new(MemoryStore::default()));
        let caller = Caller::predict(rt);
        let opts = CallOptions::default().inputs(["a"]).outputs(["b"]);
        for _ in 0..3 {
            caller.call(Args::new().arg("v"), opts.clone()).await.unwrap();
        }
        assert_eq!(caller.cached_schemas(), 1);
        caller
            .call(Args::new().arg("v"), opts.description("other"))
            .await
            .unwrap();
        assert_eq!(caller.cached_schemas(), 2);
    }

    #[test]
    fn task_name_joins_outputs_kind_and_inputs() {
        let name = task_name(
            &["q".to_string(), "r".to_string()],
            CallerKind::ChainOfThought,
            &["text".to_string()],
        );
        assert_eq!(name, "q_r__chain_of_thought__text");
    }
}
