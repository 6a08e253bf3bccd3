use crate::Result;
use crate::backend::{LanguageModel, LmParams, SharedLm};
use crate::config::Settings;
use crate::demos::{DemoLoader, DemoSelector};
use crate::evaluation::Scorer;
use crate::logging::{JsonlStore, RecordStore, ResultLogger};
use crate::retry::RetryPolicy;
use crate::rewards::RewardTracker;
use std::sync::Arc;

/// Shared state for every caller: backend, retry policy, logging and demonstrations.
///
/// Built once and handed to each [`Caller`](crate::Caller).
pub struct Runtime {
    settings: Settings,
    lm: SharedLm,
    retry: RetryPolicy,
    logger: ResultLogger,
    demos: DemoLoader,
    selector: DemoSelector,
    scorer: Option<Arc<dyn Scorer>>,
    rewards: Option<Arc<RewardTracker>>,
}

impl Runtime {
    pub fn builder(backend: Arc<dyn LanguageModel>) -> RuntimeBuilder {
        RuntimeBuilder::new(backend)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn lm(&self) -> &SharedLm {
        &self.lm
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn logger(&self) -> &ResultLogger {
        &self.logger
    }

    pub fn demo_loader(&self) -> &DemoLoader {
        &self.demos
    }

    pub fn selector(&self) -> &DemoSelector {
        &self.selector
    }

    pub fn scorer(&self) -> Option<&Arc<dyn Scorer>> {
        self.scorer.as_ref()
    }

    /// The tracker given to the builder, else the process-wide one.
    pub fn reward_tracker(&self) -> &RewardTracker {
        match &self.rewards {
            Some(t) => t.as_ref(),
            None => RewardTracker::global(),
        }
    }

    pub fn set_logging_enabled(&self, enabled: bool) {
        self.logger.set_enabled(enabled);
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("lm", &self.lm)
            .field("retry", &self.retry)
            .field("logger", &self.logger)
            .field("scorer", &self.scorer.as_ref().map(|s| s.name()))
            .finish_non_exhaustive()
    }
}

pub struct RuntimeBuilder {
    backend: Arc<dyn LanguageModel>,
    settings: Settings,
    store: Option<Arc<dyn RecordStore>>,
    scorer: Option<Arc<dyn Scorer>>,
    retry: Option<RetryPolicy>,
    params: Option<LmParams>,
    logging: Option<bool>,
    rewards: Option<Arc<RewardTracker>>,
}

impl RuntimeBuilder {
    pub fn new(backend: Arc<dyn LanguageModel>) -> Self {
        Self {
            backend,
            settings: Settings::default(),
            store: None,
            scorer: None,
            retry: None,
            params: None,
            logging: None,
            rewards: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Record store; defaults to JSONL files under `settings.log_dir`.
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Overrides the policy derived from settings.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Overrides the backend parameters derived from settings.
    pub fn params(mut self, params: LmParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = Some(enabled);
        self
    }

    pub fn reward_tracker(mut self, tracker: Arc<RewardTracker>) -> Self {
        self.rewards = Some(tracker);
        self
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn build(self) -> Result<Arc<Runtime>> {
        self.settings.validate()?;
        let retry = self.retry.unwrap_or_else(|| self.settings.retry_policy());
        retry.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(JsonlStore::new(self.settings.log_dir.clone())));
        let logger = ResultLogger::new(
            Arc::clone(&store),
            self.logging.unwrap_or(self.settings.logging_enabled),
        );
        let demos = DemoLoader::new(store).with_min_score(self.settings.demo_min_score);
        let selector = DemoSelector::new(self.settings.demo_min_score);
        let params = self.params.unwrap_or_else(|| self.settings.lm_params());

        tracing::debug!(
            backend = self.backend.name(),
            logging = logger.is_enabled(),
            "runtime built"
        );
        Ok(Arc::new(Runtime {
            lm: SharedLm::new(self.backend, params),
            retry,
            logger,
            demos,
            selector,
            scorer: self.scorer,
            rewards: self.rewards,
            settings: self.settings,
        }))
    }
}
