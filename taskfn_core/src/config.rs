use crate::backend::LmParams;
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings shared by every caller built from one runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Root of the result store (`{log_dir}/modules/{task}/...`).
    pub log_dir: PathBuf,
    pub logging_enabled: bool,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_backoff: f64,
    pub retry_jitter: bool,
    /// Scored records at or above this go to the training section, and scored training
    /// records below it are not loaded as demonstrations.
    pub demo_min_score: Option<f32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(".taskfn"),
            logging_enabled: false,
            model: None,
            temperature: None,
            max_tokens: None,
            retry_max_attempts: 3,
            retry_initial_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(60_000),
            retry_backoff: 2.0,
            retry_jitter: true,
            demo_min_score: None,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Configuration(format!("invalid {name}: {raw}")))
}

impl Settings {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source. Blank values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("TASKFN_LOG_DIR") {
            cfg.log_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = get("TASKFN_LOGGING_ENABLED") {
            cfg.logging_enabled = parse_bool(&v).ok_or_else(|| {
                Error::Configuration(format!("invalid TASKFN_LOGGING_ENABLED: {v}"))
            })?;
        }
        if let Some(v) = get("TASKFN_MODEL") {
            cfg.model = Some(v.trim().to_string());
        }
        if let Some(v) = get("TASKFN_TEMPERATURE") {
            cfg.temperature = Some(parse_var("TASKFN_TEMPERATURE", &v)?);
        }
        if let Some(v) = get("TASKFN_MAX_TOKENS") {
            cfg.max_tokens = Some(parse_var("TASKFN_MAX_TOKENS", &v)?);
        }
        if let Some(v) = get("TASKFN_RETRY_MAX_ATTEMPTS") {
            cfg.retry_max_attempts = parse_var("TASKFN_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("TASKFN_RETRY_INITIAL_DELAY_MS") {
            cfg.retry_initial_delay =
                Duration::from_millis(parse_var("TASKFN_RETRY_INITIAL_DELAY_MS", &v)?);
        }
        if let Some(v) = get("TASKFN_RETRY_MAX_DELAY_MS") {
            cfg.retry_max_delay =
                Duration::from_millis(parse_var("TASKFN_RETRY_MAX_DELAY_MS", &v)?);
        }
        if let Some(v) = get("TASKFN_RETRY_BACKOFF") {
            cfg.retry_backoff = parse_var("TASKFN_RETRY_BACKOFF", &v)?;
        }
        if let Some(v) = get("TASKFN_RETRY_JITTER") {
            cfg.retry_jitter = parse_bool(&v).ok_or_else(|| {
                Error::Configuration(format!("invalid TASKFN_RETRY_JITTER: {v}"))
            })?;
        }
        if let Some(v) = get("TASKFN_DEMO_MIN_SCORE") {
            cfg.demo_min_score = Some(parse_var("TASKFN_DEMO_MIN_SCORE", &v)?);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::Configuration("log_dir must be non-empty".to_string()));
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() || t < 0.0 {
                return Err(Error::Configuration(
                    "temperature must be finite and >= 0".to_string(),
                ));
            }
        }
        if let Some(s) = self.demo_min_score {
            if !s.is_finite() {
                return Err(Error::Configuration(
                    "demo_min_score must be finite".to_string(),
                ));
            }
        }
        self.retry_policy().validate()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: self.retry_initial_delay,
            max_delay: self.retry_max_delay,
            backoff: self.retry_backoff,
            jitter: self.retry_jitter,
            ..RetryPolicy::default()
        }
    }

    pub fn lm_params(&self) -> LmParams {
        LmParams {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..LmParams::default()
        }
    }
}
