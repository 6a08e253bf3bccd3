use crate::backend::{BackendError, BackendErrorKind};
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with exponential backoff and optional jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: f64,
    /// Add up to 10% random delay on top of each backoff.
    pub jitter: bool,
    pub retryable: BTreeSet<BackendErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: 2.0,
            jitter: true,
            retryable: [
                BackendErrorKind::RateLimited,
                BackendErrorKind::Timeout,
                BackendErrorKind::Unavailable,
                BackendErrorKind::Malformed,
                BackendErrorKind::Other,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Configuration(
                "retry max_attempts must be >= 1".to_string(),
            ));
        }
        if !self.backoff.is_finite() || self.backoff < 1.0 {
            return Err(Error::Configuration(
                "retry backoff must be finite and >= 1".to_string(),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::Configuration(
                "retry initial_delay must be <= max_delay".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_retryable(&self, err: &BackendError) -> bool {
        self.retryable.contains(&err.kind)
    }

    /// Backoff before the next attempt, without jitter: `min(initial * backoff^(attempt-1), max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=base.as_secs_f64() * 0.1);
        base + Duration::from_secs_f64(extra)
    }

    /// Run `op` until it succeeds, fails with a non-retryable kind, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) if !self.is_retryable(&e) => {
                    tracing::debug!(attempt, kind = ?e.kind, "non-retryable backend failure");
                    return Err(Error::Backend(e));
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::warn!(attempts = attempt, error = %e, "retries exhausted");
                    return Err(Error::ExecutionFailed {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying backend call"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
