//! Retry policy: decides whether a failed operation is retried and runs the
//! attempt loop with backoff between attempts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backoff::{BackoffParams, BackoffStrategy};
use super::classify;
use crate::error::{PacerError, Result};

/// Caller-supplied override for transient-error classification.
pub type ShouldRetryFn = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Caller-supplied explicit delay for an error, e.g. from a `Retry-After` header.
pub type RetryAfterFn = Arc<dyn Fn(&anyhow::Error) -> Option<u64> + Send + Sync>;

/// Retry behavior for a limiter.
#[derive(Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lower bound for every delay
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound for every delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff shape
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Growth factor for exponential backoff
    #[serde(default = "default_base_multiplier")]
    pub base_multiplier: f64,

    /// Fraction (0 to 1) of symmetric random noise added to each delay
    #[serde(default)]
    pub jitter: f64,

    /// Set to false to run operations exactly once
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(skip)]
    pub should_retry: Option<ShouldRetryFn>,

    #[serde(skip)]
    pub retry_after_ms: Option<RetryAfterFn>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_base_multiplier() -> f64 {
    2.0
}

fn default_enabled() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::Exponential,
            base_multiplier: default_base_multiplier(),
            jitter: 0.1,
            enabled: true,
            should_retry: None,
            retry_after_ms: None,
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("min_delay_ms", &self.min_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("strategy", &self.strategy)
            .field("base_multiplier", &self.base_multiplier)
            .field("jitter", &self.jitter)
            .field("enabled", &self.enabled)
            .field("should_retry", &self.should_retry.is_some())
            .field("retry_after_ms", &self.retry_after_ms.is_some())
            .finish()
    }
}

impl RetryConfig {
    /// Constant delay between attempts, no jitter.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            min_delay_ms: delay_ms,
            max_delay_ms: delay_ms.max(default_max_delay_ms()),
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
            ..Default::default()
        }
    }

    /// Exponential backoff between `min_delay_ms` and `max_delay_ms`, no jitter.
    pub fn exponential(max_attempts: u32, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            min_delay_ms,
            max_delay_ms,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
            ..Default::default()
        }
    }

    /// Set the backoff shape.
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the exponential growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.base_multiplier = multiplier;
        self
    }

    /// Override transient-error classification.
    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Supply an explicit delay for errors that carry one.
    pub fn with_retry_after<F>(mut self, retry_after: F) -> Self
    where
        F: Fn(&anyhow::Error) -> Option<u64> + Send + Sync + 'static,
    {
        self.retry_after_ms = Some(Arc::new(retry_after));
        self
    }

    /// Validate numeric bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(PacerError::Config(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(PacerError::Config(format!(
                "retry min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if !self.base_multiplier.is_finite() || self.base_multiplier < 1.0 {
            return Err(PacerError::Config(format!(
                "retry base_multiplier must be at least 1, got {}",
                self.base_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PacerError::Config(format!(
                "retry jitter must be between 0 and 1, got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    fn backoff(&self) -> BackoffParams {
        BackoffParams {
            strategy: self.strategy,
            min_delay_ms: self.min_delay_ms,
            max_delay_ms: self.max_delay_ms,
            multiplier: self.base_multiplier,
            jitter: self.jitter,
        }
    }
}

/// One failed attempt that was followed by a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryHistoryEntry {
    /// Attempt number that failed (1-based)
    pub attempt: u32,
    /// Delay slept before the next attempt
    pub delay_ms: u64,
    /// Rendered error chain of the failure
    pub error: String,
    /// When the failure was observed
    pub timestamp: DateTime<Utc>,
}

/// Outcome of running an operation under a retry policy.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub success: bool,
    pub result: Option<T>,
    /// Last error, set when `success` is false
    pub error: Option<anyhow::Error>,
    pub total_attempts: u32,
    pub total_duration_ms: u64,
    /// One entry per retry; never longer than `max_attempts − 1`
    pub history: Vec<RetryHistoryEntry>,
}

impl<T> RetryResult<T> {
    /// Collapse into the operation's value or a `PacerError::Operation`.
    pub fn into_result(self) -> Result<T> {
        match (self.result, self.error) {
            (Some(value), _) if self.success => Ok(value),
            (_, error) => Err(PacerError::Operation {
                attempts: self.total_attempts,
                history: self.history,
                source: error.unwrap_or_else(|| anyhow::anyhow!("operation produced no result")),
            }),
        }
    }
}

/// Runs operations with retries according to a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from a validated configuration.
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this policy runs with.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay in milliseconds before retrying after failed attempt `attempt`.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        self.calculate_delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`calculate_delay`](Self::calculate_delay) with a caller-provided RNG.
    pub fn calculate_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> u64 {
        self.config.backoff().delay_ms(attempt, rng)
    }

    /// Whether failed attempt `attempt` should be followed by another one.
    pub fn should_retry(&self, error: &anyhow::Error, attempt: u32) -> bool {
        if !self.config.enabled || attempt >= self.config.max_attempts {
            return false;
        }
        match &self.config.should_retry {
            Some(predicate) => predicate(error),
            None => classify::is_transient(&format!("{:#}", error)),
        }
    }

    /// Run `operation` until it succeeds, fails terminally or runs out of attempts.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let start = Instant::now();
        let mut history = Vec::new();
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    return RetryResult {
                        success: true,
                        result: Some(value),
                        error: None,
                        total_attempts: attempt,
                        total_duration_ms: start.elapsed().as_millis() as u64,
                        history,
                    };
                }
                Err(error) => error,
            };

            if !self.should_retry(&error, attempt) {
                if attempt >= self.config.max_attempts && self.config.max_attempts > 1 {
                    warn!(attempts = attempt, error = %format!("{:#}", error), "Retry attempts exhausted");
                } else {
                    debug!(attempt = attempt, error = %format!("{:#}", error), "Operation failed, not retrying");
                }
                return RetryResult {
                    success: false,
                    result: None,
                    error: Some(error),
                    total_attempts: attempt,
                    total_duration_ms: start.elapsed().as_millis() as u64,
                    history,
                };
            }

            let delay_ms = match self.config.retry_after_ms.as_ref().and_then(|f| f(&error)) {
                Some(explicit) => explicit.min(self.config.max_delay_ms),
                None => self.calculate_delay(attempt),
            };

            debug!(
                attempt = attempt,
                delay_ms = delay_ms,
                error = %format!("{:#}", error),
                "Operation failed, retrying"
            );

            history.push(RetryHistoryEntry {
                attempt,
                delay_ms,
                error: format!("{:#}", error),
                timestamp: Utc::now(),
            });

            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_failures(
        calls: &Arc<AtomicU32>,
        failures: u32,
        message: &'static str,
    ) -> impl FnMut() -> std::future::Ready<anyhow::Result<u32>> {
        let calls = calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                std::future::ready(Err(anyhow::anyhow!(message)))
            } else {
                std::future::ready(Ok(n))
            }
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig { max_attempts: 0, ..Default::default() }.validate().is_err());
        assert!(RetryConfig::exponential(3, 500, 100).validate().is_err());
        assert!(RetryConfig::default().with_jitter(1.5).validate().is_err());
        assert!(RetryConfig::default().with_multiplier(0.5).validate().is_err());
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: RetryConfig = serde_yaml::from_str("strategy: linear\nmax_attempts: 5\n").unwrap();
        assert_eq!(config.strategy, BackoffStrategy::Linear);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.min_delay_ms, 1000);
        assert_eq!(config.base_multiplier, 2.0);
        assert!(config.enabled);
        assert!(config.should_retry.is_none());
    }

    #[test]
    fn test_delay_bounds_for_every_strategy() {
        let mut rng = StdRng::seed_from_u64(7);
        for strategy in [
            BackoffStrategy::Fixed,
            BackoffStrategy::Linear,
            BackoffStrategy::Exponential,
            BackoffStrategy::DecorrelatedJitter,
        ] {
            let policy = RetryPolicy::new(RetryConfig {
                max_attempts: 10,
                min_delay_ms: 50,
                max_delay_ms: 2_000,
                strategy,
                jitter: 0.5,
                ..Default::default()
            })
            .unwrap();
            for attempt in 1..=10 {
                let delay = policy.calculate_delay_with(attempt, &mut rng);
                assert!((50..=2_000).contains(&delay), "{strategy} attempt {attempt}: {delay}");
            }
        }
    }

    #[test]
    fn test_exponential_ratio_without_jitter() {
        let policy = RetryPolicy::new(RetryConfig::exponential(8, 100, 10_000)).unwrap();
        for attempt in 1..6 {
            let current = policy.calculate_delay(attempt);
            let next = policy.calculate_delay(attempt + 1);
            assert_eq!(next, current * 2);
        }
        assert_eq!(policy.calculate_delay(8), 10_000);
    }

    #[test]
    fn test_should_retry_classification() {
        let policy = RetryPolicy::new(RetryConfig::fixed(3, 10)).unwrap();
        assert!(policy.should_retry(&anyhow::anyhow!("503 Service Unavailable"), 1));
        assert!(!policy.should_retry(&anyhow::anyhow!("invalid request body"), 1));
        assert!(!policy.should_retry(&anyhow::anyhow!("timeout"), 3));

        let disabled = RetryPolicy::new(RetryConfig {
            enabled: false,
            ..RetryConfig::fixed(3, 10)
        })
        .unwrap();
        assert!(!disabled.should_retry(&anyhow::anyhow!("timeout"), 1));
    }

    #[test]
    fn test_custom_predicate_overrides_classifier() {
        let policy = RetryPolicy::new(
            RetryConfig::fixed(3, 10).with_should_retry(|e| e.to_string().contains("flaky")),
        )
        .unwrap();
        assert!(policy.should_retry(&anyhow::anyhow!("flaky disk"), 1));
        assert!(!policy.should_retry(&anyhow::anyhow!("timeout"), 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let policy = RetryPolicy::new(RetryConfig::fixed(3, 10)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = policy
            .execute(counting_failures(&calls, 2, "connection reset by peer"))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.result, Some(3));
        assert_eq!(outcome.total_attempts, 3);
        assert_eq!(outcome.history.len(), 2);
        assert!(outcome.history.iter().all(|entry| entry.delay_ms == 10));
        assert_eq!(outcome.history[0].attempt, 1);
        assert_eq!(outcome.history[1].attempt, 2);
        assert!(outcome.total_duration_ms >= 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_has_empty_history() {
        let policy = RetryPolicy::new(RetryConfig::fixed(5, 10)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = policy.execute(counting_failures(&calls, 0, "unused")).await;

        assert!(outcome.success);
        assert_eq!(outcome.total_attempts, 1);
        assert!(outcome.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_attempts() {
        let policy = RetryPolicy::new(RetryConfig::exponential(4, 10, 1_000)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = policy.execute(counting_failures(&calls, u32::MAX, "timeout")).await;

        assert!(!outcome.success);
        assert_eq!(outcome.total_attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.history.len(), 3);
        let delays: Vec<u64> = outcome.history.iter().map(|e| e.delay_ms).collect();
        assert_eq!(delays, vec![10, 20, 40]);

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.history().map(|h| h.len()), Some(3));
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let policy = RetryPolicy::new(RetryConfig::fixed(5, 10)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = policy
            .execute(counting_failures(&calls, u32::MAX, "permission denied"))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.total_attempts, 1);
        assert!(outcome.history.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_retry_after_wins() {
        let policy = RetryPolicy::new(
            RetryConfig::exponential(3, 10, 500)
                .with_should_retry(|_| true)
                .with_retry_after(|e| {
                    e.to_string()
                        .strip_prefix("retry after ")
                        .and_then(|ms| ms.parse().ok())
                }),
        )
        .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let inner = calls.clone();

        let outcome = policy
            .execute(move || {
                let n = inner.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Err(anyhow::anyhow!("retry after 120")),
                        1 => Err(anyhow::anyhow!("retry after 9000")),
                        _ => Ok(()),
                    }
                }
            })
            .await;

        assert!(outcome.success);
        let delays: Vec<u64> = outcome.history.iter().map(|e| e.delay_ms).collect();
        assert_eq!(delays, vec![120, 500]);
    }
}
