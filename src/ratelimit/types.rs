//! Rate limit configuration, state snapshots and admission results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PacerError, Result};

/// Admission algorithm used by a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Continuous refill up to a burst capacity
    #[default]
    TokenBucket,
    /// Exact rolling 60 second window
    SlidingWindow,
    /// Counter reset at discrete window boundaries
    FixedWindow,
}

impl std::fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RateLimitStrategy::TokenBucket => "token_bucket",
            RateLimitStrategy::SlidingWindow => "sliding_window",
            RateLimitStrategy::FixedWindow => "fixed_window",
        };
        f.write_str(name)
    }
}

/// Throughput configuration for a limiter.
///
/// Token bucket reads `requests_per_second` and `burst_size`; the window
/// strategies read `requests_per_minute` or `requests_per_hour`. The other
/// units act as fallbacks so that any single unit is enough to build a limiter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admission algorithm
    #[serde(default)]
    pub strategy: RateLimitStrategy,

    /// Sustained requests per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,

    /// Requests per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u64>,

    /// Requests per hour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_hour: Option<u64>,

    /// Token bucket capacity, defaults to `requests_per_second`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<f64>,
}

impl RateLimitConfig {
    /// Token bucket limited to `rate` per second with a capacity of `burst`.
    pub fn token_bucket(rate: f64, burst: f64) -> Self {
        Self {
            strategy: RateLimitStrategy::TokenBucket,
            requests_per_second: Some(rate),
            burst_size: Some(burst),
            ..Default::default()
        }
    }

    /// Sliding window allowing `per_minute` requests in any 60 second span.
    pub fn sliding_window(per_minute: u64) -> Self {
        Self {
            strategy: RateLimitStrategy::SlidingWindow,
            requests_per_minute: Some(per_minute),
            ..Default::default()
        }
    }

    /// Fixed window allowing `per_minute` requests per minute.
    pub fn fixed_window_per_minute(per_minute: u64) -> Self {
        Self {
            strategy: RateLimitStrategy::FixedWindow,
            requests_per_minute: Some(per_minute),
            ..Default::default()
        }
    }

    /// Fixed window allowing `per_hour` requests per hour.
    pub fn fixed_window_per_hour(per_hour: u64) -> Self {
        Self {
            strategy: RateLimitStrategy::FixedWindow,
            requests_per_hour: Some(per_hour),
            ..Default::default()
        }
    }

    /// Validate numeric bounds and the presence of a throughput unit.
    pub fn validate(&self) -> Result<()> {
        if let Some(rps) = self.requests_per_second {
            if !rps.is_finite() || rps <= 0.0 {
                return Err(PacerError::Config(format!(
                    "requests_per_second must be a positive number, got {}",
                    rps
                )));
            }
        }
        if self.requests_per_minute == Some(0) {
            return Err(PacerError::Config(
                "requests_per_minute must be greater than zero".to_string(),
            ));
        }
        if self.requests_per_hour == Some(0) {
            return Err(PacerError::Config(
                "requests_per_hour must be greater than zero".to_string(),
            ));
        }
        if let Some(burst) = self.burst_size {
            if !burst.is_finite() || burst < 1.0 {
                return Err(PacerError::Config(format!(
                    "burst_size must be at least 1, got {}",
                    burst
                )));
            }
        }
        if self.requests_per_second.is_none()
            && self.requests_per_minute.is_none()
            && self.requests_per_hour.is_none()
        {
            return Err(PacerError::Config(format!(
                "{} limiter needs one of requests_per_second, requests_per_minute or requests_per_hour",
                self.strategy
            )));
        }
        match self.strategy {
            RateLimitStrategy::TokenBucket => {
                let rate = self.refill_rate();
                if self.burst_size.is_none() && rate < 1.0 {
                    return Err(PacerError::Config(format!(
                        "token bucket with a refill rate of {}/s needs an explicit burst_size",
                        rate
                    )));
                }
            }
            RateLimitStrategy::SlidingWindow | RateLimitStrategy::FixedWindow => {
                if self.window_limit() == 0 {
                    return Err(PacerError::Config(format!(
                        "{} limiter rate is below one request per window",
                        self.strategy
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check the weight of a single admission request.
    ///
    /// Weights must be positive and finite, and a token bucket cannot admit
    /// more than its capacity at once.
    pub fn validate_weight(&self, tokens: f64) -> Result<()> {
        if !tokens.is_finite() || tokens <= 0.0 {
            return Err(PacerError::Config(format!(
                "token weight must be a positive number, got {}",
                tokens
            )));
        }
        if self.strategy == RateLimitStrategy::TokenBucket && tokens > self.capacity() {
            return Err(PacerError::Config(format!(
                "token weight {} exceeds bucket capacity {}",
                tokens,
                self.capacity()
            )));
        }
        Ok(())
    }

    /// Admissions per window for the window strategies, rounded down.
    ///
    /// Sliding window counts per minute, from `requests_per_minute`, then
    /// `requests_per_second × 60`, then `requests_per_hour / 60`. Fixed window
    /// uses the first of `requests_per_hour`, `requests_per_minute` and
    /// `requests_per_second` as the count for its matching window.
    pub(crate) fn window_limit(&self) -> u64 {
        match self.strategy {
            RateLimitStrategy::SlidingWindow => {
                if let Some(rpm) = self.requests_per_minute {
                    rpm
                } else if let Some(rps) = self.requests_per_second {
                    (rps * 60.0).floor() as u64
                } else {
                    self.requests_per_hour.unwrap_or(0) / 60
                }
            }
            RateLimitStrategy::FixedWindow | RateLimitStrategy::TokenBucket => {
                if let Some(rph) = self.requests_per_hour {
                    rph
                } else if let Some(rpm) = self.requests_per_minute {
                    rpm
                } else {
                    self.requests_per_second.unwrap_or(0.0).floor() as u64
                }
            }
        }
    }

    /// Tokens per second for the token bucket.
    pub(crate) fn refill_rate(&self) -> f64 {
        if let Some(rps) = self.requests_per_second {
            rps
        } else if let Some(rpm) = self.requests_per_minute {
            rpm as f64 / 60.0
        } else {
            self.requests_per_hour.unwrap_or(0) as f64 / 3600.0
        }
    }

    /// Bucket capacity for the token bucket.
    pub(crate) fn capacity(&self) -> f64 {
        self.burst_size.unwrap_or_else(|| self.refill_rate())
    }
}

/// Snapshot of a limiter's internal counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Tokens currently in the bucket (token bucket only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<f64>,

    /// Admissions inside the current window (window strategies only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_count: Option<u64>,

    /// Milliseconds since the current fixed window started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_age_ms: Option<u64>,

    /// Every admission check seen by this limiter
    pub total_count: u64,

    /// Checks that were refused
    pub rejected_count: u64,
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResult {
    /// Whether the unit of work may proceed now
    pub allowed: bool,

    /// Admissions left before the next refusal
    pub remaining: u64,

    /// Milliseconds until the limiter has recovered what this check used or needs
    pub reset_after_ms: u64,

    /// Wall-clock time of `reset_after_ms`
    pub reset_time: DateTime<Utc>,

    /// Suggested wait before trying again, set only on refusal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,

    /// The limiter that produced this result
    pub limiter_id: String,
}

/// Strategy-level decision, before the engine attaches identity and wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_after_ms: u64,
    pub retry_after_ms: Option<u64>,
}

impl Admission {
    pub(crate) fn allow(remaining: u64, reset_after_ms: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_after_ms,
            retry_after_ms: None,
        }
    }

    /// Refusal that waiting cannot cure.
    pub(crate) fn refuse() -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_after_ms: 0,
            retry_after_ms: None,
        }
    }

    pub(crate) fn reject(retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_after_ms: retry_after_ms,
            retry_after_ms: Some(retry_after_ms),
        }
    }

    /// Attach the limiter id and convert the reset delay to wall-clock time.
    pub fn into_result(self, limiter_id: &str) -> RateLimitResult {
        RateLimitResult {
            allowed: self.allowed,
            remaining: self.remaining,
            reset_after_ms: self.reset_after_ms,
            reset_time: Utc::now() + chrono::Duration::milliseconds(self.reset_after_ms as i64),
            retry_after_ms: self.retry_after_ms,
            limiter_id: limiter_id.to_string(),
        }
    }
}
