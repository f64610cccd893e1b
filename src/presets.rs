//! Named limiter presets for common downstream resources.

use serde::{Deserialize, Serialize};

use crate::engine::LimiterDefinition;
use crate::error::PacerError;
use crate::ratelimit::RateLimitConfig;
use crate::retry::{BackoffStrategy, RetryConfig};

/// A ready-made rate limit and retry combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Chat-completion providers: slow sustained rate, small burst, patient retries
    ChatCompletion,
    /// Third-party web/search endpoints with per-minute quotas
    WebSearch,
    /// Hard hourly quota
    HourlyQuota,
    /// Bursty internal services
    BurstTolerant,
    /// Low per-minute cap and no retries
    Strict,
}

impl Preset {
    /// Every preset, in declaration order.
    pub fn all() -> &'static [Preset] {
        &[
            Preset::ChatCompletion,
            Preset::WebSearch,
            Preset::HourlyQuota,
            Preset::BurstTolerant,
            Preset::Strict,
        ]
    }

    /// The name used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            Preset::ChatCompletion => "chat_completion",
            Preset::WebSearch => "web_search",
            Preset::HourlyQuota => "hourly_quota",
            Preset::BurstTolerant => "burst_tolerant",
            Preset::Strict => "strict",
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        match self {
            Preset::ChatCompletion => RateLimitConfig::token_bucket(1.0, 3.0),
            Preset::WebSearch => RateLimitConfig::sliding_window(30),
            Preset::HourlyQuota => RateLimitConfig::fixed_window_per_hour(100),
            Preset::BurstTolerant => RateLimitConfig::token_bucket(10.0, 50.0),
            Preset::Strict => RateLimitConfig::fixed_window_per_minute(10),
        }
    }

    pub fn retry(&self) -> Option<RetryConfig> {
        match self {
            Preset::ChatCompletion => {
                Some(RetryConfig::exponential(4, 1_000, 30_000).with_jitter(0.2))
            }
            Preset::WebSearch => Some(RetryConfig {
                max_attempts: 3,
                min_delay_ms: 500,
                max_delay_ms: 5_000,
                strategy: BackoffStrategy::Linear,
                jitter: 0.0,
                ..Default::default()
            }),
            Preset::HourlyQuota => Some(RetryConfig::fixed(2, 1_000)),
            Preset::BurstTolerant => Some(
                RetryConfig::exponential(5, 100, 10_000)
                    .with_strategy(BackoffStrategy::DecorrelatedJitter),
            ),
            Preset::Strict => None,
        }
    }

    /// A limiter definition named `name` built from this preset.
    pub fn definition(&self, name: impl Into<String>) -> LimiterDefinition {
        let definition = LimiterDefinition::new(name, self.rate_limit())
            .with_description(format!("{} preset", self.name()));
        match self.retry() {
            Some(retry) => definition.with_retry(retry),
            None => definition,
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Preset {
    type Err = PacerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_lowercase();
        Preset::all()
            .iter()
            .copied()
            .find(|preset| preset.name() == wanted)
            .ok_or_else(|| PacerError::Config(format!("Unknown preset: {}", s)))
    }
}
