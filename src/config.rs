//! Configuration management for Pacer.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::LimiterDefinition;
use crate::error::{PacerError, Result};
use crate::presets::Preset;
use crate::ratelimit::RateLimitConfig;
use crate::retry::RetryConfig;

/// Prefix for environment overrides, e.g. `PACER__ENABLE_RETRY=false`.
pub const ENV_PREFIX: &str = "PACER";

/// Main configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Check admission before executions
    #[serde(default = "default_true")]
    pub enable_rate_limit: bool,

    /// Run executions through the limiter's retry policy
    #[serde(default = "default_true")]
    pub enable_retry: bool,

    /// On refusal, sleep for `retry_after_ms` and check again instead of failing
    #[serde(default = "default_true")]
    pub wait_on_limit: bool,

    /// Idle time after which a limiter's stats are zeroed
    #[serde(default = "default_stats_retention_ms")]
    pub stats_retention_ms: u64,

    /// How often the stale-stats cleanup runs
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Rate limit for the reserved default limiter
    #[serde(default = "default_rate_limit")]
    pub default_rate_limit: RateLimitConfig,

    /// Retry policy for the reserved default limiter
    #[serde(default)]
    pub default_retry: RetryConfig,

    /// Limiters registered at startup
    #[serde(default)]
    pub limiters: Vec<LimiterSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_rate_limit: true,
            enable_retry: true,
            wait_on_limit: true,
            stats_retention_ms: default_stats_retention_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            default_rate_limit: default_rate_limit(),
            default_retry: RetryConfig::default(),
            limiters: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_stats_retention_ms() -> u64 {
    3_600_000
}

fn default_cleanup_interval_ms() -> u64 {
    300_000
}

fn default_rate_limit() -> RateLimitConfig {
    RateLimitConfig::token_bucket(10.0, 20.0)
}

/// A limiter declared in configuration.
///
/// Either `preset` or `rate_limit` must be given. An explicit `retry`
/// replaces the preset's retry policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

impl LimiterSpec {
    /// Resolve presets into a concrete definition.
    pub fn to_definition(&self) -> Result<LimiterDefinition> {
        let mut definition = match (&self.preset, &self.rate_limit) {
            (_, Some(rate_limit)) => LimiterDefinition::new(self.name.clone(), rate_limit.clone()),
            (Some(preset), None) => preset.definition(self.name.clone()),
            (None, None) => {
                return Err(PacerError::Config(format!(
                    "limiter '{}' needs either a preset or a rate_limit",
                    self.name
                )))
            }
        };

        if self.rate_limit.is_some() {
            definition.retry = self.preset.and_then(|preset| preset.retry());
        }
        if let Some(retry) = &self.retry {
            definition.retry = Some(retry.clone());
        }
        if !self.description.is_empty() {
            definition.description = self.description.clone();
        }
        definition.id = self.id.clone();
        definition.priority = self.priority;
        Ok(definition)
    }
}

impl EngineConfig {
    /// Load configuration from a file, with `PACER__*` environment overrides.
    ///
    /// The format follows the file extension (YAML, TOML or JSON).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading engine configuration");

        if !path.exists() {
            return Err(PacerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("configuration file not found: {}", path.display()),
            )));
        }

        let config: EngineConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| PacerError::Config(format!("Failed to parse engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check engine settings, the default limiter and every declared limiter.
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval_ms == 0 {
            return Err(PacerError::Config(
                "cleanup_interval_ms must be greater than zero".to_string(),
            ));
        }
        self.default_rate_limit.validate()?;
        self.default_retry.validate()?;

        for spec in &self.limiters {
            let definition = spec.to_definition()?;
            definition.rate_limit.validate()?;
            if let Some(retry) = &definition.retry {
                retry.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateLimitStrategy;
    use crate::retry::BackoffStrategy;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.enable_rate_limit);
        assert!(config.enable_retry);
        assert!(config.wait_on_limit);
        assert_eq!(config.stats_retention_ms, 3_600_000);
        assert_eq!(config.cleanup_interval_ms, 300_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
enable_retry: false
stats_retention_ms: 60000
limiters:
  - name: openai
    preset: chat_completion
    priority: 10
  - name: search
    rate_limit:
      strategy: sliding_window
      requests_per_minute: 20
    retry:
      strategy: linear
      max_attempts: 2
      min_delay_ms: 100
      max_delay_ms: 1000
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(!config.enable_retry);
        assert!(config.enable_rate_limit);
        assert_eq!(config.stats_retention_ms, 60_000);
        assert_eq!(config.limiters.len(), 2);

        let openai = config.limiters[0].to_definition().unwrap();
        assert_eq!(openai.rate_limit.strategy, RateLimitStrategy::TokenBucket);
        assert_eq!(openai.priority, 10);
        assert!(openai.retry.is_some());

        let search = config.limiters[1].to_definition().unwrap();
        assert_eq!(search.rate_limit.requests_per_minute, Some(20));
        assert_eq!(search.retry.map(|r| r.strategy), Some(BackoffStrategy::Linear));
    }

    #[test]
    fn test_explicit_rate_limit_overrides_preset() {
        let spec = LimiterSpec {
            name: "custom".to_string(),
            preset: Some(Preset::WebSearch),
            rate_limit: Some(RateLimitConfig::fixed_window_per_minute(5)),
            ..Default::default()
        };
        let definition = spec.to_definition().unwrap();
        assert_eq!(definition.rate_limit.strategy, RateLimitStrategy::FixedWindow);
        // The preset's retry still applies.
        assert_eq!(
            definition.retry.map(|r| r.strategy),
            Some(BackoffStrategy::Linear)
        );
    }

    #[test]
    fn test_spec_without_limit_is_rejected() {
        let spec = LimiterSpec {
            name: "empty".to_string(),
            ..Default::default()
        };
        assert!(matches!(spec.to_definition(), Err(PacerError::Config(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let yaml = r#"
limiters:
  - name: broken
    rate_limit:
      strategy: fixed_window
"#;
        assert!(EngineConfig::from_yaml(yaml).is_err());

        let yaml = "cleanup_interval_ms: 0\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());

        let yaml = "default_retry:\n  max_attempts: 0\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let err = EngineConfig::from_file("/nonexistent/pacer.yaml").unwrap_err();
        assert!(matches!(err, PacerError::Io(_)));
    }
}
