//! Limiter definitions.

use serde::{Deserialize, Serialize};

use crate::ratelimit::RateLimitConfig;
use crate::retry::RetryConfig;

/// Everything needed to create a limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterDefinition {
    /// Unique id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human readable name; defaulted from the id when empty
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Admission strategy and throughput
    pub rate_limit: RateLimitConfig,

    /// Retry behavior for executions admitted by this limiter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    /// Higher priorities are listed first
    #[serde(default)]
    pub priority: i32,
}

impl LimiterDefinition {
    /// Create a definition with no retry policy.
    pub fn new(name: impl Into<String>, rate_limit: RateLimitConfig) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            rate_limit,
            retry: None,
            priority: 0,
        }
    }

    /// Use a fixed id instead of a generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach a retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
