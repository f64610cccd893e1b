//! Pacer - Rate Limit & Retry Orchestration
//!
//! This crate wraps calls to quota-limited downstream resources. Each named
//! limiter pairs an admission strategy (token bucket, sliding window or fixed
//! window) with an optional retry policy, and keeps per-limiter statistics.
//! Everything runs in-process; there is no shared or distributed state.

pub mod config;
pub mod engine;
pub mod error;
pub mod presets;
pub mod ratelimit;
pub mod retry;

pub use config::EngineConfig;
pub use engine::{Engine, EngineStatus, LimiterDefinition, LimiterStats};
pub use error::{PacerError, Result};
pub use presets::Preset;
pub use ratelimit::{RateLimitConfig, RateLimitResult, RateLimitStrategy};
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy, RetryResult};
