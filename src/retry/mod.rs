//! Retry policies with configurable backoff.

mod backoff;
mod classify;
mod policy;

pub use backoff::BackoffStrategy;
pub use classify::is_transient;
pub use policy::{
    RetryAfterFn, RetryConfig, RetryHistoryEntry, RetryPolicy, RetryResult, ShouldRetryFn,
};
