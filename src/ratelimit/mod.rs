//! Admission strategies and their shared types.

mod fixed_window;
mod sliding_window;
mod token_bucket;
mod types;

pub use fixed_window::{FixedWindow, TimeWindow};
pub use sliding_window::{SlidingWindow, SLIDING_WINDOW};
pub use token_bucket::TokenBucket;
pub use types::{Admission, RateLimitConfig, RateLimitResult, RateLimitState, RateLimitStrategy};

use tokio::time::Instant;

use crate::error::Result;

/// Algorithm-specific state, one variant per strategy.
#[derive(Debug, Clone)]
enum Algorithm {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
    FixedWindow(FixedWindow),
}

/// A single limiter's admission state.
///
/// Not synchronized on its own; the engine serializes access per limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    algorithm: Algorithm,
    total_count: u64,
    rejected_count: u64,
}

impl RateLimiter {
    /// Build the strategy described by `config`.
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        Self::new_at(config, Instant::now())
    }

    /// Build the strategy described by `config` with its clock starting at `now`.
    pub fn new_at(config: &RateLimitConfig, now: Instant) -> Result<Self> {
        config.validate()?;

        let algorithm = match config.strategy {
            RateLimitStrategy::TokenBucket => {
                Algorithm::TokenBucket(TokenBucket::from_config(config, now))
            }
            RateLimitStrategy::SlidingWindow => {
                Algorithm::SlidingWindow(SlidingWindow::from_config(config))
            }
            RateLimitStrategy::FixedWindow => {
                Algorithm::FixedWindow(FixedWindow::from_config(config, now))
            }
        };

        Ok(Self {
            algorithm,
            total_count: 0,
            rejected_count: 0,
        })
    }

    /// Ask for admission of `tokens` units of work at `now`.
    ///
    /// Only the token bucket honors the weight; window strategies always
    /// count one request.
    pub fn try_acquire_at(&mut self, tokens: f64, now: Instant) -> Admission {
        let admission = match &mut self.algorithm {
            Algorithm::TokenBucket(bucket) => bucket.try_consume_at(tokens, now),
            Algorithm::SlidingWindow(window) => window.try_acquire_at(now),
            Algorithm::FixedWindow(window) => window.try_acquire_at(now),
        };

        self.total_count += 1;
        if !admission.allowed {
            self.rejected_count += 1;
        }
        admission
    }

    /// Ask for admission of one unit of work now.
    pub fn try_acquire(&mut self) -> Admission {
        self.try_acquire_at(1.0, Instant::now())
    }

    /// Zero the total and rejected counters, keeping the strategy state.
    pub fn clear_counts(&mut self) {
        self.total_count = 0;
        self.rejected_count = 0;
    }

    /// The strategy this limiter runs.
    pub fn strategy(&self) -> RateLimitStrategy {
        match self.algorithm {
            Algorithm::TokenBucket(_) => RateLimitStrategy::TokenBucket,
            Algorithm::SlidingWindow(_) => RateLimitStrategy::SlidingWindow,
            Algorithm::FixedWindow(_) => RateLimitStrategy::FixedWindow,
        }
    }

    /// Snapshot of the internal counters.
    pub fn state(&self) -> RateLimitState {
        self.state_at(Instant::now())
    }

    /// Snapshot of the internal counters as seen at `now`.
    pub fn state_at(&self, now: Instant) -> RateLimitState {
        let mut state = RateLimitState {
            total_count: self.total_count,
            rejected_count: self.rejected_count,
            ..Default::default()
        };
        match &self.algorithm {
            Algorithm::TokenBucket(bucket) => {
                state.tokens = Some(bucket.tokens());
            }
            Algorithm::SlidingWindow(window) => {
                state.request_count = Some(window.request_count());
            }
            Algorithm::FixedWindow(window) => {
                state.request_count = Some(window.current_count());
                state.window_age_ms = Some(window.window_age(now).as_millis() as u64);
            }
        }
        state
    }
}
