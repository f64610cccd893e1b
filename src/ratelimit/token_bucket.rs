//! Token bucket admission.
//!
//! Tokens accrue continuously at `refill_rate` tokens/second up to `capacity`.
//! Each admitted unit of work spends tokens; a refusal reports how long the
//! missing amount takes to refill.

use tokio::time::Instant;

use super::types::{Admission, RateLimitConfig};

/// A continuous-time token bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum tokens the bucket holds
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Tokens currently available (fractional)
    tokens: f64,
    /// Last time the refill was applied
    last_update: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`.
    pub fn new_at(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_update: now,
        }
    }

    /// Build a bucket from a validated rate limit configuration.
    pub fn from_config(config: &RateLimitConfig, now: Instant) -> Self {
        Self::new_at(config.capacity(), config.refill_rate(), now)
    }

    /// Try to spend `requested` tokens now.
    pub fn try_consume(&mut self, requested: f64) -> Admission {
        self.try_consume_at(requested, Instant::now())
    }

    /// Try to spend `requested` tokens at `now`.
    ///
    /// The refill is applied on every call, including refused ones. A negative,
    /// non-finite or over-capacity request is refused without a retry hint.
    pub fn try_consume_at(&mut self, requested: f64, now: Instant) -> Admission {
        self.refill(now);

        if !(0.0..=self.capacity).contains(&requested) {
            return Admission::refuse();
        }
        if self.tokens >= requested {
            self.tokens -= requested;
            Admission::allow(self.tokens.floor() as u64, self.millis_to_refill(requested))
        } else {
            Admission::reject(self.millis_to_refill(requested - self.tokens))
        }
    }

    /// Tokens currently in the bucket, without applying a refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Bucket capacity.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
    }

    fn millis_to_refill(&self, amount: f64) -> u64 {
        if amount <= 0.0 {
            return 0;
        }
        (amount / self.refill_rate * 1000.0).ceil() as u64
    }
}
