//! Backoff delay shapes.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the delay before a retry grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always `min_delay`
    Fixed,
    /// `min_delay × attempt`
    Linear,
    /// `min_delay × multiplier^(attempt − 1)`
    #[default]
    Exponential,
    /// Random draw from a range that grows with the attempt, capped at `max_delay`
    DecorrelatedJitter,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
            BackoffStrategy::DecorrelatedJitter => "decorrelated_jitter",
        };
        f.write_str(name)
    }
}

/// Inputs to a delay computation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackoffParams {
    pub strategy: BackoffStrategy,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl BackoffParams {
    /// Delay in milliseconds before retry number `attempt` (1-based).
    ///
    /// The result always lies in `[min_delay_ms, max_delay_ms]`.
    pub fn delay_ms<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> u64 {
        let attempt = attempt.max(1);
        let min = self.min_delay_ms as f64;
        let max = self.max_delay_ms as f64;
        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;

        let base = match self.strategy {
            BackoffStrategy::Fixed => min,
            BackoffStrategy::Linear => min * attempt as f64,
            BackoffStrategy::Exponential => min * self.multiplier.powi(exponent),
            BackoffStrategy::DecorrelatedJitter => {
                // Draw over the full range, then cap.
                let upper = (min * 3.0 * 2f64.powi(exponent)).max(min);
                if !upper.is_finite() {
                    max
                } else if upper > 0.0 {
                    rng.gen_range(0.0..=upper).min(max)
                } else {
                    0.0
                }
            }
        };

        let mut delay = base;
        if self.jitter > 0.0 && delay.is_finite() {
            let spread = delay * self.jitter;
            if spread > 0.0 {
                delay += rng.gen_range(-spread..=spread);
            }
        }

        delay.clamp(min, max).round() as u64
    }
}
