//! Sliding window admission over a rolling 60 second window.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::types::{Admission, RateLimitConfig};

/// Length of the rolling window.
pub const SLIDING_WINDOW: Duration = Duration::from_secs(60);

/// Tracks the timestamps of admitted requests inside the rolling window.
///
/// Timestamps are appended in order, so expiry only ever pops from the front.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    /// Maximum admissions within any window
    max_requests: u64,
    /// Admission times, oldest first
    requests: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Create an empty window allowing `max_requests` per 60 seconds.
    pub fn new(max_requests: u64) -> Self {
        Self {
            max_requests,
            requests: VecDeque::new(),
        }
    }

    /// Build a window from a validated rate limit configuration.
    ///
    /// Capacity comes from `requests_per_minute`, falling back to
    /// `requests_per_second × 60` and then `requests_per_hour / 60`.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.window_limit())
    }

    /// Try to admit one request now.
    pub fn try_acquire(&mut self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    /// Try to admit one request at `now`.
    pub fn try_acquire_at(&mut self, now: Instant) -> Admission {
        self.evict_expired(now);

        let count = self.requests.len() as u64;
        if count < self.max_requests {
            self.requests.push_back(now);
            Admission::allow(self.max_requests - count - 1, self.millis_until_oldest_expires(now))
        } else {
            Admission::reject(self.millis_until_oldest_expires(now))
        }
    }

    /// Admissions currently inside the window.
    pub fn request_count(&self) -> u64 {
        self.requests.len() as u64
    }

    /// Configured capacity.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&oldest) = self.requests.front() {
            if now.saturating_duration_since(oldest) > SLIDING_WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn millis_until_oldest_expires(&self, now: Instant) -> u64 {
        match self.requests.front() {
            Some(&oldest) => {
                let expires = oldest + SLIDING_WINDOW;
                let wait = expires.saturating_duration_since(now);
                (wait.as_secs_f64() * 1000.0).ceil() as u64
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_rolling_window() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(3);

        for expected_remaining in [2, 1, 0] {
            let admitted = window.try_acquire_at(start);
            assert!(admitted.allowed);
            assert_eq!(admitted.remaining, expected_remaining);
        }

        let refused = window.try_acquire_at(start);
        assert!(!refused.allowed);
        assert_eq!(refused.retry_after_ms, Some(60_000));

        let after = start + Duration::from_millis(60_001);
        assert!(window.try_acquire_at(after).allowed);
    }

    #[test]
    fn test_entries_expire_individually() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(2);

        assert!(window.try_acquire_at(start).allowed);
        assert!(window
            .try_acquire_at(start + Duration::from_secs(30))
            .allowed);

        let refused = window.try_acquire_at(start + Duration::from_secs(45));
        assert_eq!(refused.retry_after_ms, Some(15_000));

        // Only the first entry has left the window.
        let t = start + Duration::from_millis(60_500);
        assert!(window.try_acquire_at(t).allowed);
        assert!(!window.try_acquire_at(t).allowed);
        assert_eq!(window.request_count(), 2);
    }

    #[test]
    fn test_no_boundary_burst() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(5);

        let before = start + Duration::from_millis(59_900);
        for _ in 0..5 {
            assert!(window.try_acquire_at(before).allowed);
        }
        let after = start + Duration::from_millis(60_100);
        assert!(!window.try_acquire_at(after).allowed);
    }

    #[test]
    fn test_capacity_fallbacks() {
        let per_minute = RateLimitConfig::sliding_window(30);
        assert_eq!(SlidingWindow::from_config(&per_minute).max_requests(), 30);

        let per_second = RateLimitConfig {
            requests_per_second: Some(2.0),
            requests_per_minute: None,
            ..per_minute.clone()
        };
        assert_eq!(SlidingWindow::from_config(&per_second).max_requests(), 120);

        let per_hour = RateLimitConfig {
            requests_per_minute: None,
            requests_per_hour: Some(600),
            ..per_minute
        };
        assert_eq!(SlidingWindow::from_config(&per_hour).max_requests(), 10);
    }
}
