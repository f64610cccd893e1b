//! Fixed window admission.
//!
//! A counter that resets once a full window has elapsed since the window
//! started. Up to twice the capacity can be admitted across a boundary
//! (the end of one window plus the start of the next); callers rely on this
//! timing, so it is kept as is.

use std::time::Duration;

use tokio::time::Instant;

use super::types::{Admission, RateLimitConfig};

/// Time window for fixed window rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
        }
    }
}

/// A request counter over consecutive fixed windows.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    /// Maximum admissions per window
    limit: u64,
    /// Window length
    window: TimeWindow,
    /// Admissions in the current window
    count: u64,
    /// When the current window started
    window_start: Instant,
}

impl FixedWindow {
    /// Create a counter whose first window starts now.
    pub fn new(limit: u64, window: TimeWindow) -> Self {
        Self::new_at(limit, window, Instant::now())
    }

    /// Create a counter whose first window starts at `now`.
    pub fn new_at(limit: u64, window: TimeWindow, now: Instant) -> Self {
        Self {
            limit,
            window,
            count: 0,
            window_start: now,
        }
    }

    /// Build a counter from a validated rate limit configuration.
    ///
    /// `requests_per_hour` wins over `requests_per_minute`, which wins over
    /// `requests_per_second`.
    pub fn from_config(config: &RateLimitConfig, now: Instant) -> Self {
        let window = if config.requests_per_hour.is_some() {
            TimeWindow::Hour
        } else if config.requests_per_minute.is_some() {
            TimeWindow::Minute
        } else {
            TimeWindow::Second
        };
        Self::new_at(config.window_limit(), window, now)
    }

    /// Try to admit one request now.
    pub fn try_acquire(&mut self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    /// Try to admit one request at `now`.
    pub fn try_acquire_at(&mut self, now: Instant) -> Admission {
        self.maybe_reset_window(now);

        let reset_after_ms = self.millis_until_reset(now);
        if self.count < self.limit {
            self.count += 1;
            Admission::allow(self.limit - self.count, reset_after_ms)
        } else {
            Admission::reject(reset_after_ms)
        }
    }

    /// Get the current count.
    pub fn current_count(&self) -> u64 {
        self.count
    }

    /// Get the limit for this counter.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the time window for this counter.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Time elapsed since the current window started.
    pub fn window_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    fn millis_until_reset(&self, now: Instant) -> u64 {
        let remaining = (self.window_start + self.window.duration()).saturating_duration_since(now);
        (remaining.as_secs_f64() * 1000.0).ceil() as u64
    }

    /// Reset the window if it has expired.
    fn maybe_reset_window(&mut self, now: Instant) {
        if self.window_age(now) >= self.window.duration() {
            self.count = 0;
            self.window_start = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_window_duration() {
        assert_eq!(TimeWindow::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeWindow::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeWindow::Hour.duration(), Duration::from_secs(3600));
    }

    #[test]
    fn test_counter_exceeds_limit() {
        let now = Instant::now();
        let mut counter = FixedWindow::new_at(5, TimeWindow::Minute, now);

        for _ in 0..5 {
            assert!(counter.try_acquire_at(now).allowed);
        }

        // The 6th request should be rejected
        let refused = counter.try_acquire_at(now + Duration::from_secs(20));
        assert!(!refused.allowed);
        assert_eq!(refused.retry_after_ms, Some(40_000));
        assert_eq!(counter.current_count(), 5);
    }

    #[test]
    fn test_boundary_burst_is_preserved() {
        let start = Instant::now();
        let mut counter = FixedWindow::new_at(10, TimeWindow::Minute, start);

        let before = start + Duration::from_millis(59_990);
        for _ in 0..10 {
            assert!(counter.try_acquire_at(before).allowed);
        }
        let after = start + Duration::from_millis(60_000);
        for _ in 0..10 {
            assert!(counter.try_acquire_at(after).allowed);
        }
        assert!(!counter.try_acquire_at(after).allowed);
    }

    #[test]
    fn test_window_resets_lazily() {
        let start = Instant::now();
        let mut counter = FixedWindow::new_at(1, TimeWindow::Second, start);

        counter.try_acquire_at(start);
        // Nothing happens between calls; the counter still holds the old window.
        assert_eq!(counter.current_count(), 1);

        let admitted = counter.try_acquire_at(start + Duration::from_millis(1500));
        assert!(admitted.allowed);
        assert_eq!(admitted.reset_after_ms, 1000);
    }

    #[test]
    fn test_unit_priority() {
        let now = Instant::now();
        let config = RateLimitConfig {
            requests_per_second: Some(50.0),
            requests_per_minute: Some(600),
            requests_per_hour: Some(1000),
            ..RateLimitConfig::fixed_window_per_hour(1000)
        };
        let counter = FixedWindow::from_config(&config, now);
        assert_eq!(counter.window(), TimeWindow::Hour);
        assert_eq!(counter.limit(), 1000);

        let config = RateLimitConfig {
            requests_per_second: Some(50.0),
            ..RateLimitConfig::fixed_window_per_minute(600)
        };
        let counter = FixedWindow::from_config(&config, now);
        assert_eq!(counter.window(), TimeWindow::Minute);
        assert_eq!(counter.limit(), 600);
    }
}
