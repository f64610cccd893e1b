//! Per-limiter statistics and engine-wide status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ratelimit::{Admission, RateLimitState, RateLimitStrategy};

/// Counters for one limiter.
///
/// `allowed_requests + rejected_requests == total_requests` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterStats {
    pub limiter_id: String,
    pub name: String,
    pub strategy: RateLimitStrategy,
    pub priority: i32,

    /// Admission checks
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub rejected_requests: u64,

    /// Executions run through this limiter
    pub executions: u64,
    /// Retries performed across all executions
    pub retry_count: u64,
    /// Executions that succeeded after at least one retry
    pub successful_retries: u64,
    /// Mean time an execution waited for admission
    pub average_wait_time_ms: f64,

    pub last_request_time: Option<DateTime<Utc>>,

    /// Snapshot of the strategy counters
    pub state: RateLimitState,

    #[serde(skip)]
    total_wait_ms: u64,
}

impl LimiterStats {
    /// Zeroed stats for a new limiter.
    pub fn new(
        limiter_id: impl Into<String>,
        name: impl Into<String>,
        strategy: RateLimitStrategy,
        priority: i32,
    ) -> Self {
        Self {
            limiter_id: limiter_id.into(),
            name: name.into(),
            strategy,
            priority,
            total_requests: 0,
            allowed_requests: 0,
            rejected_requests: 0,
            executions: 0,
            retry_count: 0,
            successful_retries: 0,
            average_wait_time_ms: 0.0,
            last_request_time: None,
            state: RateLimitState::default(),
            total_wait_ms: 0,
        }
    }

    /// Fold one admission check into the counters.
    pub(crate) fn record_check(&mut self, admission: &Admission, state: RateLimitState) {
        self.total_requests += 1;
        if admission.allowed {
            self.allowed_requests += 1;
        } else {
            self.rejected_requests += 1;
        }
        self.last_request_time = Some(Utc::now());
        self.state = state;
    }

    /// Fold one finished execution into the counters.
    pub(crate) fn record_execution(&mut self, wait_ms: u64, retries: usize, success: bool) {
        self.executions += 1;
        self.retry_count += retries as u64;
        if success && retries > 0 {
            self.successful_retries += 1;
        }
        self.total_wait_ms += wait_ms;
        self.average_wait_time_ms = self.total_wait_ms as f64 / self.executions as f64;
    }

    /// Zero every counter, keeping identity.
    pub(crate) fn clear(&mut self, state: RateLimitState) {
        *self = Self {
            state,
            ..Self::new(
                std::mem::take(&mut self.limiter_id),
                std::mem::take(&mut self.name),
                self.strategy,
                self.priority,
            )
        };
    }
}

/// Engine-wide summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Whether the background cleanup is running
    pub initialized: bool,
    pub limiter_count: usize,
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub rejected_requests: u64,
    pub retry_count: u64,
    pub successful_retries: u64,
}

impl EngineStatus {
    pub(crate) fn add(&mut self, stats: &LimiterStats) {
        self.limiter_count += 1;
        self.total_requests += stats.total_requests;
        self.allowed_requests += stats.allowed_requests;
        self.rejected_requests += stats.rejected_requests;
        self.retry_count += stats.retry_count;
        self.successful_retries += stats.successful_retries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> LimiterStats {
        LimiterStats::new("id-1", "search", RateLimitStrategy::SlidingWindow, 5)
    }

    #[test]
    fn test_record_check_keeps_totals_consistent() {
        let mut stats = stats();
        let allow = Admission::allow(3, 0);
        let reject = Admission::reject(100);

        for admission in [allow, reject, allow, reject, reject] {
            stats.record_check(&admission, RateLimitState::default());
        }

        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.allowed_requests, 2);
        assert_eq!(stats.rejected_requests, 3);
        assert!(stats.last_request_time.is_some());
    }

    #[test]
    fn test_record_execution_averages_wait() {
        let mut stats = stats();
        stats.record_execution(0, 0, true);
        stats.record_execution(300, 2, true);
        stats.record_execution(0, 1, false);

        assert_eq!(stats.executions, 3);
        assert_eq!(stats.retry_count, 3);
        assert_eq!(stats.successful_retries, 1);
        assert_eq!(stats.average_wait_time_ms, 100.0);
    }

    #[test]
    fn test_clear_keeps_identity() {
        let mut stats = stats();
        stats.record_check(&Admission::allow(1, 0), RateLimitState::default());
        stats.record_execution(50, 1, true);

        stats.clear(RateLimitState::default());

        assert_eq!(stats, LimiterStats::new("id-1", "search", RateLimitStrategy::SlidingWindow, 5));
    }

    #[test]
    fn test_status_sums_limiters() {
        let mut first = stats();
        first.record_check(&Admission::allow(1, 0), RateLimitState::default());
        let mut second = stats();
        second.record_check(&Admission::reject(10), RateLimitState::default());
        second.record_execution(0, 2, true);

        let mut status = EngineStatus::default();
        status.add(&first);
        status.add(&second);

        assert_eq!(status.limiter_count, 2);
        assert_eq!(status.total_requests, 2);
        assert_eq!(status.allowed_requests, 1);
        assert_eq!(status.rejected_requests, 1);
        assert_eq!(status.retry_count, 2);
        assert_eq!(status.successful_retries, 1);
    }
}
