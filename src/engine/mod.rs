//! The orchestration engine.
//!
//! A registry of named limiters, each pairing an admission strategy with an
//! optional retry policy. Every limiter's strategy state and stats sit behind
//! one mutex, so an admission check, the refill or window roll inside it and
//! the stats update form a single critical section. The mutex is never held
//! across an `.await`.

mod definition;
mod stats;

pub use definition::LimiterDefinition;
pub use stats::{EngineStatus, LimiterStats};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{PacerError, Result};
use crate::ratelimit::{Admission, RateLimitResult, RateLimiter};
use crate::retry::{RetryPolicy, RetryResult};

/// Id of the limiter used by [`Engine::execute`].
pub const DEFAULT_LIMITER_ID: &str = "__default__";

/// Mutable per-limiter state guarded by one lock.
struct LimiterSlot {
    limiter: RateLimiter,
    stats: LimiterStats,
    last_request: Option<Instant>,
}

/// A registered limiter.
struct LimiterEntry {
    definition: LimiterDefinition,
    retry: Option<RetryPolicy>,
    slot: Mutex<LimiterSlot>,
}

impl LimiterEntry {
    fn build(id: &str, mut definition: LimiterDefinition) -> Result<Self> {
        let limiter = RateLimiter::new(&definition.rate_limit)?;
        let retry = definition.retry.clone().map(RetryPolicy::new).transpose()?;

        if definition.name.trim().is_empty() {
            definition.name = format!("limiter-{}", id);
        }
        definition.id = Some(id.to_string());

        let stats = LimiterStats::new(
            id,
            definition.name.clone(),
            limiter.strategy(),
            definition.priority,
        );

        Ok(Self {
            definition,
            retry,
            slot: Mutex::new(LimiterSlot {
                limiter,
                stats,
                last_request: None,
            }),
        })
    }

    fn check(&self, tokens: f64) -> Admission {
        let now = Instant::now();
        let mut slot = self.slot.lock();
        let admission = slot.limiter.try_acquire_at(tokens, now);
        let state = slot.limiter.state_at(now);
        slot.stats.record_check(&admission, state);
        slot.last_request = Some(now);
        admission
    }

    fn snapshot(&self) -> LimiterStats {
        let slot = self.slot.lock();
        let mut stats = slot.stats.clone();
        stats.state = slot.limiter.state();
        stats
    }
}

/// Rate limit and retry orchestrator.
pub struct Engine {
    config: EngineConfig,
    limiters: DashMap<String, Arc<LimiterEntry>>,
    initialized: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Create an engine with no registered limiters.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            limiters: DashMap::new(),
            initialized: AtomicBool::new(false),
            cleanup_task: Mutex::new(None),
        }
    }

    /// Validate `config` and register the limiters it declares.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let specs = config.limiters.clone();
        let engine = Self::new(config);
        for spec in &specs {
            engine.create_limiter(spec.to_definition()?)?;
        }
        Ok(engine)
    }

    /// The configuration this engine runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start the periodic stale-stats cleanup. Calling it again is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.cleanup_task.lock();
        if task.is_some() {
            return;
        }

        let interval = Duration::from_millis(self.config.cleanup_interval_ms.max(1));
        let weak: Weak<Engine> = Arc::downgrade(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                let cleared = engine.cleanup_stale();
                if cleared > 0 {
                    debug!(cleared = cleared, "Zeroed stats of idle limiters");
                }
            }
        }));

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            interval_ms = self.config.cleanup_interval_ms,
            retention_ms = self.config.stats_retention_ms,
            "Engine started"
        );
    }

    /// Stop the cleanup task and drop the default limiter.
    pub fn close(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        self.limiters.remove(DEFAULT_LIMITER_ID);
        self.initialized.store(false, Ordering::SeqCst);
        info!("Engine closed");
    }

    /// Whether [`start`](Self::start) has run and [`close`](Self::close) has not.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Register a limiter and return its id.
    pub fn create_limiter(&self, definition: LimiterDefinition) -> Result<String> {
        let id = match &definition.id {
            Some(id) if id.trim().is_empty() => {
                return Err(PacerError::Config("limiter id must not be blank".to_string()))
            }
            Some(id) if id == DEFAULT_LIMITER_ID => {
                return Err(PacerError::Config(format!(
                    "limiter id '{}' is reserved",
                    DEFAULT_LIMITER_ID
                )))
            }
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        self.insert_limiter(id, definition)
    }

    fn insert_limiter(&self, id: String, definition: LimiterDefinition) -> Result<String> {
        match self.limiters.entry(id.clone()) {
            Entry::Occupied(_) => Err(PacerError::Config(format!(
                "limiter '{}' already exists",
                id
            ))),
            Entry::Vacant(vacant) => {
                let entry = LimiterEntry::build(&id, definition)?;
                info!(
                    limiter_id = %id,
                    name = %entry.definition.name,
                    strategy = %entry.definition.rate_limit.strategy,
                    retry = entry.retry.is_some(),
                    "Created limiter"
                );
                vacant.insert(Arc::new(entry));
                Ok(id)
            }
        }
    }

    fn entry(&self, id: &str) -> Option<Arc<LimiterEntry>> {
        self.limiters.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Check admission for one unit of work.
    ///
    /// Unknown ids are treated as unlimited.
    pub fn check_limit(&self, id: &str) -> RateLimitResult {
        self.admit(id, 1.0)
    }

    /// Check admission for `tokens` units of work.
    ///
    /// Fails with [`PacerError::Config`] when the weight is not a positive
    /// number, or exceeds a token bucket's capacity and so could never be
    /// admitted.
    pub fn check_limit_n(&self, id: &str, tokens: f64) -> Result<RateLimitResult> {
        if !tokens.is_finite() || tokens <= 0.0 {
            return Err(PacerError::Config(format!(
                "token weight must be a positive number, got {}",
                tokens
            )));
        }
        if let Some(entry) = self.entry(id) {
            entry.definition.rate_limit.validate_weight(tokens)?;
        }
        Ok(self.admit(id, tokens))
    }

    fn admit(&self, id: &str, tokens: f64) -> RateLimitResult {
        let Some(entry) = self.entry(id) else {
            trace!(limiter_id = %id, "Unknown limiter, admitting");
            return Admission::allow(u64::MAX, 0).into_result(id);
        };

        let admission = entry.check(tokens);
        trace!(
            limiter_id = %id,
            allowed = admission.allowed,
            remaining = admission.remaining,
            "Checked rate limit"
        );
        if !admission.allowed {
            debug!(
                limiter_id = %id,
                retry_after_ms = admission.retry_after_ms,
                "Rate limit exceeded"
            );
        }
        admission.into_result(id)
    }

    /// Run `operation` under limiter `id` and return its value.
    ///
    /// Fails with [`PacerError::RateLimited`] when admission is refused and
    /// `wait_on_limit` is off, or with [`PacerError::Operation`] carrying the
    /// last error and the retry history.
    pub async fn execute_with_limit<T, F, Fut>(&self, id: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_with_limit_detailed(id, operation)
            .await?
            .into_result()
    }

    /// Run `operation` under limiter `id` and return the full retry outcome.
    pub async fn execute_with_limit_detailed<T, F, Fut>(
        &self,
        id: &str,
        mut operation: F,
    ) -> Result<RetryResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let entry = self.entry(id);
        let started = Instant::now();

        if let Some(entry) = entry.as_ref().filter(|_| self.config.enable_rate_limit) {
            self.wait_for_admission(id, entry).await?;
        }
        let wait_ms = started.elapsed().as_millis() as u64;

        let policy = entry
            .as_ref()
            .and_then(|entry| entry.retry.as_ref())
            .filter(|_| self.config.enable_retry);
        let outcome = match policy {
            Some(policy) => policy.execute(operation).await,
            None => run_once(&mut operation).await,
        };

        if let Some(entry) = &entry {
            entry
                .slot
                .lock()
                .stats
                .record_execution(wait_ms, outcome.history.len(), outcome.success);
        }
        if !outcome.success {
            warn!(
                limiter_id = %id,
                attempts = outcome.total_attempts,
                retries = outcome.history.len(),
                "Operation failed"
            );
        }
        Ok(outcome)
    }

    async fn wait_for_admission(&self, id: &str, entry: &LimiterEntry) -> Result<()> {
        loop {
            let admission = entry.check(1.0);
            if admission.allowed {
                return Ok(());
            }

            let retry_after_ms = admission.retry_after_ms.unwrap_or(0);
            if !self.config.wait_on_limit {
                return Err(PacerError::RateLimited {
                    limiter_id: id.to_string(),
                    retry_after_ms,
                });
            }

            debug!(limiter_id = %id, retry_after_ms = retry_after_ms, "Waiting for admission");
            tokio::time::sleep(Duration::from_millis(retry_after_ms.max(1))).await;
        }
    }

    /// Run `operation` under the default limiter, creating it on first use.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.ensure_default_limiter()?;
        self.execute_with_limit(DEFAULT_LIMITER_ID, operation).await
    }

    fn ensure_default_limiter(&self) -> Result<()> {
        if self.limiters.contains_key(DEFAULT_LIMITER_ID) {
            return Ok(());
        }
        let definition = LimiterDefinition::new("default", self.config.default_rate_limit.clone())
            .with_description("Engine default limiter")
            .with_retry(self.config.default_retry.clone());
        match self.insert_limiter(DEFAULT_LIMITER_ID.to_string(), definition) {
            // Lost a race with another caller creating it.
            Err(PacerError::Config(_)) if self.limiters.contains_key(DEFAULT_LIMITER_ID) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    /// Stats for one limiter.
    pub fn get_stats(&self, id: &str) -> Option<LimiterStats> {
        self.entry(id).map(|entry| entry.snapshot())
    }

    /// Stats for every limiter, highest priority first, then by name.
    pub fn list_stats(&self) -> Vec<LimiterStats> {
        let entries: Vec<Arc<LimiterEntry>> =
            self.limiters.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut stats: Vec<LimiterStats> = entries.iter().map(|entry| entry.snapshot()).collect();
        stats.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        stats
    }

    /// Engine-wide totals.
    pub fn get_status(&self) -> EngineStatus {
        let mut status = EngineStatus {
            initialized: self.is_initialized(),
            ..Default::default()
        };
        for stats in self.list_stats() {
            status.add(&stats);
        }
        status
    }

    /// Ids of every registered limiter.
    pub fn limiter_ids(&self) -> Vec<String> {
        self.limiters.iter().map(|entry| entry.key().clone()).collect()
    }

    /// The definition a limiter was created with.
    pub fn definition(&self, id: &str) -> Option<LimiterDefinition> {
        self.entry(id).map(|entry| entry.definition.clone())
    }

    /// Remove a limiter. Returns false if it did not exist.
    pub fn delete_limiter(&self, id: &str) -> bool {
        let removed = self.limiters.remove(id).is_some();
        if removed {
            info!(limiter_id = %id, "Deleted limiter");
        }
        removed
    }

    /// Recreate a limiter's strategy with fresh state and zero its stats.
    ///
    /// Returns false if the limiter does not exist.
    pub fn reset_limiter(&self, id: &str) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };

        let limiter = match RateLimiter::new(&entry.definition.rate_limit) {
            Ok(limiter) => limiter,
            Err(e) => {
                warn!(limiter_id = %id, error = %e, "Failed to rebuild limiter");
                return false;
            }
        };

        let mut slot = entry.slot.lock();
        let state = limiter.state();
        slot.limiter = limiter;
        slot.stats.clear(state);
        slot.last_request = None;
        drop(slot);

        info!(limiter_id = %id, "Reset limiter");
        true
    }

    /// Zero the stats of limiters idle for longer than `stats_retention_ms`.
    ///
    /// Returns how many limiters were cleared.
    pub fn cleanup_stale(&self) -> usize {
        let retention = Duration::from_millis(self.config.stats_retention_ms);
        let now = Instant::now();
        let entries: Vec<Arc<LimiterEntry>> =
            self.limiters.iter().map(|entry| Arc::clone(entry.value())).collect();

        let mut cleared = 0;
        for entry in entries {
            let mut slot = entry.slot.lock();
            let idle = slot
                .last_request
                .map(|last| now.saturating_duration_since(last) > retention)
                .unwrap_or(false);
            if idle {
                slot.limiter.clear_counts();
                let state = slot.limiter.state_at(now);
                slot.stats.clear(state);
                slot.last_request = None;
                cleared += 1;
            }
        }
        cleared
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_once<T, F, Fut>(operation: &mut F) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    let (result, error) = match operation().await {
        Ok(value) => (Some(value), None),
        Err(error) => (None, Some(error)),
    };
    RetryResult {
        success: result.is_some(),
        result,
        error,
        total_attempts: 1,
        total_duration_ms: started.elapsed().as_millis() as u64,
        history: Vec::new(),
    }
}
