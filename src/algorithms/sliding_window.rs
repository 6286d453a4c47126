// src/algorithms/sliding_window.rs

use async_trait::async_trait;

use crate::algorithms::{RateLimitAlgorithm, RateLimitStatus};
use crate::config::SlidingWindowConfig;
use crate::error::StoreResult;
use crate::storage::{millis, CounterStore};

/// Sliding Window rate limiting algorithm
///
/// Keeps an exact log of admitted request timestamps per key. A request is
/// admitted only if fewer than `max_requests` entries fall strictly inside
/// `(now - window, now]`, so no trailing window ever holds more than the
/// quota. Denied requests are not logged.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    config: SlidingWindowConfig,
}

impl SlidingWindow {
    pub fn new(config: SlidingWindowConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindow {
    async fn check_and_record(
        &self,
        store: &dyn CounterStore,
        key: &str,
        now_ms: u64,
    ) -> StoreResult<RateLimitStatus> {
        let outcome = store
            .record_in_log(key, now_ms, self.config.window, self.config.max_requests)
            .await?;

        // capacity frees up when the oldest logged request leaves the window
        let window_ms = millis(self.config.window);
        let reset_at_ms = outcome.oldest_ms.unwrap_or(now_ms).saturating_add(window_ms);

        Ok(RateLimitStatus {
            allowed: outcome.admitted,
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(outcome.count),
            reset_at_ms,
        })
    }
}
