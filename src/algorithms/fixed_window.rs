// src/algorithms/fixed_window.rs

use async_trait::async_trait;

use crate::algorithms::{RateLimitAlgorithm, RateLimitStatus};
use crate::config::FixedWindowConfig;
use crate::error::StoreResult;
use crate::key::window_key;
use crate::storage::{millis, CounterStore};

/// Fixed Window rate limiting algorithm
///
/// Time is cut into aligned windows (`now / window`), each with its own
/// counter that expires with the window. Every request increments the
/// counter, denied ones included, and is admitted while the count stays at
/// or below `max_requests`.
///
/// A caller can get up to `2 * max_requests` through around a window
/// boundary: a full quota at the end of one window and another at the start
/// of the next. Routes that cannot tolerate that burst should use the
/// sliding window instead.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    config: FixedWindowConfig,
}

impl FixedWindow {
    pub fn new(config: FixedWindowConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RateLimitAlgorithm for FixedWindow {
    async fn check_and_record(
        &self,
        store: &dyn CounterStore,
        key: &str,
        now_ms: u64,
    ) -> StoreResult<RateLimitStatus> {
        let window_ms = millis(self.config.window);
        let window_id = now_ms / window_ms;

        let count = store
            .increment_window(&window_key(key, window_id), self.config.window)
            .await?;

        Ok(RateLimitStatus {
            allowed: count <= self.config.max_requests,
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(count),
            reset_at_ms: (window_id + 1).saturating_mul(window_ms),
        })
    }
}
