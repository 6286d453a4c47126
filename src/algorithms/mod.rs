// src/algorithms/mod.rs

pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

pub use self::fixed_window::FixedWindow;
pub use self::sliding_window::SlidingWindow;
pub use self::token_bucket::TokenBucket;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::StoreResult;
use crate::policy::Limit;
use crate::storage::CounterStore;

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request was admitted
    pub allowed: bool,

    /// Requests (or whole tokens) the policy grants per window
    pub limit: u64,

    /// What is left after this request
    pub remaining: u64,

    /// Epoch millis at which capacity next frees up
    pub reset_at_ms: u64,
}

/// Core trait that all rate limiting algorithms must implement
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + Debug {
    /// Decide on one request for `key` and record it, in a single atomic
    /// store operation.
    async fn check_and_record(
        &self,
        store: &dyn CounterStore,
        key: &str,
        now_ms: u64,
    ) -> StoreResult<RateLimitStatus>;
}

/// The algorithm a validated limit runs with
pub fn algorithm_for(limit: &Limit) -> Box<dyn RateLimitAlgorithm> {
    match limit {
        Limit::FixedWindow(config) => Box::new(FixedWindow::new(config.clone())),
        Limit::SlidingWindow(config) => Box::new(SlidingWindow::new(config.clone())),
        Limit::TokenBucket(config) => Box::new(TokenBucket::new(config.clone())),
    }
}

#[cfg(test)]
mod tests;
