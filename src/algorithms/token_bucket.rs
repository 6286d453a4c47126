// src/algorithms/token_bucket.rs

use async_trait::async_trait;

use crate::algorithms::{RateLimitAlgorithm, RateLimitStatus};
use crate::config::TokenBucketConfig;
use crate::error::StoreResult;
use crate::storage::CounterStore;

/// Token Bucket rate limiting algorithm
///
/// A bucket of up to `capacity` tokens refills continuously at
/// `refill_rate` tokens per second. Each admitted request takes one whole
/// token. A missing bucket counts as full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    config: TokenBucketConfig,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self { config }
    }

    /// When the next whole token will be available, or `now_ms` if the
    /// bucket is already full.
    fn next_token_at(&self, tokens: f64, now_ms: u64) -> u64 {
        if tokens >= self.config.capacity {
            return now_ms;
        }
        let missing = 1.0 - tokens.fract();
        let wait_ms = (missing / self.config.refill_rate * 1000.0).ceil();
        now_ms.saturating_add(wait_ms as u64)
    }
}

#[async_trait]
impl RateLimitAlgorithm for TokenBucket {
    async fn check_and_record(
        &self,
        store: &dyn CounterStore,
        key: &str,
        now_ms: u64,
    ) -> StoreResult<RateLimitStatus> {
        let outcome = store.take_token(key, now_ms, &self.config).await?;
        let tokens = outcome.tokens.max(0.0);

        Ok(RateLimitStatus {
            allowed: outcome.admitted,
            limit: self.config.capacity.floor() as u64,
            remaining: tokens.floor() as u64,
            reset_at_ms: self.next_token_at(tokens, now_ms),
        })
    }
}
