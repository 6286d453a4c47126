//! Operator reads and resets over the counter store.
//!
//! Not on the request path: store errors are returned to the operator
//! instead of going through the failure mode.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::clock::Clock;
use crate::error::{AdmissionError, Result};
use crate::key::RateLimitKey;
use crate::storage::{BucketState, CounterStore};

#[derive(Debug, Clone)]
pub struct AdminSurface {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl AdminSurface {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Requests currently counted for `key` in a window of `window_seconds`
    pub async fn current_count(&self, key: &RateLimitKey, window_seconds: u64) -> Result<u64> {
        if window_seconds == 0 {
            return Err(AdmissionError::Config(
                "window_seconds must be greater than zero".to_string(),
            ));
        }
        let count = self
            .store
            .current_count(
                key.as_str(),
                self.clock.now_millis(),
                Duration::from_secs(window_seconds),
            )
            .await?;
        Ok(count)
    }

    /// Token bucket state for `key`, `None` meaning full
    pub async fn bucket(&self, key: &RateLimitKey) -> Result<Option<BucketState>> {
        Ok(self.store.bucket_state(key.as_str()).await?)
    }

    /// Forget everything counted for `key`; the next requests see a fresh key
    pub async fn reset(&self, key: &RateLimitKey) -> Result<u64> {
        let removed = self.store.reset(key.as_str()).await?;
        info!(key = %key, removed, "Rate limit key reset");
        Ok(removed)
    }

    /// Keys with live state under `prefix`
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<RateLimitKey>> {
        let keys = self.store.keys_with_prefix(prefix).await?;
        Ok(keys.into_iter().map(RateLimitKey::from_raw).collect())
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.store.ping().await?)
    }
}
