// src/storage/mod.rs

//! Shared counter store.
//!
//! Every primitive here is a single atomic unit at the store. Algorithms never
//! read state in one call and write it back in another, so any number of
//! workers (in this process or others) can hit the same key without lost
//! updates.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{StoreConfig, TokenBucketConfig};
use crate::error::{Result, StoreResult};

/// Result of one atomic prune/count/insert on a request log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOutcome {
    pub admitted: bool,
    /// Entries in the log after the operation
    pub count: u64,
    /// Oldest entry still inside the window
    pub oldest_ms: Option<u64>,
}

/// Persisted token bucket state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_ms: u64,
}

/// Result of one atomic refill-and-take on a token bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketOutcome {
    pub admitted: bool,
    /// Tokens left after the operation
    pub tokens: f64,
}

/// Core trait that all counter stores must implement
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Add one to the counter at `key`, creating it with `ttl` if absent.
    /// Returns the new count.
    async fn increment_window(&self, key: &str, ttl: Duration) -> StoreResult<u64>;

    /// Drop log entries at or before `now_ms - window`, then append `now_ms`
    /// only if fewer than `limit` entries remain.
    async fn record_in_log(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> StoreResult<LogOutcome>;

    /// Refill the bucket for the time elapsed since its last update and take
    /// one token if a whole token is available. The refill time always
    /// advances to `now_ms`, admitted or not.
    async fn take_token(
        &self,
        key: &str,
        now_ms: u64,
        bucket: &TokenBucketConfig,
    ) -> StoreResult<BucketOutcome>;

    /// Requests counted for `key` right now: the fixed window counter of the
    /// current window if there is one, otherwise the log entries inside the
    /// trailing window.
    async fn current_count(&self, key: &str, now_ms: u64, window: Duration) -> StoreResult<u64>;

    /// Raw token bucket state, `None` if the bucket is absent (i.e. full).
    async fn bucket_state(&self, key: &str) -> StoreResult<Option<BucketState>>;

    /// Delete all state for `key`, fixed window sub-keys included. Returns the
    /// number of records removed.
    async fn reset(&self, key: &str) -> StoreResult<u64>;

    /// Keys with live state that start with `prefix`, sub-keys folded into
    /// their base key, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Cheap liveness probe
    async fn ping(&self) -> StoreResult<()>;
}

/// Open the store described by `config`.
pub async fn connect(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match config {
        StoreConfig::Redis(redis) => Arc::new(RedisStore::new(redis.clone()).await?),
        StoreConfig::Memory(memory) => Arc::new(MemoryStore::with_clock(memory.clone(), clock)),
    };
    Ok(store)
}

/// Whole milliseconds, at least 1, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests;
