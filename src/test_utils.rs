// src/test_utils.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{InMemoryConfig, TokenBucketConfig};
use crate::error::{StoreError, StoreResult};
use crate::policy::{PolicySpec, RateLimitPolicy};
use crate::storage::{BucketOutcome, BucketState, CounterStore, LogOutcome, MemoryStore};

/// Clock that only moves when a test moves it
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn at(now_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Memory store without a sweeper, expiring by `clock`
pub fn memory_store(clock: &ManualClock) -> Arc<MemoryStore> {
    let config = InMemoryConfig {
        max_entries: 10_000,
        use_background_task: false,
        cleanup_interval: Duration::from_secs(60),
    };
    Arc::new(MemoryStore::with_clock(config, Arc::new(clock.clone())))
}

/// How a [`FailingStore`] misbehaves
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    /// Every call fails at once with a connection error
    Refuse,
    /// Every call hangs this long before answering
    Hang(Duration),
}

/// Store that is down, counting how often it was asked anyway
#[derive(Debug)]
pub struct FailingStore {
    failure: Failure,
    calls: AtomicUsize,
}

impl FailingStore {
    pub fn refusing() -> Self {
        Self {
            failure: Failure::Refuse,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn hanging(for_: Duration) -> Self {
        Self {
            failure: Failure::Hang(for_),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn fail<T>(&self) -> StoreResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Failure::Hang(delay) = self.failure {
            tokio::time::sleep(delay).await;
        }
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

#[async_trait]
impl CounterStore for FailingStore {
    async fn increment_window(&self, _key: &str, _ttl: Duration) -> StoreResult<u64> {
        self.fail().await
    }

    async fn record_in_log(
        &self,
        _key: &str,
        _now_ms: u64,
        _window: Duration,
        _limit: u64,
    ) -> StoreResult<LogOutcome> {
        self.fail().await
    }

    async fn take_token(
        &self,
        _key: &str,
        _now_ms: u64,
        _bucket: &TokenBucketConfig,
    ) -> StoreResult<BucketOutcome> {
        self.fail().await
    }

    async fn current_count(&self, _key: &str, _now_ms: u64, _window: Duration) -> StoreResult<u64> {
        self.fail().await
    }

    async fn bucket_state(&self, _key: &str) -> StoreResult<Option<BucketState>> {
        self.fail().await
    }

    async fn reset(&self, _key: &str) -> StoreResult<u64> {
        self.fail().await
    }

    async fn keys_with_prefix(&self, _prefix: &str) -> StoreResult<Vec<String>> {
        self.fail().await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.fail().await
    }
}

pub fn policy(spec: PolicySpec) -> Arc<RateLimitPolicy> {
    Arc::new(RateLimitPolicy::try_from(spec).expect("test policy should be valid"))
}
