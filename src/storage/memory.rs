// src/storage/memory.rs

// In-memory counter store (for tests and single-process deployments).
// Each primitive runs under one lock acquisition, which makes it atomic within
// this process only. Horizontally scaled instances must share a RedisStore.
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time;
use tracing::debug;

use super::{millis, BucketOutcome, BucketState, CounterStore, LogOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::{InMemoryConfig, TokenBucketConfig};
use crate::error::{StoreError, StoreResult};
use crate::key::{base_key, window_key, SUBKEY_SEPARATOR};

#[derive(Debug)]
enum Record {
    Counter(u64),
    Log(VecDeque<u64>),
    Bucket(BucketState),
}

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    record: Record,
    expires_at_ms: Option<u64>,
}

impl MemoryEntry {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_none_or(|at| at > now_ms)
    }
}

type Entries = HashMap<String, MemoryEntry>;

/// In-memory counter store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data: Arc<Mutex<Entries>>,
    config: InMemoryConfig,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates a new in-memory store driven by the wall clock
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates a new in-memory store whose expiry follows `clock`
    pub fn with_clock(config: InMemoryConfig, clock: Arc<dyn Clock>) -> Self {
        let data = Arc::new(Mutex::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        if config.use_background_task {
            // The sweeper holds a weak reference and stops once the store is dropped.
            // Outside a runtime, expired entries are still dropped lazily on access.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let weak = Arc::downgrade(&data);
                let interval = config.cleanup_interval;
                let clock = Arc::clone(&clock);
                handle.spawn(Self::sweep(weak, interval, clock));
            }
        }

        Self {
            data,
            config,
            clock,
        }
    }

    async fn sweep(data: Weak<Mutex<Entries>>, interval: Duration, clock: Arc<dyn Clock>) {
        let mut ticker = time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(data) = data.upgrade() else {
                break;
            };
            let removed = match data.lock() {
                Ok(mut entries) => Self::purge_expired(&mut entries, clock.now_millis()),
                Err(_) => break,
            };
            if removed > 0 {
                debug!(removed, "Swept expired counter records");
            }
        }
    }

    fn purge_expired(entries: &mut Entries, now_ms: u64) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now_ms));
        before - entries.len()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Entries>> {
        self.data.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of live records, for tests and diagnostics
    pub fn len(&self) -> StoreResult<usize> {
        let now = self.clock.now_millis();
        Ok(self.lock()?.values().filter(|e| e.is_live(now)).count())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Live entry for `key`, dropping it first if it has expired
    fn live_entry<'a>(entries: &'a mut Entries, key: &str, now_ms: u64) -> Option<&'a mut MemoryEntry> {
        if entries.get(key).is_some_and(|e| !e.is_live(now_ms)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    /// Make room for a new key, or fail if the store is full
    fn ensure_capacity(&self, entries: &mut Entries, now_ms: u64) -> StoreResult<()> {
        if entries.len() < self.config.max_entries {
            return Ok(());
        }
        Self::purge_expired(entries, now_ms);
        if entries.len() < self.config.max_entries {
            Ok(())
        } else {
            Err(StoreError::Capacity(self.config.max_entries))
        }
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::Command(format!("key {} holds a different record type", key))
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_window(&self, key: &str, ttl: Duration) -> StoreResult<u64> {
        let now = self.clock.now_millis();
        let mut entries = self.lock()?;

        if let Some(entry) = Self::live_entry(&mut entries, key, now) {
            return match &mut entry.record {
                Record::Counter(count) => {
                    *count += 1;
                    Ok(*count)
                }
                _ => Err(Self::wrong_type(key)),
            };
        }

        self.ensure_capacity(&mut entries, now)?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                record: Record::Counter(1),
                expires_at_ms: Some(now.saturating_add(millis(ttl))),
            },
        );
        Ok(1)
    }

    async fn record_in_log(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> StoreResult<LogOutcome> {
        let window_ms = millis(window);
        let floor = now_ms.saturating_sub(window_ms);
        let mut entries = self.lock()?;

        if Self::live_entry(&mut entries, key, self.clock.now_millis()).is_none() {
            if limit == 0 {
                return Ok(LogOutcome {
                    admitted: false,
                    count: 0,
                    oldest_ms: None,
                });
            }
            self.ensure_capacity(&mut entries, now_ms)?;
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    record: Record::Log(VecDeque::new()),
                    expires_at_ms: None,
                },
            );
        }

        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::Command(format!("log {} vanished", key)))?;
        let Record::Log(log) = &mut entry.record else {
            return Err(Self::wrong_type(key));
        };

        // entries exactly one window old no longer count
        while log.front().is_some_and(|&ts| ts <= floor) {
            log.pop_front();
        }

        let admitted = (log.len() as u64) < limit;
        if admitted {
            log.push_back(now_ms);
            entry.expires_at_ms = Some(now_ms.saturating_add(window_ms));
        }

        Ok(LogOutcome {
            admitted,
            count: log.len() as u64,
            oldest_ms: log.front().copied(),
        })
    }

    async fn take_token(
        &self,
        key: &str,
        now_ms: u64,
        bucket: &TokenBucketConfig,
    ) -> StoreResult<BucketOutcome> {
        let mut entries = self.lock()?;

        let previous = match Self::live_entry(&mut entries, key, self.clock.now_millis()) {
            Some(entry) => match entry.record {
                Record::Bucket(state) => Some(state),
                _ => return Err(Self::wrong_type(key)),
            },
            None => None,
        };
        if previous.is_none() {
            self.ensure_capacity(&mut entries, now_ms)?;
        }

        let state = previous.unwrap_or(BucketState {
            tokens: bucket.capacity,
            last_refill_ms: now_ms,
        });
        let elapsed_secs = now_ms.saturating_sub(state.last_refill_ms) as f64 / 1000.0;
        let mut tokens = (state.tokens + elapsed_secs * bucket.refill_rate).min(bucket.capacity);

        let admitted = tokens >= 1.0;
        if admitted {
            tokens -= 1.0;
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                record: Record::Bucket(BucketState {
                    tokens,
                    last_refill_ms: now_ms,
                }),
                expires_at_ms: Some(now_ms.saturating_add(millis(bucket.idle_ttl()))),
            },
        );

        Ok(BucketOutcome { admitted, tokens })
    }

    async fn current_count(&self, key: &str, now_ms: u64, window: Duration) -> StoreResult<u64> {
        let window_ms = millis(window);
        let clock_now = self.clock.now_millis();
        let mut entries = self.lock()?;

        let counter_key = window_key(key, now_ms / window_ms);
        if let Some(entry) = Self::live_entry(&mut entries, &counter_key, clock_now) {
            if let Record::Counter(count) = entry.record {
                return Ok(count);
            }
        }

        let floor = now_ms.saturating_sub(window_ms);
        match Self::live_entry(&mut entries, key, clock_now) {
            Some(MemoryEntry {
                record: Record::Log(log),
                ..
            }) => Ok(log.iter().filter(|&&ts| ts > floor).count() as u64),
            _ => Ok(0),
        }
    }

    async fn bucket_state(&self, key: &str) -> StoreResult<Option<BucketState>> {
        let now = self.clock.now_millis();
        let mut entries = self.lock()?;
        match Self::live_entry(&mut entries, key, now) {
            Some(MemoryEntry {
                record: Record::Bucket(state),
                ..
            }) => Ok(Some(*state)),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn reset(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.lock()?;
        let sub_prefix = format!("{}{}", key, SUBKEY_SEPARATOR);
        let before = entries.len();
        entries.retain(|stored, _| stored != key && !stored.starts_with(&sub_prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.now_millis();
        let entries = self.lock()?;
        let keys: BTreeSet<String> = entries
            .iter()
            .filter(|(stored, entry)| stored.starts_with(prefix) && entry.is_live(now))
            .map(|(stored, _)| base_key(stored).to_string())
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}
