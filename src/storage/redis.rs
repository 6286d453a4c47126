// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{millis, BucketOutcome, BucketState, CounterStore, LogOutcome};
use crate::config::{RedisConfig, TokenBucketConfig};
use crate::error::{StoreError, StoreResult};
use crate::key::{base_key, window_key, SUBKEY_SEPARATOR};
use crate::store_op;

// KEYS[1] counter, ARGV[1] ttl ms
const WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

// KEYS[1] log, ARGV: now ms, window ms, limit, member
const LOG_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
local admitted = 0
if count < limit then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[4])
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    count = count + 1
    admitted = 1
end
local oldest = -1
local head = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if head[2] then
    oldest = tonumber(head[2])
end
return {admitted, count, oldest}
"#;

// KEYS[1] bucket, ARGV: now ms, capacity, refill per second, idle ttl ms
const BUCKET_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local rate = tonumber(ARGV[3])
local state = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
    tokens = capacity
    ts = now
end
local elapsed = math.max(0, now - ts) / 1000
tokens = math.min(capacity, tokens + elapsed * rate)
local admitted = 0
if tokens >= 1 then
    tokens = tokens - 1
    admitted = 1
end
-- tostring keeps only 14 digits; 0.999... must not come back as 1
local encoded = string.format('%.17g', tokens)
redis.call('HSET', KEYS[1], 'tokens', encoded, 'ts', ARGV[1])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return {admitted, encoded}
"#;

// KEYS[1] current window counter, KEYS[2] log, ARGV[1] window floor
const COUNT_SCRIPT: &str = r#"
local counter = redis.call('GET', KEYS[1])
if counter then
    return tonumber(counter)
end
if redis.call('TYPE', KEYS[2]).ok == 'zset' then
    return redis.call('ZCOUNT', KEYS[2], '(' .. ARGV[1], '+inf')
end
return 0
"#;

const SCAN_BATCH: usize = 100;

#[derive(Clone)]
struct Scripts {
    window: Script,
    log: Script,
    bucket: Script,
    count: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            window: Script::new(WINDOW_SCRIPT),
            log: Script::new(LOG_SCRIPT),
            bucket: Script::new(BUCKET_SCRIPT),
            count: Script::new(COUNT_SCRIPT),
        }
    }
}

/// Counter store shared by every instance through one Redis.
///
/// Each primitive is one Lua script, so Redis runs it without interleaving
/// other clients' commands.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisConfig,
    scripts: Scripts,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.url)
            .field("connection_timeout", &self.config.connection_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connects to Redis, giving up after the configured connection timeout
    pub async fn new(config: RedisConfig) -> StoreResult<Self> {
        // Opening the client does not touch the network yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let connection =
            match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(result) => result.map_err(|e| StoreError::Connection(e.to_string()))?,
                Err(_) => {
                    return Err(StoreError::Connection(format!(
                        "Connection to Redis at {} timed out after {:?}",
                        config.url, config.connection_timeout
                    )));
                }
            };

        Ok(Self {
            connection,
            config,
            scripts: Scripts::load(),
        })
    }

    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(found)
    }
}

/// Escape glob metacharacters so a key is matched literally by SCAN MATCH
fn glob_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_window(&self, key: &str, ttl: Duration) -> StoreResult<u64> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        let result: redis::RedisResult<u64> = self
            .scripts
            .window
            .key(key)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await;
        store_op!("increment_window", key, result, elapsed_ms(started));
        Ok(result?)
    }

    async fn record_in_log(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
    ) -> StoreResult<LogOutcome> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        // a unique member keeps simultaneous requests in the same millisecond apart
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let result: redis::RedisResult<(i64, u64, i64)> = self
            .scripts
            .log
            .key(key)
            .arg(now_ms)
            .arg(millis(window))
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await;
        store_op!("record_in_log", key, result, elapsed_ms(started));

        let (admitted, count, oldest) = result?;
        Ok(LogOutcome {
            admitted: admitted == 1,
            count,
            oldest_ms: u64::try_from(oldest).ok(),
        })
    }

    async fn take_token(
        &self,
        key: &str,
        now_ms: u64,
        bucket: &TokenBucketConfig,
    ) -> StoreResult<BucketOutcome> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        let result: redis::RedisResult<(i64, String)> = self
            .scripts
            .bucket
            .key(key)
            .arg(now_ms)
            .arg(bucket.capacity)
            .arg(bucket.refill_rate)
            .arg(millis(bucket.idle_ttl()))
            .invoke_async(&mut conn)
            .await;
        store_op!("take_token", key, result, elapsed_ms(started));

        let (admitted, tokens) = result?;
        let tokens = tokens.parse::<f64>().map_err(|e| {
            StoreError::Serialization(format!("bucket {} holds bad token count: {}", key, e))
        })?;
        Ok(BucketOutcome {
            admitted: admitted == 1,
            tokens,
        })
    }

    async fn current_count(&self, key: &str, now_ms: u64, window: Duration) -> StoreResult<u64> {
        let window_ms = millis(window);
        let mut conn = self.connection.clone();
        let count: u64 = self
            .scripts
            .count
            .key(window_key(key, now_ms / window_ms))
            .key(key)
            .arg(now_ms.saturating_sub(window_ms))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn bucket_state(&self, key: &str) -> StoreResult<Option<BucketState>> {
        let mut conn = self.connection.clone();
        let (tokens, ts): (Option<f64>, Option<u64>) = redis::cmd("HMGET")
            .arg(key)
            .arg("tokens")
            .arg("ts")
            .query_async(&mut conn)
            .await?;
        Ok(match (tokens, ts) {
            (Some(tokens), Some(last_refill_ms)) => Some(BucketState {
                tokens,
                last_refill_ms,
            }),
            _ => None,
        })
    }

    async fn reset(&self, key: &str) -> StoreResult<u64> {
        let started = Instant::now();
        let mut doomed = self
            .scan(&format!("{}{}*", glob_escape(key), SUBKEY_SEPARATOR))
            .await?;
        doomed.push(key.to_string());

        let mut conn = self.connection.clone();
        let result: redis::RedisResult<u64> =
            redis::cmd("DEL").arg(&doomed).query_async(&mut conn).await;
        store_op!("reset", key, result, elapsed_ms(started));
        Ok(result?)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let stored = self.scan(&format!("{}*", glob_escape(prefix))).await?;
        let keys: BTreeSet<String> = stored
            .iter()
            .map(|stored| base_key(stored).to_string())
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let result: String = redis::cmd("PING").query_async(&mut conn).await?;
        if result == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Command(format!(
                "Unexpected response from Redis PING: {}",
                result
            )))
        }
    }
}
