// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AdmissionError, Result};
use crate::resilience::CircuitBreakerConfig;

/// Configuration for fixed window algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    /// Maximum number of requests allowed in the window
    pub max_requests: u64,

    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

/// Configuration for sliding window algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Maximum number of requests allowed in any trailing window
    pub max_requests: u64,

    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

/// Configuration for token bucket algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Capacity of the token bucket
    pub capacity: f64,

    /// Rate at which tokens are refilled (tokens per second)
    pub refill_rate: f64,
}

impl TokenBucketConfig {
    /// Time for an empty bucket to refill completely. A bucket idle this long
    /// is indistinguishable from a fresh one, so the store may drop it.
    pub fn idle_ttl(&self) -> Duration {
        let secs = (self.capacity / self.refill_rate).ceil().max(1.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    100_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

/// Which counter store backs the limiter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    Redis(RedisConfig),
    Memory(InMemoryConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory(InMemoryConfig::default())
    }
}

/// What to do with a request when the counter store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Admit the request and log a warning
    #[default]
    FailOpen,
    /// Reject the request with the policy's deny response
    FailClosed,
}

impl FromStr for FailureMode {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail_open" | "fail-open" => Ok(FailureMode::FailOpen),
            "closed" | "fail_closed" | "fail-closed" => Ok(FailureMode::FailClosed),
            other => Err(AdmissionError::Config(format!(
                "unknown failure mode '{}', expected 'open' or 'closed'",
                other
            ))),
        }
    }
}

/// Top-level settings for the admission layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub store: StoreConfig,

    /// Upper bound on a single counter store call
    #[serde(default = "default_store_timeout", with = "duration_serde")]
    pub store_timeout: Duration,

    #[serde(default)]
    pub failure_mode: FailureMode,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// JSON route table with the per-route policies
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
}

fn default_store_timeout() -> Duration {
    Duration::from_millis(250)
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            store_timeout: default_store_timeout(),
            failure_mode: FailureMode::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            policy_file: None,
        }
    }
}

impl AdmissionConfig {
    /// Build the configuration from `ADMISSION_*` environment variables.
    ///
    /// Unset variables keep their defaults. Call `dotenv().ok()` first to pick
    /// up a local `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ADMISSION_REDIS_URL") {
            config.store = StoreConfig::Redis(RedisConfig {
                url,
                connection_timeout: default_conn_timeout(),
            });
        }

        if let Some(raw) = lookup("ADMISSION_STORE_TIMEOUT_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                AdmissionError::Config(format!("ADMISSION_STORE_TIMEOUT_MS is not a number: {}", raw))
            })?;
            if millis == 0 {
                return Err(AdmissionError::Config(
                    "ADMISSION_STORE_TIMEOUT_MS must be greater than zero".to_string(),
                ));
            }
            config.store_timeout = Duration::from_millis(millis);
        }

        if let Some(mode) = lookup("ADMISSION_FAILURE_MODE") {
            config.failure_mode = mode.parse()?;
        }

        if let Some(path) = lookup("ADMISSION_POLICY_FILE") {
            config.policy_file = Some(PathBuf::from(path));
        }

        Ok(config)
    }
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
