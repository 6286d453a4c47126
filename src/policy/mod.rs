// src/policy/mod.rs

//! Per-route admission policies.
//!
//! A route's policy is written declaratively as a [`PolicySpec`] (flat fields,
//! the shape operators put in the route table) and validated once at startup
//! into an immutable [`RateLimitPolicy`]. Validation failures are
//! configuration errors and stop the process from starting.

mod registry;

pub use registry::{PolicyRegistry, PolicyRegistryBuilder, RouteEntry, RouteId, RouteTable};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{FixedWindowConfig, SlidingWindowConfig, TokenBucketConfig};
use crate::error::{AdmissionError, Result};

/// Limiting algorithm named by a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[serde(alias = "FixedWindow")]
    FixedWindow,
    #[serde(alias = "SlidingWindow")]
    SlidingWindow,
    #[serde(alias = "TokenBucket")]
    TokenBucket,
}

/// How a caller is identified for quota purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    #[default]
    #[serde(alias = "IP")]
    Ip,
    #[serde(alias = "UserID")]
    UserId,
    #[serde(alias = "IPAndUserID")]
    IpAndUserId,
}

/// Declarative policy as attached to a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub algorithm: Algorithm,

    #[serde(default, alias = "window_seconds")]
    pub window_seconds: Option<i64>,

    #[serde(default, alias = "max_requests")]
    pub max_requests: Option<i64>,

    #[serde(default)]
    pub capacity: Option<f64>,

    #[serde(default, alias = "refill_rate_per_second")]
    pub refill_rate_per_second: Option<f64>,

    #[serde(default, alias = "identifier_type")]
    pub identifier_type: IdentifierType,

    #[serde(default = "default_key_prefix", alias = "key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_deny_message", alias = "deny_message")]
    pub deny_message: String,
}

/// Longest window a policy may use, about ten years. Anything longer would
/// overflow millisecond timestamps on the request path.
pub const MAX_WINDOW_SECONDS: i64 = 10 * 366 * 24 * 60 * 60;

fn default_key_prefix() -> String {
    "rate_limit".to_string()
}

fn default_deny_message() -> String {
    "Too many requests. Please try again later.".to_string()
}

impl PolicySpec {
    fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            window_seconds: None,
            max_requests: None,
            capacity: None,
            refill_rate_per_second: None,
            identifier_type: IdentifierType::default(),
            key_prefix: default_key_prefix(),
            deny_message: default_deny_message(),
        }
    }

    pub fn fixed_window(max_requests: i64, window_seconds: i64) -> Self {
        Self {
            window_seconds: Some(window_seconds),
            max_requests: Some(max_requests),
            ..Self::new(Algorithm::FixedWindow)
        }
    }

    pub fn sliding_window(max_requests: i64, window_seconds: i64) -> Self {
        Self {
            window_seconds: Some(window_seconds),
            max_requests: Some(max_requests),
            ..Self::new(Algorithm::SlidingWindow)
        }
    }

    pub fn token_bucket(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity: Some(capacity),
            refill_rate_per_second: Some(refill_rate_per_second),
            ..Self::new(Algorithm::TokenBucket)
        }
    }

    pub fn identified_by(mut self, identifier_type: IdentifierType) -> Self {
        self.identifier_type = identifier_type;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_deny_message(mut self, message: impl Into<String>) -> Self {
        self.deny_message = message.into();
        self
    }
}

/// Algorithm together with its numeric parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Limit {
    FixedWindow(FixedWindowConfig),
    SlidingWindow(SlidingWindowConfig),
    TokenBucket(TokenBucketConfig),
}

/// Validated, immutable policy for one route.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    limit: Limit,
    identifier_type: IdentifierType,
    key_prefix: String,
    deny_message: String,
}

impl RateLimitPolicy {
    pub fn limit(&self) -> &Limit {
        &self.limit
    }

    pub fn algorithm(&self) -> Algorithm {
        match self.limit {
            Limit::FixedWindow(_) => Algorithm::FixedWindow,
            Limit::SlidingWindow(_) => Algorithm::SlidingWindow,
            Limit::TokenBucket(_) => Algorithm::TokenBucket,
        }
    }

    pub fn identifier_type(&self) -> IdentifierType {
        self.identifier_type
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn deny_message(&self) -> &str {
        &self.deny_message
    }

    /// Value reported in `X-RateLimit-Limit`
    pub fn quota(&self) -> u64 {
        match &self.limit {
            Limit::FixedWindow(c) => c.max_requests,
            Limit::SlidingWindow(c) => c.max_requests,
            Limit::TokenBucket(c) => c.capacity.floor() as u64,
        }
    }
}

impl TryFrom<PolicySpec> for RateLimitPolicy {
    type Error = AdmissionError;

    fn try_from(spec: PolicySpec) -> Result<Self> {
        if spec.key_prefix.trim().is_empty() {
            return Err(AdmissionError::Config("keyPrefix must not be empty".to_string()));
        }

        let limit = match spec.algorithm {
            Algorithm::FixedWindow => {
                let (max_requests, window) = window_params(&spec)?;
                Limit::FixedWindow(FixedWindowConfig {
                    max_requests,
                    window,
                })
            }
            Algorithm::SlidingWindow => {
                let (max_requests, window) = window_params(&spec)?;
                Limit::SlidingWindow(SlidingWindowConfig {
                    max_requests,
                    window,
                })
            }
            Algorithm::TokenBucket => {
                let capacity = positive_rate("capacity", spec.capacity)?;
                let refill_rate = positive_rate("refillRatePerSecond", spec.refill_rate_per_second)?;
                // the refill time bounds how long bucket state is kept
                let refill_secs = capacity / refill_rate;
                if !refill_secs.is_finite() || refill_secs > MAX_WINDOW_SECONDS as f64 {
                    return Err(AdmissionError::Config(format!(
                        "capacity / refillRatePerSecond must be at most {} seconds, got {}",
                        MAX_WINDOW_SECONDS, refill_secs
                    )));
                }
                Limit::TokenBucket(TokenBucketConfig {
                    capacity,
                    refill_rate,
                })
            }
        };

        Ok(Self {
            limit,
            identifier_type: spec.identifier_type,
            key_prefix: spec.key_prefix,
            deny_message: spec.deny_message,
        })
    }
}

fn window_params(spec: &PolicySpec) -> Result<(u64, Duration)> {
    let window_seconds = spec.window_seconds.ok_or_else(|| {
        AdmissionError::Config(format!("{:?} policy requires windowSeconds", spec.algorithm))
    })?;
    if window_seconds <= 0 {
        return Err(AdmissionError::Config(format!(
            "windowSeconds must be > 0, got {}",
            window_seconds
        )));
    }
    if window_seconds > MAX_WINDOW_SECONDS {
        return Err(AdmissionError::Config(format!(
            "windowSeconds must be at most {}, got {}",
            MAX_WINDOW_SECONDS, window_seconds
        )));
    }

    let max_requests = spec.max_requests.ok_or_else(|| {
        AdmissionError::Config(format!("{:?} policy requires maxRequests", spec.algorithm))
    })?;
    if max_requests < 0 {
        return Err(AdmissionError::Config(format!(
            "maxRequests must be >= 0, got {}",
            max_requests
        )));
    }

    Ok((max_requests as u64, Duration::from_secs(window_seconds as u64)))
}

fn positive_rate(field: &str, value: Option<f64>) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        Some(v) => Err(AdmissionError::Config(format!(
            "{} must be a finite number > 0, got {}",
            field, v
        ))),
        None => Err(AdmissionError::Config(format!(
            "TokenBucket policy requires {}",
            field
        ))),
    }
}
