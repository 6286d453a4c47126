// src/limiter.rs

//! Rate limit evaluation: one bounded, breaker-guarded store call per request.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::algorithms::{algorithm_for, RateLimitStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::{AdmissionConfig, FailureMode};
use crate::error::{Result, StoreError};
use crate::key::RateLimitKey;
use crate::policy::RateLimitPolicy;
use crate::resilience::{CircuitBreaker, CircuitState};
use crate::storage::{self, CounterStore};

/// What the limiter concluded for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The store answered
    Decided(RateLimitStatus),
    /// The store could not answer and the failure mode decided at `at_ms`
    Degraded {
        allowed: bool,
        limit: u64,
        at_ms: u64,
    },
}

impl Evaluation {
    pub fn allowed(&self) -> bool {
        match self {
            Evaluation::Decided(status) => status.allowed,
            Evaluation::Degraded { allowed, .. } => *allowed,
        }
    }

    pub fn limit(&self) -> u64 {
        match self {
            Evaluation::Decided(status) => status.limit,
            Evaluation::Degraded { limit, .. } => *limit,
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    failure_mode: FailureMode,
    breaker: CircuitBreaker,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: &AdmissionConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()), config)
    }

    pub fn with_clock(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        config: &AdmissionConfig,
    ) -> Self {
        Self {
            store,
            clock,
            store_timeout: config.store_timeout,
            failure_mode: config.failure_mode,
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
        }
    }

    /// Open the configured store and build a limiter on top of it
    pub async fn connect(config: &AdmissionConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let store = storage::connect(&config.store, Arc::clone(&clock)).await?;
        Ok(Self::with_clock(store, clock, config))
    }

    pub fn store(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.store)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.get_state().await
    }

    /// Decide on one request for `key` under `policy`, recording it.
    ///
    /// Never fails: store errors, timeouts and an open circuit are resolved by
    /// the failure mode. The store call is not retried.
    pub async fn check(&self, policy: &RateLimitPolicy, key: &RateLimitKey) -> Evaluation {
        let now_ms = self.clock.now_millis();
        let algorithm = algorithm_for(policy.limit());

        let attempt = self
            .breaker
            .call(async {
                match timeout(
                    self.store_timeout,
                    algorithm.check_and_record(self.store.as_ref(), key.as_str(), now_ms),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(self.store_timeout)),
                }
            })
            .await;

        match attempt {
            Ok(status) => Evaluation::Decided(status),
            Err(err) => {
                let allowed = self.failure_mode == FailureMode::FailOpen;
                warn!(
                    key = %key,
                    error = %err,
                    failure_mode = ?self.failure_mode,
                    allowed,
                    "Counter store unavailable, applying failure mode"
                );
                Evaluation::Degraded {
                    allowed,
                    limit: policy.quota(),
                    at_ms: now_ms,
                }
            }
        }
    }
}
