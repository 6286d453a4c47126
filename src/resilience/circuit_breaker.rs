use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::duration_serde;
use crate::error::{StoreError, StoreResult};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls flow normally
    Closed,
    /// Store calls are skipped until the reset timeout passes
    Open,
    /// A limited number of trial calls are let through to test recovery
    HalfOpen,
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive store failures before the circuit opens
    pub failure_threshold: usize,
    /// How long the circuit stays open before trial calls are allowed
    #[serde(with = "duration_serde")]
    pub reset_timeout: Duration,
    /// Consecutive trial successes needed to close the circuit again. Also
    /// the number of trial calls let through per half-open round.
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: usize,
    successes: usize,
    /// Trial calls admitted in the current half-open round
    trials: usize,
    /// When the circuit opened, or when the current half-open round began
    opened_at: Option<Instant>,
}

/// Guards the counter store during an outage.
///
/// While open, calls fail fast with [`StoreError::CircuitOpen`] instead of
/// waiting out the store timeout on every request. The caller's failure mode
/// then decides what happens to the request.
///
/// A closed circuit with no failure streak is checked under the read lock
/// only, so healthy traffic does not serialize on the breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<Inner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                trials: 0,
                opened_at: None,
            }),
            config,
        }
    }

    fn trial_limit(&self) -> usize {
        self.config.success_threshold.max(1)
    }

    fn round_expired(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.reset_timeout)
    }

    /// Check if a store call may proceed.
    ///
    /// Open moves to HalfOpen once the reset timeout has elapsed. A half-open
    /// round admits at most `success_threshold` trial calls; if it has not
    /// settled within another reset timeout a new round starts.
    pub async fn allow_request(&self) -> bool {
        if self.inner.read().await.state == CircuitState::Closed {
            return true;
        }

        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if !self.round_expired(&inner) {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.successes = 0;
                inner.trials = 1;
                inner.opened_at = Some(Instant::now());
                debug!("Store circuit half-open, letting trial calls through");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trials < self.trial_limit() {
                    inner.trials += 1;
                    true
                } else if self.round_expired(&inner) {
                    // trials that never reported back, e.g. dropped requests
                    inner.successes = 0;
                    inner.trials = 1;
                    inner.opened_at = Some(Instant::now());
                    debug!("Store circuit half-open round restarted");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Hand back a trial slot for a call that neither proved nor disproved
    /// store health.
    async fn release_trial(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == CircuitState::HalfOpen {
            inner.trials = inner.trials.saturating_sub(1);
        }
    }

    pub async fn record_success(&self) {
        {
            let inner = self.inner.read().await;
            if inner.state == CircuitState::Closed && inner.failures == 0 {
                return;
            }
        }

        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.trials = 0;
                    inner.opened_at = None;
                    debug!("Store circuit closed after successful trial calls");
                }
            }
            // a call admitted before the circuit opened finished late
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        failures = inner.failures,
                        "Store circuit opened after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.successes = 0;
                inner.trials = 0;
                warn!("Store circuit re-opened after failed trial call");
            }
            CircuitState::Open => {}
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Run a store call through the breaker and record its outcome.
    pub async fn call<T, F>(&self, operation: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if !self.allow_request().await {
            return Err(StoreError::CircuitOpen);
        }

        let result = operation.await;
        match &result {
            Ok(_) => self.record_success().await,
            // a full in-memory store is healthy, just busy
            Err(StoreError::Capacity(_)) => self.release_trial().await,
            Err(_) => self.record_failure().await,
        }
        result
    }
}
