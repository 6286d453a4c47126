// src/tests/limiter_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

use super::{ip_key, limiter};
use crate::clock::Clock;
use crate::config::{AdmissionConfig, FailureMode};
use crate::limiter::{Evaluation, RateLimiter};
use crate::policy::{PolicySpec, MAX_WINDOW_SECONDS};
use crate::resilience::{CircuitBreakerConfig, CircuitState};
use crate::test_utils::{memory_store, policy, FailingStore, ManualClock};

const NOW: u64 = 1_700_000_000_000;

#[tokio::test]
async fn test_healthy_store_decides() {
    let clock = ManualClock::at(NOW);
    let limiter = limiter(memory_store(&clock), &clock, FailureMode::FailClosed);
    let policy = policy(PolicySpec::fixed_window(1, 60));
    let key = ip_key(&policy, "10.0.0.1");

    let first = limiter.check(&policy, &key).await;
    assert!(matches!(first, Evaluation::Decided(s) if s.allowed && s.remaining == 0));

    let second = limiter.check(&policy, &key).await;
    assert!(matches!(second, Evaluation::Decided(s) if !s.allowed));
}

#[tokio::test]
#[traced_test]
async fn test_fail_open_allows_and_warns() {
    let clock = ManualClock::at(NOW);
    let store = Arc::new(FailingStore::refusing());
    let limiter = limiter(store.clone(), &clock, FailureMode::FailOpen);
    let policy = policy(PolicySpec::sliding_window(3, 10));

    let evaluation = limiter.check(&policy, &ip_key(&policy, "10.0.0.1")).await;
    assert_eq!(
        evaluation,
        Evaluation::Degraded {
            allowed: true,
            limit: 3,
            at_ms: NOW,
        }
    );
    assert_eq!(store.calls(), 1, "a failed store call is never retried");
    assert!(logs_contain("Counter store unavailable"));
}

#[tokio::test]
async fn test_fail_closed_denies() {
    let clock = ManualClock::at(NOW);
    let store = Arc::new(FailingStore::refusing());
    let limiter = limiter(store, &clock, FailureMode::FailClosed);
    let policy = policy(PolicySpec::token_bucket(5.0, 1.0));

    let evaluation = limiter.check(&policy, &ip_key(&policy, "10.0.0.1")).await;
    assert_eq!(
        evaluation,
        Evaluation::Degraded {
            allowed: false,
            limit: 5,
            at_ms: NOW,
        }
    );
}

#[tokio::test]
async fn test_slow_store_is_bounded_by_timeout() {
    let clock = ManualClock::at(NOW);
    let store = Arc::new(FailingStore::hanging(Duration::from_secs(5)));
    let config = AdmissionConfig {
        store_timeout: Duration::from_millis(20),
        ..AdmissionConfig::default()
    };
    let limiter = RateLimiter::with_clock(store, Arc::new(clock.clone()), &config);
    let policy = policy(PolicySpec::fixed_window(10, 60));

    let started = std::time::Instant::now();
    let evaluation = limiter.check(&policy, &ip_key(&policy, "10.0.0.1")).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(evaluation.allowed());
    assert!(matches!(evaluation, Evaluation::Degraded { .. }));
}

#[tokio::test]
async fn test_open_circuit_skips_the_store() {
    let clock = ManualClock::at(NOW);
    let store = Arc::new(FailingStore::refusing());
    let config = AdmissionConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 1,
        },
        ..AdmissionConfig::default()
    };
    let limiter = RateLimiter::with_clock(store.clone(), Arc::new(clock.clone()), &config);
    let policy = policy(PolicySpec::fixed_window(10, 60));
    let key = ip_key(&policy, "10.0.0.1");

    for _ in 0..5 {
        assert!(limiter.check(&policy, &key).await.allowed());
    }
    assert_eq!(store.calls(), 2);
    assert_eq!(limiter.circuit_state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_limiter_reads_clock_once_per_check() {
    let clock = ManualClock::at(NOW);
    let limiter = limiter(memory_store(&clock), &clock, FailureMode::FailOpen);
    let policy = policy(PolicySpec::fixed_window(5, 60));

    let status = match limiter.check(&policy, &ip_key(&policy, "10.0.0.9")).await {
        Evaluation::Decided(status) => status,
        other => panic!("expected a decision, got {:?}", other),
    };
    let window_ms = 60_000;
    assert_eq!(status.reset_at_ms, (clock.now_millis() / window_ms + 1) * window_ms);
}

#[tokio::test]
async fn test_longest_allowed_policies_decide() {
    let clock = ManualClock::at(NOW);
    let limiter = limiter(memory_store(&clock), &clock, FailureMode::FailClosed);

    for spec in [
        PolicySpec::fixed_window(5, MAX_WINDOW_SECONDS),
        PolicySpec::sliding_window(5, MAX_WINDOW_SECONDS),
        PolicySpec::token_bucket(999.0, 1000.0 / MAX_WINDOW_SECONDS as f64),
    ] {
        let policy = policy(spec.clone());
        let evaluation = limiter.check(&policy, &ip_key(&policy, "10.0.0.1")).await;
        match evaluation {
            Evaluation::Decided(status) => {
                assert!(status.allowed, "{:?}", spec);
                assert!(status.reset_at_ms > NOW, "{:?}", spec);
                assert!(status.reset_at_ms < u64::MAX / 2, "{:?}", spec);
            }
            other => panic!("{:?} was not decided: {:?}", spec, other),
        }
    }
}
