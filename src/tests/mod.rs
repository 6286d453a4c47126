// src/tests/mod.rs
//! End-to-end tests across policy, limiter, store and interceptor

mod interceptor_tests;
mod limiter_tests;

use http::Method;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{AdmissionConfig, FailureMode};
use crate::identity::Identifier;
use crate::key::RateLimitKey;
use crate::limiter::RateLimiter;
use crate::policy::{RateLimitPolicy, RouteId};
use crate::storage::CounterStore;
use crate::test_utils::ManualClock;

pub(crate) fn limiter(
    store: Arc<dyn CounterStore>,
    clock: &ManualClock,
    failure_mode: FailureMode,
) -> RateLimiter {
    let config = AdmissionConfig {
        failure_mode,
        ..AdmissionConfig::default()
    };
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    RateLimiter::with_clock(store, clock, &config)
}

/// Key for an IP caller on `GET /test`
pub(crate) fn ip_key(policy: &RateLimitPolicy, ip: &str) -> RateLimitKey {
    use crate::identity::{resolve_identifier, RequestMeta};

    let meta = RequestMeta {
        forwarded_for: Some(ip.to_string()),
        ..Default::default()
    };
    let identifier: Identifier = resolve_identifier(&meta, policy.identifier_type());
    RateLimitKey::build(policy, &RouteId::new(&Method::GET, "/test"), &identifier)
}
