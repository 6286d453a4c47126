// src/resilience/mod.rs
//! Store outage handling.
//!
//! Admission decisions never retry a store call: a retried increment that
//! actually reached the store would count the request twice. Instead a
//! circuit breaker stops hammering a store that keeps failing, and the
//! configured failure mode decides the outcome of each affected request.

mod circuit_breaker;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
