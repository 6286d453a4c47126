//! Time source for the admission layer.
//!
//! All algorithms work in epoch milliseconds. The limiter reads the clock once
//! per evaluation and hands that instant to the counter store, so a single
//! decision never mixes two readings.

use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Instances behind one store should keep their clocks NTP-synchronised; the
/// windows are computed from the caller's time, not the store's.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis() as u64
    }
}
