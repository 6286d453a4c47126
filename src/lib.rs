// library entry
pub mod admin;
pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod interceptor;
pub mod key;
pub mod limiter;
pub mod logging;
pub mod policy;
pub mod resilience;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use admin::AdminSurface;
pub use algorithms::{RateLimitAlgorithm, RateLimitStatus};
pub use clock::{Clock, SystemClock};
pub use config::{AdmissionConfig, FailureMode, StoreConfig};
pub use error::{AdmissionError, Result, StoreError};
pub use interceptor::{Admission, AdmissionLayer};
pub use key::RateLimitKey;
pub use limiter::{Evaluation, RateLimiter};
pub use logging::init as init_logging;
pub use policy::{PolicyRegistry, PolicySpec, RateLimitPolicy, RouteId};
pub use storage::CounterStore;
