use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,admission_control=trace
///
/// Set `ADMISSION_LOG_FORMAT=json` for one JSON object per line.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("ADMISSION_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true) // concurrent workers share keys
                        .with_line_number(true),
                )
                .init();
        }

        tracing::info!("Logging initialized");
    });
}

/// Macro for logging admission decisions
#[macro_export]
macro_rules! admission_event {
    ($route:expr, $key:expr, $allowed:expr, $limit:expr, $remaining:expr) => {
        tracing::debug!(
            route = $route,
            key = $key,
            allowed = $allowed,
            limit = $limit,
            remaining = $remaining,
            "Admission check"
        )
    };
}

/// Macro for logging store operations with timing
#[macro_export]
macro_rules! store_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Store operation"
        )
    };
}
