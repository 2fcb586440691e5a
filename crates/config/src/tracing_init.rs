use tracing_subscriber::{fmt, EnvFilter};

/// Resolve the log filter: `RUST_LOG` first, then `LOG_LEVEL`, then `default_level`.
pub fn log_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber for the sync process.
///
/// Returns `false` when a subscriber was already installed (tests, embedding),
/// in which case the existing one keeps receiving events.
pub fn init_tracing(default_level: &str) -> bool {
    fmt()
        .with_env_filter(log_filter(default_level))
        .with_target(true)
        .try_init()
        .is_ok()
}
