pub mod env;
pub mod tracing_init;

pub use env::{AppConfig, DatabaseConfig, SyncSettings};
pub use tracing_init::init_tracing;

/// Serialises tests that read or write process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
