use propsync_common::error::{PropsyncError, PropsyncResult};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Where the warehouse lives. A full `DATABASE_URL` wins over the discrete parts.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    pub interval_minutes: u64,
    /// Per entity type, per run. `None` fetches everything in the window.
    pub row_limit: Option<u32>,
    pub lookback_days: u32,
    pub retry_backoff_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncSettings,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads the sync settings.
    pub fn from_env() -> PropsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let row_limit: u32 = parse_var_or("SYNC_ROW_LIMIT", 2000)?;
        let interval_minutes: u64 = parse_var_or("SYNC_INTERVAL", 5)?;
        if interval_minutes == 0 {
            return Err(PropsyncError::Config(
                "SYNC_INTERVAL must be at least 1 minute".to_string(),
            ));
        }

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
                host: get_var_or("DB_HOST", "localhost"),
                port: parse_var_or("DB_PORT", 5432)?,
                name: get_var_or("DB_NAME", "property_management"),
                user: get_var_or("DB_USER", "postgres"),
                password: get_var_or("DB_PASSWORD", ""),
                max_connections: parse_var_or("DB_MAX_CONNECTIONS", 20)?,
            },
            sync: SyncSettings {
                interval_minutes,
                row_limit: (row_limit > 0).then_some(row_limit),
                lookback_days: parse_var_or("SYNC_LOOKBACK_DAYS", 30)?,
                retry_backoff_secs: parse_var_or("SYNC_RETRY_BACKOFF_SECS", 60)?,
                fetch_timeout_secs: parse_var_or("SYNC_FETCH_TIMEOUT_SECS", 300)?,
            },
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var_or<T>(key: &str, default: T) -> PropsyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| PropsyncError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
