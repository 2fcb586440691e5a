pub mod records;
pub mod sync;

use propsync_common::error::{PropsyncError, PropsyncResult};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Connection options from discrete parts, so passwords never need URL escaping.
pub fn connect_options(
    host: &str,
    port: u16,
    database: &str,
    user: &str,
    password: &str,
) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(host)
        .port(port)
        .database(database)
        .username(user)
        .password(password)
}

/// Parse a `postgres://` URL into connection options.
pub fn parse_database_url(database_url: &str) -> PropsyncResult<PgConnectOptions> {
    database_url
        .parse::<PgConnectOptions>()
        .map_err(|e| PropsyncError::Config(format!("invalid DATABASE_URL: {e}")))
}

/// Create a bounded Postgres connection pool.
pub async fn create_pool(options: PgConnectOptions, max_connections: u32) -> PropsyncResult<PgPool> {
    tracing::info!(max_connections, "connecting to database");
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .map_err(|e| PropsyncError::Database(e.to_string()))
}

/// Apply the embedded schema. Every statement is `if not exists`, so reruns are no-ops.
pub async fn migrate(pool: &PgPool) -> PropsyncResult<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| PropsyncError::Database(format!("apply schema: {e}")))?;
    tracing::info!("schema is up to date");
    Ok(())
}
