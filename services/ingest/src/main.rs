mod connector;
mod entities;
mod orchestrator;
mod projector;
mod resolver;
mod salesforce;
mod syncer;
#[cfg(test)]
mod test_support;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use propsync_common::error::PropsyncResult;
use propsync_config::{init_tracing, AppConfig, DatabaseConfig};
use propsync_db::records::pg_repository::PgRecordStore;
use propsync_db::records::repositories::RecordStore;
use propsync_db::sync::models::WatermarkDefault;
use propsync_db::sync::pg_repository::PgWatermarkRepository;
use propsync_db::sync::repositories::WatermarkRepository;

use crate::entities::catalog;
use crate::orchestrator::Orchestrator;
use crate::salesforce::client::{SalesforceClient, SalesforceClientConfig};
use crate::syncer::{EntitySyncer, SyncOptions, SyncWindow};

#[derive(Parser)]
#[command(name = "propsync-ingest")]
#[command(about = "Incremental sync of CRM records into the property warehouse")]
#[command(long_about = None)]
struct Cli {
    /// Defaults to `full` when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
enum Commands {
    /// Backfill every entity type from 2000-01-01, without a row cap
    Full,
    /// Sync records modified in the last HOURS hours
    Incremental {
        #[arg(default_value_t = 24)]
        hours: u32,
    },
    /// Watermark-driven sync every SYNC_INTERVAL minutes until Ctrl-C
    Continuous,
    /// Print per-entity watermarks and row counts
    Status,
    /// Apply the warehouse schema and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = AppConfig::from_env().expect("failed to load configuration");
    init_tracing(&config.log_level);

    tracing::info!(service = "propsync-ingest", "starting");

    let command = cli.command.unwrap_or(Commands::Full);
    if let Err(e) = run(command, config).await {
        tracing::error!(error = %e, ?command, "propsync-ingest failed");
        std::process::exit(1);
    }
}

async fn connect(db: &DatabaseConfig) -> PropsyncResult<PgPool> {
    let options = match &db.url {
        Some(url) => propsync_db::parse_database_url(url)?,
        None => propsync_db::connect_options(&db.host, db.port, &db.name, &db.user, &db.password),
    };
    propsync_db::create_pool(options, db.max_connections).await
}

fn sync_options(command: Commands, config: &AppConfig) -> SyncOptions {
    let fetch_timeout = config.sync.fetch_timeout();
    match command {
        Commands::Full => SyncOptions {
            window: SyncWindow::Since(WatermarkDefault::epoch().resolve(Utc::now())),
            row_limit: None,
            fetch_timeout,
        },
        Commands::Incremental { hours } => SyncOptions {
            window: SyncWindow::Since(Utc::now() - chrono::Duration::hours(i64::from(hours))),
            row_limit: config.sync.row_limit,
            fetch_timeout,
        },
        Commands::Continuous | Commands::Status | Commands::Migrate => SyncOptions {
            window: SyncWindow::Watermark,
            row_limit: config.sync.row_limit,
            fetch_timeout,
        },
    }
}

/// Ctrl-C lets the current entity type finish, then skips the rest.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested, finishing current entity type");
            cancel.cancel();
        }
    });
}

async fn run(command: Commands, config: AppConfig) -> anyhow::Result<()> {
    let pool = connect(&config.database).await?;
    let watermark_default = WatermarkDefault::lookback_days(config.sync.lookback_days);
    let watermarks = PgWatermarkRepository::new(pool.clone(), watermark_default);
    let records = PgRecordStore::new(pool.clone());

    match command {
        Commands::Migrate => {
            propsync_db::migrate(&pool).await?;
            return Ok(());
        }
        Commands::Status => return print_status(&watermarks, &records).await,
        Commands::Full | Commands::Incremental { .. } | Commands::Continuous => {}
    }

    propsync_db::migrate(&pool).await?;

    let sf_config = SalesforceClientConfig::from_env().map_err(anyhow::Error::msg)?;
    tracing::info!(
        instance_url = %sf_config.instance_url,
        api_version = %sf_config.api_version,
        "salesforce connector configured"
    );
    let client = SalesforceClient::new(sf_config).context("failed to create salesforce client")?;

    let options = sync_options(command, &config);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let syncer = EntitySyncer::new(client, watermarks, records, options);
    let orchestrator = Orchestrator::new(syncer, catalog(), cancel);

    if command == Commands::Continuous {
        Arc::new(orchestrator)
            .run_continuous(config.sync.interval(), config.sync.retry_backoff())
            .await;
        return Ok(());
    }

    let summary = orchestrator.run_once().await?;
    match summary.failures() {
        0 => Ok(()),
        n => anyhow::bail!("{n} entity type(s) failed, see sync_metadata.last_error"),
    }
}

async fn print_status(
    watermarks: &PgWatermarkRepository,
    records: &PgRecordStore,
) -> anyhow::Result<()> {
    let known: HashMap<String, _> = watermarks
        .list()
        .await?
        .into_iter()
        .map(|wm| (wm.object_name.clone(), wm))
        .collect();

    println!(
        "{:<26} {:<12} {:>8} {:<26} {:>9} {:>6}  last error",
        "object", "table", "rows", "last successful sync", "records", "errors"
    );
    for entity in catalog() {
        let rows = records.count_rows(entity.table).await?;
        match known.get(entity.remote_object) {
            Some(wm) => println!(
                "{:<26} {:<12} {:>8} {:<26} {:>9} {:>6}  {}",
                entity.remote_object,
                entity.table,
                rows,
                wm.last_successful_sync
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string()),
                wm.total_records,
                wm.total_errors,
                wm.last_error.as_deref().unwrap_or("-"),
            ),
            None => println!(
                "{:<26} {:<12} {:>8} {:<26} {:>9} {:>6}  -",
                entity.remote_object, entity.table, rows, "never", 0, 0
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_full() {
        let cli = Cli::try_parse_from(["propsync-ingest"]).unwrap();
        assert_eq!(cli.command.unwrap_or(Commands::Full), Commands::Full);
    }

    #[test]
    fn incremental_defaults_to_a_day() {
        let cli = Cli::try_parse_from(["propsync-ingest", "incremental"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Incremental { hours: 24 }));

        let cli = Cli::try_parse_from(["propsync-ingest", "incremental", "6"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Incremental { hours: 6 }));
    }

    fn config(row_limit: Option<u32>) -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: None,
                host: "localhost".to_string(),
                port: 5432,
                name: "property_management".to_string(),
                user: "postgres".to_string(),
                password: String::new(),
                max_connections: 5,
            },
            sync: propsync_config::SyncSettings {
                interval_minutes: 5,
                row_limit,
                lookback_days: 30,
                retry_backoff_secs: 60,
                fetch_timeout_secs: 300,
            },
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn full_backfills_without_cap() {
        let options = sync_options(Commands::Full, &config(Some(2000)));
        assert_eq!(options.row_limit, None);
        assert_eq!(
            options.window,
            SyncWindow::Since(WatermarkDefault::epoch().resolve(Utc::now()))
        );
    }

    #[test]
    fn incremental_and_continuous_keep_the_cap() {
        let config = config(Some(500));
        let incremental = sync_options(Commands::Incremental { hours: 6 }, &config);
        assert_eq!(incremental.row_limit, Some(500));
        match incremental.window {
            SyncWindow::Since(start) => {
                let age = Utc::now() - start;
                assert!(age >= chrono::Duration::hours(6));
                assert!(age < chrono::Duration::hours(6) + chrono::Duration::minutes(1));
            }
            other => panic!("expected fixed window, got {other:?}"),
        }

        let continuous = sync_options(Commands::Continuous, &config);
        assert_eq!(continuous.window, SyncWindow::Watermark);
        assert_eq!(continuous.fetch_timeout.as_secs(), 300);
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["propsync-ingest", "backfill"]).is_err());
    }
}
