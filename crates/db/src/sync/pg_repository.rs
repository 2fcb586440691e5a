use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::sync::models::{SyncWatermark, WatermarkDefault};
use crate::sync::repositories::WatermarkRepository;
use propsync_common::error::{PropsyncError, PropsyncResult};

#[derive(Clone)]
pub struct PgWatermarkRepository {
    pool: PgPool,
    default: WatermarkDefault,
}

impl PgWatermarkRepository {
    pub fn new(pool: PgPool, default: WatermarkDefault) -> Self {
        Self { pool, default }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SyncWatermark {
        SyncWatermark {
            object_name: row.get("object_name"),
            last_sync_time: row.get("last_sync_time"),
            last_successful_sync: row.get("last_successful_sync"),
            total_records: row.get("total_records"),
            total_errors: row.get("total_errors"),
            last_error: row.get("last_error"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl WatermarkRepository for PgWatermarkRepository {
    async fn get_watermark(&self, object_name: &str) -> PropsyncResult<DateTime<Utc>> {
        let last = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "select last_successful_sync from sync_metadata where object_name = $1",
        )
        .bind(object_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PropsyncError::Database(e.to_string()))?
        .flatten();

        Ok(last.unwrap_or_else(|| self.default.resolve(Utc::now())))
    }

    async fn record_success(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        record_count: u64,
    ) -> PropsyncResult<()> {
        let count = i64::try_from(record_count)
            .map_err(|_| PropsyncError::Validation(format!("record count {record_count} overflows")))?;

        sqlx::query(
            "insert into sync_metadata
               (object_name, last_sync_time, last_successful_sync, total_records, total_errors, last_error, updated_at)
             values ($1, $2, $2, $3, 0, null, now())
             on conflict (object_name) do update set
               last_sync_time = excluded.last_sync_time,
               last_successful_sync = greatest(sync_metadata.last_successful_sync, excluded.last_successful_sync),
               total_records = sync_metadata.total_records + excluded.total_records,
               last_error = null,
               updated_at = now()",
        )
        .bind(object_name)
        .bind(run_time)
        .bind(count)
        .execute(&self.pool)
        .await
        .map_err(|e| PropsyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn record_partial_success(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        record_count: u64,
    ) -> PropsyncResult<()> {
        let count = i64::try_from(record_count)
            .map_err(|_| PropsyncError::Validation(format!("record count {record_count} overflows")))?;

        sqlx::query(
            "insert into sync_metadata
               (object_name, last_sync_time, last_successful_sync, total_records, total_errors, last_error, updated_at)
             values ($1, $2, null, $3, 0, null, now())
             on conflict (object_name) do update set
               last_sync_time = excluded.last_sync_time,
               total_records = sync_metadata.total_records + excluded.total_records,
               last_error = null,
               updated_at = now()",
        )
        .bind(object_name)
        .bind(run_time)
        .bind(count)
        .execute(&self.pool)
        .await
        .map_err(|e| PropsyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn record_failure(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        error_message: &str,
    ) -> PropsyncResult<()> {
        sqlx::query(
            "insert into sync_metadata
               (object_name, last_sync_time, last_successful_sync, total_records, total_errors, last_error, updated_at)
             values ($1, $2, null, 0, 1, $3, now())
             on conflict (object_name) do update set
               last_sync_time = excluded.last_sync_time,
               total_errors = sync_metadata.total_errors + 1,
               last_error = excluded.last_error,
               updated_at = now()",
        )
        .bind(object_name)
        .bind(run_time)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| PropsyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, object_name: &str) -> PropsyncResult<Option<SyncWatermark>> {
        let row = sqlx::query(
            "select object_name, last_sync_time, last_successful_sync, total_records,
                    total_errors, last_error, updated_at
             from sync_metadata where object_name = $1",
        )
        .bind(object_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PropsyncError::Database(e.to_string()))?;

        Ok(row.map(Self::map_row))
    }

    async fn list(&self) -> PropsyncResult<Vec<SyncWatermark>> {
        let rows = sqlx::query(
            "select object_name, last_sync_time, last_successful_sync, total_records,
                    total_errors, last_error, updated_at
             from sync_metadata order by object_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PropsyncError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Self::map_row).collect())
    }
}
