use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::records::models::{
    ColumnSpec, ColumnValue, RecordRow, NATURAL_KEY_COLUMN, SYNCED_AT_COLUMN,
};
use crate::records::repositories::RecordStore;
use propsync_common::error::{PropsyncError, PropsyncResult};

/// Postgres caps bind parameters per statement at `u16::MAX`.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Table and column names are interpolated into SQL, so only plain identifiers pass.
fn checked_ident(name: &str) -> PropsyncResult<&str> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        Ok(name)
    } else {
        Err(PropsyncError::Validation(format!(
            "invalid SQL identifier: {name:?}"
        )))
    }
}

/// `insert into <table> (sf_id, <columns>, synced_at) `
fn insert_prefix(table: &str, columns: &[ColumnSpec]) -> PropsyncResult<String> {
    let mut names = vec![NATURAL_KEY_COLUMN];
    for column in columns {
        names.push(checked_ident(column.name)?);
    }
    names.push(SYNCED_AT_COLUMN);
    Ok(format!(
        "insert into {} ({}) ",
        checked_ident(table)?,
        names.join(", ")
    ))
}

/// The update clause only touches mutable columns and `synced_at`, never the key.
fn conflict_clause(columns: &[ColumnSpec]) -> String {
    let mut sets: Vec<String> = columns
        .iter()
        .filter(|c| c.mutable)
        .map(|c| format!("{0} = excluded.{0}", c.name))
        .collect();
    sets.push(format!("{SYNCED_AT_COLUMN} = now()"));
    format!(
        " on conflict ({NATURAL_KEY_COLUMN}) do update set {}",
        sets.join(", ")
    )
}

/// Rows per statement so that one statement stays under the bind limit.
fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / (column_count + 1)).max(1)
}

/// A single `insert .. on conflict` cannot touch the same row twice, so
/// duplicate natural keys collapse to their last occurrence.
fn dedupe_last_wins(rows: &[RecordRow]) -> Vec<&RecordRow> {
    let mut last_index: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        last_index.insert(row.natural_key.as_str(), i);
    }
    rows.iter()
        .enumerate()
        .filter(|(i, row)| last_index.get(row.natural_key.as_str()) == Some(i))
        .map(|(_, row)| row)
        .collect()
}

fn push_value(b: &mut Separated<'_, '_, Postgres, &'static str>, value: &ColumnValue) {
    match value {
        ColumnValue::Text(v) => b.push_bind(v.clone()),
        ColumnValue::Bool(v) => b.push_bind(*v),
        ColumnValue::Integer(v) | ColumnValue::ForeignKey(v) => b.push_bind(*v),
        ColumnValue::Decimal(v) => b.push_bind(*v),
        ColumnValue::Date(v) => b.push_bind(*v),
        ColumnValue::DateTime(v) => b.push_bind(*v),
    };
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn health_check(&self) -> PropsyncResult<()> {
        sqlx::query("select 1")
            .execute(&self.pool)
            .await
            .map_err(|e| PropsyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn load_reference_map(&self, table: &str) -> PropsyncResult<HashMap<String, i64>> {
        let sql = format!(
            "select {NATURAL_KEY_COLUMN}, id from {}",
            checked_ident(table)?
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PropsyncError::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>(NATURAL_KEY_COLUMN), r.get::<i64, _>("id")))
            .collect())
    }

    async fn upsert_batch(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[RecordRow],
    ) -> PropsyncResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = rows.iter().find(|r| r.values.len() != columns.len()) {
            return Err(PropsyncError::Validation(format!(
                "row {} has {} values for {} columns of {table}",
                bad.natural_key,
                bad.values.len(),
                columns.len()
            )));
        }

        let prefix = insert_prefix(table, columns)?;
        let conflict = conflict_clause(columns);
        let rows = dedupe_last_wins(rows);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PropsyncError::Database(e.to_string()))?;

        let mut written = 0u64;
        for chunk in rows.chunks(rows_per_statement(columns.len())) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
            builder.push_values(chunk.iter().copied(), |mut b, row| {
                b.push_bind(row.natural_key.clone());
                for value in &row.values {
                    push_value(&mut b, value);
                }
                b.push("now()");
            });
            builder.push(&conflict);

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| PropsyncError::Database(e.to_string()))?;
            written += result.rows_affected();
        }

        // Dropping `tx` on any error above rolls the whole batch back.
        tx.commit()
            .await
            .map_err(|e| PropsyncError::Database(e.to_string()))?;

        tracing::debug!(table, written, "upsert batch committed");
        Ok(written)
    }

    async fn count_rows(&self, table: &str) -> PropsyncResult<i64> {
        let sql = format!("select count(*) from {}", checked_ident(table)?);
        sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PropsyncError::Database(e.to_string()))
    }
}
