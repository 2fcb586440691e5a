use std::collections::HashMap;

use async_trait::async_trait;

use crate::records::models::{ColumnSpec, RecordRow};
use propsync_common::error::PropsyncResult;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// One trivial round trip, used to fail a cycle early when storage is unreachable.
    async fn health_check(&self) -> PropsyncResult<()>;

    /// Bulk read of `sf_id -> id` for every row of `table`.
    async fn load_reference_map(&self, table: &str) -> PropsyncResult<HashMap<String, i64>>;

    /// Insert-or-update `rows` keyed by natural key, atomically: either every row
    /// is written or none is. Returns the number of rows written.
    async fn upsert_batch(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[RecordRow],
    ) -> PropsyncResult<u64>;

    async fn count_rows(&self, table: &str) -> PropsyncResult<i64>;
}
