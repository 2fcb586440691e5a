use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::sync::models::SyncWatermark;
use propsync_common::error::PropsyncResult;

/// Watermark Store. Every method is a single storage round trip and never retries.
#[async_trait]
pub trait WatermarkRepository: Send + Sync {
    /// Last successful sync time, or the configured default when none is recorded.
    async fn get_watermark(&self, object_name: &str) -> PropsyncResult<DateTime<Utc>>;

    /// Advance the watermark to `run_time` (never backwards), add `record_count`
    /// to the running total and clear the error state.
    async fn record_success(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        record_count: u64,
    ) -> PropsyncResult<()>;

    /// A successful run whose window started after the stored watermark: add
    /// `record_count` and clear the error state, but leave the watermark where it
    /// is so the unfetched gap is still read by the next watermark-driven run.
    async fn record_partial_success(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        record_count: u64,
    ) -> PropsyncResult<()>;

    /// Count the failure and keep its message. The watermark is left untouched.
    async fn record_failure(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        error_message: &str,
    ) -> PropsyncResult<()>;

    async fn get(&self, object_name: &str) -> PropsyncResult<Option<SyncWatermark>>;

    async fn list(&self) -> PropsyncResult<Vec<SyncWatermark>>;
}
