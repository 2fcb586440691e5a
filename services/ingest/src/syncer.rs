use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use propsync_common::error::PropsyncResult;
use propsync_db::records::repositories::RecordStore;
use propsync_db::sync::repositories::WatermarkRepository;

use crate::connector::{RecordSource, SourceError};
use crate::entities::EntityDescriptor;
use crate::projector::project;
use crate::resolver::Resolver;
use crate::salesforce::query::build_incremental_soql;

/// Where each entity type's fetch window starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncWindow {
    /// From the entity type's own watermark.
    Watermark,
    /// From a fixed instant, for every entity type (backfills).
    Since(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub window: SyncWindow,
    /// Per-entity, per-run cap on fetched records. `None` fetches everything.
    pub row_limit: Option<u32>,
    /// Bound on one entity's complete paginated fetch.
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Fetching,
    Projecting,
    Resolving,
    Writing,
    RecordingSuccess,
    RecordingFailure,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Projecting => "projecting",
            Self::Resolving => "resolving",
            Self::Writing => "writing",
            Self::RecordingSuccess => "recording_success",
            Self::RecordingFailure => "recording_failure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub fetched: usize,
    /// Records without a natural key.
    pub skipped: usize,
    /// Rows whose parent reference had no local match.
    pub dropped: usize,
    pub written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{phase} failed: {message}")]
pub struct SyncFailure {
    pub phase: SyncPhase,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    Success(SyncCounts),
    Failure(SyncFailure),
    /// Stop requested mid-fetch; nothing written and the watermark untouched.
    Cancelled,
}

impl EntityOutcome {
    pub fn written(&self) -> u64 {
        match self {
            Self::Success(counts) => counts.written,
            Self::Failure(_) | Self::Cancelled => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// A finished pipeline, and whether its window covered everything since the
/// stored watermark.
struct Completed {
    counts: SyncCounts,
    advances_watermark: bool,
}

enum Interrupted {
    Cancelled,
    Failed(SyncFailure),
}

fn failed(phase: SyncPhase, err: impl fmt::Display) -> Interrupted {
    Interrupted::Failed(SyncFailure {
        phase,
        message: err.to_string(),
    })
}

/// Runs one entity type through fetch, project, resolve, write and the
/// watermark update. Failures are recorded and reported, never propagated.
pub struct EntitySyncer<S, W, R> {
    source: S,
    watermarks: W,
    records: R,
    options: SyncOptions,
}

impl<S, W, R> EntitySyncer<S, W, R>
where
    S: RecordSource,
    W: WatermarkRepository,
    R: RecordStore,
{
    pub fn new(source: S, watermarks: W, records: R, options: SyncOptions) -> Self {
        Self {
            source,
            watermarks,
            records,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub async fn health_check(&self) -> PropsyncResult<()> {
        self.records.health_check().await
    }

    pub async fn sync(&self, entity: &EntityDescriptor, cancel: &CancellationToken) -> EntityOutcome {
        let object = entity.remote_object;
        let started = Instant::now();
        // Captured before the fetch: anything modified while fetching is re-read next run.
        let run_time = Utc::now();

        let Completed {
            counts,
            advances_watermark,
        } = match self.run(entity, cancel).await {
            Ok(completed) => completed,
            Err(Interrupted::Cancelled) => {
                tracing::info!(entity = object, "sync cancelled, watermark unchanged");
                return EntityOutcome::Cancelled;
            }
            Err(Interrupted::Failed(failure)) => {
                return self.record_failure(object, run_time, failure).await;
            }
        };

        tracing::debug!(entity = object, phase = %SyncPhase::RecordingSuccess, "entering phase");
        let recorded = if advances_watermark {
            self.watermarks
                .record_success(object, run_time, counts.written)
                .await
        } else {
            tracing::info!(
                entity = object,
                "window starts after the stored watermark, watermark unchanged"
            );
            self.watermarks
                .record_partial_success(object, run_time, counts.written)
                .await
        };
        if let Err(e) = recorded {
            let failure = SyncFailure {
                phase: SyncPhase::RecordingSuccess,
                message: e.to_string(),
            };
            return self.record_failure(object, run_time, failure).await;
        }

        tracing::info!(
            entity = object,
            source = self.source.source_name(),
            fetched = counts.fetched,
            skipped = counts.skipped,
            dropped = counts.dropped,
            written = counts.written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "entity sync completed"
        );
        EntityOutcome::Success(counts)
    }

    async fn run(
        &self,
        entity: &EntityDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Completed, Interrupted> {
        let object = entity.remote_object;
        let row_limit = self.options.row_limit;

        tracing::debug!(entity = object, phase = %SyncPhase::Fetching, "entering phase");
        let stored = self
            .watermarks
            .get_watermark(object)
            .await
            .map_err(|e| failed(SyncPhase::Fetching, e))?;
        // A later fixed start leaves a gap behind the watermark, so it must not move.
        let (since, advances_watermark) = match self.options.window {
            SyncWindow::Watermark => (stored, true),
            SyncWindow::Since(start) => (start, start <= stored),
        };
        let soql = build_incremental_soql(object, &entity.remote_fields(), since, row_limit);
        tracing::info!(entity = object, since = %since, "fetching modified records");

        let records = match tokio::time::timeout(
            self.options.fetch_timeout,
            self.source.query(&soql, cancel),
        )
        .await
        {
            Err(_) => {
                return Err(failed(
                    SyncPhase::Fetching,
                    format!(
                        "fetch timed out after {}s",
                        self.options.fetch_timeout.as_secs_f64()
                    ),
                ))
            }
            Ok(Err(SourceError::Cancelled)) => return Err(Interrupted::Cancelled),
            Ok(Err(e)) => return Err(failed(SyncPhase::Fetching, e)),
            Ok(Ok(records)) => records,
        };

        let mut counts = SyncCounts {
            fetched: records.len(),
            ..SyncCounts::default()
        };

        if let Some(limit) = row_limit {
            if records.len() >= limit as usize {
                tracing::warn!(
                    entity = object,
                    limit,
                    "row cap reached, changes beyond the cap are skipped until a backfill"
                );
            }
        }

        if records.is_empty() {
            tracing::info!(entity = object, "no new changes");
            return Ok(Completed {
                counts,
                advances_watermark,
            });
        }

        tracing::debug!(entity = object, phase = %SyncPhase::Projecting, "entering phase");
        let mut rows = Vec::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            match project(record, entity) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    counts.skipped += 1;
                    tracing::warn!(entity = object, position, error = %e, "skipping record");
                }
            }
        }

        let resolver = if entity.has_references() {
            tracing::debug!(entity = object, phase = %SyncPhase::Resolving, "entering phase");
            Resolver::load(&self.records, entity)
                .await
                .map_err(|e| failed(SyncPhase::Resolving, e))?
        } else {
            Resolver::default()
        };
        let (batch, dropped) = resolver.resolve_all(rows);
        counts.dropped = dropped.len();
        if counts.dropped > 0 {
            tracing::info!(
                entity = object,
                dropped = counts.dropped,
                "rows dropped for unresolved references"
            );
        }

        if !batch.is_empty() {
            tracing::debug!(entity = object, phase = %SyncPhase::Writing, rows = batch.len(), "entering phase");
            counts.written = self
                .records
                .upsert_batch(entity.table, &entity.columns(), &batch)
                .await
                .map_err(|e| failed(SyncPhase::Writing, e))?;
        }

        Ok(Completed {
            counts,
            advances_watermark,
        })
    }

    async fn record_failure(
        &self,
        object: &str,
        run_time: DateTime<Utc>,
        failure: SyncFailure,
    ) -> EntityOutcome {
        tracing::error!(
            entity = object,
            phase = %failure.phase,
            error = %failure.message,
            "entity sync failed"
        );
        tracing::debug!(entity = object, phase = %SyncPhase::RecordingFailure, "entering phase");
        if let Err(e) = self
            .watermarks
            .record_failure(object, run_time, &failure.to_string())
            .await
        {
            tracing::error!(entity = object, error = %e, "could not record sync failure");
        }
        EntityOutcome::Failure(failure)
    }
}
