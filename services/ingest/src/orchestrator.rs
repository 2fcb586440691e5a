use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use propsync_common::error::{PropsyncError, PropsyncResult};
use propsync_db::records::repositories::RecordStore;
use propsync_db::sync::repositories::WatermarkRepository;

use crate::connector::RecordSource;
use crate::entities::EntityDescriptor;
use crate::syncer::{EntityOutcome, EntitySyncer};

/// Stable sort by rank, then check that every parent is placed strictly
/// before each entity type referencing it.
pub fn plan_order(
    entities: &[&'static EntityDescriptor],
) -> PropsyncResult<Vec<&'static EntityDescriptor>> {
    let mut ordered = entities.to_vec();
    ordered.sort_by_key(|e| e.rank);

    for (position, entity) in ordered.iter().enumerate() {
        for parent in entity.parents() {
            if !ordered[..position].iter().any(|e| e.kind == parent) {
                return Err(PropsyncError::Validation(format!(
                    "{} references {parent}, which is not synced before it",
                    entity.remote_object
                )));
            }
        }
    }
    Ok(ordered)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityReport {
    pub entity: &'static str,
    pub table: &'static str,
    pub outcome: EntityOutcome,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// One report per attempted entity type, in sync order. Types skipped
    /// after a stop request are absent.
    pub reports: Vec<EntityReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total_written(&self) -> u64 {
        self.reports.iter().map(|r| r.outcome.written()).sum()
    }

    pub fn failures(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_failure()).count()
    }

    fn log(&self) {
        for report in &self.reports {
            match &report.outcome {
                EntityOutcome::Success(counts) => tracing::info!(
                    entity = report.entity,
                    table = report.table,
                    written = counts.written,
                    "entity summary"
                ),
                EntityOutcome::Failure(failure) => tracing::warn!(
                    entity = report.entity,
                    table = report.table,
                    error = %failure,
                    "entity summary"
                ),
                EntityOutcome::Cancelled => {
                    tracing::info!(entity = report.entity, "entity summary: cancelled")
                }
            }
        }
        tracing::info!(
            run_id = %self.run_id,
            total_written = self.total_written(),
            failures = self.failures(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "sync cycle finished"
        );
    }
}

/// Drives every configured entity type through the syncer, parents first.
pub struct Orchestrator<S, W, R> {
    syncer: EntitySyncer<S, W, R>,
    entities: Vec<&'static EntityDescriptor>,
    cancel: CancellationToken,
}

impl<S, W, R> Orchestrator<S, W, R>
where
    S: RecordSource,
    W: WatermarkRepository,
    R: RecordStore,
{
    pub fn new(
        syncer: EntitySyncer<S, W, R>,
        entities: Vec<&'static EntityDescriptor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            syncer,
            entities,
            cancel,
        }
    }

    /// One cycle over every entity type. A failing entity type never stops the
    /// others; only an invalid plan or unreachable storage fails the cycle.
    pub async fn run_once(&self) -> PropsyncResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync_run", %run_id);
        self.cycle(run_id).instrument(span).await
    }

    async fn cycle(&self, run_id: Uuid) -> PropsyncResult<RunSummary> {
        let started = Instant::now();
        let plan = plan_order(&self.entities)?;
        self.syncer.health_check().await?;

        tracing::info!(
            entities = plan.len(),
            window = ?self.syncer.options().window,
            "sync cycle started"
        );

        let mut reports = Vec::with_capacity(plan.len());
        for (position, entity) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    skipped = plan.len() - position,
                    "stop requested, skipping remaining entity types"
                );
                break;
            }
            let outcome = self.syncer.sync(entity, &self.cancel).await;
            reports.push(EntityReport {
                entity: entity.remote_object,
                table: entity.table,
                outcome,
            });
        }

        let summary = RunSummary {
            run_id,
            reports,
            elapsed: started.elapsed(),
        };
        summary.log();
        Ok(summary)
    }

    /// Repeat `run_once` until cancelled. Each cycle runs on its own task, so an
    /// error or a panic inside one cycle only delays the next by `retry_backoff`.
    pub async fn run_continuous(self: Arc<Self>, interval: Duration, retry_backoff: Duration)
    where
        S: 'static,
        W: 'static,
        R: 'static,
    {
        tracing::info!(
            interval_secs = interval.as_secs(),
            "continuous sync started"
        );

        while !self.cancel.is_cancelled() {
            let this = Arc::clone(&self);
            let wait = match tokio::spawn(async move { this.run_once().await }).await {
                Ok(Ok(_)) => {
                    tracing::info!(next_in_secs = interval.as_secs(), "waiting for next cycle");
                    interval
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        error = %e,
                        transient = e.is_transient(),
                        retry_in_secs = retry_backoff.as_secs(),
                        "sync cycle failed"
                    );
                    retry_backoff
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_in_secs = retry_backoff.as_secs(),
                        "sync cycle crashed"
                    );
                    retry_backoff
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!("continuous sync stopped");
    }
}
