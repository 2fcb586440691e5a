//! In-memory collaborators for syncer and orchestrator tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use propsync_common::error::{PropsyncError, PropsyncResult};
use propsync_db::records::models::{ColumnSpec, ColumnValue, RecordRow};
use propsync_db::records::repositories::RecordStore;
use propsync_db::sync::models::SyncWatermark;
use propsync_db::sync::repositories::WatermarkRepository;
use tokio_util::sync::CancellationToken;

use crate::connector::{RecordSource, RemoteRecord, SourceError};

/// Object name of the `FROM` clause.
fn queried_object(soql: &str) -> String {
    soql.split(" FROM ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

// ── RecordSource ───────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockSource {
    responses: Arc<Mutex<HashMap<String, Result<Vec<RemoteRecord>, String>>>>,
    queries: Arc<Mutex<Vec<String>>>,
    cancel_on: Arc<Mutex<Option<(String, CancellationToken)>>>,
    delay: Option<Duration>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(self, object: &str, records: Vec<serde_json::Value>) -> Self {
        let records = records.into_iter().map(RemoteRecord::from).collect();
        self.responses
            .lock()
            .unwrap()
            .insert(object.to_string(), Ok(records));
        self
    }

    pub fn failing(self, object: &str, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(object.to_string(), Err(message.to_string()));
        self
    }

    /// Cancel `token` while serving `object`, as a stop signal arriving mid-fetch
    /// after the last page would.
    pub fn cancel_during(self, object: &str, token: CancellationToken) -> Self {
        *self.cancel_on.lock().unwrap() = Some((object.to_string(), token));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn queried_objects(&self) -> Vec<String> {
        self.queries().iter().map(|q| queried_object(q)).collect()
    }
}

#[async_trait]
impl RecordSource for MockSource {
    fn source_name(&self) -> &str {
        "mock"
    }

    async fn query(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteRecord>, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let object = queried_object(query);
        if let Some((target, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if *target == object {
                token.cancel();
            }
        }

        match self.responses.lock().unwrap().get(&object) {
            Some(Ok(records)) => Ok(records.clone()),
            Some(Err(message)) => Err(SourceError::Transport(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

// ── WatermarkRepository ────────────────────────────────────────

#[derive(Clone)]
pub struct MockWatermarks {
    state: Arc<Mutex<HashMap<String, SyncWatermark>>>,
    default: DateTime<Utc>,
    fail_success: Arc<Mutex<bool>>,
}

impl MockWatermarks {
    pub fn new(default: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            default,
            fail_success: Arc::new(Mutex::new(false)),
        }
    }

    pub fn fail_success(&self) {
        *self.fail_success.lock().unwrap() = true;
    }

    pub fn snapshot(&self, object: &str) -> Option<SyncWatermark> {
        self.state.lock().unwrap().get(object).cloned()
    }

    fn entry<'a>(
        state: &'a mut HashMap<String, SyncWatermark>,
        object: &str,
    ) -> &'a mut SyncWatermark {
        state
            .entry(object.to_string())
            .or_insert_with(|| SyncWatermark {
                object_name: object.to_string(),
                last_sync_time: None,
                last_successful_sync: None,
                total_records: 0,
                total_errors: 0,
                last_error: None,
                updated_at: Utc::now(),
            })
    }
}

#[async_trait]
impl WatermarkRepository for MockWatermarks {
    async fn get_watermark(&self, object_name: &str) -> PropsyncResult<DateTime<Utc>> {
        Ok(self
            .snapshot(object_name)
            .and_then(|wm| wm.last_successful_sync)
            .unwrap_or(self.default))
    }

    async fn record_success(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        record_count: u64,
    ) -> PropsyncResult<()> {
        if *self.fail_success.lock().unwrap() {
            return Err(PropsyncError::Database("connection closed".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let wm = Self::entry(&mut state, object_name);
        wm.last_sync_time = Some(run_time);
        wm.last_successful_sync = Some(wm.last_successful_sync.map_or(run_time, |t| t.max(run_time)));
        wm.total_records += record_count as i64;
        wm.last_error = None;
        Ok(())
    }

    async fn record_partial_success(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        record_count: u64,
    ) -> PropsyncResult<()> {
        if *self.fail_success.lock().unwrap() {
            return Err(PropsyncError::Database("connection closed".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let wm = Self::entry(&mut state, object_name);
        wm.last_sync_time = Some(run_time);
        wm.total_records += record_count as i64;
        wm.last_error = None;
        Ok(())
    }

    async fn record_failure(
        &self,
        object_name: &str,
        run_time: DateTime<Utc>,
        error_message: &str,
    ) -> PropsyncResult<()> {
        let mut state = self.state.lock().unwrap();
        let wm = Self::entry(&mut state, object_name);
        wm.last_sync_time = Some(run_time);
        wm.total_errors += 1;
        wm.last_error = Some(error_message.to_string());
        Ok(())
    }

    async fn get(&self, object_name: &str) -> PropsyncResult<Option<SyncWatermark>> {
        Ok(self.snapshot(object_name))
    }

    async fn list(&self) -> PropsyncResult<Vec<SyncWatermark>> {
        let mut all: Vec<_> = self.state.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.object_name.cmp(&b.object_name));
        Ok(all)
    }
}

// ── RecordStore ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub values: Vec<ColumnValue>,
}

#[derive(Clone, Default)]
pub struct MockStore {
    tables: Arc<Mutex<HashMap<String, BTreeMap<String, StoredRow>>>>,
    next_id: Arc<Mutex<i64>>,
    failing_tables: Arc<Mutex<Vec<String>>>,
    unhealthy: Arc<Mutex<bool>>,
    health_panics: Arc<Mutex<u32>>,
    health_checks: Arc<Mutex<u32>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parent row directly and return its local id.
    pub fn seed(&self, table: &str, sf_id: &str) -> i64 {
        let id = self.allocate_id();
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(sf_id.to_string(), StoredRow { id, values: Vec::new() });
        id
    }

    pub fn fail_writes_to(&self, table: &str) {
        self.failing_tables.lock().unwrap().push(table.to_string());
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        *self.unhealthy.lock().unwrap() = unhealthy;
    }

    /// Make the next `n` health checks panic.
    pub fn panic_on_health_checks(&self, n: u32) {
        *self.health_panics.lock().unwrap() = n;
    }

    pub fn health_checks(&self) -> u32 {
        *self.health_checks.lock().unwrap()
    }

    pub fn rows(&self, table: &str) -> BTreeMap<String, StoredRow> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn allocate_id(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }
}

#[async_trait]
impl RecordStore for MockStore {
    async fn health_check(&self) -> PropsyncResult<()> {
        *self.health_checks.lock().unwrap() += 1;
        let should_panic = {
            let mut remaining = self.health_panics.lock().unwrap();
            let panic_now = *remaining > 0;
            *remaining = remaining.saturating_sub(1);
            panic_now
        };
        if should_panic {
            panic!("storage driver bug");
        }
        if *self.unhealthy.lock().unwrap() {
            return Err(PropsyncError::Database("connection refused".to_string()));
        }
        Ok(())
    }

    async fn load_reference_map(&self, table: &str) -> PropsyncResult<HashMap<String, i64>> {
        Ok(self
            .rows(table)
            .into_iter()
            .map(|(sf_id, row)| (sf_id, row.id))
            .collect())
    }

    async fn upsert_batch(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[RecordRow],
    ) -> PropsyncResult<u64> {
        if self.failing_tables.lock().unwrap().iter().any(|t| t == table) {
            return Err(PropsyncError::Database(format!(
                "insert or update on table \"{table}\" violates foreign key constraint"
            )));
        }

        for row in rows {
            let existing = self.rows(table).get(&row.natural_key).cloned();
            let stored = match existing {
                Some(mut current) if current.values.is_empty() => {
                    current.values = row.values.clone();
                    current
                }
                Some(mut current) => {
                    for (i, column) in columns.iter().enumerate() {
                        if column.mutable {
                            current.values[i] = row.values[i].clone();
                        }
                    }
                    current
                }
                None => StoredRow {
                    id: self.allocate_id(),
                    values: row.values.clone(),
                },
            };
            self.tables
                .lock()
                .unwrap()
                .entry(table.to_string())
                .or_default()
                .insert(row.natural_key.clone(), stored);
        }
        // Duplicate keys collapse to one written row, as in Postgres.
        let distinct: HashSet<&str> = rows.iter().map(|r| r.natural_key.as_str()).collect();
        Ok(distinct.len() as u64)
    }

    async fn count_rows(&self, table: &str) -> PropsyncResult<i64> {
        Ok(self.rows(table).len() as i64)
    }
}
