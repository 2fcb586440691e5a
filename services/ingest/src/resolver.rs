use std::collections::HashMap;

use propsync_common::error::PropsyncResult;
use propsync_db::records::models::{ColumnValue, RecordRow};
use propsync_db::records::repositories::RecordStore;

use crate::entities::{EntityDescriptor, EntityKind};
use crate::projector::LocalRow;

/// Remote id to local id for one parent entity type. Snapshot taken once per
/// dependent sync; never cached across runs.
#[derive(Debug, Clone, Default)]
pub struct ReferenceMap {
    ids: HashMap<String, i64>,
}

impl ReferenceMap {
    pub fn new(ids: HashMap<String, i64>) -> Self {
        Self { ids }
    }

    pub fn get(&self, remote_id: &str) -> Option<i64> {
        self.ids.get(remote_id).copied()
    }
}

/// One bulk read of `(remote id, local id)` pairs from the parent's table.
pub async fn build_map<S>(store: &S, parent: EntityKind) -> PropsyncResult<ReferenceMap>
where
    S: RecordStore + ?Sized,
{
    let ids = store.load_reference_map(parent.descriptor().table).await?;
    tracing::debug!(parent = %parent, entries = ids.len(), "reference map loaded");
    Ok(ReferenceMap::new(ids))
}

/// Translate the reference at `slot` through `map`. `None` means the row must
/// be dropped: its parent is not stored locally, or it names no parent at all.
pub fn resolve(mut row: LocalRow, slot: usize, map: &ReferenceMap) -> Option<LocalRow> {
    let index = row.pending.iter().position(|p| p.slot == slot)?;
    let reference = row.pending.remove(index);
    let local_id = map.get(reference.remote_id.as_deref()?)?;
    row.values[slot] = ColumnValue::ForeignKey(Some(local_id));
    Some(row)
}

/// A row excluded from the write batch because a reference had no local match.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRow {
    pub natural_key: String,
    pub parent: EntityKind,
    pub remote_id: Option<String>,
}

/// Every reference map one entity type needs.
#[derive(Debug, Default)]
pub struct Resolver {
    maps: HashMap<EntityKind, ReferenceMap>,
}

impl Resolver {
    pub async fn load<S>(store: &S, entity: &EntityDescriptor) -> PropsyncResult<Self>
    where
        S: RecordStore + ?Sized,
    {
        let mut maps = HashMap::new();
        for parent in entity.parents() {
            maps.insert(parent, build_map(store, parent).await?);
        }
        Ok(Self { maps })
    }

    /// Resolve every pending reference; the row is writable only if all resolve.
    pub fn resolve_row(&self, row: LocalRow) -> Result<RecordRow, DroppedRow> {
        let mut row = row;
        while let Some(next) = row.pending.first().cloned() {
            let natural_key = row.natural_key.clone();
            let empty = ReferenceMap::default();
            let map = self.maps.get(&next.parent).unwrap_or(&empty);
            row = resolve(row, next.slot, map).ok_or(DroppedRow {
                natural_key,
                parent: next.parent,
                remote_id: next.remote_id,
            })?;
        }
        Ok(RecordRow {
            natural_key: row.natural_key,
            values: row.values,
        })
    }

    /// Split rows into a write batch and the drops.
    pub fn resolve_all(&self, rows: Vec<LocalRow>) -> (Vec<RecordRow>, Vec<DroppedRow>) {
        let mut ready = Vec::with_capacity(rows.len());
        let mut dropped = Vec::new();
        for row in rows {
            match self.resolve_row(row) {
                Ok(record) => ready.push(record),
                Err(drop) => {
                    tracing::debug!(
                        record = %drop.natural_key,
                        parent = %drop.parent,
                        remote_id = ?drop.remote_id,
                        "dropping row with unresolved reference"
                    );
                    dropped.push(drop);
                }
            }
        }
        (ready, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::RemoteRecord;
    use crate::entities::{UNITS, UNIT_OWNERS};
    use crate::projector::project;
    use async_trait::async_trait;
    use propsync_db::records::models::ColumnSpec;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MapStore {
        tables: HashMap<&'static str, HashMap<String, i64>>,
        reads: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RecordStore for MapStore {
        async fn health_check(&self) -> PropsyncResult<()> {
            Ok(())
        }

        async fn load_reference_map(&self, table: &str) -> PropsyncResult<HashMap<String, i64>> {
            self.reads.lock().unwrap().push(table.to_string());
            Ok(self.tables.get(table).cloned().unwrap_or_default())
        }

        async fn upsert_batch(
            &self,
            _table: &str,
            _columns: &[ColumnSpec],
            rows: &[RecordRow],
        ) -> PropsyncResult<u64> {
            Ok(rows.len() as u64)
        }

        async fn count_rows(&self, _table: &str) -> PropsyncResult<i64> {
            Ok(0)
        }
    }

    fn ids(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn unit(id: &str, property: Option<&str>) -> LocalRow {
        let record = RemoteRecord::from(json!({ "Id": id, "Objekt__c": property }));
        project(&record, &UNITS).unwrap()
    }

    #[test]
    fn resolve_fills_the_slot() {
        let map = ReferenceMap::new(ids(&[("a0P1", 7)]));
        let row = resolve(unit("u1", Some("a0P1")), 2, &map).expect("resolved");
        assert_eq!(row.values[2], ColumnValue::ForeignKey(Some(7)));
        assert!(row.pending.is_empty());
    }

    #[test]
    fn resolve_drops_unknown_and_missing_parents() {
        let map = ReferenceMap::new(ids(&[("a0P1", 7)]));
        assert!(resolve(unit("u1", Some("a0P9")), 2, &map).is_none());
        assert!(resolve(unit("u2", None), 2, &map).is_none());
    }

    #[tokio::test]
    async fn load_reads_each_parent_once() {
        let store = MapStore::default();
        Resolver::load(&store, &UNIT_OWNERS).await.unwrap();
        let reads = store.reads.lock().unwrap().clone();
        assert_eq!(reads, vec!["clients", "units"]);
    }

    #[tokio::test]
    async fn resolve_all_requires_every_reference() {
        let mut store = MapStore::default();
        store.tables.insert("clients", ids(&[("001A", 1)]));
        store.tables.insert("units", ids(&[("u1", 10)]));
        let resolver = Resolver::load(&store, &UNIT_OWNERS).await.unwrap();

        let rows = [
            ("b1", "001A", "u1"),
            ("b2", "001A", "u404"),
            ("b3", "001Z", "u1"),
        ]
        .into_iter()
        .map(|(id, owner, unit)| {
            let record = RemoteRecord::from(json!({ "Id": id, "Owner__c": owner, "Unit__c": unit }));
            project(&record, &UNIT_OWNERS).unwrap()
        })
        .collect();

        let (ready, dropped) = resolver.resolve_all(rows);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].natural_key, "b1");
        assert_eq!(ready[0].values[1], ColumnValue::ForeignKey(Some(1)));
        assert_eq!(ready[0].values[2], ColumnValue::ForeignKey(Some(10)));

        let dropped: Vec<_> = dropped.iter().map(|d| (d.natural_key.as_str(), d.parent)).collect();
        assert_eq!(dropped, vec![("b2", EntityKind::Unit), ("b3", EntityKind::Client)]);
    }
}
