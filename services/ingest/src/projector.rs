use chrono::{DateTime, NaiveDate, Utc};
use propsync_db::records::models::ColumnValue;
use serde_json::Value;

use crate::connector::RemoteRecord;
use crate::entities::{EntityDescriptor, EntityKind, FieldKind, FieldSpec, NATURAL_KEY_FIELD};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("{object} record has no {field}")]
    MissingNaturalKey {
        object: &'static str,
        field: &'static str,
    },
}

/// Foreign key still expressed as a remote id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReference {
    /// Position in `LocalRow::values`.
    pub slot: usize,
    pub parent: EntityKind,
    pub remote_id: Option<String>,
}

/// A projected record. Reference slots hold `ForeignKey(None)` until resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRow {
    pub natural_key: String,
    pub values: Vec<ColumnValue>,
    pub pending: Vec<PendingReference>,
}

/// Map a sparse remote record onto the entity's column layout.
pub fn project(
    record: &RemoteRecord,
    entity: &EntityDescriptor,
) -> Result<LocalRow, ProjectionError> {
    let natural_key =
        record
            .text(NATURAL_KEY_FIELD)
            .ok_or(ProjectionError::MissingNaturalKey {
                object: entity.remote_object,
                field: NATURAL_KEY_FIELD,
            })?;

    let mut values = Vec::with_capacity(entity.fields.len());
    let mut pending = Vec::new();

    for (slot, field) in entity.fields.iter().enumerate() {
        if let FieldKind::Reference(parent) = field.kind {
            pending.push(PendingReference {
                slot,
                parent,
                remote_id: record.text(field.remote),
            });
            values.push(ColumnValue::ForeignKey(None));
            continue;
        }
        values.push(coerce(record, field, &natural_key));
    }

    Ok(LocalRow {
        natural_key,
        values,
        pending,
    })
}

fn coerce(record: &RemoteRecord, field: &FieldSpec, natural_key: &str) -> ColumnValue {
    let raw = record.field(field.remote);
    let value = match field.kind {
        FieldKind::Text => ColumnValue::Text(record.text(field.remote)),
        FieldKind::Bool => ColumnValue::Bool(record.bool_or(field.remote, false)),
        FieldKind::Integer => ColumnValue::Integer(raw.and_then(as_integer)),
        FieldKind::Decimal => ColumnValue::Decimal(raw.and_then(as_decimal)),
        FieldKind::Date => ColumnValue::Date(raw.and_then(Value::as_str).and_then(parse_date)),
        FieldKind::DateTime => {
            ColumnValue::DateTime(raw.and_then(Value::as_str).and_then(parse_datetime))
        }
        FieldKind::Reference(_) => ColumnValue::ForeignKey(None),
    };

    if raw.is_some() && value.is_null() {
        tracing::debug!(
            record = natural_key,
            field = field.remote,
            raw = %raw.map(|v| v.to_string()).unwrap_or_default(),
            "unparsable value stored as null"
        );
    }
    value
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
}

/// RFC 3339, or the `2024-01-15T10:30:00.000+0000` form the query API emits.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
