use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Every synced table carries the remote identifier here, unique, as the upsert conflict target.
pub const NATURAL_KEY_COLUMN: &str = "sf_id";

/// Refreshed on every insert and update.
pub const SYNCED_AT_COLUMN: &str = "synced_at";

/// A typed column value. Nulls keep their type so Postgres can infer parameter types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Text(Option<String>),
    Bool(bool),
    Integer(Option<i64>),
    Decimal(Option<f64>),
    Date(Option<NaiveDate>),
    DateTime(Option<DateTime<Utc>>),
    /// Local surrogate key of a parent row.
    ForeignKey(Option<i64>),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        match self {
            Self::Text(v) => v.is_none(),
            Self::Bool(_) => false,
            Self::Integer(v) | Self::ForeignKey(v) => v.is_none(),
            Self::Decimal(v) => v.is_none(),
            Self::Date(v) => v.is_none(),
            Self::DateTime(v) => v.is_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    /// Whether the upsert's update clause may overwrite this column.
    pub mutable: bool,
}

/// One row ready to write: natural key plus values in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    pub natural_key: String,
    pub values: Vec<ColumnValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_is_never_null() {
        assert!(!ColumnValue::Bool(false).is_null());
    }

    #[test]
    fn typed_nulls_are_null() {
        assert!(ColumnValue::Text(None).is_null());
        assert!(ColumnValue::ForeignKey(None).is_null());
        assert!(!ColumnValue::Decimal(Some(0.0)).is_null());
    }
}
