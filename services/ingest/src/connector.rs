use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// A sparse record as returned by the remote query API. Any field may be
/// missing, null, or carry an empty-string "no value" sentinel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRecord(Map<String, Value>);

impl RemoteRecord {
    /// The field's value, or `None` when absent, null, `""` or `"null"`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self.0.get(name)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() || s == "null" => None,
            other => Some(other),
        }
    }

    /// The field rendered as text; numbers and booleans are stringified.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Lookup with a default, for fields that are never null locally.
    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        match self.field(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(_) | None => default,
        }
    }
}

impl From<Value> for RemoteRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("query cancelled")]
    Cancelled,
}

/// Remote query contract: run a filter query and return every matching record,
/// following pagination until exhausted. `cancel` is checked between pages.
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn source_name(&self) -> &str;

    async fn query(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteRecord>, SourceError>;
}
