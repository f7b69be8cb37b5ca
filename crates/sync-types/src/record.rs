//! Search records.
//!
//! A record is the flat document the search engine stores. It always
//! carries the engine's unique identifier field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the unique object identifier.
pub const OBJECT_ID_FIELD: &str = "objectID";

/// A flat field name -> value mapping, keyed by `objectID`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Create a record carrying only its object id.
    pub fn new(object_id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(OBJECT_ID_FIELD.to_string(), Value::String(object_id.into()));
        Self { fields }
    }

    /// Set a field, returning the record for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Remove a field. The object id cannot be removed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if key == OBJECT_ID_FIELD {
            return None;
        }
        self.fields.remove(key)
    }

    /// Read a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The unique object identifier, if it is still a non-empty string.
    pub fn object_id(&self) -> Option<&str> {
        self.fields
            .get(OBJECT_ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Number of fields, object id included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrow the underlying map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Size of the record once JSON-encoded, as the engine counts it.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(&self.fields)
            .map(|bytes| bytes.len())
            .unwrap_or(0)
    }
}
