//! Patient record and request envelope data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Loosely-typed patient record as submitted by callers.
///
/// Fields may arrive as strings, numbers or booleans. Nothing is validated on
/// construction: unknown fields are carried along and ignored by assembly,
/// absent fields are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientRecord(Map<String, Value>);

impl PatientRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field value, returning the previous one
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Remove a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Whether the field is present and not `null`
    pub fn has_value(&self, field: &str) -> bool {
        matches!(self.0.get(field), Some(v) if !v.is_null())
    }

    /// Field names, in lexicographic order
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builder-style insert, handy for fixtures
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }
}

impl From<Map<String, Value>> for PatientRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Inference request received from the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Caller-supplied correlation id; generated when absent
    #[serde(default = "new_request_id")]
    pub request_id: String,

    /// Patient record to score
    pub patient: PatientRecord,

    /// Receive timestamp
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl PredictionRequest {
    /// Wrap a record in a request with a fresh id
    pub fn new(patient: PatientRecord) -> Self {
        Self {
            request_id: new_request_id(),
            patient,
            received_at: Utc::now(),
        }
    }

    /// Parse a message payload.
    ///
    /// Accepts either an envelope `{"request_id": ..., "patient": {...}}` or a bare
    /// patient record object.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(payload)?;

        let is_envelope = value
            .as_object()
            .and_then(|obj| obj.get("patient"))
            .is_some_and(Value::is_object);

        if is_envelope {
            serde_json::from_value(value)
        } else {
            let patient: PatientRecord = serde_json::from_value(value)?;
            Ok(Self::new(patient))
        }
    }
}
