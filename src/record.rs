//! Telemetry records and the single transformation applied to them.
//!
//! A device payload is decoded into a [`TelemetryRecord`], stamped with the
//! server receive time to become an [`EnrichedRecord`], and converted to a
//! BSON document right before insertion.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, Document};
use serde_json::{Map, Value as JsonValue};

use crate::error::{BridgeError, Result};

/// Device telemetry as sent, in the device's field order
pub type TelemetryRecord = Map<String, JsonValue>;

/// Decode raw payload bytes into a telemetry record.
///
/// The payload must be UTF-8 text holding a JSON object. Arrays, scalars
/// and `null` are rejected.
pub fn decode_payload(payload: &[u8]) -> Result<TelemetryRecord> {
    let text = std::str::from_utf8(payload)?;
    match serde_json::from_str::<JsonValue>(text)? {
        JsonValue::Object(fields) => Ok(fields),
        other => Err(BridgeError::NotAnObject(json_kind(&other))),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// A telemetry record plus the server-assigned timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    /// Device fields, unchanged
    pub fields: TelemetryRecord,
    /// Name of the timestamp field in the stored document
    pub timestamp_field: String,
    /// Wall-clock time at decode
    pub received_at: DateTime<Utc>,
}

impl EnrichedRecord {
    pub fn new(
        fields: TelemetryRecord,
        timestamp_field: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fields,
            timestamp_field: timestamp_field.into(),
            received_at,
        }
    }

    /// True if the device already sent a field named like the timestamp.
    /// That value is replaced in the stored document.
    pub fn shadows_device_field(&self) -> bool {
        self.fields.contains_key(&self.timestamp_field)
    }

    /// The record as JSON, timestamp rendered as RFC 3339
    pub fn to_json(&self) -> JsonValue {
        let mut fields = self.fields.clone();
        fields.insert(
            self.timestamp_field.clone(),
            JsonValue::String(self.received_at.to_rfc3339()),
        );
        JsonValue::Object(fields)
    }

    /// Convert to the document handed to the store.
    ///
    /// The timestamp is a native BSON date, not a string.
    pub fn to_document(&self) -> Result<Document> {
        let mut document = bson::to_document(&self.fields)?;
        document.insert(
            self.timestamp_field.clone(),
            Bson::DateTime(bson::DateTime::from_millis(
                self.received_at.timestamp_millis(),
            )),
        );
        Ok(document)
    }
}
