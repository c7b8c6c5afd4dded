//! # Event Envelope
//!
//! Platform-wide event envelope specification for all inter-module communication.
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: One envelope struct for the entire platform
//! 2. **Self-Contained Payloads**: Consumers never query producer-side tables
//! 3. **Versioning**: Integer contract version for safe evolution
//! 4. **Forward Compatibility**: Unknown stream fields never fail the decoder
//!
//! ## Envelope Fields
//!
//! - `event_id`: Unique identifier for idempotency
//! - `event_type`: String tag routed on by consumers
//! - `tenant_id`: Multi-tenant isolation
//! - `vertical`: Vertical namespace (e.g. "materials")
//! - `occurred_at`: UTC timestamp when the event occurred
//! - `version`: Event contract version
//! - `payload`: Self-contained event data
//! - `correlation_id`: Links related events in a business transaction
//! - `metadata`: Free map; carries `retry_count` and the bus message id after read

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{BusError, BusResult};

/// Standard event envelope for all events on the bus
///
/// The payload MUST carry every field any consumer requires; consumers never
/// query producer tables.
///
/// # Examples
///
/// ```rust
/// use event_bus::EventEnvelope;
/// use serde_json::json;
/// use uuid::Uuid;
///
/// let envelope = EventEnvelope::new(
///     "sale_recorded",
///     Uuid::new_v4(),
///     "materials",
///     json!({"order_id": "o-1", "items": []}),
/// )
/// .with_correlation_id(Some("corr-456".to_string()));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (idempotency key)
    pub event_id: Uuid,

    /// Event type tag (e.g. "sale_recorded", "stock_updated")
    pub event_type: String,

    /// Tenant identifier for multi-tenant isolation
    pub tenant_id: Uuid,

    /// Vertical namespace the event belongs to
    pub vertical: String,

    /// UTC timestamp when the event occurred
    pub occurred_at: DateTime<Utc>,

    /// Event contract version
    pub version: i32,

    /// Self-contained event data
    pub payload: Value,

    /// Links related events in a business transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Free metadata map (retry count, bus message id, source)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EventEnvelope {
    /// Create a new envelope with auto-generated event_id and timestamp
    pub fn new(
        event_type: impl Into<String>,
        tenant_id: Uuid,
        vertical: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            tenant_id,
            vertical: vertical.into(),
            occurred_at: Utc::now(),
            version: 1,
            payload,
            correlation_id: None,
            metadata: Map::new(),
        }
    }

    /// Create an envelope with explicit event_id (useful for testing)
    pub fn with_event_id(
        event_id: Uuid,
        event_type: impl Into<String>,
        tenant_id: Uuid,
        vertical: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id,
            ..Self::new(event_type, tenant_id, vertical, payload)
        }
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Set the contract version
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Set a metadata entry
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Number of delivery retries recorded in metadata (0 when absent)
    pub fn retry_count(&self) -> u64 {
        self.metadata
            .get("retry_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Return a copy with `retry_count` set in metadata
    pub fn with_retry_count(mut self, retry_count: u64) -> Self {
        self.metadata
            .insert("retry_count".to_string(), Value::from(retry_count));
        self
    }

    /// Bus message id recorded after a group read, if any
    pub fn stream_msg_id(&self) -> Option<&str> {
        self.metadata.get("stream_msg_id").and_then(|v| v.as_str())
    }

    /// Encode into the flat string-keyed stream record.
    ///
    /// `payload` and `metadata` are JSON-encoded strings, `version` is an
    /// integer-as-string, and an absent `correlation_id` is the empty string.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("event_id".to_string(), self.event_id.to_string()),
            ("event_type".to_string(), self.event_type.clone()),
            ("tenant_id".to_string(), self.tenant_id.to_string()),
            ("vertical".to_string(), self.vertical.clone()),
            ("occurred_at".to_string(), self.occurred_at.to_rfc3339()),
            ("version".to_string(), self.version.to_string()),
            ("payload".to_string(), self.payload.to_string()),
            (
                "correlation_id".to_string(),
                self.correlation_id.clone().unwrap_or_default(),
            ),
            (
                "metadata".to_string(),
                Value::Object(self.metadata.clone()).to_string(),
            ),
        ]
    }

    /// Decode a stream record into an envelope.
    ///
    /// Unknown fields are ignored (forward compatibility). The bus message id
    /// is recorded in `metadata["stream_msg_id"]`.
    pub fn from_fields(
        msg_id: &str,
        fields: &std::collections::HashMap<String, String>,
    ) -> BusResult<Self> {
        let event_id = fields
            .get("event_id")
            .ok_or_else(|| BusError::SerializationError("missing event_id".into()))
            .and_then(|s| {
                Uuid::parse_str(s)
                    .map_err(|e| BusError::SerializationError(format!("bad event_id: {e}")))
            })?;

        let event_type = fields
            .get("event_type")
            .ok_or_else(|| BusError::SerializationError("missing event_type".into()))?
            .clone();

        let tenant_id = fields
            .get("tenant_id")
            .ok_or_else(|| BusError::SerializationError("missing tenant_id".into()))
            .and_then(|s| {
                Uuid::parse_str(s)
                    .map_err(|e| BusError::SerializationError(format!("bad tenant_id: {e}")))
            })?;

        let vertical = fields
            .get("vertical")
            .cloned()
            .unwrap_or_else(|| "materials".to_string());

        let occurred_at = fields
            .get("occurred_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let version = fields
            .get("version")
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(1);

        let payload = fields
            .get("payload")
            .map(|s| serde_json::from_str(s))
            .transpose()
            .map_err(|e| BusError::SerializationError(format!("bad payload: {e}")))?
            .unwrap_or(Value::Object(Map::new()));

        let correlation_id = fields
            .get("correlation_id")
            .filter(|s| !s.is_empty())
            .cloned();

        let mut metadata: Map<String, Value> = fields
            .get("metadata")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        metadata.insert("stream_msg_id".to_string(), Value::from(msg_id));

        Ok(Self {
            event_id,
            event_type,
            tenant_id,
            vertical,
            occurred_at,
            version,
            payload,
            correlation_id,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn fields_map(fields: Vec<(String, String)>) -> HashMap<String, String> {
        fields.into_iter().collect()
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let envelope = EventEnvelope::new(
            "sale_recorded",
            Uuid::new_v4(),
            "materials",
            json!({"order_id": "o-1", "items": [{"product_id": "p-1", "quantity": 2}]}),
        )
        .with_version(3)
        .with_correlation_id(Some("corr-1".to_string()))
        .with_retry_count(2);

        let map = fields_map(envelope.to_fields());
        let decoded = EventEnvelope::from_fields("7-0", &map).unwrap();

        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.event_type, envelope.event_type);
        assert_eq!(decoded.tenant_id, envelope.tenant_id);
        assert_eq!(decoded.vertical, envelope.vertical);
        assert_eq!(
            decoded.occurred_at.timestamp_millis(),
            envelope.occurred_at.timestamp_millis()
        );
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.payload, envelope.payload);
        assert_eq!(decoded.correlation_id, Some("corr-1".to_string()));
        assert_eq!(decoded.retry_count(), 2);
        assert_eq!(decoded.stream_msg_id(), Some("7-0"));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let envelope = EventEnvelope::new("quote_converted", Uuid::new_v4(), "materials", json!({}));
        let mut map = fields_map(envelope.to_fields());
        map.insert("some_future_field".to_string(), "whatever".to_string());

        let decoded = EventEnvelope::from_fields("1-0", &map).unwrap();
        assert_eq!(decoded.event_type, "quote_converted");
    }

    #[test]
    fn test_empty_correlation_id_decodes_to_none() {
        let envelope = EventEnvelope::new("stock_updated", Uuid::new_v4(), "materials", json!({}));
        let map = fields_map(envelope.to_fields());
        assert_eq!(map.get("correlation_id").map(String::as_str), Some(""));

        let decoded = EventEnvelope::from_fields("1-0", &map).unwrap();
        assert!(decoded.correlation_id.is_none());
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let mut map = HashMap::new();
        map.insert("event_id".to_string(), Uuid::new_v4().to_string());
        map.insert("event_type".to_string(), "sale_recorded".to_string());
        map.insert("tenant_id".to_string(), Uuid::new_v4().to_string());

        let decoded = EventEnvelope::from_fields("1-0", &map).unwrap();
        assert_eq!(decoded.vertical, "materials");
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.payload, json!({}));
        assert_eq!(decoded.retry_count(), 0);
    }

    #[test]
    fn test_missing_event_id_fails() {
        let mut map = HashMap::new();
        map.insert("event_type".to_string(), "sale_recorded".to_string());
        map.insert("tenant_id".to_string(), Uuid::new_v4().to_string());

        assert!(EventEnvelope::from_fields("1-0", &map).is_err());
    }
}
