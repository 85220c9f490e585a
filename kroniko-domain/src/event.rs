//! Events before and after persistence
//!
//! An [`Event`] is what a caller hands to the store. It gains an [`EventId`]
//! once its body is persisted ([`StoredEvent`]) and a [`Position`] once it is
//! read back through the position log ([`SequencedEvent`]).

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// 1-based position of an event in the global write order.
pub type Position = u64;

/// Longest accepted event type name, in UTF-8 bytes.
pub const MAX_TYPE_LEN: usize = 80;

// =============================================================================
// EventId
// =============================================================================

/// Opaque unique identifier of a persisted event.
///
/// Generated from a UUIDv7 (millisecond timestamp plus random bits).
/// Uniqueness is the contract; ordering comes from the position log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a fresh id
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Event
// =============================================================================

/// An event that has not been persisted yet.
///
/// # Invariants
/// - `event_type` is non-empty, at most [`MAX_TYPE_LEN`] bytes, and free of
///   control characters
/// - every attribute name in `data` is non-empty
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Event type name (e.g. `ItemAdded`)
    #[serde(rename = "type")]
    event_type: String,
    /// Structured payload, insertion ordered
    data: Map<String, Value>,
}

impl Event {
    /// Create a validated event
    ///
    /// # Errors
    /// Returns `DomainError::InvalidEventType` or `DomainError::InvalidData`
    pub fn new(event_type: impl Into<String>, data: Map<String, Value>) -> Result<Self, DomainError> {
        let event_type = event_type.into();
        validate_type(&event_type)?;
        validate_data(&data)?;
        Ok(Self { event_type, data })
    }

    /// Create an event from a JSON value that must be an object
    pub fn with_value(event_type: impl Into<String>, data: Value) -> Result<Self, DomainError> {
        match data {
            Value::Object(map) => Self::new(event_type, map),
            other => Err(DomainError::InvalidData(format!(
                "payload must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse an event from its wire document.
    ///
    /// Accepts `{"type": .., "data": {..}}` as well as the flat form
    /// `{"type": .., "attr": ..}` where every key except `type` and `id`
    /// becomes a data attribute. A supplied `id` is ignored.
    pub fn from_json(value: Value) -> Result<Self, DomainError> {
        let Value::Object(mut doc) = value else {
            return Err(DomainError::MalformedEvent(
                "event must be a JSON object".to_string(),
            ));
        };

        let event_type = match doc.shift_remove("type") {
            Some(Value::String(t)) => t,
            Some(other) => {
                return Err(DomainError::InvalidEventType(format!(
                    "type must be a string, got {}",
                    json_kind(&other)
                )))
            }
            None => return Err(DomainError::MalformedEvent("missing type".to_string())),
        };
        doc.shift_remove("id");

        let nested = doc.len() == 1 && matches!(doc.get("data"), Some(Value::Object(_)));
        if nested {
            let data = doc.shift_remove("data").unwrap_or(Value::Null);
            Self::with_value(event_type, data)
        } else if doc.contains_key("data") && doc.len() == 1 {
            Err(DomainError::InvalidData("data must be an object".to_string()))
        } else {
            Self::new(event_type, doc)
        }
    }

    /// Event type name
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Payload
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Attach the id assigned by storage
    pub fn into_stored(self, id: EventId) -> StoredEvent {
        StoredEvent {
            id,
            event_type: self.event_type,
            data: self.data,
        }
    }
}

fn validate_type(event_type: &str) -> Result<(), DomainError> {
    if event_type.trim().is_empty() {
        return Err(DomainError::InvalidEventType("type must not be empty".to_string()));
    }
    if event_type.len() > MAX_TYPE_LEN {
        return Err(DomainError::InvalidEventType(format!(
            "type is {} bytes, limit is {}",
            event_type.len(),
            MAX_TYPE_LEN
        )));
    }
    if event_type.chars().any(char::is_control) {
        return Err(DomainError::InvalidEventType(format!(
            "type contains control characters: {:?}",
            event_type
        )));
    }
    Ok(())
}

fn validate_data(data: &Map<String, Value>) -> Result<(), DomainError> {
    if data.keys().any(|k| k.is_empty()) {
        return Err(DomainError::InvalidData("attribute names must not be empty".to_string()));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// StoredEvent / SequencedEvent
// =============================================================================

/// A persisted event body, as written to `events/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Id assigned at write time
    pub id: EventId,
    /// Event type name
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl StoredEvent {
    /// Look up a payload attribute
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.data.get(attribute)
    }

    /// Look up a payload attribute as a string
    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.data.get(attribute).and_then(Value::as_str)
    }
}

/// A stored event together with its position in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// The persisted body
    #[serde(flatten)]
    pub event: StoredEvent,
    /// 1-based position, derived from the log on read
    pub position: Position,
}

impl SequencedEvent {
    /// Event id
    pub fn id(&self) -> &EventId {
        &self.event.id
    }

    /// Event type name
    pub fn event_type(&self) -> &str {
        &self.event.event_type
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_rejects_empty_type() {
        assert!(matches!(
            Event::new("", Map::new()),
            Err(DomainError::InvalidEventType(_))
        ));
        assert!(matches!(
            Event::new("   ", Map::new()),
            Err(DomainError::InvalidEventType(_))
        ));
    }

    #[test]
    fn test_event_rejects_oversized_type() {
        let long = "T".repeat(MAX_TYPE_LEN + 1);
        assert!(matches!(
            Event::new(long, Map::new()),
            Err(DomainError::InvalidEventType(_))
        ));
        assert!(Event::new("T".repeat(MAX_TYPE_LEN), Map::new()).is_ok());
    }

    #[test]
    fn test_event_rejects_non_object_payload() {
        let result = Event::with_value("ItemAdded", json!([1, 2, 3]));
        assert!(matches!(result, Err(DomainError::InvalidData(_))));
    }

    #[test]
    fn test_from_json_nested_form() {
        let event = Event::from_json(json!({
            "type": "ItemAdded",
            "data": {"cart_id": "42", "price": 9.5}
        }))
        .unwrap();

        assert_eq!(event.event_type(), "ItemAdded");
        assert_eq!(event.data().get("cart_id"), Some(&json!("42")));
        assert_eq!(event.data().len(), 2);
    }

    #[test]
    fn test_from_json_flat_form_ignores_id() {
        let event = Event::from_json(json!({
            "id": "client-supplied",
            "type": "CartCleared",
            "cart_id": "42"
        }))
        .unwrap();

        assert_eq!(event.event_type(), "CartCleared");
        assert_eq!(event.data().get("cart_id"), Some(&json!("42")));
        assert!(event.data().get("id").is_none());
    }

    #[test]
    fn test_from_json_missing_type() {
        let result = Event::from_json(json!({"data": {}}));
        assert!(matches!(result, Err(DomainError::MalformedEvent(_))));
    }

    #[test]
    fn test_from_json_scalar_data_rejected() {
        let result = Event::from_json(json!({"type": "X", "data": 5}));
        assert!(matches!(result, Err(DomainError::InvalidData(_))));
    }

    #[test]
    fn test_payload_keeps_insertion_order() {
        let event = Event::from_json(json!({
            "type": "ItemAdded",
            "data": {"zeta": 1, "alpha": 2, "mid": 3}
        }))
        .unwrap();

        let keys: Vec<&str> = event.data().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_sequenced_event_wire_shape() {
        let stored = Event::with_value("ItemAdded", json!({"cart_id": "X"}))
            .unwrap()
            .into_stored(EventId::from("abc"));
        let sequenced = SequencedEvent {
            event: stored,
            position: 3,
        };

        let wire = serde_json::to_value(&sequenced).unwrap();
        assert_eq!(
            wire,
            json!({"id": "abc", "type": "ItemAdded", "data": {"cart_id": "X"}, "position": 3})
        );
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = EventId::generate();
        let b = EventId::generate();
        assert_ne!(a, b);
    }
}
