use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use conduit_core::{EventId, StreamName};

/// A persisted event as read back from the store.
///
/// The runner never looks inside the payload; it only counts and forwards events.
pub type StoredEvent = EventEnvelope<JsonValue>;

/// Envelope for an event, containing stream metadata.
///
/// Notes:
/// - `sequence_number` is monotonically increasing per stream (1, 2, 3, ...).
/// - `position` is monotonically increasing across the whole store and defines
///   the order in which subscriptions see events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: EventId,
    stream: StreamName,

    /// Position in the owning stream.
    sequence_number: u64,
    /// Position in the global log.
    position: u64,

    event_type: String,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: EventId,
        stream: StreamName,
        sequence_number: u64,
        position: u64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream,
            sequence_number,
            position,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Decode the JSON payload into a typed envelope.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<EventEnvelope<T>, serde_json::Error> {
        let payload = serde_json::from_value(self.payload.clone())?;
        Ok(EventEnvelope {
            event_id: self.event_id,
            stream: self.stream.clone(),
            sequence_number: self.sequence_number,
            position: self.position,
            event_type: self.event_type.clone(),
            occurred_at: self.occurred_at,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Shipped {
        order: u32,
    }

    #[test]
    fn decode_keeps_metadata() {
        let event_id = EventId::new();
        let stored = StoredEvent::new(
            event_id,
            StreamName::new("order-7"),
            2,
            11,
            "order.shipped",
            Utc::now(),
            serde_json::json!({ "order": 7 }),
        );

        let typed = stored.decode::<Shipped>().unwrap();

        assert_eq!(typed.payload(), &Shipped { order: 7 });
        assert_eq!(typed.event_id(), event_id);
        assert_eq!(typed.position(), 11);
        assert_eq!(typed.sequence_number(), 2);
        assert_eq!(typed.stream().category(), "order");
    }
}
