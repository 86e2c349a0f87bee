//! Append-only event store boundary.
//!
//! The subscription runner never owns the store; it only reads the global log
//! through a subscription and appends subscription bookkeeping events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use conduit_core::{EventId, ExpectedVersion, StreamName};

use crate::StoredEvent;

/// An event ready to be appended to a stream (not yet assigned positions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Serialize a typed payload.
    pub fn from_typed<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, EventStoreError> {
        let payload = serde_json::to_value(payload).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;
        Ok(Self::new(event_type, payload))
    }
}

/// Event store operation error.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("corrupted event log at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },

    #[error("event store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event store lock poisoned")]
    Poisoned,
}

/// Append-only event store.
///
/// - Streams are keyed by [`StreamName`]; sequence numbers start at 1 per stream.
/// - Every event also gets a global `position` (starting at 1) which defines the
///   order subscriptions observe.
/// - `append` is atomic: all events of a batch are persisted or none are.
pub trait EventStore: Send + Sync {
    /// Append events to a stream, checking `expected_version` against its current version.
    fn append(
        &self,
        stream: &StreamName,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream (empty when the stream does not exist).
    fn load_stream(&self, stream: &StreamName) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Read up to `limit` events from the global log with `position > after_position`.
    fn read_all(&self, after_position: u64, limit: usize)
    -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Streams of a category, in creation order.
    fn streams(&self, category: &str) -> Result<Vec<StreamName>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        stream: &StreamName,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(stream, events, expected_version)
    }

    fn load_stream(&self, stream: &StreamName) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(stream)
    }

    fn read_all(
        &self,
        after_position: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).read_all(after_position, limit)
    }

    fn streams(&self, category: &str) -> Result<Vec<StreamName>, EventStoreError> {
        (**self).streams(category)
    }
}
