use std::sync::RwLock;

use conduit_core::{ExpectedVersion, StreamName};
use conduit_events::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

use super::log::EventLog;

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<EventLog>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        stream: &StreamName,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut log = self.log.write().map_err(|_| EventStoreError::Poisoned)?;

        let committed = log.prepare(stream, events, expected_version)?;
        for e in &committed {
            log.push(e.clone());
        }

        Ok(committed)
    }

    fn load_stream(&self, stream: &StreamName) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::Poisoned)?;
        Ok(log.load_stream(stream))
    }

    fn read_all(
        &self,
        after_position: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::Poisoned)?;
        Ok(log.read_all(after_position, limit))
    }

    fn streams(&self, category: &str) -> Result<Vec<StreamName>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::Poisoned)?;
        Ok(log.streams(category))
    }
}
