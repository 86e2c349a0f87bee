use std::collections::HashMap;

use conduit_core::{ExpectedVersion, StreamName};
use conduit_events::{EventStoreError, StoredEvent, UncommittedEvent};

/// Ordered event log with per-stream indexes.
#[derive(Debug, Default)]
pub(crate) struct EventLog {
    events: Vec<StoredEvent>,
    /// Indexes into `events`, per stream.
    streams: HashMap<StreamName, Vec<usize>>,
    /// Streams in creation order.
    order: Vec<StreamName>,
}

impl EventLog {
    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    fn version(&self, stream: &StreamName) -> u64 {
        self.streams
            .get(stream)
            .and_then(|idx| idx.last())
            .map(|&i| self.events[i].sequence_number())
            .unwrap_or(0)
    }

    fn last_position(&self) -> u64 {
        self.events.last().map(StoredEvent::position).unwrap_or(0)
    }

    /// Assign sequence numbers and positions without touching the log.
    pub(crate) fn prepare(
        &self,
        stream: &StreamName,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let current = self.version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "stream {stream}: expected {expected_version:?}, found {current}"
            )));
        }

        let mut position = self.last_position();
        let mut sequence = current;

        Ok(events
            .into_iter()
            .map(|e| {
                position += 1;
                sequence += 1;
                StoredEvent::new(
                    e.event_id,
                    stream.clone(),
                    sequence,
                    position,
                    e.event_type,
                    e.occurred_at,
                    e.payload,
                )
            })
            .collect())
    }

    pub(crate) fn push(&mut self, event: StoredEvent) {
        let idx = self.events.len();
        let stream = event.stream().clone();

        match self.streams.get_mut(&stream) {
            Some(indexes) => indexes.push(idx),
            None => {
                self.order.push(stream.clone());
                self.streams.insert(stream, vec![idx]);
            }
        }

        self.events.push(event);
    }

    pub(crate) fn load_stream(&self, stream: &StreamName) -> Vec<StoredEvent> {
        self.streams
            .get(stream)
            .map(|idx| idx.iter().map(|&i| self.events[i].clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn read_all(&self, after_position: u64, limit: usize) -> Vec<StoredEvent> {
        // Positions are dense and start at 1, so position p lives at index p - 1.
        let start = usize::try_from(after_position)
            .unwrap_or(usize::MAX)
            .min(self.events.len());

        self.events[start..].iter().take(limit).cloned().collect()
    }

    pub(crate) fn streams(&self, category: &str) -> Vec<StreamName> {
        self.order
            .iter()
            .filter(|s| s.category() == category)
            .cloned()
            .collect()
    }
}
