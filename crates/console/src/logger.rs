//! Built-in listener that logs every event it is handed.

use tracing::info;

use conduit_events::{Listener, ListenerError, StoredEvent};

conduit_core::uuid_listener_id!(
    /// Id of a [`LoggerListener`] subscription.
    pub struct LoggerId => "logger"
);

#[derive(Debug)]
pub struct LoggerListener {
    id: LoggerId,
    seen: u64,
}

impl LoggerListener {
    pub fn new(id: LoggerId) -> Self {
        Self { id, seen: 0 }
    }

    /// Events logged since the start (or the last restart).
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl Listener for LoggerListener {
    fn on(&mut self, event: &StoredEvent) -> Result<(), ListenerError> {
        self.seen += 1;
        info!(
            logger = %self.id,
            position = event.position(),
            stream = %event.stream(),
            event_type = event.event_type(),
            "event"
        );
        Ok(())
    }

    fn resettable(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<(), ListenerError> {
        self.seen = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stored_event;

    #[test]
    fn counts_events_until_reset() {
        let mut listener = LoggerListener::new(LoggerId::new());

        listener.on(&stored_event(1)).unwrap();
        listener.on(&stored_event(2)).unwrap();
        assert_eq!(listener.seen(), 2);

        assert!(listener.resettable());
        listener.reset().unwrap();
        assert_eq!(listener.seen(), 0);
    }
}
