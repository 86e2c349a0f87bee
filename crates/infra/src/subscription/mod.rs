//! Event-sourced subscription.
//!
//! A [`SourcedSubscription`] records its own lifecycle in the stream
//! `$subscription-<type>-<id>` and is rebuilt from that stream on load.
//! Processed positions are staged as uncommitted changes and persisted by the
//! unit of work; `pause`, `unpause` and `restart` are appended immediately.

mod consume;

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use conduit_core::{ExpectedVersion, StreamName, SubscriptionId};
use conduit_events::{
    ChangeSet, EventStore, EventStream, Listener, RestartOutcome, StoredEvent, Subscription,
    SubscriptionError, SubscriptionState, UncommittedEvent,
};

use consume::Consume;

/// Lifecycle events of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Started {
        subscription_type: String,
        subscription_id: String,
    },
    EventProcessed {
        position: u64,
    },
    Paused,
    Unpaused,
    Restarted,
    Completed,
}

impl SubscriptionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SubscriptionEvent::Started { .. } => "subscription.started",
            SubscriptionEvent::EventProcessed { .. } => "subscription.event_processed",
            SubscriptionEvent::Paused => "subscription.paused",
            SubscriptionEvent::Unpaused => "subscription.unpaused",
            SubscriptionEvent::Restarted => "subscription.restarted",
            SubscriptionEvent::Completed => "subscription.completed",
        }
    }

    pub fn started(id: &SubscriptionId) -> Self {
        SubscriptionEvent::Started {
            subscription_type: id.kind().to_string(),
            subscription_id: id.value().to_string(),
        }
    }

    fn to_uncommitted(&self) -> UncommittedEvent {
        // Unit and struct variants of a tagged enum always serialize.
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        UncommittedEvent::new(self.event_type(), payload)
    }
}

struct Inner {
    listener: Box<dyn Listener>,
    state: SubscriptionState,
    /// Last global position handed to the listener, persisted or not.
    position: u64,
    /// Version of the subscription stream as persisted.
    committed_version: u64,
    committed_state: SubscriptionState,
    committed_position: u64,
    pending: Vec<SubscriptionEvent>,
    /// Position and state covered by a change set handed out but not yet confirmed.
    in_flight: Option<(u64, SubscriptionState)>,
}

impl Inner {
    fn apply(&mut self, event: &SubscriptionEvent) {
        match event {
            SubscriptionEvent::Started { .. } | SubscriptionEvent::Unpaused => {
                self.state = SubscriptionState::Running;
            }
            SubscriptionEvent::EventProcessed { position } => self.position = *position,
            SubscriptionEvent::Paused => self.state = SubscriptionState::Paused,
            SubscriptionEvent::Restarted => {
                self.position = 0;
                self.state = SubscriptionState::Running;
            }
            SubscriptionEvent::Completed => self.state = SubscriptionState::Completed,
        }
    }
}

/// What happened to one event handed to the listener.
pub(crate) enum Step {
    /// Processed, keep going.
    Continue,
    /// Processed, and the listener is done for good.
    Last,
    /// The subscription stopped running; the event was not processed.
    Stop,
}

/// Subscription backed by its own lifecycle stream.
pub struct SourcedSubscription {
    id: SubscriptionId,
    stream: StreamName,
    store: Arc<dyn EventStore>,
    inner: Mutex<Inner>,
}

impl SourcedSubscription {
    /// A fresh subscription whose `Started` event is pending, not persisted.
    pub fn start(id: SubscriptionId, listener: Box<dyn Listener>, store: Arc<dyn EventStore>) -> Self {
        let started = SubscriptionEvent::started(&id);
        let subscription = Self::empty(id, listener, store, SubscriptionState::Running);
        if let Ok(mut inner) = subscription.inner.lock() {
            inner.apply(&started);
            inner.pending.push(started);
        }
        subscription
    }

    /// Rebuild a subscription from the events of its stream.
    pub fn replay(
        id: SubscriptionId,
        listener: Box<dyn Listener>,
        store: Arc<dyn EventStore>,
        history: &[StoredEvent],
    ) -> Result<Self, serde_json::Error> {
        let subscription = Self::empty(id, listener, store, SubscriptionState::Running);
        {
            let mut inner = subscription
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for stored in history {
                let event: SubscriptionEvent = serde_json::from_value(stored.payload().clone())?;
                inner.apply(&event);
                inner.committed_version = stored.sequence_number();
            }
            inner.committed_state = inner.state;
            inner.committed_position = inner.position;
        }
        Ok(subscription)
    }

    fn empty(
        id: SubscriptionId,
        listener: Box<dyn Listener>,
        store: Arc<dyn EventStore>,
        state: SubscriptionState,
    ) -> Self {
        let stream = id.stream_name();
        Self {
            id,
            stream,
            store,
            inner: Mutex::new(Inner {
                listener,
                state,
                position: 0,
                committed_version: 0,
                committed_state: state,
                committed_position: 0,
                pending: Vec::new(),
                in_flight: None,
            }),
        }
    }

    /// Last global position handed to the listener.
    pub fn position(&self) -> u64 {
        self.lock().map(|inner| inner.position).unwrap_or(0)
    }

    /// Version of the subscription stream as last persisted.
    pub fn version(&self) -> u64 {
        self.lock().map(|inner| inner.committed_version).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, SubscriptionError> {
        self.inner.lock().map_err(|_| SubscriptionError::Poisoned)
    }

    pub(crate) fn running_position(&self) -> Option<u64> {
        let inner = self.lock().ok()?;
        (inner.state == SubscriptionState::Running).then_some(inner.position)
    }

    /// Hand one event of the global log to the listener.
    pub(crate) fn handle(&self, event: &StoredEvent) -> Result<Step, SubscriptionError> {
        let mut inner = self.lock()?;
        if inner.state != SubscriptionState::Running {
            return Ok(Step::Stop);
        }

        inner.listener.on(event)?;

        let processed = SubscriptionEvent::EventProcessed {
            position: event.position(),
        };
        inner.apply(&processed);
        inner.pending.push(processed);

        if inner.listener.is_completed() {
            debug!(subscription = %self.id, position = event.position(), "listener completed");
            inner.apply(&SubscriptionEvent::Completed);
            inner.pending.push(SubscriptionEvent::Completed);
            return Ok(Step::Last);
        }

        Ok(Step::Continue)
    }

    /// Append a lifecycle event right away, at the persisted version.
    fn record(&self, inner: &mut Inner, event: SubscriptionEvent) -> Result<(), SubscriptionError> {
        let committed = self.store.append(
            &self.stream,
            vec![event.to_uncommitted()],
            ExpectedVersion::Exact(inner.committed_version),
        )?;

        inner.apply(&event);
        if let Some(last) = committed.last() {
            inner.committed_version = last.sequence_number();
        }
        inner.committed_state = inner.state;
        Ok(())
    }

    fn transition(
        &self,
        from: SubscriptionState,
        action: &'static str,
        event: SubscriptionEvent,
    ) -> Result<(), SubscriptionError> {
        let mut inner = self.lock()?;
        if inner.state != from {
            return Err(SubscriptionError::InvalidTransition {
                state: inner.state,
                action,
            });
        }
        self.record(&mut inner, event)
    }
}

impl std::fmt::Debug for SourcedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("SourcedSubscription");
        s.field("id", &self.id);
        if let Ok(inner) = self.inner.lock() {
            s.field("state", &inner.state)
                .field("position", &inner.position)
                .field("version", &inner.committed_version)
                .field("pending", &inner.pending.len());
        }
        s.finish()
    }
}

impl Subscription for SourcedSubscription {
    fn subscription_id(&self) -> &SubscriptionId {
        &self.id
    }

    fn state(&self) -> SubscriptionState {
        self.lock()
            .map(|inner| inner.state)
            .unwrap_or(SubscriptionState::Paused)
    }

    fn consume<'a>(&'a self, store: &'a dyn EventStore, limit: Option<u64>) -> EventStream<'a> {
        Box::new(Consume::new(self, store, limit))
    }

    fn pause(&self) -> Result<(), SubscriptionError> {
        self.transition(SubscriptionState::Running, "pause", SubscriptionEvent::Paused)
    }

    fn unpause(&self) -> Result<(), SubscriptionError> {
        self.transition(SubscriptionState::Paused, "unpause", SubscriptionEvent::Unpaused)
    }

    fn restart(&self) -> RestartOutcome {
        let mut inner = match self.lock() {
            Ok(inner) => inner,
            Err(err) => return RestartOutcome::Failed(err),
        };

        if !inner.listener.resettable() {
            return RestartOutcome::NotPossible;
        }

        if let Err(err) = inner.listener.reset() {
            return RestartOutcome::Failed(err.into());
        }

        inner.pending.clear();
        inner.in_flight = None;

        match self.record(&mut inner, SubscriptionEvent::Restarted) {
            Ok(()) => {
                inner.committed_position = 0;
                RestartOutcome::Restarted
            }
            Err(err) => {
                warn!(subscription = %self.id, error = %err, "recording restart failed");
                RestartOutcome::Failed(err)
            }
        }
    }

    fn take_changes(&self) -> Option<ChangeSet> {
        let mut inner = self.lock().ok()?;
        if inner.pending.is_empty() {
            return None;
        }

        let events = inner
            .pending
            .drain(..)
            .map(|e| e.to_uncommitted())
            .collect();
        inner.in_flight = Some((inner.position, inner.state));

        Some(ChangeSet {
            stream: self.stream.clone(),
            expected_version: ExpectedVersion::Exact(inner.committed_version),
            events,
        })
    }

    fn mark_committed(&self, version: u64) {
        if let Ok(mut inner) = self.lock() {
            inner.committed_version = version;
            if let Some((position, state)) = inner.in_flight.take() {
                inner.committed_position = position;
                inner.committed_state = state;
            }
        }
    }

    fn discard_changes(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.pending.clear();
            inner.in_flight = None;
            inner.position = inner.committed_position;
            inner.state = inner.committed_state;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use conduit_events::{ListenerError, StoredEvent};

    use super::*;
    use crate::InMemoryEventStore;

    /// Listener recording the positions it saw; fails or completes on request.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub seen: Arc<Mutex<Vec<u64>>>,
        pub fail_at: Option<usize>,
        pub complete_after: Option<usize>,
        pub resettable: bool,
    }

    impl Listener for Recorder {
        fn on(&mut self, event: &StoredEvent) -> Result<(), ListenerError> {
            let mut seen = self.seen.lock().unwrap();
            if self.fail_at == Some(seen.len()) {
                return Err(ListenerError::failed("boom"));
            }
            seen.push(event.position());
            Ok(())
        }

        fn resettable(&self) -> bool {
            self.resettable
        }

        fn reset(&mut self) -> Result<(), ListenerError> {
            self.seen.lock().unwrap().clear();
            Ok(())
        }

        fn is_completed(&self) -> bool {
            self.complete_after
                .is_some_and(|n| self.seen.lock().unwrap().len() >= n)
        }
    }

    pub(crate) fn store_with_orders(n: usize) -> Arc<InMemoryEventStore> {
        let store = Arc::new(InMemoryEventStore::new());
        for i in 0..n {
            store
                .append(
                    &StreamName::new(format!("order-{i}")),
                    vec![UncommittedEvent::new("order.placed", serde_json::json!({ "n": i }))],
                    ExpectedVersion::Exact(0),
                )
                .unwrap();
        }
        store
    }

    fn started(store: &Arc<InMemoryEventStore>, listener: Recorder) -> SourcedSubscription {
        let id = SubscriptionId::new("recorder", "a");
        let subscription = SourcedSubscription::start(id, Box::new(listener), store.clone());
        let changes = subscription.take_changes().unwrap();
        let committed = store
            .append(&changes.stream, changes.events, changes.expected_version)
            .unwrap();
        subscription.mark_committed(committed.last().unwrap().sequence_number());
        subscription
    }

    fn commit(store: &InMemoryEventStore, subscription: &SourcedSubscription) {
        if let Some(changes) = subscription.take_changes() {
            let committed = store
                .append(&changes.stream, changes.events, changes.expected_version)
                .unwrap();
            subscription.mark_committed(committed.last().unwrap().sequence_number());
        }
    }

    #[test]
    fn consume_skips_internal_streams_and_respects_limit() {
        let store = store_with_orders(5);
        let listener = Recorder::default();
        let seen = listener.seen.clone();
        let subscription = started(&store, listener);

        let positions: Vec<u64> = subscription
            .consume(store.as_ref(), Some(3))
            .map(|e| e.unwrap().position())
            .collect();

        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(subscription.position(), 3);
    }

    #[test]
    fn committed_progress_survives_reload() {
        let store = store_with_orders(4);
        let subscription = started(&store, Recorder::default());

        assert_eq!(subscription.consume(store.as_ref(), Some(2)).count(), 2);
        commit(&store, &subscription);

        let id = subscription.subscription_id().clone();
        let history = store.load_stream(&id.stream_name()).unwrap();
        let reloaded =
            SourcedSubscription::replay(id, Box::new(Recorder::default()), store.clone(), &history)
                .unwrap();

        assert_eq!(reloaded.position(), 2);
        let rest: Vec<u64> = reloaded
            .consume(store.as_ref(), None)
            .map(|e| e.unwrap().position())
            .collect();
        // Everything after position 4 belongs to the subscription stream.
        assert_eq!(rest, vec![3, 4]);
    }

    #[test]
    fn listener_error_is_yielded_once_then_stream_ends() {
        let store = store_with_orders(5);
        let subscription = started(
            &store,
            Recorder {
                fail_at: Some(2),
                ..Recorder::default()
            },
        );

        let results: Vec<_> = subscription.consume(store.as_ref(), None).collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(results[2], Err(SubscriptionError::Listener(_))));
    }

    #[test]
    fn completing_listener_stops_and_marks_completed() {
        let store = store_with_orders(5);
        let subscription = started(
            &store,
            Recorder {
                complete_after: Some(2),
                ..Recorder::default()
            },
        );

        assert_eq!(subscription.consume(store.as_ref(), None).count(), 2);
        assert_eq!(subscription.state(), SubscriptionState::Completed);
        assert_eq!(subscription.consume(store.as_ref(), None).count(), 0);
    }

    #[test]
    fn pause_is_durable_and_stops_consumption() {
        let store = store_with_orders(3);
        let subscription = started(&store, Recorder::default());

        subscription.pause().unwrap();

        assert_eq!(subscription.state(), SubscriptionState::Paused);
        assert_eq!(subscription.consume(store.as_ref(), None).count(), 0);
        let history = store
            .load_stream(&subscription.subscription_id().stream_name())
            .unwrap();
        assert_eq!(history.last().unwrap().event_type(), "subscription.paused");

        assert!(matches!(
            subscription.pause(),
            Err(SubscriptionError::InvalidTransition { action: "pause", .. })
        ));

        subscription.unpause().unwrap();
        assert_eq!(subscription.consume(store.as_ref(), None).count(), 3);
    }

    #[test]
    fn pause_with_pending_changes_keeps_them_committable() {
        let store = store_with_orders(3);
        let subscription = started(&store, Recorder::default());

        assert_eq!(subscription.consume(store.as_ref(), Some(2)).count(), 2);
        subscription.pause().unwrap();
        commit(&store, &subscription);

        assert_eq!(subscription.version(), 4);
    }

    #[test]
    fn discarded_changes_rewind_to_committed_position() {
        let store = store_with_orders(3);
        let subscription = started(&store, Recorder::default());

        assert_eq!(subscription.consume(store.as_ref(), Some(2)).count(), 2);
        subscription.discard_changes();

        assert_eq!(subscription.position(), 0);
        assert!(subscription.take_changes().is_none());
    }

    #[test]
    fn restart_requires_a_resettable_listener() {
        let store = store_with_orders(2);
        let subscription = started(&store, Recorder::default());

        assert!(matches!(subscription.restart(), RestartOutcome::NotPossible));
    }

    #[test]
    fn restart_replays_from_the_beginning() {
        let store = store_with_orders(2);
        let listener = Recorder {
            resettable: true,
            ..Recorder::default()
        };
        let seen = listener.seen.clone();
        let subscription = started(&store, listener);

        assert_eq!(subscription.consume(store.as_ref(), None).count(), 2);
        commit(&store, &subscription);

        assert!(matches!(subscription.restart(), RestartOutcome::Restarted));
        assert_eq!(subscription.position(), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(subscription.consume(store.as_ref(), None).count(), 2);
    }
}
