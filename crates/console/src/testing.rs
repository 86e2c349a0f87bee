//! Hand-written collaborator doubles shared by the unit tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;

use conduit_core::{EventId, StreamName, SubscriptionId};
use conduit_events::{
    ChangeSet, EventStore, EventStoreError, EventStream, ListenerError, Repository,
    RepositoryError, RestartOutcome, StoredEvent, Subscription, SubscriptionError,
    SubscriptionFilter, SubscriptionState, UnitOfWork, UnitOfWorkError,
};

pub(crate) fn stored_event(position: u64) -> StoredEvent {
    StoredEvent::new(
        EventId::new(),
        StreamName::new(format!("order-{position}")),
        1,
        position,
        "order.placed",
        Utc::now(),
        serde_json::json!({ "position": position }),
    )
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum RestartScript {
    Restarts,
    NotPossible,
    Fails,
}

/// Subscription yielding a fixed number of events, optionally followed by an error.
pub(crate) struct ScriptedSubscription {
    id: SubscriptionId,
    events: u64,
    fails: bool,
    restart: RestartScript,
    state: Mutex<SubscriptionState>,
    pub pauses: AtomicUsize,
}

impl ScriptedSubscription {
    pub fn succeeding(kind: &str, value: &str, events: u64) -> Self {
        Self {
            id: SubscriptionId::new(kind, value),
            events,
            fails: false,
            restart: RestartScript::Restarts,
            state: Mutex::new(SubscriptionState::Running),
            pauses: AtomicUsize::new(0),
        }
    }

    pub fn failing_after(kind: &str, value: &str, events: u64) -> Self {
        Self {
            fails: true,
            ..Self::succeeding(kind, value, events)
        }
    }

    pub fn with_restart(mut self, restart: RestartScript) -> Self {
        self.restart = restart;
        self
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

impl Subscription for ScriptedSubscription {
    fn subscription_id(&self) -> &SubscriptionId {
        &self.id
    }

    fn state(&self) -> SubscriptionState {
        *self.state.lock().unwrap()
    }

    fn consume<'a>(&'a self, _store: &'a dyn EventStore, limit: Option<u64>) -> EventStream<'a> {
        let count = limit.map_or(self.events, |l| l.min(self.events));
        let events = (1..=count).map(|p| Ok(stored_event(p)));
        let failure = (self.fails && limit.is_none_or(|l| l > self.events))
            .then(|| Err(SubscriptionError::Listener(ListenerError::failed("listener exploded"))));
        Box::new(events.chain(failure))
    }

    fn pause(&self) -> Result<(), SubscriptionError> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if *state != SubscriptionState::Running {
            return Err(SubscriptionError::InvalidTransition {
                state: *state,
                action: "pause",
            });
        }
        *state = SubscriptionState::Paused;
        Ok(())
    }

    fn unpause(&self) -> Result<(), SubscriptionError> {
        let mut state = self.state.lock().unwrap();
        if *state != SubscriptionState::Paused {
            return Err(SubscriptionError::InvalidTransition {
                state: *state,
                action: "unpause",
            });
        }
        *state = SubscriptionState::Running;
        Ok(())
    }

    fn restart(&self) -> RestartOutcome {
        match self.restart {
            RestartScript::Restarts => RestartOutcome::Restarted,
            RestartScript::NotPossible => RestartOutcome::NotPossible,
            RestartScript::Fails => RestartOutcome::Failed(SubscriptionError::Store(
                EventStoreError::Concurrency("stream moved".into()),
            )),
        }
    }

    fn take_changes(&self) -> Option<ChangeSet> {
        None
    }

    fn mark_committed(&self, _version: u64) {}

    fn discard_changes(&self) {}
}

/// Unit of work that only counts what happens to it.
#[derive(Debug, Default)]
pub(crate) struct CountingUnitOfWork {
    tracked: HashSet<SubscriptionId>,
    pub commits: u64,
    pub clears: u64,
    fail_after: Option<u64>,
}

impl CountingUnitOfWork {
    /// Commits succeed `n` times, then fail.
    pub fn failing_after_commits(n: u64) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }
}

impl UnitOfWork for CountingUnitOfWork {
    fn add(&mut self, subscription: Arc<dyn Subscription>) {
        self.tracked.insert(subscription.subscription_id().clone());
    }

    fn has(&self, id: &SubscriptionId) -> bool {
        self.tracked.contains(id)
    }

    fn count(&self) -> usize {
        self.tracked.len()
    }

    fn commit(&mut self) -> Result<Vec<StoredEvent>, UnitOfWorkError> {
        let tracked = std::mem::take(&mut self.tracked);
        if self.fail_after == Some(self.commits) {
            return Err(UnitOfWorkError::Store {
                subscription: tracked
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| SubscriptionId::new("unknown", "")),
                source: EventStoreError::Concurrency("stream moved".into()),
            });
        }
        self.commits += 1;
        Ok(vec![])
    }

    fn clear(&mut self) {
        self.tracked.clear();
        self.clears += 1;
    }
}

/// Repository over a fixed list, counting lookups.
#[derive(Default)]
pub(crate) struct FakeRepository {
    subscriptions: Vec<Arc<dyn Subscription>>,
    lookups: AtomicUsize,
}

impl FakeRepository {
    pub fn with<S: Subscription + 'static>(subscriptions: impl IntoIterator<Item = Arc<S>>) -> Self {
        Self {
            subscriptions: subscriptions
                .into_iter()
                .map(|s| s as Arc<dyn Subscription>)
                .collect(),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Repository for FakeRepository {
    fn find(&self, id: &SubscriptionId) -> Result<Option<Arc<dyn Subscription>>, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .subscriptions
            .iter()
            .find(|s| s.subscription_id() == id)
            .cloned())
    }

    fn all(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Arc<dyn Subscription>>, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .subscriptions
            .iter()
            .filter(|s| filter.matches(s.subscription_id(), s.state()))
            .cloned()
            .collect())
    }
}
