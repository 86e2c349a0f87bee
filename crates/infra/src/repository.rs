use std::sync::Arc;

use tracing::{debug, warn};

use conduit_core::{ExpectedVersion, StreamName, SubscriptionId};
use conduit_events::{
    EventStore, EventStoreError, Repository, RepositoryError, Subscription, SubscriptionFilter,
};

use crate::listeners::ListenerFactories;
use crate::subscription::{SourcedSubscription, SubscriptionEvent};

/// Loads subscriptions by replaying their lifecycle streams.
#[derive(Clone)]
pub struct EventSourcedRepository {
    store: Arc<dyn EventStore>,
    listeners: Arc<ListenerFactories>,
}

impl EventSourcedRepository {
    pub fn new(store: Arc<dyn EventStore>, listeners: Arc<ListenerFactories>) -> Self {
        Self { store, listeners }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn listeners(&self) -> &ListenerFactories {
        &self.listeners
    }

    /// Record the `Started` event of a new subscription.
    pub fn create(&self, id: &SubscriptionId) -> Result<Arc<dyn Subscription>, RepositoryError> {
        let listener = self
            .listeners
            .create(id)
            .map_err(|_| RepositoryError::UnknownType(id.kind().to_string()))?;

        let subscription = SourcedSubscription::start(id.clone(), listener, self.store.clone());
        if let Some(changes) = subscription.take_changes() {
            // A stream at version 0 does not exist yet.
            let committed = self
                .store
                .append(&changes.stream, changes.events, ExpectedVersion::Exact(0))
                .map_err(|err| match err {
                    EventStoreError::Concurrency(_) => RepositoryError::AlreadyExists(id.clone()),
                    other => RepositoryError::Store(other),
                })?;
            if let Some(last) = committed.last() {
                subscription.mark_committed(last.sequence_number());
            }
        }

        debug!(subscription = %id, "subscription created");
        Ok(Arc::new(subscription))
    }

    fn load(&self, id: &SubscriptionId) -> Result<Option<Arc<dyn Subscription>>, RepositoryError> {
        let stream = id.stream_name();
        let history = self.store.load_stream(&stream)?;
        if history.is_empty() {
            return Ok(None);
        }

        let listener = self
            .listeners
            .create(id)
            .map_err(|_| RepositoryError::UnknownType(id.kind().to_string()))?;

        let subscription =
            SourcedSubscription::replay(id.clone(), listener, self.store.clone(), &history).map_err(
                |err| RepositoryError::Corrupted {
                    stream: stream.to_string(),
                    reason: err.to_string(),
                },
            )?;

        Ok(Some(Arc::new(subscription)))
    }

    /// Read the subscription id back from the `Started` event of `stream`.
    fn identify(&self, stream: &StreamName) -> Result<Option<SubscriptionId>, RepositoryError> {
        let history = self.store.load_stream(stream)?;
        let Some(first) = history.first() else {
            return Ok(None);
        };

        match serde_json::from_value::<SubscriptionEvent>(first.payload().clone()) {
            Ok(SubscriptionEvent::Started {
                subscription_type,
                subscription_id,
            }) => Ok(Some(SubscriptionId::new(subscription_type, subscription_id))),
            Ok(other) => Err(RepositoryError::Corrupted {
                stream: stream.to_string(),
                reason: format!("stream starts with {} instead of a start", other.event_type()),
            }),
            Err(err) => Err(RepositoryError::Corrupted {
                stream: stream.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for EventSourcedRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcedRepository")
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl Repository for EventSourcedRepository {
    fn find(&self, id: &SubscriptionId) -> Result<Option<Arc<dyn Subscription>>, RepositoryError> {
        self.load(id)
    }

    fn all(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Arc<dyn Subscription>>, RepositoryError> {
        let mut subscriptions = Vec::new();

        for stream in self.store.streams(StreamName::SUBSCRIPTION_CATEGORY)? {
            let Some(id) = self.identify(&stream)? else {
                continue;
            };

            if !filter.matches_kind(&id) {
                continue;
            }

            if !self.listeners.contains(id.kind()) {
                warn!(subscription = %id, "skipping subscription without registered listener");
                continue;
            }

            if let Some(subscription) = self.load(&id)? {
                if filter.matches(&id, subscription.state()) {
                    subscriptions.push(subscription);
                }
            }
        }

        Ok(subscriptions)
    }
}
