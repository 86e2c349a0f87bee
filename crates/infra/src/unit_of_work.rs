use std::sync::Arc;

use tracing::trace;

use conduit_core::SubscriptionId;
use conduit_events::{EventStore, StoredEvent, Subscription, UnitOfWork, UnitOfWorkError};

/// Unit of work that appends each tracked subscription's changes to the store.
///
/// Subscriptions are flushed in the order they were first added. Appends are
/// atomic per subscription, not across subscriptions.
pub struct StoreUnitOfWork {
    store: Arc<dyn EventStore>,
    tracked: Vec<Arc<dyn Subscription>>,
}

impl StoreUnitOfWork {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            tracked: Vec::new(),
        }
    }
}

impl std::fmt::Debug for StoreUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreUnitOfWork")
            .field(
                "tracked",
                &self
                    .tracked
                    .iter()
                    .map(|s| s.subscription_id())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl UnitOfWork for StoreUnitOfWork {
    fn add(&mut self, subscription: Arc<dyn Subscription>) {
        if !self.has(subscription.subscription_id()) {
            self.tracked.push(subscription);
        }
    }

    fn has(&self, id: &SubscriptionId) -> bool {
        self.tracked.iter().any(|s| s.subscription_id() == id)
    }

    fn count(&self) -> usize {
        self.tracked.len()
    }

    fn commit(&mut self) -> Result<Vec<StoredEvent>, UnitOfWorkError> {
        let mut committed = Vec::new();
        let mut tracked = std::mem::take(&mut self.tracked).into_iter();

        while let Some(subscription) = tracked.next() {
            let Some(changes) = subscription.take_changes() else {
                continue;
            };

            match self
                .store
                .append(&changes.stream, changes.events, changes.expected_version)
            {
                Ok(events) => {
                    if let Some(last) = events.last() {
                        subscription.mark_committed(last.sequence_number());
                    }
                    trace!(subscription = %subscription.subscription_id(), events = events.len(), "committed");
                    committed.extend(events);
                }
                Err(source) => {
                    subscription.discard_changes();
                    for rest in tracked {
                        rest.discard_changes();
                    }
                    return Err(UnitOfWorkError::Store {
                        subscription: subscription.subscription_id().clone(),
                        source,
                    });
                }
            }
        }

        Ok(committed)
    }

    fn clear(&mut self) {
        for subscription in self.tracked.drain(..) {
            subscription.discard_changes();
        }
    }
}
