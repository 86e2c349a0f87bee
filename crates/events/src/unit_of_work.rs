use std::sync::Arc;

use thiserror::Error;

use conduit_core::SubscriptionId;

use crate::{EventStoreError, StoredEvent, Subscription};

#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    #[error("committing {subscription} failed: {source}")]
    Store {
        subscription: SubscriptionId,
        #[source]
        source: EventStoreError,
    },
}

/// Batched set of dirty subscriptions whose changes are flushed together.
///
/// After `commit()` or `clear()` nothing is tracked anymore. Adding the same
/// subscription twice tracks it once.
pub trait UnitOfWork {
    fn add(&mut self, subscription: Arc<dyn Subscription>);

    fn has(&self, id: &SubscriptionId) -> bool;

    /// Number of tracked subscriptions.
    fn count(&self) -> usize;

    /// Persist pending changes of every tracked subscription, then untrack them.
    fn commit(&mut self) -> Result<Vec<StoredEvent>, UnitOfWorkError>;

    /// Untrack everything, discarding pending changes.
    fn clear(&mut self);
}

impl<U> UnitOfWork for &mut U
where
    U: UnitOfWork + ?Sized,
{
    fn add(&mut self, subscription: Arc<dyn Subscription>) {
        (**self).add(subscription)
    }

    fn has(&self, id: &SubscriptionId) -> bool {
        (**self).has(id)
    }

    fn count(&self) -> usize {
        (**self).count()
    }

    fn commit(&mut self) -> Result<Vec<StoredEvent>, UnitOfWorkError> {
        (**self).commit()
    }

    fn clear(&mut self) {
        (**self).clear()
    }
}
