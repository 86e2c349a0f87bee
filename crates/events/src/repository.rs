use std::sync::Arc;

use thiserror::Error;

use conduit_core::SubscriptionId;

use crate::{EventStoreError, Subscription, SubscriptionState};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("no listener registered for subscription type \"{0}\"")]
    UnknownType(String),

    #[error("subscription stream {stream} is corrupted: {reason}")]
    Corrupted { stream: String, reason: String },

    #[error("subscription {0} already exists")]
    AlreadyExists(SubscriptionId),
}

/// Which subscriptions [`Repository::all`] yields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Type tags to keep; empty keeps every type.
    pub kinds: Vec<String>,
    pub include_completed: bool,
}

impl SubscriptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kinds<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn including_completed(mut self, include: bool) -> Self {
        self.include_completed = include;
        self
    }

    pub fn matches_kind(&self, id: &SubscriptionId) -> bool {
        self.kinds.is_empty() || self.kinds.iter().any(|k| k == id.kind())
    }

    pub fn matches(&self, id: &SubscriptionId, state: SubscriptionState) -> bool {
        self.matches_kind(id) && (self.include_completed || state != SubscriptionState::Completed)
    }
}

/// Subscription lookup.
pub trait Repository: Send + Sync {
    fn find(&self, id: &SubscriptionId) -> Result<Option<Arc<dyn Subscription>>, RepositoryError>;

    /// Eligible subscriptions in enumeration (creation) order.
    fn all(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Arc<dyn Subscription>>, RepositoryError>;
}

impl<R> Repository for Arc<R>
where
    R: Repository + ?Sized,
{
    fn find(&self, id: &SubscriptionId) -> Result<Option<Arc<dyn Subscription>>, RepositoryError> {
        (**self).find(id)
    }

    fn all(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Arc<dyn Subscription>>, RepositoryError> {
        (**self).all(filter)
    }
}
