//! Subscription contract (mechanics only).
//!
//! A subscription is a named, resumable consumer of the global event log. It
//! owns a listener and remembers how far that listener got. Infra decides how
//! that progress is persisted; the runner only decides *when*.

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use conduit_core::{ExpectedVersion, StreamName, SubscriptionId};

use crate::{EventStore, EventStoreError, ListenerError, StoredEvent, UncommittedEvent};

/// Lazy sequence of events produced by [`Subscription::consume`].
pub type EventStream<'a> = Box<dyn Iterator<Item = Result<StoredEvent, SubscriptionError>> + 'a>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Running,
    Paused,
    Completed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubscriptionState::Running => "running",
            SubscriptionState::Paused => "paused",
            SubscriptionState::Completed => "completed",
        })
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("listener failed: {0}")]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("cannot {action} a {state} subscription")]
    InvalidTransition {
        state: SubscriptionState,
        action: &'static str,
    },

    #[error("subscription state lock poisoned")]
    Poisoned,
}

/// Outcome of [`Subscription::restart`].
///
/// "Not possible" is an expected answer (the listener cannot be reset), not an
/// error, so callers branch on it instead of inspecting error types.
#[derive(Debug)]
pub enum RestartOutcome {
    Restarted,
    NotPossible,
    Failed(SubscriptionError),
}

/// Pending, not yet persisted changes of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub stream: StreamName,
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

/// Subscription contract.
///
/// All methods take `&self`: a subscription is shared between the event loop
/// (which holds the [`EventStream`]) and the unit of work (which flushes its
/// changes), so implementations use interior mutability.
pub trait Subscription: Send + Sync {
    fn subscription_id(&self) -> &SubscriptionId;

    fn state(&self) -> SubscriptionState;

    /// Feed events to the listener, yielding each one after it was handled.
    ///
    /// `limit` caps how many events this call may yield. The first error ends
    /// the sequence.
    fn consume<'a>(&'a self, store: &'a dyn EventStore, limit: Option<u64>) -> EventStream<'a>;

    fn pause(&self) -> Result<(), SubscriptionError>;

    fn unpause(&self) -> Result<(), SubscriptionError>;

    fn restart(&self) -> RestartOutcome;

    /// Hand pending changes over for persisting (leaves none behind).
    fn take_changes(&self) -> Option<ChangeSet>;

    /// Record that changes up to stream `version` are persisted.
    fn mark_committed(&self, version: u64);

    /// Forget pending changes without persisting them.
    fn discard_changes(&self);
}
