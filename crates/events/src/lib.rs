//! `conduit-events`: contracts between the subscription runner and its collaborators.
//!
//! Nothing here performs IO. Implementations live in `conduit-infra` (and in
//! test doubles).

pub mod envelope;
pub mod listener;
pub mod repository;
pub mod store;
pub mod subscription;
pub mod unit_of_work;

pub use envelope::{EventEnvelope, StoredEvent};
pub use listener::{Listener, ListenerError};
pub use repository::{Repository, RepositoryError, SubscriptionFilter};
pub use store::{EventStore, EventStoreError, UncommittedEvent};
pub use subscription::{
    ChangeSet, EventStream, RestartOutcome, Subscription, SubscriptionError, SubscriptionState,
};
pub use unit_of_work::{UnitOfWork, UnitOfWorkError};
