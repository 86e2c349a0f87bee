//! Infrastructure layer: event stores, the event-sourced subscription, and the
//! repository / unit of work that persist it.

pub mod event_store;
pub mod listeners;
pub mod repository;
pub mod subscription;
pub mod unit_of_work;

pub use event_store::{FileEventStore, InMemoryEventStore};
pub use listeners::ListenerFactories;
pub use repository::EventSourcedRepository;
pub use subscription::{SourcedSubscription, SubscriptionEvent};
pub use unit_of_work::StoreUnitOfWork;
