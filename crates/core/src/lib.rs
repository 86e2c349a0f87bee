//! `conduit-core`: identifier and error primitives shared by every layer.
//!
//! This crate contains **pure** building blocks (no IO, no storage assumptions).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{EventId, IdentifierRegistry, ListenerId, StreamName, SubscriptionId};
pub use version::ExpectedVersion;

#[doc(hidden)]
pub use uuid;
