//! Event store implementations.
//!
//! Both stores share the same in-memory index ([`log::EventLog`]); the file
//! store additionally tails an append-only JSON-lines file so several worker
//! processes can share one log.

mod log;

pub mod file;
pub mod in_memory;

pub use file::FileEventStore;
pub use in_memory::InMemoryEventStore;
