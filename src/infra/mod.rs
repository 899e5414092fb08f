//! Infrastructure adapters for stores and timed queues.

pub mod queue;
pub mod store;

pub use queue::{DelayQueue, LaneChannels};
pub use store::{InMemoryStore, JsonlStore};
