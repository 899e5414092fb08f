//! Configuration models for lanes, retries, and the recurrence scanner.

pub mod engine;

pub use engine::{EngineConfig, LaneConfig, LanesConfig, RetryConfig};
