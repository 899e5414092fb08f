//! Timed queue backends.

pub mod delay;

pub use delay::{DelayQueue, LaneChannels};
