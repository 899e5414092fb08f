//! Serializable identifier and priority primitives shared across the crate.

use serde::{Deserialize, Serialize};

/// Task identifier assigned by the store.
pub type TaskId = u64;

/// Recurrence rule identifier assigned by the store.
pub type RuleId = u64;

/// Raw task priority. `1` is high, `2` medium, `3` low.
///
/// Stored as a plain integer so that out-of-range values coming from older
/// records can still be routed (they fall back to the medium lane).
pub type Priority = i32;

/// Highest priority tier.
pub const PRIORITY_HIGH: Priority = 1;
/// Default priority tier.
pub const PRIORITY_MEDIUM: Priority = 2;
/// Lowest priority tier.
pub const PRIORITY_LOW: Priority = 3;

/// Returns true if `priority` is one of the three accepted tiers.
#[must_use]
pub const fn is_valid_priority(priority: Priority) -> bool {
    priority >= PRIORITY_HIGH && priority <= PRIORITY_LOW
}

/// One operand pair of an addition payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    /// Left operand.
    pub a: i64,
    /// Right operand.
    pub b: i64,
}
