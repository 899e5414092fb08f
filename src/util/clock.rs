//! Wall-clock helpers. All persisted instants are milliseconds since the Unix epoch.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Time remaining until `target_ms`, or zero if it already passed.
#[must_use]
pub fn until_ms(target_ms: u128, now_ms: u128) -> Duration {
    let remaining = target_ms.saturating_sub(now_ms);
    Duration::from_millis(u64::try_from(remaining).unwrap_or(u64::MAX))
}

/// Convert a duration to whole milliseconds for timestamp arithmetic.
#[must_use]
pub const fn duration_ms(d: Duration) -> u128 {
    d.as_millis()
}
