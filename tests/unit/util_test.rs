//! Tests for utility functions

use std::time::Duration;

use prometheus_task_engine::util::{
    duration_ms, is_valid_priority, now_ms, until_ms, Pair, PRIORITY_HIGH, PRIORITY_LOW,
    PRIORITY_MEDIUM,
};

#[test]
fn test_priority_tiers() {
    assert!(PRIORITY_HIGH < PRIORITY_MEDIUM);
    assert!(PRIORITY_MEDIUM < PRIORITY_LOW);
    for p in [PRIORITY_HIGH, PRIORITY_MEDIUM, PRIORITY_LOW] {
        assert!(is_valid_priority(p));
    }
    assert!(!is_valid_priority(0));
    assert!(!is_valid_priority(4));
    assert!(!is_valid_priority(-1));
}

#[test]
fn test_until_ms_saturates_in_the_past() {
    assert_eq!(until_ms(1_000, 5_000), Duration::ZERO);
    assert_eq!(until_ms(5_000, 1_000), Duration::from_millis(4_000));
}

#[test]
fn test_duration_ms() {
    assert_eq!(duration_ms(Duration::from_secs(30)), 30_000);
    assert_eq!(duration_ms(Duration::ZERO), 0);
}

#[test]
fn test_now_ms_is_epoch_millis() {
    assert!(now_ms() > 1_600_000_000_000);
}

#[test]
fn test_pair_serialization() {
    let pair: Pair = serde_json::from_str(r#"{"a": 2, "b": -3}"#).unwrap();
    assert_eq!(pair, Pair { a: 2, b: -3 });
    assert!(serde_json::from_str::<Pair>(r#"{"a": 2}"#).is_err());
}
