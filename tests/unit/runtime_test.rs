//! Tests for service request and response models

use prometheus_task_engine::core::{IntervalKind, TaskKind, TaskStatus};
use prometheus_task_engine::runtime::{TaskListQuery, TaskSubmission, MAX_BATCH_SIZE};
use serde_json::json;

#[test]
fn test_submission_from_json_defaults() {
    let sub: TaskSubmission = serde_json::from_value(json!({
        "kind": "single",
        "payload": { "a": 1, "b": 2 }
    }))
    .unwrap();
    assert_eq!(sub.kind, TaskKind::Single);
    assert_eq!(sub.priority(), 2);
    assert!(sub.scheduled_for_ms.is_none());
    assert!(sub.recurring.is_none());
    assert!(sub.validate().is_ok());
}

#[test]
fn test_submission_with_recurrence_from_json() {
    let sub: TaskSubmission = serde_json::from_value(json!({
        "kind": "batch",
        "payload": { "pairs": [{ "a": 1, "b": 2 }] },
        "priority": 3,
        "recurring": { "interval_type": "hourly", "interval_value": 720 }
    }))
    .unwrap();
    let spec = sub.recurring.unwrap();
    assert_eq!(spec.interval_type, IntervalKind::Hourly);
    assert!(sub.validate().is_ok());
}

#[test]
fn test_submission_rejects_oversized_recurrence() {
    let sub: TaskSubmission = serde_json::from_value(json!({
        "kind": "single",
        "payload": { "a": 1, "b": 2 },
        "recurring": { "interval_type": "minutely", "interval_value": 1441 }
    }))
    .unwrap();
    assert!(sub.validate().is_err());
}

#[test]
fn test_batch_without_pairs_is_rejected() {
    let sub = TaskSubmission::new(TaskKind::Batch, json!({ "a": 1 }));
    assert!(sub.validate().is_err());
}

#[test]
fn test_batch_size_limit() {
    let pairs: Vec<(i64, i64)> = (0..=MAX_BATCH_SIZE as i64).map(|i| (i, 1)).collect();
    assert!(TaskSubmission::batch(&pairs).validate().is_err());
    assert!(TaskSubmission::batch(&pairs[..MAX_BATCH_SIZE]).validate().is_ok());
}

#[test]
fn test_list_query_from_json() {
    let query: TaskListQuery = serde_json::from_value(json!({
        "statuses": ["failed", "revoked"],
        "offset": 10
    }))
    .unwrap();
    assert_eq!(query.limit, 50);
    let filter = query.to_filter().unwrap();
    assert_eq!(filter.statuses, vec![TaskStatus::Failed, TaskStatus::Revoked]);
    assert_eq!(filter.offset, 10);
}
