//! Tests for error types

use prometheus_task_engine::core::{SchedulerError, TaskStatus};

#[test]
fn test_task_not_found_display() {
    let err = SchedulerError::TaskNotFound(42);
    assert_eq!(format!("{}", err), "task 42 not found");
}

#[test]
fn test_rule_not_found_display() {
    let err = SchedulerError::RuleNotFound(3);
    assert_eq!(format!("{}", err), "recurrence rule 3 not found");
}

#[test]
fn test_invalid_transition_display() {
    let err = SchedulerError::InvalidStateTransition {
        task_id: 9,
        current: TaskStatus::Success,
        operation: "revoke",
    };
    assert_eq!(format!("{}", err), "task 9 has status 'success', cannot revoke");
}

#[test]
fn test_conflict_display() {
    let err = SchedulerError::Conflict(5);
    assert_eq!(format!("{}", err), "task 5 was modified concurrently");
}

#[test]
fn test_dispatch_failure_display() {
    let err = SchedulerError::DispatchFailure {
        task_id: 1,
        reason: "queue full: high_priority".into(),
    };
    assert_eq!(
        format!("{}", err),
        "dispatch failed for task 1: queue full: high_priority"
    );
}

#[test]
fn test_queue_full_display() {
    let err = SchedulerError::QueueFull("low_priority".into());
    assert_eq!(format!("{}", err), "queue full: low_priority");
}

#[test]
fn test_validation_display() {
    let err = SchedulerError::Validation("priority must be 1 (high), 2 (medium) or 3 (low)".into());
    assert_eq!(
        format!("{}", err),
        "validation error: priority must be 1 (high), 2 (medium) or 3 (low)"
    );
}

#[test]
fn test_shutdown_display() {
    assert_eq!(format!("{}", SchedulerError::Shutdown), "engine is shut down");
}

#[test]
fn test_backend_is_the_only_fatal_error() {
    assert!(SchedulerError::Backend("disk".into()).is_fatal());
    assert!(!SchedulerError::Shutdown.is_fatal());
    assert!(!SchedulerError::QueueFull("x".into()).is_fatal());
    assert!(!SchedulerError::Validation("x".into()).is_fatal());
}
