//! Tests for audit sink

use prometheus_task_engine::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, Lane};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    sink.record(build_audit_event(1, Some(Lane::High), AuditAction::Submit, None));
    sink.record(build_audit_event(
        1,
        Some(Lane::High),
        AuditAction::Dispatch,
        Some("delay_ms=0 attempt=0".to_string()),
    ));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, 1);
    assert_eq!(events[0].action, AuditAction::Submit);
    assert_eq!(events[1].detail.as_deref(), Some("delay_ms=0 attempt=0"));
    assert_ne!(events[0].event_id, events[1].event_id);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(1, None, AuditAction::Submit, None));
    sink.record(build_audit_event(2, None, AuditAction::Submit, None));
    sink.record(build_audit_event(3, None, AuditAction::Submit, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, 2); // First one popped
    assert_eq!(events[1].task_id, 3);
}

#[test]
fn test_events_for_task() {
    let sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event(1, None, AuditAction::Submit, None));
    sink.record(build_audit_event(2, None, AuditAction::Submit, None));
    sink.record(build_audit_event(1, Some(Lane::Low), AuditAction::Revoke, None));

    let actions: Vec<AuditAction> = sink.events_for(1).into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Submit, AuditAction::Revoke]);
}

#[test]
fn test_audit_action_wire_names() {
    assert_eq!(AuditAction::RetryScheduled.to_string(), "retry_scheduled");
    assert_eq!(
        serde_json::to_string(&AuditAction::DispatchFailed).unwrap(),
        "\"dispatch_failed\""
    );
}
