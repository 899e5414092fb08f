//! Audit trail of task lifecycle events.
//!
//! Every dispatch, attempt and administrative action produces one
//! [`AuditEvent`]. Sinks are shared between worker threads, so they take
//! `&self` and synchronise internally.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::core::dispatcher::Lane;
use crate::util::clock::now_ms;
use crate::util::serde::TaskId;

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Accepted by the engine.
    Submit,
    /// Handed to a lane.
    Dispatch,
    /// Enqueue was refused; task parked as pending.
    DispatchFailed,
    /// Attempt started.
    Start,
    /// Attempt succeeded.
    Complete,
    /// Attempt failed terminally.
    Fail,
    /// Fault with retry budget left; backoff scheduled.
    RetryScheduled,
    /// Caller reset a failed task.
    Retry,
    /// Moved to another lane.
    Migrate,
    /// Cancelled before start.
    Revoke,
    /// Removed from the store.
    Delete,
    /// Materialized by a recurrence rule.
    Materialize,
}

impl AuditAction {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Dispatch => "dispatch",
            Self::DispatchFailed => "dispatch_failed",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::RetryScheduled => "retry_scheduled",
            Self::Retry => "retry",
            Self::Migrate => "migrate",
            Self::Revoke => "revoke",
            Self::Delete => "delete",
            Self::Materialize => "materialize",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Lane involved, if any.
    pub lane: Option<Lane>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events recorded for one task, oldest first.
    #[must_use]
    pub fn events_for(&self, task_id: TaskId) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink that forwards events to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "task_engine::audit",
            event_id = %event.event_id,
            task_id = event.task_id,
            lane = event.lane.map(Lane::as_str),
            action = %event.action,
            detail = event.detail.as_deref(),
            "audit"
        );
    }
}

/// Helper to build an audit event stamped with a fresh id and the current time.
#[must_use]
pub fn build_audit_event(
    task_id: TaskId,
    lane: Option<Lane>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        task_id,
        lane,
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
