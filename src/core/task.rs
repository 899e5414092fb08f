//! Task records and their lifecycle.
//!
//! A [`Task`] is the unit the engine schedules. Its lifecycle fields
//! (`status`, `started_at`, `finished_at`, `result`, `error_message`,
//! `retry_count`) are private and can only change through the transitions in
//! [`state`], which keeps the record invariants in one place:
//!
//! - `finished_at` is set iff the status is `success` or `failed`
//! - `result` is set only while the status is `success`
//! - `started_at` is set iff the task has run since its last reset

pub mod state;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::serde::{Priority, RuleId, TaskId};

/// Status of a task in the scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet handed to a lane.
    Pending,
    /// Handed to a lane and waiting for a worker (or for a backoff delay).
    Queued,
    /// An attempt owns the task.
    Running,
    /// Finished successfully.
    Success,
    /// Failed; terminal unless explicitly retried.
    Failed,
    /// Cancelled administratively before it started.
    Revoked,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Queued,
        Self::Running,
        Self::Success,
        Self::Failed,
        Self::Revoked,
    ];

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload shape tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// One unit of work.
    Single,
    /// A batch of independent sub-units.
    Batch,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Batch => f.write_str("batch"),
        }
    }
}

/// Fields a caller supplies when creating a task. Everything else is owned by
/// the store (`id`, `version`) or by lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Payload shape.
    pub kind: TaskKind,
    /// Opaque work input.
    pub payload: Value,
    /// Raw priority tier.
    pub priority: Priority,
    /// Earliest start instant (ms since epoch).
    pub scheduled_for_ms: Option<u128>,
    /// Rule that materialized this task, if any.
    pub recurrence_rule_id: Option<RuleId>,
}

impl NewTask {
    /// A task with default priority and no schedule.
    #[must_use]
    pub const fn new(kind: TaskKind, payload: Value, priority: Priority) -> Self {
        Self {
            kind,
            payload,
            priority,
            scheduled_for_ms: None,
            recurrence_rule_id: None,
        }
    }

    /// Set the earliest start instant.
    #[must_use]
    pub const fn scheduled_for(mut self, at_ms: u128) -> Self {
        self.scheduled_for_ms = Some(at_ms);
        self
    }

    /// Link the task to the rule that produced it.
    #[must_use]
    pub const fn from_rule(mut self, rule_id: RuleId) -> Self {
        self.recurrence_rule_id = Some(rule_id);
        self
    }
}

/// A scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    status: TaskStatus,
    priority: Priority,
    payload: Value,
    result: Option<Value>,
    scheduled_for_ms: Option<u128>,
    #[serde(default)]
    retry_at_ms: Option<u128>,
    started_at_ms: Option<u128>,
    finished_at_ms: Option<u128>,
    retry_count: u32,
    error_message: Option<String>,
    recurrence_rule_id: Option<RuleId>,
    created_at_ms: u128,
    updated_at_ms: u128,
    version: u64,
}

impl Task {
    /// Build a fresh `pending` task. Called by store implementations once they
    /// have allocated `id`.
    #[must_use]
    pub fn from_new(id: TaskId, new: NewTask, now_ms: u128) -> Self {
        Self {
            id,
            kind: new.kind,
            status: TaskStatus::Pending,
            priority: new.priority,
            payload: new.payload,
            result: None,
            scheduled_for_ms: new.scheduled_for_ms,
            retry_at_ms: None,
            started_at_ms: None,
            finished_at_ms: None,
            retry_count: 0,
            error_message: None,
            recurrence_rule_id: new.recurrence_rule_id,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            version: 0,
        }
    }

    /// Store-assigned identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Payload shape.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Raw priority tier.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Opaque work input.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Work output; present only after success.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Earliest start instant.
    #[must_use]
    pub const fn scheduled_for_ms(&self) -> Option<u128> {
        self.scheduled_for_ms
    }

    /// End of the backoff before the pending retry attempt, if one is
    /// scheduled.
    #[must_use]
    pub const fn retry_at_ms(&self) -> Option<u128> {
        self.retry_at_ms
    }

    /// Earliest instant the next attempt may start: the later of
    /// `scheduled_for` and the retry backoff.
    #[must_use]
    pub fn not_before_ms(&self) -> Option<u128> {
        match (self.scheduled_for_ms, self.retry_at_ms) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// When the latest attempt started.
    #[must_use]
    pub const fn started_at_ms(&self) -> Option<u128> {
        self.started_at_ms
    }

    /// When the task reached `success` or `failed`.
    #[must_use]
    pub const fn finished_at_ms(&self) -> Option<u128> {
        self.finished_at_ms
    }

    /// Attempt index of the latest (or next pending) attempt.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Failure message of the latest failed attempt.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Rule that produced this task.
    #[must_use]
    pub const fn recurrence_rule_id(&self) -> Option<RuleId> {
        self.recurrence_rule_id
    }

    /// Creation instant.
    #[must_use]
    pub const fn created_at_ms(&self) -> u128 {
        self.created_at_ms
    }

    /// Instant of the last transition.
    #[must_use]
    pub const fn updated_at_ms(&self) -> u128 {
        self.updated_at_ms
    }

    /// Optimistic-concurrency version of the stored record.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Record the version a store committed. Store implementations only.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
