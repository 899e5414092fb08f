//! Persistence contract the engine needs from a task store.
//!
//! Stores own their consistency discipline. The engine assumes read-your-writes
//! per task id and relies on [`TaskStore::save_task`] rejecting stale writes;
//! that optimistic check is what serializes status changes of one task without
//! a global lock.

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::recurrence::{NewRule, RecurrenceRule};
use crate::core::task::{NewTask, Task, TaskKind, TaskStatus};
use crate::util::serde::{Priority, RuleId, TaskId};

/// Largest page a listing may request.
pub const MAX_PAGE_SIZE: usize = 200;

/// Listing filter. Results are ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Accept any of these statuses; empty accepts all.
    pub statuses: Vec<TaskStatus>,
    /// Restrict to one payload shape.
    pub kind: Option<TaskKind>,
    /// Restrict to one priority tier.
    pub priority: Option<Priority>,
    /// Page size (1..=200).
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            kind: None,
            priority: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl TaskFilter {
    /// Filter by status set.
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Filter by payload shape.
    #[must_use]
    pub const fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Page window.
    #[must_use]
    pub const fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Whether `task` passes the filter (ignoring the page window).
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&task.status()))
            && self.kind.is_none_or(|k| k == task.kind())
            && self.priority.is_none_or(|p| p == task.priority())
    }

    /// Reject page sizes outside 1..=200.
    ///
    /// # Errors
    ///
    /// `Validation` for an out-of-range limit.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.limit == 0 || self.limit > MAX_PAGE_SIZE {
            return Err(SchedulerError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    /// Tasks in the window.
    pub items: Vec<Task>,
    /// Matching tasks across all pages.
    pub total: usize,
}

/// Durable record of tasks and recurrence rules.
pub trait TaskStore: Send + Sync {
    /// Allocate an id and persist a new `pending` task.
    ///
    /// # Errors
    ///
    /// `Backend` if the store is unreachable.
    fn create_task(&self, new: NewTask, now_ms: u128) -> Result<Task, SchedulerError>;

    /// Load a task.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if absent; `Backend` if the store is unreachable.
    fn get_task(&self, id: TaskId) -> Result<Task, SchedulerError>;

    /// Persist `task` if the stored version still equals `task.version()`.
    /// On success the new version is written back into `task`.
    ///
    /// # Errors
    ///
    /// `Conflict` on a stale version; `TaskNotFound` if the task was deleted.
    fn save_task(&self, task: &mut Task) -> Result<(), SchedulerError>;

    /// Remove a task and return its last state. The status check and the
    /// removal are atomic, so a task that an attempt has started is never
    /// removed under it.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if absent; `InvalidStateTransition` while `running`.
    fn delete_task(&self, id: TaskId) -> Result<Task, SchedulerError>;

    /// List tasks newest first.
    ///
    /// # Errors
    ///
    /// `Backend` if the store is unreachable.
    fn list_tasks(&self, filter: &TaskFilter) -> Result<TaskPage, SchedulerError>;

    /// Allocate an id and persist a new rule.
    ///
    /// # Errors
    ///
    /// `Backend` if the store is unreachable.
    fn create_rule(&self, new: NewRule) -> Result<RecurrenceRule, SchedulerError>;

    /// Load a rule.
    ///
    /// # Errors
    ///
    /// `RuleNotFound` if absent.
    fn get_rule(&self, id: RuleId) -> Result<RecurrenceRule, SchedulerError>;

    /// Active rules with `next_run_at <= now`.
    ///
    /// # Errors
    ///
    /// `Backend` if the store is unreachable.
    fn list_due_rules(&self, now_ms: u128) -> Result<Vec<RecurrenceRule>, SchedulerError>;

    /// Persist a rule.
    ///
    /// # Errors
    ///
    /// `RuleNotFound` if absent.
    fn save_rule(&self, rule: &RecurrenceRule) -> Result<(), SchedulerError>;
}
