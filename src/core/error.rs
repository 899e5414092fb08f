//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::task::TaskStatus;
use crate::util::serde::{RuleId, TaskId};

/// Errors produced by scheduler components.
///
/// Work-level outcomes (domain failures and faults) are not errors; they are
/// reported through [`crate::core::WorkOutcome`] and
/// [`crate::core::AttemptReport`]. Only [`SchedulerError::Backend`] is fatal.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Referenced task does not exist.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    /// Referenced recurrence rule does not exist.
    #[error("recurrence rule {0} not found")]
    RuleNotFound(RuleId),
    /// Operation is not allowed from the task's current status.
    #[error("task {task_id} has status '{current}', cannot {operation}")]
    InvalidStateTransition {
        /// Task the operation targeted.
        task_id: TaskId,
        /// Status observed when the operation was attempted.
        current: TaskStatus,
        /// Operation that was refused.
        operation: &'static str,
    },
    /// The record changed between read and write.
    #[error("task {0} was modified concurrently")]
    Conflict(TaskId),
    /// The enqueue primitive refused the work item.
    #[error("dispatch failed for task {task_id}: {reason}")]
    DispatchFailure {
        /// Task that could not be dispatched.
        task_id: TaskId,
        /// Underlying queue error.
        reason: String,
    },
    /// Queue is full for the target lane.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// Caller-supplied input was rejected.
    #[error("validation error: {0}")]
    Validation(String),
    /// Component has been shut down.
    #[error("engine is shut down")]
    Shutdown,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Infrastructure failures abort the current operation and are never retried
    /// by the engine itself.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
