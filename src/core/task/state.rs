//! Task state machine.
//!
//! ```text
//! pending ──► queued ──► running ──► success
//!    │          ▲  │        │  │
//!    │          │  │        │  └──► failed ──► pending (explicit retry)
//!    │          └──┼────────┘           │
//!    │             │  (backoff retry)   └──► running (attempt on a failed task)
//!    └──► revoked ◄┘
//! ```
//!
//! `queued → pending` is used when the enqueue primitive refuses an item, so a
//! recovery sweep can pick the task up again.

use serde_json::Value;

use crate::core::error::SchedulerError;

use super::{Task, TaskStatus};

impl TaskStatus {
    /// No transition leaves this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Revoked)
    }

    /// `finished_at` must be set exactly in these statuses.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// A worker may begin an attempt from this status.
    #[must_use]
    pub const fn is_startable(self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Failed)
    }

    /// The task has not started yet: it may be dispatched, migrated or revoked.
    #[must_use]
    pub const fn is_waiting(self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }

    /// Whether `self → next` is a legal edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::{Failed, Pending, Queued, Revoked, Running, Success};
        matches!(
            (self, next),
            (Pending, Queued | Running | Revoked)
                | (Queued, Queued | Pending | Running | Revoked)
                | (Running, Success | Failed | Queued)
                | (Failed, Running | Pending)
        )
    }
}

impl Task {
    fn transition(
        &mut self,
        next: TaskStatus,
        operation: &'static str,
        now_ms: u128,
    ) -> Result<(), SchedulerError> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidStateTransition {
                task_id: self.id,
                current: self.status,
                operation,
            });
        }
        self.status = next;
        self.updated_at_ms = now_ms;
        Ok(())
    }

    /// Handed to a lane.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `pending` or `queued`.
    pub fn mark_queued(&mut self, now_ms: u128) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Queued, "dispatch", now_ms)
    }

    /// The enqueue primitive refused the item; park the task as `pending`.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `queued`.
    pub fn mark_dispatch_failed(&mut self, now_ms: u128) -> Result<(), SchedulerError> {
        if self.status != TaskStatus::Queued {
            return Err(SchedulerError::InvalidStateTransition {
                task_id: self.id,
                current: self.status,
                operation: "undo dispatch",
            });
        }
        self.transition(TaskStatus::Pending, "undo dispatch", now_ms)
    }

    /// An attempt takes ownership. Sets `started_at` and snapshots the attempt
    /// index into `retry_count`.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `pending`, `queued` or `failed`.
    pub fn mark_running(&mut self, attempt: u32, now_ms: u128) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Running, "start", now_ms)?;
        self.started_at_ms = Some(now_ms);
        self.finished_at_ms = None;
        self.retry_at_ms = None;
        self.retry_count = attempt;
        Ok(())
    }

    /// The attempt produced a result.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `running`.
    pub fn mark_success(&mut self, result: Value, now_ms: u128) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Success, "complete", now_ms)?;
        self.result = Some(result);
        self.error_message = None;
        self.finished_at_ms = Some(now_ms);
        Ok(())
    }

    /// The attempt failed terminally.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `running`.
    pub fn mark_failed(
        &mut self,
        message: impl Into<String>,
        now_ms: u128,
    ) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Failed, "fail", now_ms)?;
        self.result = None;
        self.error_message = Some(message.into());
        self.finished_at_ms = Some(now_ms);
        Ok(())
    }

    /// The attempt faulted and another one is authorized after a backoff. The
    /// task waits as `queued`; `retry_count` becomes the next attempt index
    /// and `retry_at_ms` the end of the backoff.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `running`.
    pub fn mark_retry_pending(
        &mut self,
        message: impl Into<String>,
        next_attempt: u32,
        retry_at_ms: u128,
        now_ms: u128,
    ) -> Result<(), SchedulerError> {
        if self.status != TaskStatus::Running {
            return Err(SchedulerError::InvalidStateTransition {
                task_id: self.id,
                current: self.status,
                operation: "schedule retry",
            });
        }
        self.transition(TaskStatus::Queued, "schedule retry", now_ms)?;
        self.error_message = Some(message.into());
        self.retry_count = next_attempt;
        self.retry_at_ms = Some(retry_at_ms);
        Ok(())
    }

    /// Explicit retry of a failed task: back to `pending` with a fresh attempt
    /// budget and every attempt-derived field cleared.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `failed`.
    pub fn reset_for_retry(&mut self, now_ms: u128) -> Result<(), SchedulerError> {
        if self.status != TaskStatus::Failed {
            return Err(SchedulerError::InvalidStateTransition {
                task_id: self.id,
                current: self.status,
                operation: "retry",
            });
        }
        self.transition(TaskStatus::Pending, "retry", now_ms)?;
        self.started_at_ms = None;
        self.finished_at_ms = None;
        self.error_message = None;
        self.result = None;
        self.retry_at_ms = None;
        self.retry_count = 0;
        Ok(())
    }

    /// Administrative cancellation before the task started.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `pending` or `queued`.
    pub fn revoke(&mut self, now_ms: u128) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Revoked, "revoke", now_ms)
    }

    /// Change the priority tier of a task that has not started.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `pending` or `queued`.
    pub fn change_priority(
        &mut self,
        priority: crate::util::serde::Priority,
        now_ms: u128,
    ) -> Result<(), SchedulerError> {
        if !self.status.is_waiting() {
            return Err(SchedulerError::InvalidStateTransition {
                task_id: self.id,
                current: self.status,
                operation: "change priority",
            });
        }
        self.priority = priority;
        self.updated_at_ms = now_ms;
        Ok(())
    }

    /// Check the record invariants. Used by tests and by stores on load.
    #[must_use]
    pub const fn invariants_hold(&self) -> bool {
        let finished_ok = self.finished_at_ms.is_some() == self.status.is_finished();
        let result_ok = self.result.is_none() || matches!(self.status, TaskStatus::Success);
        let started_ok = !matches!(
            self.status,
            TaskStatus::Running | TaskStatus::Success
        ) || self.started_at_ms.is_some();
        finished_ok && result_ok && started_ok
    }
}
