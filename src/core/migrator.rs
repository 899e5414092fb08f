//! Priority migration of tasks that have not started.

use std::sync::Arc;

use tracing::info;

use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::dispatcher::{Dispatcher, Lane};
use crate::core::error::SchedulerError;
use crate::core::store::TaskStore;
use crate::util::serde::{Priority, TaskId};

/// Result of a migration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Priority was already the requested one.
    Unchanged,
    /// Priority changed and the task was re-dispatched.
    Migrated {
        /// Lane before the change.
        from: Lane,
        /// Lane after the change.
        to: Lane,
        /// Whether a pending delivery on the old lane was removed. When it
        /// was not, the stale item is dropped by the worker's status re-check.
        cancelled: bool,
    },
}

/// Moves `pending`/`queued` tasks between priority tiers.
pub struct PriorityMigrator {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    audit: Arc<dyn AuditSink>,
}

impl PriorityMigrator {
    /// Create a migrator.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, dispatcher: Arc<Dispatcher>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            dispatcher,
            audit,
        }
    }

    /// Change the priority of `task_id` and re-dispatch it on the new lane.
    ///
    /// # Errors
    ///
    /// - `TaskNotFound`
    /// - `InvalidStateTransition` once an attempt owns the task
    /// - `Conflict` if the task changed concurrently
    /// - `DispatchFailure` if the new lane refused it (task left `pending`)
    pub fn migrate(
        &self,
        task_id: TaskId,
        new_priority: Priority,
        now_ms: u128,
    ) -> Result<MigrationOutcome, SchedulerError> {
        let mut task = self.store.get_task(task_id)?;
        if !task.status().is_waiting() {
            return Err(SchedulerError::InvalidStateTransition {
                task_id,
                current: task.status(),
                operation: "change priority",
            });
        }
        let old_priority = task.priority();
        if old_priority == new_priority {
            return Ok(MigrationOutcome::Unchanged);
        }

        let from = Lane::for_priority(old_priority);
        let to = Lane::for_priority(new_priority);
        task.change_priority(new_priority, now_ms)?;
        self.store.save_task(&mut task)?;

        let cancelled = from != to && self.dispatcher.queue().cancel(task_id, from);
        if from != to {
            self.dispatcher.dispatch_task(&mut task, now_ms)?;
        }

        info!(task_id, from = %from, to = %to, cancelled, "task priority migrated");
        self.audit.record(build_audit_event(
            task_id,
            Some(to),
            AuditAction::Migrate,
            Some(format!("priority {old_priority} -> {new_priority}")),
        ));
        Ok(MigrationOutcome::Migrated { from, to, cancelled })
    }
}
