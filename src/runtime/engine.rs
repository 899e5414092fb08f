//! `TaskEngine`: the assembled scheduler and its service operations.
//!
//! Build one with [`crate::builders::EngineBuilder`]. The engine owns the
//! worker pools, the delay queue timer and (optionally) the scanner thread;
//! call [`TaskEngine::shutdown`] to stop them in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::{
    build_audit_event, AuditAction, AuditSink, Dispatcher, Lane, LaneWorkerPool,
    MigrationOutcome, NewRule, NewTask, PriorityMigrator, RecurrenceScanner, ScannerHandle,
    SchedulerError, SweepReport, Task, TaskFilter, TaskStatus, TaskStore, TaskTemplate,
    MAX_PAGE_SIZE,
};
use crate::infra::queue::DelayQueue;
use crate::runtime::api::{
    EngineStats, SubmitResponse, TaskListQuery, TaskListResponse, TaskSubmission,
};
use crate::util::clock::{duration_ms, now_ms};
use crate::util::serde::{is_valid_priority, Priority, TaskId};

/// Components the builder hands to the engine.
pub(crate) struct EngineParts {
    pub config: EngineConfig,
    pub store: Arc<dyn TaskStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub queue: Arc<DelayQueue>,
    pub pool: LaneWorkerPool,
    pub scanner: Arc<RecurrenceScanner>,
    pub scanner_handle: Option<ScannerHandle>,
    pub audit: Arc<dyn AuditSink>,
}

/// Task scheduling and execution engine.
pub struct TaskEngine {
    config: EngineConfig,
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    migrator: PriorityMigrator,
    queue: Arc<DelayQueue>,
    pool: LaneWorkerPool,
    scanner: Arc<RecurrenceScanner>,
    scanner_handle: Mutex<Option<ScannerHandle>>,
    audit: Arc<dyn AuditSink>,
    shutdown: AtomicBool,
}

impl TaskEngine {
    pub(crate) fn from_parts(parts: EngineParts) -> Self {
        let migrator = PriorityMigrator::new(
            Arc::clone(&parts.store),
            Arc::clone(&parts.dispatcher),
            Arc::clone(&parts.audit),
        );
        Self {
            config: parts.config,
            store: parts.store,
            dispatcher: parts.dispatcher,
            migrator,
            queue: parts.queue,
            pool: parts.pool,
            scanner: parts.scanner,
            scanner_handle: Mutex::new(parts.scanner_handle),
            audit: parts.audit,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying task store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        Ok(())
    }

    /// Create a task (and its recurrence rule, if requested) and dispatch it.
    ///
    /// A recurring submission also creates an active rule due at the task's
    /// start instant (`scheduled_for`, else now). The scanner owns every
    /// fire of the rule, including the single fire of an `interval_value = 0`
    /// rule, which deactivates it.
    ///
    /// # Errors
    ///
    /// `Validation` for rejected input, `Shutdown` after shutdown, store
    /// failures. A refused enqueue is not an error: the response reports
    /// `dispatched = false` and the task waits for recovery.
    pub fn submit(&self, submission: TaskSubmission) -> Result<SubmitResponse, SchedulerError> {
        self.ensure_running()?;
        submission.validate()?;
        let now = now_ms();
        let priority = submission.priority();

        let mut new = NewTask::new(submission.kind, submission.payload.clone(), priority);
        if let Some(at) = submission.scheduled_for_ms {
            new = new.scheduled_for(at);
        }

        let mut rule_id = None;
        if let Some(spec) = submission.recurring {
            let anchor = submission.scheduled_for_ms.unwrap_or(now);
            let rule = self.store.create_rule(NewRule {
                spec,
                next_run_at_ms: anchor,
                active: true,
                template: TaskTemplate {
                    kind: submission.kind,
                    base_payload: submission.payload,
                    priority,
                },
            })?;
            info!(rule_id = rule.id, interval = %spec.interval_type, value = spec.interval_value, "recurrence rule created");
            new = new.from_rule(rule.id);
            rule_id = Some(rule.id);
        }

        let mut task = self.store.create_task(new, now)?;
        self.audit.record(build_audit_event(
            task.id(),
            Some(Lane::for_priority(priority)),
            AuditAction::Submit,
            None,
        ));

        let dispatched = match self.dispatcher.dispatch_task(&mut task, now) {
            Ok(receipt) => {
                info!(task_id = task.id(), lane = %receipt.lane, delay_ms = duration_ms(receipt.delay), "task submitted");
                true
            }
            Err(SchedulerError::DispatchFailure { reason, .. }) => {
                warn!(task_id = task.id(), reason = %reason, "task submitted but not dispatched");
                false
            }
            Err(err) => return Err(err),
        };
        Ok(SubmitResponse {
            task,
            rule_id,
            dispatched,
        })
    }

    /// Load one task.
    ///
    /// # Errors
    ///
    /// `TaskNotFound`.
    pub fn get_task(&self, task_id: TaskId) -> Result<Task, SchedulerError> {
        self.store.get_task(task_id)
    }

    /// List tasks newest first.
    ///
    /// # Errors
    ///
    /// `Validation` for a bad page size.
    pub fn list_tasks(&self, query: &TaskListQuery) -> Result<TaskListResponse, SchedulerError> {
        let filter = query.to_filter()?;
        let page = self.store.list_tasks(&filter)?;
        Ok(TaskListResponse {
            items: page.items,
            total: page.total,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    /// Change the priority of a task that has not started, moving it to the
    /// new lane.
    ///
    /// # Errors
    ///
    /// `Validation` for an out-of-range priority, `InvalidStateTransition`
    /// once the task is running or finished.
    pub fn update_priority(&self, task_id: TaskId, priority: Priority) -> Result<MigrationOutcome, SchedulerError> {
        self.ensure_running()?;
        if !is_valid_priority(priority) {
            return Err(SchedulerError::Validation(
                "priority must be 1 (high), 2 (medium) or 3 (low)".into(),
            ));
        }
        self.migrator.migrate(task_id, priority, now_ms())
    }

    /// Reset a `failed` task to `pending` with a fresh retry budget and
    /// dispatch it again.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `failed`.
    pub fn retry_task(&self, task_id: TaskId) -> Result<Task, SchedulerError> {
        self.ensure_running()?;
        let now = now_ms();
        let mut task = self.store.get_task(task_id)?;
        task.reset_for_retry(now)?;
        self.store.save_task(&mut task)?;
        self.audit.record(build_audit_event(task_id, None, AuditAction::Retry, None));
        match self.dispatcher.dispatch_task(&mut task, now) {
            Ok(_) | Err(SchedulerError::DispatchFailure { .. }) => {}
            Err(err) => return Err(err),
        }
        info!(task_id, status = %task.status(), "task retried");
        Ok(task)
    }

    /// Cancel a task that has not started.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless the task is `pending` or `queued`.
    pub fn revoke_task(&self, task_id: TaskId) -> Result<Task, SchedulerError> {
        let mut task = self.store.get_task(task_id)?;
        let lane = Lane::for_priority(task.priority());
        task.revoke(now_ms())?;
        self.store.save_task(&mut task)?;
        self.dispatcher.queue().cancel(task_id, lane);
        info!(task_id, "task revoked");
        self.audit
            .record(build_audit_event(task_id, Some(lane), AuditAction::Revoke, None));
        Ok(task)
    }

    /// Delete a task that no attempt owns.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` while the task is `running`.
    pub fn delete_task(&self, task_id: TaskId) -> Result<Task, SchedulerError> {
        let removed = self.store.delete_task(task_id)?;
        self.dispatcher
            .queue()
            .cancel(task_id, Lane::for_priority(removed.priority()));
        info!(task_id, "task deleted");
        self.audit.record(build_audit_event(task_id, None, AuditAction::Delete, None));
        Ok(removed)
    }

    /// Re-dispatch every `pending` and `queued` task. Meant for startup over
    /// a durable store, when no queue entries survived the restart. Items
    /// that duplicate a live queue entry are dropped by the status re-check.
    ///
    /// # Errors
    ///
    /// Store listing failures.
    pub fn recover(&self) -> Result<Vec<TaskId>, SchedulerError> {
        self.ensure_running()?;
        let now = now_ms();
        let mut waiting = Vec::new();
        let mut offset = 0;
        loop {
            let filter = TaskFilter::default()
                .with_statuses([TaskStatus::Pending, TaskStatus::Queued])
                .page(MAX_PAGE_SIZE, offset);
            let page = self.store.list_tasks(&filter)?;
            let fetched = page.items.len();
            waiting.extend(page.items);
            if fetched < MAX_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        let mut recovered = Vec::with_capacity(waiting.len());
        for mut task in waiting {
            match self.dispatcher.dispatch_task(&mut task, now) {
                Ok(_) => recovered.push(task.id()),
                Err(err) => warn!(task_id = task.id(), error = %err, "task not recovered"),
            }
        }
        info!(count = recovered.len(), "startup recovery finished");
        Ok(recovered)
    }

    /// Run one recurrence sweep now, outside the scanner's schedule.
    ///
    /// # Errors
    ///
    /// See [`RecurrenceScanner::sweep`].
    pub fn sweep_now(&self) -> Result<SweepReport, SchedulerError> {
        self.ensure_running()?;
        self.scanner.sweep(now_ms())
    }

    /// Worker and queue statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            lanes: self.pool.stats().lanes,
            delayed: self.queue.delayed_len(),
        }
    }

    /// Stop the scanner, the delay queue and the worker pools, in that order.
    /// Items still waiting in the delay heap are dropped; their tasks stay
    /// `queued` in the store for [`TaskEngine::recover`].
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down task engine");
        if let Some(handle) = self.scanner_handle.lock().take() {
            handle.stop();
        }
        self.queue.shutdown();
        self.pool.shutdown();
        info!("task engine stopped");
    }
}
