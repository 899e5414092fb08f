//! One attempt of one task, from status re-check to the final transition.
//!
//! The runner is what makes "at most one active attempt per task id" hold.
//! Before running it re-reads the task and requires all of:
//!
//! - a startable status (`pending`, `queued`, `failed`)
//! - an attempt token matching the stored `retry_count`
//! - the item's lane matching the task's current priority
//!
//! It then commits `running` through the store's version check. A racing
//! worker that read the same version loses with `Conflict` and reports
//! [`AttemptReport::Skipped`] instead of executing.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::dispatcher::{DispatchItem, Dispatcher, Lane};
use crate::core::error::SchedulerError;
use crate::core::executor::{WorkExecutor, WorkOutcome};
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::store::TaskStore;
use crate::core::task::{Task, TaskStatus};
use crate::util::clock::{duration_ms, now_ms};
use crate::util::serde::TaskId;

/// Why an item was dropped without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The task no longer exists.
    Missing,
    /// The task is running or finished.
    NotStartable(TaskStatus),
    /// The item's attempt token is not the one the task is waiting for.
    StaleAttempt,
    /// The task was moved to another lane after this item was enqueued.
    Migrated,
    /// Another worker committed `running` first.
    Conflict,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("task missing"),
            Self::NotStartable(status) => write!(f, "status {status}"),
            Self::StaleAttempt => f.write_str("stale attempt"),
            Self::Migrated => f.write_str("lane changed"),
            Self::Conflict => f.write_str("lost race"),
        }
    }
}

/// What one attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptReport {
    /// Nothing ran.
    Skipped {
        /// Task the item referenced.
        task_id: TaskId,
        /// Why it was dropped.
        reason: SkipReason,
    },
    /// Task is now `success`.
    Succeeded {
        /// Task that ran.
        task_id: TaskId,
    },
    /// Declared domain failure; task is terminally `failed`.
    DomainFailed {
        /// Task that ran.
        task_id: TaskId,
        /// Failure message recorded on the task.
        message: String,
    },
    /// Fault with budget left; next attempt enqueued after `delay`.
    RetryScheduled {
        /// Task that ran.
        task_id: TaskId,
        /// Index of the next attempt.
        attempt: u32,
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Fault with no budget left; task is terminally `failed`.
    Exhausted {
        /// Task that ran.
        task_id: TaskId,
        /// Last fault message.
        message: String,
    },
}

impl AttemptReport {
    /// Task the report is about.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Skipped { task_id, .. }
            | Self::Succeeded { task_id }
            | Self::DomainFailed { task_id, .. }
            | Self::RetryScheduled { task_id, .. }
            | Self::Exhausted { task_id, .. } => *task_id,
        }
    }

    /// Whether the work function was invoked.
    #[must_use]
    pub const fn executed(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }
}

/// Runs attempts against a store, retrying faults through the dispatcher.
pub struct AttemptRunner<E: WorkExecutor> {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    executor: E,
    retry: RetryPolicy,
    audit: Arc<dyn AuditSink>,
}

impl<E: WorkExecutor> Clone for AttemptRunner<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
            executor: self.executor.clone(),
            retry: self.retry,
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<E: WorkExecutor> AttemptRunner<E> {
    /// Create a runner.
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<Dispatcher>,
        executor: E,
        retry: RetryPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            executor,
            retry,
            audit,
        }
    }

    /// Run the attempt `item` authorizes.
    ///
    /// # Errors
    ///
    /// Store failures other than a lost race. Work outcomes are never errors.
    pub async fn run(&self, item: DispatchItem) -> Result<AttemptReport, SchedulerError> {
        let mut task = match self.store.get_task(item.task_id) {
            Ok(task) => task,
            Err(SchedulerError::TaskNotFound(_)) => return Ok(skipped(item, SkipReason::Missing)),
            Err(err) => return Err(err),
        };
        if let Some(reason) = refuse(&task, item) {
            debug!(task_id = item.task_id, lane = %item.lane, reason = %reason, "attempt skipped");
            return Ok(skipped(item, reason));
        }

        task.mark_running(item.attempt, now_ms())?;
        match self.store.save_task(&mut task) {
            Ok(()) => {}
            Err(SchedulerError::Conflict(_)) => {
                debug!(task_id = item.task_id, "attempt lost start race");
                return Ok(skipped(item, SkipReason::Conflict));
            }
            Err(err) => return Err(err),
        }
        debug!(task_id = item.task_id, lane = %item.lane, attempt = item.attempt, "attempt started");
        self.audit.record(build_audit_event(
            item.task_id,
            Some(item.lane),
            AuditAction::Start,
            Some(format!("attempt={}", item.attempt)),
        ));

        let outcome = AssertUnwindSafe(self.executor.execute(task.kind(), task.payload()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| WorkOutcome::Fault(panic_message(&*panic)));

        self.finish(task, item.lane, outcome)
    }

    fn finish(
        &self,
        mut task: Task,
        lane: Lane,
        outcome: WorkOutcome,
    ) -> Result<AttemptReport, SchedulerError> {
        let task_id = task.id();
        let now = now_ms();
        match outcome {
            WorkOutcome::Success(value) => {
                task.mark_success(value, now)?;
                self.store.save_task(&mut task)?;
                info!(task_id, lane = %lane, "task succeeded");
                self.audit
                    .record(build_audit_event(task_id, Some(lane), AuditAction::Complete, None));
                Ok(AttemptReport::Succeeded { task_id })
            }
            WorkOutcome::DomainFailure(message) => {
                task.mark_failed(message.clone(), now)?;
                self.store.save_task(&mut task)?;
                warn!(task_id, lane = %lane, error = %message, "task failed");
                self.audit.record(build_audit_event(
                    task_id,
                    Some(lane),
                    AuditAction::Fail,
                    Some(message.clone()),
                ));
                Ok(AttemptReport::DomainFailed { task_id, message })
            }
            WorkOutcome::Fault(message) => match self.retry.decide(task.retry_count()) {
                RetryDecision::Retry { attempt, delay } => {
                    task.mark_retry_pending(
                        message.clone(),
                        attempt,
                        now.saturating_add(duration_ms(delay)),
                        now,
                    )?;
                    self.store.save_task(&mut task)?;
                    warn!(
                        task_id,
                        lane = %lane,
                        attempt,
                        delay_ms = duration_ms(delay),
                        error = %message,
                        "attempt faulted, retry scheduled"
                    );
                    self.audit.record(build_audit_event(
                        task_id,
                        Some(lane),
                        AuditAction::RetryScheduled,
                        Some(message),
                    ));
                    match self.dispatcher.dispatch_retry(&mut task, delay, now) {
                        Ok(_) | Err(SchedulerError::DispatchFailure { .. }) => {}
                        Err(err) => return Err(err),
                    }
                    Ok(AttemptReport::RetryScheduled {
                        task_id,
                        attempt,
                        delay,
                    })
                }
                RetryDecision::Exhausted => {
                    task.mark_failed(message.clone(), now)?;
                    self.store.save_task(&mut task)?;
                    error!(
                        task_id,
                        lane = %lane,
                        retries = task.retry_count(),
                        error = %message,
                        "task failed after exhausting retries"
                    );
                    self.audit.record(build_audit_event(
                        task_id,
                        Some(lane),
                        AuditAction::Fail,
                        Some(message.clone()),
                    ));
                    Ok(AttemptReport::Exhausted { task_id, message })
                }
            },
        }
    }
}

const fn skipped(item: DispatchItem, reason: SkipReason) -> AttemptReport {
    AttemptReport::Skipped {
        task_id: item.task_id,
        reason,
    }
}

/// A waiting task runs only the attempt it is waiting for. A `failed` task
/// runs only an item authorizing the attempt after its last one.
fn refuse(task: &Task, item: DispatchItem) -> Option<SkipReason> {
    let status = task.status();
    if !status.is_startable() {
        return Some(SkipReason::NotStartable(status));
    }
    let expected = if status == TaskStatus::Failed {
        task.retry_count().saturating_add(1)
    } else {
        task.retry_count()
    };
    if item.attempt != expected {
        return Some(SkipReason::StaleAttempt);
    }
    if Lane::for_priority(task.priority()) != item.lane {
        return Some(SkipReason::Migrated);
    }
    None
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(|| "work function panicked".to_owned(), |m| format!("work function panicked: {m}"))
}
