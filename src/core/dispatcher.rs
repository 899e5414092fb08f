//! Priority dispatcher: maps priorities onto lanes and hands work to the
//! timed enqueue primitive.
//!
//! Dispatch first commits `queued` to the store and only then enqueues. If the
//! enqueue primitive refuses the item the task is parked back as `pending`,
//! where [`Dispatcher::recover_pending`] finds it again. A task is never left
//! `queued` without a queue entry that will eventually deliver it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LanesConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::error::SchedulerError;
use crate::core::store::{TaskFilter, TaskStore, MAX_PAGE_SIZE};
use crate::core::task::{Task, TaskStatus};
use crate::util::clock::{duration_ms, until_ms};
use crate::util::serde::{Priority, TaskId, PRIORITY_HIGH, PRIORITY_LOW};

/// Priority execution channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Priority 1.
    High,
    /// Priority 2 and every out-of-range value.
    Medium,
    /// Priority 3.
    Low,
}

impl Lane {
    /// All lanes, highest first.
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    /// Lane serving `priority`. Unknown values fall back to medium.
    #[must_use]
    pub const fn for_priority(priority: Priority) -> Self {
        match priority {
            PRIORITY_HIGH => Self::High,
            PRIORITY_LOW => Self::Low,
            _ => Self::Medium,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Queue name used in thread names and logs.
    #[must_use]
    pub const fn queue_name(self) -> &'static str {
        match self {
            Self::High => "high_priority",
            Self::Medium => "medium_priority",
            Self::Low => "low_priority",
        }
    }

    /// Dense index, usable for per-lane arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work on a lane.
///
/// `attempt` is the `retry_count` the task had when the item was enqueued. A
/// worker refuses items whose attempt no longer matches the stored task, which
/// turns stale duplicates into no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchItem {
    /// Task to run.
    pub task_id: TaskId,
    /// Lane the item was enqueued on.
    pub lane: Lane,
    /// Attempt index this item authorizes.
    pub attempt: u32,
}

/// Timed enqueue primitive.
///
/// Contract: an accepted item is delivered to a worker of `item.lane` no
/// earlier than `delay` from now, eventually and once.
pub trait Enqueue: Send + Sync {
    /// Schedule `item` for delivery after `delay`.
    ///
    /// # Errors
    ///
    /// `QueueFull` or `Shutdown` when the item cannot be accepted.
    fn enqueue(&self, item: DispatchItem, delay: Duration) -> Result<(), SchedulerError>;

    /// Best-effort removal of not-yet-delivered items for `task_id` on `lane`.
    /// Returns whether anything was removed.
    fn cancel(&self, task_id: TaskId, lane: Lane) -> bool;
}

/// Per-lane base delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanePolicy {
    base_delays: [Duration; 3],
}

impl LanePolicy {
    /// Build from lane configuration.
    #[must_use]
    pub fn from_config(lanes: &LanesConfig) -> Self {
        Self {
            base_delays: Lane::ALL.map(|lane| lanes.get(lane).base_delay()),
        }
    }

    /// Base delay of `lane`.
    #[must_use]
    pub const fn base_delay(&self, lane: Lane) -> Duration {
        self.base_delays[lane.index()]
    }

    /// `max(lane_base_delay, time_until(not_before))`, where `not_before` is
    /// the later of `scheduled_for` and a pending retry backoff.
    #[must_use]
    pub fn effective_delay(&self, lane: Lane, not_before_ms: Option<u128>, now_ms: u128) -> Duration {
        let base = self.base_delay(lane);
        not_before_ms.map_or(base, |at| base.max(until_ms(at, now_ms)))
    }
}

impl Default for LanePolicy {
    fn default() -> Self {
        Self::from_config(&LanesConfig::default())
    }
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Dispatched task.
    pub task_id: TaskId,
    /// Lane chosen from the priority.
    pub lane: Lane,
    /// Delay before delivery.
    pub delay: Duration,
    /// Attempt index the queue entry authorizes.
    pub attempt: u32,
}

/// Priority dispatcher.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn Enqueue>,
    policy: LanePolicy,
    audit: Arc<dyn AuditSink>,
}

impl Dispatcher {
    /// Create a dispatcher over a store and an enqueue primitive.
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn Enqueue>,
        policy: LanePolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            queue,
            policy,
            audit,
        }
    }

    /// Lane delay policy.
    #[must_use]
    pub const fn policy(&self) -> &LanePolicy {
        &self.policy
    }

    /// Underlying enqueue primitive.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn Enqueue> {
        &self.queue
    }

    /// Load and dispatch a task.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch_task`].
    pub fn dispatch(&self, task_id: TaskId, now_ms: u128) -> Result<DispatchReceipt, SchedulerError> {
        let mut task = self.store.get_task(task_id)?;
        self.dispatch_task(&mut task, now_ms)
    }

    /// Dispatch a `pending` or `queued` task onto the lane of its priority.
    ///
    /// # Errors
    ///
    /// - `InvalidStateTransition` if the task has started or finished
    /// - `Conflict` if the task changed since it was read
    /// - `DispatchFailure` if the enqueue primitive refused the item; the task
    ///   is left `pending`
    pub fn dispatch_task(&self, task: &mut Task, now_ms: u128) -> Result<DispatchReceipt, SchedulerError> {
        if !task.status().is_waiting() {
            return Err(SchedulerError::InvalidStateTransition {
                task_id: task.id(),
                current: task.status(),
                operation: "dispatch",
            });
        }
        let lane = Lane::for_priority(task.priority());
        let delay = self
            .policy
            .effective_delay(lane, task.not_before_ms(), now_ms);

        task.mark_queued(now_ms)?;
        self.store.save_task(task)?;
        self.enqueue_or_park(task, lane, delay, now_ms)
    }

    /// Enqueue the next attempt of a task that a fault moved back to
    /// `queued`. The lane follows the task's current priority.
    ///
    /// # Errors
    ///
    /// `DispatchFailure` if the enqueue primitive refused the item.
    pub fn dispatch_retry(
        &self,
        task: &mut Task,
        delay: Duration,
        now_ms: u128,
    ) -> Result<DispatchReceipt, SchedulerError> {
        if task.status() != TaskStatus::Queued {
            return Err(SchedulerError::InvalidStateTransition {
                task_id: task.id(),
                current: task.status(),
                operation: "dispatch retry",
            });
        }
        let lane = Lane::for_priority(task.priority());
        self.enqueue_or_park(task, lane, delay, now_ms)
    }

    fn enqueue_or_park(
        &self,
        task: &mut Task,
        lane: Lane,
        delay: Duration,
        now_ms: u128,
    ) -> Result<DispatchReceipt, SchedulerError> {
        let item = DispatchItem {
            task_id: task.id(),
            lane,
            attempt: task.retry_count(),
        };
        if let Err(err) = self.queue.enqueue(item, delay) {
            warn!(task_id = item.task_id, lane = %lane, error = %err, "enqueue refused, parking task as pending");
            task.mark_dispatch_failed(now_ms)?;
            self.store.save_task(task)?;
            self.audit.record(build_audit_event(
                item.task_id,
                Some(lane),
                AuditAction::DispatchFailed,
                Some(err.to_string()),
            ));
            return Err(SchedulerError::DispatchFailure {
                task_id: item.task_id,
                reason: err.to_string(),
            });
        }
        debug!(
            task_id = item.task_id,
            lane = %lane,
            delay_ms = duration_ms(delay),
            attempt = item.attempt,
            "task dispatched"
        );
        self.audit.record(build_audit_event(
            item.task_id,
            Some(lane),
            AuditAction::Dispatch,
            Some(format!("delay_ms={} attempt={}", duration_ms(delay), item.attempt)),
        ));
        Ok(DispatchReceipt {
            task_id: item.task_id,
            lane,
            delay,
            attempt: item.attempt,
        })
    }

    /// Re-dispatch `pending` tasks that have not changed for at least
    /// `min_idle`. Returns the ids that were dispatched.
    ///
    /// Tasks land here when an enqueue was refused or when the process
    /// stopped between creating a task and dispatching it.
    ///
    /// # Errors
    ///
    /// Only store listing failures propagate; per-task failures are logged.
    pub fn recover_pending(&self, now_ms: u128, min_idle: Duration) -> Result<Vec<TaskId>, SchedulerError> {
        let cutoff = now_ms.saturating_sub(duration_ms(min_idle));
        // Collect first: dispatching moves tasks out of the filtered set.
        let mut idle = Vec::new();
        let mut offset = 0;
        loop {
            let filter = TaskFilter::default()
                .with_statuses([TaskStatus::Pending])
                .page(MAX_PAGE_SIZE, offset);
            let page = self.store.list_tasks(&filter)?;
            let fetched = page.items.len();
            idle.extend(page.items.into_iter().filter(|t| t.updated_at_ms() <= cutoff));
            if fetched < MAX_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        let mut recovered = Vec::new();
        for mut task in idle {
            match self.dispatch_task(&mut task, now_ms) {
                Ok(_) => recovered.push(task.id()),
                Err(err) => debug!(task_id = task.id(), error = %err, "recovery dispatch skipped"),
            }
        }
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered pending tasks");
        }
        Ok(recovered)
    }
}
