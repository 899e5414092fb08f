//! Request and response models of the engine's service surface.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{LaneStats, RecurrenceSpec, SchedulerError, Task, TaskFilter, TaskKind, TaskStatus};
use crate::util::serde::{is_valid_priority, Priority, RuleId, TaskId, PRIORITY_MEDIUM};

/// Largest number of pairs a batch task may carry.
pub const MAX_BATCH_SIZE: usize = 500;

/// Task submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Payload shape.
    pub kind: TaskKind,
    /// Opaque work input.
    pub payload: Value,
    /// Priority tier; medium when absent.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Earliest start (ms since epoch).
    #[serde(default)]
    pub scheduled_for_ms: Option<u128>,
    /// Also create a recurrence rule that keeps producing this task.
    #[serde(default)]
    pub recurring: Option<RecurrenceSpec>,
}

impl TaskSubmission {
    /// A `single` addition task.
    #[must_use]
    pub fn single(a: i64, b: i64) -> Self {
        Self::new(TaskKind::Single, json!({ "a": a, "b": b }))
    }

    /// A `batch` addition task.
    #[must_use]
    pub fn batch(pairs: &[(i64, i64)]) -> Self {
        let pairs: Vec<Value> = pairs.iter().map(|(a, b)| json!({ "a": a, "b": b })).collect();
        Self::new(TaskKind::Batch, json!({ "pairs": pairs }))
    }

    /// A submission with an arbitrary payload.
    #[must_use]
    pub const fn new(kind: TaskKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            priority: None,
            scheduled_for_ms: None,
            recurring: None,
        }
    }

    /// Set the priority tier.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the earliest start instant.
    #[must_use]
    pub const fn scheduled_for(mut self, at_ms: u128) -> Self {
        self.scheduled_for_ms = Some(at_ms);
        self
    }

    /// Attach a recurrence schedule.
    #[must_use]
    pub const fn recurring(mut self, spec: RecurrenceSpec) -> Self {
        self.recurring = Some(spec);
        self
    }

    /// Effective priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority.unwrap_or(PRIORITY_MEDIUM)
    }

    /// Validate priority, batch size and recurrence limits.
    ///
    /// # Errors
    ///
    /// `Validation` describing the first rejected field.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !is_valid_priority(self.priority()) {
            return Err(SchedulerError::Validation(
                "priority must be 1 (high), 2 (medium) or 3 (low)".into(),
            ));
        }
        if self.kind == TaskKind::Batch {
            let size = self
                .payload
                .get("pairs")
                .and_then(Value::as_array)
                .map(Vec::len)
                .ok_or_else(|| SchedulerError::Validation("batch payload needs a `pairs` array".into()))?;
            if size == 0 || size > MAX_BATCH_SIZE {
                return Err(SchedulerError::Validation(format!(
                    "batch must contain between 1 and {MAX_BATCH_SIZE} pairs"
                )));
            }
        }
        if let Some(spec) = &self.recurring {
            spec.validate()?;
        }
        Ok(())
    }
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    /// The created task, as stored after dispatch.
    pub task: Task,
    /// Rule created for a recurring submission.
    pub rule_id: Option<RuleId>,
    /// Whether the task reached a lane. When false it stays `pending` and is
    /// picked up by the recovery sweep.
    pub dispatched: bool,
}

/// Listing query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListQuery {
    /// Accept any of these statuses; empty accepts all.
    #[serde(default)]
    pub statuses: Vec<TaskStatus>,
    /// Payload shape filter.
    #[serde(default)]
    pub kind: Option<TaskKind>,
    /// Priority filter.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Page size, 1..=200 (`MAX_PAGE_SIZE`).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Rows to skip.
    #[serde(default)]
    pub offset: usize,
}

const fn default_limit() -> usize {
    50
}

impl Default for TaskListQuery {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            kind: None,
            priority: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl TaskListQuery {
    /// Store filter for this query.
    ///
    /// # Errors
    ///
    /// `Validation` for a limit outside 1..=200.
    pub fn to_filter(&self) -> Result<TaskFilter, SchedulerError> {
        let filter = TaskFilter {
            statuses: self.statuses.clone(),
            kind: self.kind,
            priority: self.priority,
            limit: self.limit,
            offset: self.offset,
        };
        filter.validate()?;
        Ok(filter)
    }
}

/// One page of tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskListResponse {
    /// Tasks in the page.
    pub items: Vec<Task>,
    /// Matching tasks across pages.
    pub total: usize,
    /// Page size used.
    pub limit: usize,
    /// Offset used.
    pub offset: usize,
}

/// Task status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Failure message, if any.
    pub reason: Option<String>,
}

impl From<&Task> for TaskStatusResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            status: task.status(),
            reason: task.error_message().map(str::to_owned),
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Per-lane worker counters.
    pub lanes: Vec<LaneStats>,
    /// Items waiting in the delay heap.
    pub delayed: usize,
}
