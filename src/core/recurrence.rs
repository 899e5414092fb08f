//! Recurrence rules: a task template plus a schedule.
//!
//! A rule never owns the tasks it produces. Spawned tasks carry the rule id as
//! a weak back-reference; the rule itself only knows when it fires next.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::SchedulerError;
use crate::core::task::{NewTask, TaskKind};
use crate::util::clock::duration_ms;
use crate::util::serde::{Priority, RuleId};

/// Unit of a recurrence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    /// Every N minutes.
    Minutely,
    /// Every N hours.
    Hourly,
    /// Every N days.
    Daily,
}

impl IntervalKind {
    /// Length of one unit.
    #[must_use]
    pub const fn unit(self) -> Duration {
        match self {
            Self::Minutely => Duration::from_secs(60),
            Self::Hourly => Duration::from_secs(60 * 60),
            Self::Daily => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Largest accepted `interval_value` for this unit.
    #[must_use]
    pub const fn max_value(self) -> u32 {
        match self {
            Self::Minutely => 1440,
            Self::Hourly => 720,
            Self::Daily => 30,
        }
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutely => f.write_str("minutely"),
            Self::Hourly => f.write_str("hourly"),
            Self::Daily => f.write_str("daily"),
        }
    }
}

/// Schedule part of a rule as supplied by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceSpec {
    /// Interval unit.
    pub interval_type: IntervalKind,
    /// Number of units between fires; `0` fires once.
    pub interval_value: u32,
}

impl RecurrenceSpec {
    /// Reject values above the per-unit limit.
    ///
    /// # Errors
    ///
    /// `Validation` if `interval_value` exceeds [`IntervalKind::max_value`].
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let max = self.interval_type.max_value();
        if self.interval_value > max {
            return Err(SchedulerError::Validation(format!(
                "{} interval_value cannot exceed {max}",
                self.interval_type
            )));
        }
        Ok(())
    }

    /// Time between two fires; zero for fire-once rules.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval_type.unit() * self.interval_value
    }
}

/// Template used to stamp out tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Payload shape of spawned tasks.
    pub kind: TaskKind,
    /// Payload copied into every spawned task.
    pub base_payload: Value,
    /// Priority of spawned tasks.
    pub priority: Priority,
}

/// Fields a caller supplies when creating a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    /// Schedule.
    pub spec: RecurrenceSpec,
    /// First fire instant.
    pub next_run_at_ms: u128,
    /// Whether the rule starts armed.
    pub active: bool,
    /// Task template.
    pub template: TaskTemplate,
}

/// Result of advancing a rule after a fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Fire-once rule; now permanently dormant.
    Deactivated,
    /// Next fire instant.
    Rescheduled(u128),
}

/// Stored recurrence rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    /// Store-assigned identifier.
    pub id: RuleId,
    /// Schedule.
    pub spec: RecurrenceSpec,
    /// Next materialization instant (ms since epoch). Only ever moves forward.
    pub next_run_at_ms: u128,
    /// Dormant rules never fire again.
    pub active: bool,
    /// Task template.
    pub template: TaskTemplate,
}

impl RecurrenceRule {
    /// Build a stored rule from creation fields.
    #[must_use]
    pub fn from_new(id: RuleId, new: NewRule) -> Self {
        Self {
            id,
            spec: new.spec,
            next_run_at_ms: new.next_run_at_ms,
            active: new.active,
            template: new.template,
        }
    }

    /// Active and `next_run_at <= now`.
    #[must_use]
    pub const fn is_due(&self, now_ms: u128) -> bool {
        self.active && self.next_run_at_ms <= now_ms
    }

    /// Task to create for one fire of this rule.
    #[must_use]
    pub fn materialize(&self) -> NewTask {
        NewTask::new(
            self.template.kind,
            self.template.base_payload.clone(),
            self.template.priority,
        )
        .from_rule(self.id)
    }

    /// Advance after a fire. The next instant is computed from the previous
    /// `next_run_at`, never from the scan time, so scan jitter does not
    /// accumulate.
    pub fn advance(&mut self) -> Advance {
        if self.spec.interval_value == 0 {
            self.active = false;
            return Advance::Deactivated;
        }
        self.next_run_at_ms = self
            .next_run_at_ms
            .saturating_add(duration_ms(self.spec.interval()));
        Advance::Rescheduled(self.next_run_at_ms)
    }
}
