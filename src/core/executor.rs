//! Work execution boundary.
//!
//! The engine does not know what a task computes. It hands `(kind, payload)`
//! to a [`WorkExecutor`] and gets back exactly one of three outcomes. The
//! distinction between [`WorkOutcome::DomainFailure`] and
//! [`WorkOutcome::Fault`] drives retry behaviour: domain failures are terminal,
//! faults are retried with backoff.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::task::TaskKind;
use crate::util::serde::Pair;

/// Result of one attempt of the work function.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    /// Work finished; the value becomes the task result.
    Success(Value),
    /// The input itself can never succeed. Terminal, never retried.
    DomainFailure(String),
    /// Unexpected or transient failure. Retried up to the ceiling.
    Fault(String),
}

impl WorkOutcome {
    /// Short label for logs and audit records.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::DomainFailure(_) => "domain_failure",
            Self::Fault(_) => "fault",
        }
    }
}

/// Pluggable work function.
///
/// On worker threads this is driven by a per-thread current-thread tokio
/// runtime, so CPU-heavy implementations do not starve other lanes.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_task_engine::core::{TaskKind, WorkExecutor, WorkOutcome};
///
/// #[derive(Clone)]
/// struct Echo;
///
/// #[async_trait]
/// impl WorkExecutor for Echo {
///     async fn execute(&self, _kind: TaskKind, payload: &serde_json::Value) -> WorkOutcome {
///         WorkOutcome::Success(payload.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait WorkExecutor: Send + Sync + Clone + 'static {
    /// Run one attempt.
    async fn execute(&self, kind: TaskKind, payload: &Value) -> WorkOutcome;
}

/// Reference work function: integer addition.
///
/// - `single` payload `{"a": i64, "b": i64}` → `a + b`
/// - `batch` payload `{"pairs": [{"a", "b"}, ...]}` → `[a + b, ...]`
///
/// Missing or malformed operands and overflowing sums are domain failures.
/// The operand pair `99 + 99` always faults, which exercises the retry path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditionExecutor;

#[derive(Deserialize)]
struct SinglePayload {
    a: Option<i64>,
    b: Option<i64>,
}

#[derive(Deserialize)]
struct BatchPayload {
    pairs: Vec<Pair>,
}

const DEMO_FAULT: Pair = Pair { a: 99, b: 99 };

impl AdditionExecutor {
    fn add(pair: Pair) -> Result<i64, String> {
        pair.a
            .checked_add(pair.b)
            .ok_or_else(|| format!("{} + {} overflows", pair.a, pair.b))
    }

    fn single(payload: &Value) -> WorkOutcome {
        let parsed: SinglePayload = match serde_json::from_value(payload.clone()) {
            Ok(p) => p,
            Err(e) => return WorkOutcome::DomainFailure(format!("malformed payload: {e}")),
        };
        let (Some(a), Some(b)) = (parsed.a, parsed.b) else {
            return WorkOutcome::DomainFailure("Task missing operands".into());
        };
        let pair = Pair { a, b };
        if pair == DEMO_FAULT {
            return WorkOutcome::Fault("Demo failure: 99+99 always fails".into());
        }
        match Self::add(pair) {
            Ok(sum) => WorkOutcome::Success(json!(sum)),
            Err(msg) => WorkOutcome::DomainFailure(msg),
        }
    }

    fn batch(payload: &Value) -> WorkOutcome {
        let parsed: BatchPayload = match serde_json::from_value(payload.clone()) {
            Ok(p) => p,
            Err(e) => return WorkOutcome::DomainFailure(format!("malformed payload: {e}")),
        };
        if parsed.pairs.contains(&DEMO_FAULT) {
            return WorkOutcome::Fault("Demo failure: batch contains 99+99".into());
        }
        let sums: Result<Vec<i64>, String> = parsed.pairs.into_iter().map(Self::add).collect();
        match sums {
            Ok(sums) => WorkOutcome::Success(json!(sums)),
            Err(msg) => WorkOutcome::DomainFailure(msg),
        }
    }
}

#[async_trait]
impl WorkExecutor for AdditionExecutor {
    async fn execute(&self, kind: TaskKind, payload: &Value) -> WorkOutcome {
        match kind {
            TaskKind::Single => Self::single(payload),
            TaskKind::Batch => Self::batch(payload),
        }
    }
}
