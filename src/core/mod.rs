//! Core scheduling abstractions: task lifecycle, dispatch, retry, recurrence.

pub mod attempt;
pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod migrator;
pub mod recurrence;
pub mod retry;
pub mod scanner;
pub mod store;
pub mod task;
pub mod worker_pool;

pub use attempt::{AttemptReport, AttemptRunner, SkipReason};
pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use dispatcher::{DispatchItem, DispatchReceipt, Dispatcher, Enqueue, Lane, LanePolicy};
pub use error::{AppResult, SchedulerError};
pub use executor::{AdditionExecutor, WorkExecutor, WorkOutcome};
pub use migrator::{MigrationOutcome, PriorityMigrator};
pub use recurrence::{
    Advance, IntervalKind, NewRule, RecurrenceRule, RecurrenceSpec, TaskTemplate,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use scanner::{RecurrenceScanner, ScannerHandle, SweepReport};
pub use store::{TaskFilter, TaskPage, TaskStore, MAX_PAGE_SIZE};
pub use task::{NewTask, Task, TaskKind, TaskStatus};
pub use worker_pool::{LaneStats, LaneWorkerPool, PoolStats};
