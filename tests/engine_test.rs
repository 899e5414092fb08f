//! End-to-end tests for `TaskEngine`: real delay queue, real lane worker
//! pools, short lane and retry delays.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus_task_engine::builders::EngineBuilder;
use prometheus_task_engine::config::{EngineConfig, RetryConfig};
use prometheus_task_engine::core::{
    AdditionExecutor, AuditAction, InMemoryAuditSink, IntervalKind, Lane, LaneStats,
    MigrationOutcome, RecurrenceSpec, SchedulerError, Task, TaskKind, TaskStatus, TaskStore,
    WorkExecutor, WorkOutcome,
};
use prometheus_task_engine::infra::JsonlStore;
use prometheus_task_engine::runtime::{TaskEngine, TaskListQuery, TaskSubmission};
use prometheus_task_engine::util::now_ms;
use serde_json::{json, Value};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_lane_workers(Lane::High, 2)
        .with_lane_workers(Lane::Medium, 1)
        .with_lane_workers(Lane::Low, 1)
        .with_lane_delay_ms(Lane::High, 0)
        .with_lane_delay_ms(Lane::Medium, 10)
        .with_lane_delay_ms(Lane::Low, 20)
        .with_retry(RetryConfig {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 40,
        })
        .with_scan_interval_ms(50)
}

fn build_engine<E: WorkExecutor>(executor: E) -> (TaskEngine, Arc<InMemoryAuditSink>) {
    let audit = Arc::new(InMemoryAuditSink::new(10_000));
    let engine = EngineBuilder::new(fast_config())
        .with_audit(audit.clone())
        .build(executor)
        .expect("Failed to build engine");
    (engine, audit)
}

async fn wait_for_status(engine: &TaskEngine, task_id: u64, wanted: &[TaskStatus]) -> Task {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let task = engine.get_task(task_id).expect("Failed to load task");
        if wanted.contains(&task.status()) {
            return task;
        }
        assert!(
            Instant::now() < deadline,
            "task {task_id} stuck in {} waiting for {wanted:?}",
            task.status()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Counters and audit events are written just after the status they follow.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn lane_stats(engine: &TaskEngine, lane: Lane) -> LaneStats {
    *engine
        .stats()
        .lanes
        .iter()
        .find(|s| s.lane == lane)
        .expect("lane stats present")
}

// ============================================================================
// TEST EXECUTORS
// ============================================================================

/// Fails with a domain error on the first call, succeeds afterwards.
#[derive(Clone, Default)]
struct FlakyOnceExecutor {
    tripped: Arc<AtomicBool>,
}

#[async_trait]
impl WorkExecutor for FlakyOnceExecutor {
    async fn execute(&self, kind: TaskKind, payload: &Value) -> WorkOutcome {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return WorkOutcome::DomainFailure("not yet".into());
        }
        AdditionExecutor.execute(kind, payload).await
    }
}

/// Counts invocations and holds the worker for a while.
#[derive(Clone, Default)]
struct SlowCountingExecutor {
    calls: Arc<AtomicU64>,
}

#[async_trait]
impl WorkExecutor for SlowCountingExecutor {
    async fn execute(&self, _kind: TaskKind, _payload: &Value) -> WorkOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        WorkOutcome::Success(json!("done"))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_single_task_runs_to_success() {
    println!("\n=== Single Task ===");
    let (engine, audit) = build_engine(AdditionExecutor);

    let submitted = engine
        .submit(TaskSubmission::single(2, 40).with_priority(1))
        .expect("Failed to submit");
    assert!(submitted.dispatched);
    assert_eq!(submitted.task.status(), TaskStatus::Queued);

    let task = wait_for_status(&engine, submitted.task.id(), &[TaskStatus::Success]).await;
    settle().await;
    assert_eq!(task.result(), Some(&json!(42)));
    assert!(task.invariants_hold());

    let actions: Vec<AuditAction> = audit
        .events_for(task.id())
        .into_iter()
        .map(|e| e.action)
        .collect();
    // A zero-delay worker may record Start before the dispatcher records
    // Dispatch, so only the ends are ordered.
    assert_eq!(actions.len(), 4);
    assert_eq!(actions.first(), Some(&AuditAction::Submit));
    assert_eq!(actions.last(), Some(&AuditAction::Complete));
    assert!(actions.contains(&AuditAction::Dispatch));
    assert!(actions.contains(&AuditAction::Start));
    assert_eq!(lane_stats(&engine, Lane::High).succeeded, 1);
    engine.shutdown();
}

#[tokio::test]
async fn test_batch_task_on_low_lane() {
    println!("\n=== Batch Task ===");
    let (engine, _) = build_engine(AdditionExecutor);

    let submitted = engine
        .submit(TaskSubmission::batch(&[(1, 2), (3, 4), (-5, 5)]).with_priority(3))
        .expect("Failed to submit");
    let task = wait_for_status(&engine, submitted.task.id(), &[TaskStatus::Success]).await;
    settle().await;
    assert_eq!(task.result(), Some(&json!([3, 7, 0])));
    assert_eq!(lane_stats(&engine, Lane::Low).succeeded, 1);
    engine.shutdown();
}

#[tokio::test]
async fn test_fault_retries_until_budget_exhausted() {
    println!("\n=== Fault Retries ===");
    let (engine, audit) = build_engine(AdditionExecutor);

    let submitted = engine
        .submit(TaskSubmission::single(99, 99).with_priority(1))
        .expect("Failed to submit");
    let task = wait_for_status(&engine, submitted.task.id(), &[TaskStatus::Failed]).await;
    settle().await;

    assert_eq!(task.retry_count(), 2);
    assert!(task.finished_at_ms().is_some());
    let high = lane_stats(&engine, Lane::High);
    assert_eq!(high.retried, 2);
    assert_eq!(high.failed, 1);

    let scheduled = audit
        .events_for(task.id())
        .iter()
        .filter(|e| e.action == AuditAction::RetryScheduled)
        .count();
    assert_eq!(scheduled, 2);
    engine.shutdown();
}

#[tokio::test]
async fn test_domain_failure_fails_without_retry() {
    println!("\n=== Domain Failure ===");
    let (engine, _) = build_engine(AdditionExecutor);

    let submitted = engine
        .submit(TaskSubmission::new(TaskKind::Single, json!({"a": 1})).with_priority(1))
        .expect("Failed to submit");
    let task = wait_for_status(&engine, submitted.task.id(), &[TaskStatus::Failed]).await;
    settle().await;
    assert_eq!(task.retry_count(), 0);
    assert_eq!(task.error_message(), Some("Task missing operands"));
    assert_eq!(lane_stats(&engine, Lane::High).retried, 0);
    engine.shutdown();
}

#[tokio::test]
async fn test_explicit_retry_of_failed_task() {
    println!("\n=== Explicit Retry ===");
    let (engine, audit) = build_engine(FlakyOnceExecutor::default());

    let submitted = engine
        .submit(TaskSubmission::single(5, 6).with_priority(1))
        .expect("Failed to submit");
    let id = submitted.task.id();
    wait_for_status(&engine, id, &[TaskStatus::Failed]).await;

    let reset = engine.retry_task(id).expect("Failed to retry");
    assert_eq!(reset.retry_count(), 0);
    assert!(reset.error_message().is_none());

    let task = wait_for_status(&engine, id, &[TaskStatus::Success]).await;
    assert_eq!(task.result(), Some(&json!(11)));
    assert!(audit.events_for(id).iter().any(|e| e.action == AuditAction::Retry));

    let err = engine.retry_task(id).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidStateTransition { current: TaskStatus::Success, .. }
    ));
    engine.shutdown();
}

#[tokio::test]
async fn test_revoke_waiting_task_drops_its_queue_entry() {
    println!("\n=== Revoke ===");
    let (engine, _) = build_engine(AdditionExecutor);

    let submitted = engine
        .submit(TaskSubmission::single(1, 1).scheduled_for(now_ms() + 60_000))
        .expect("Failed to submit");
    assert_eq!(engine.stats().delayed, 1);

    let revoked = engine.revoke_task(submitted.task.id()).expect("Failed to revoke");
    assert_eq!(revoked.status(), TaskStatus::Revoked);
    assert_eq!(engine.stats().delayed, 0);

    let err = engine.revoke_task(submitted.task.id()).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidStateTransition { .. }));
    engine.shutdown();
}

#[tokio::test]
async fn test_update_priority_moves_waiting_task() {
    println!("\n=== Priority Migration ===");
    let (engine, _) = build_engine(AdditionExecutor);

    let submitted = engine
        .submit(
            TaskSubmission::single(3, 4)
                .with_priority(3)
                .scheduled_for(now_ms() + 60_000),
        )
        .expect("Failed to submit");
    let id = submitted.task.id();

    let outcome = engine.update_priority(id, 1).expect("Failed to migrate");
    assert_eq!(
        outcome,
        MigrationOutcome::Migrated {
            from: Lane::Low,
            to: Lane::High,
            cancelled: true
        }
    );
    assert_eq!(engine.stats().delayed, 1);
    assert_eq!(engine.get_task(id).expect("task").priority(), 1);

    assert!(matches!(
        engine.update_priority(id, 7),
        Err(SchedulerError::Validation(_))
    ));
    engine.shutdown();
}

#[tokio::test]
async fn test_recurring_submission_creates_rule() {
    println!("\n=== Recurring Submission ===");
    let audit = Arc::new(InMemoryAuditSink::new(10_000));
    let engine = EngineBuilder::new(fast_config())
        .with_audit(audit)
        .without_scanner()
        .build(AdditionExecutor)
        .expect("Failed to build engine");
    let before = now_ms();

    let submitted = engine
        .submit(TaskSubmission::single(1, 2).recurring(RecurrenceSpec {
            interval_type: IntervalKind::Minutely,
            interval_value: 5,
        }))
        .expect("Failed to submit");
    let rule_id = submitted.rule_id.expect("rule created");
    assert_eq!(submitted.task.recurrence_rule_id(), Some(rule_id));

    let rule = engine.store().get_rule(rule_id).expect("rule stored");
    assert!(rule.active);
    assert!(rule.next_run_at_ms >= before && rule.next_run_at_ms <= now_ms());
    let anchor = rule.next_run_at_ms;

    let once = engine
        .submit(TaskSubmission::single(3, 4).recurring(RecurrenceSpec {
            interval_type: IntervalKind::Daily,
            interval_value: 0,
        }))
        .expect("Failed to submit");
    let once_id = once.rule_id.expect("rule created");
    assert!(engine.store().get_rule(once_id).expect("rule stored").active);

    // Both rules are due at their submission instant and fire on the next sweep.
    let report = engine.sweep_now().expect("sweep");
    let mut fired_rules: Vec<_> = report.fired.iter().map(|(rule, _)| *rule).collect();
    fired_rules.sort_unstable();
    assert_eq!(fired_rules, vec![rule_id, once_id]);
    assert!(report.failures.is_empty());

    let once_rule = engine.store().get_rule(once_id).expect("rule stored");
    assert!(!once_rule.active);
    let rule = engine.store().get_rule(rule_id).expect("rule stored");
    assert!(rule.active);
    assert_eq!(rule.next_run_at_ms, anchor + 5 * 60_000);

    // The fire-once rule is dormant and the periodic one is not due yet.
    assert!(engine.sweep_now().expect("sweep").fired.is_empty());

    for (fired_rule, task_id) in &report.fired {
        let task = wait_for_status(&engine, *task_id, &[TaskStatus::Success]).await;
        assert_eq!(task.recurrence_rule_id(), Some(*fired_rule));
    }
    wait_for_status(&engine, submitted.task.id(), &[TaskStatus::Success]).await;
    engine.shutdown();
}

#[tokio::test]
async fn test_list_tasks_filters_and_pages() {
    println!("\n=== List Tasks ===");
    let (engine, _) = build_engine(AdditionExecutor);

    let ok = engine.submit(TaskSubmission::single(1, 1).with_priority(1)).expect("submit");
    let bad = engine.submit(TaskSubmission::single(99, 99).with_priority(1)).expect("submit");
    let batch = engine
        .submit(TaskSubmission::batch(&[(1, 1)]).with_priority(1))
        .expect("submit");
    wait_for_status(&engine, ok.task.id(), &[TaskStatus::Success]).await;
    wait_for_status(&engine, bad.task.id(), &[TaskStatus::Failed]).await;
    wait_for_status(&engine, batch.task.id(), &[TaskStatus::Success]).await;

    let all = engine.list_tasks(&TaskListQuery::default()).expect("list");
    assert_eq!(all.total, 3);
    let ids: Vec<u64> = all.items.iter().map(Task::id).collect();
    assert_eq!(ids, vec![batch.task.id(), bad.task.id(), ok.task.id()]);

    let failed = engine
        .list_tasks(&TaskListQuery {
            statuses: vec![TaskStatus::Failed],
            ..TaskListQuery::default()
        })
        .expect("list");
    assert_eq!(failed.total, 1);
    assert_eq!(failed.items[0].id(), bad.task.id());

    let batches = engine
        .list_tasks(&TaskListQuery {
            kind: Some(TaskKind::Batch),
            ..TaskListQuery::default()
        })
        .expect("list");
    assert_eq!(batches.total, 1);

    let page = engine
        .list_tasks(&TaskListQuery {
            limit: 1,
            offset: 1,
            ..TaskListQuery::default()
        })
        .expect("list");
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id(), bad.task.id());

    assert!(engine
        .list_tasks(&TaskListQuery {
            limit: 0,
            ..TaskListQuery::default()
        })
        .is_err());
    engine.shutdown();
}

#[tokio::test]
async fn test_delete_task() {
    println!("\n=== Delete Task ===");
    let (engine, _) = build_engine(AdditionExecutor);

    let submitted = engine
        .submit(TaskSubmission::single(1, 1).scheduled_for(now_ms() + 60_000))
        .expect("Failed to submit");
    let id = submitted.task.id();
    engine.delete_task(id).expect("Failed to delete");

    assert!(matches!(engine.get_task(id), Err(SchedulerError::TaskNotFound(_))));
    assert_eq!(engine.stats().delayed, 0);
    assert!(matches!(engine.delete_task(id), Err(SchedulerError::TaskNotFound(_))));
    engine.shutdown();
}

#[tokio::test]
async fn test_duplicate_delivery_executes_once() {
    println!("\n=== Duplicate Delivery ===");
    let executor = SlowCountingExecutor::default();
    let calls = Arc::clone(&executor.calls);
    let (engine, _) = build_engine(executor);

    let submitted = engine
        .submit(
            TaskSubmission::single(1, 1)
                .with_priority(1)
                .scheduled_for(now_ms() + 100),
        )
        .expect("Failed to submit");
    // Startup recovery re-dispatches the queued task: a second item for the
    // same attempt lands on the high lane, which has two workers.
    assert_eq!(engine.recover().expect("recover"), vec![submitted.task.id()]);

    wait_for_status(&engine, submitted.task.id(), &[TaskStatus::Success]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let high = lane_stats(&engine, Lane::High);
    assert_eq!(high.received, 2);
    assert_eq!(high.skipped, 1);
    assert_eq!(high.succeeded, 1);
    engine.shutdown();
}

#[tokio::test]
async fn test_submit_rejected_after_shutdown() {
    println!("\n=== Shutdown ===");
    let (engine, _) = build_engine(AdditionExecutor);
    engine.shutdown();
    engine.shutdown();

    assert!(matches!(
        engine.submit(TaskSubmission::single(1, 1)),
        Err(SchedulerError::Shutdown)
    ));
    assert!(matches!(engine.sweep_now(), Err(SchedulerError::Shutdown)));
}

#[tokio::test]
async fn test_rejects_invalid_submission() {
    println!("\n=== Invalid Submission ===");
    let (engine, _) = build_engine(AdditionExecutor);

    assert!(matches!(
        engine.submit(TaskSubmission::single(1, 1).with_priority(5)),
        Err(SchedulerError::Validation(_))
    ));
    assert!(matches!(
        engine.submit(TaskSubmission::batch(&[])),
        Err(SchedulerError::Validation(_))
    ));
    assert_eq!(engine.list_tasks(&TaskListQuery::default()).expect("list").total, 0);
    engine.shutdown();
}

#[tokio::test]
async fn test_journal_survives_restart_and_recovers_waiting_tasks() {
    println!("\n=== Journal Recovery ===");
    let dir = std::env::temp_dir().join(format!("task-engine-{}", uuid::Uuid::new_v4()));

    let waiting_id = {
        let store = Arc::new(JsonlStore::open(&dir, "tasks").expect("Failed to open journal"));
        let engine = EngineBuilder::new(fast_config())
            .with_store(store)
            .without_scanner()
            .build(AdditionExecutor)
            .expect("Failed to build engine");

        let done = engine
            .submit(TaskSubmission::single(4, 4).with_priority(1))
            .expect("Failed to submit");
        wait_for_status(&engine, done.task.id(), &[TaskStatus::Success]).await;

        let waiting = engine
            .submit(TaskSubmission::single(5, 5).scheduled_for(now_ms() + 60_000))
            .expect("Failed to submit");
        engine.shutdown();
        waiting.task.id()
    };

    let store = Arc::new(JsonlStore::open(&dir, "tasks").expect("Failed to reopen journal"));
    assert_eq!(store.get_task(waiting_id).expect("task").status(), TaskStatus::Queued);

    let engine = EngineBuilder::new(fast_config())
        .with_store(store)
        .without_scanner()
        .build(AdditionExecutor)
        .expect("Failed to build engine");
    assert_eq!(engine.recover().expect("recover"), vec![waiting_id]);
    assert_eq!(engine.stats().delayed, 1);
    engine.shutdown();

    let _ = std::fs::remove_dir_all(&dir);
}
