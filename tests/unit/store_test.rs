//! Tests for the task store backends

use std::path::PathBuf;

use prometheus_task_engine::core::{
    IntervalKind, NewRule, NewTask, RecurrenceSpec, SchedulerError, TaskFilter, TaskKind,
    TaskStatus, TaskStore, TaskTemplate,
};
use prometheus_task_engine::infra::{InMemoryStore, JsonlStore};
use serde_json::json;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("task-store-{}", uuid::Uuid::new_v4()))
}

fn new_task(priority: i32) -> NewTask {
    NewTask::new(TaskKind::Single, json!({"a": 1, "b": 2}), priority)
}

fn new_rule(next_run_at_ms: u128) -> NewRule {
    NewRule {
        spec: RecurrenceSpec {
            interval_type: IntervalKind::Minutely,
            interval_value: 10,
        },
        next_run_at_ms,
        active: true,
        template: TaskTemplate {
            kind: TaskKind::Single,
            base_payload: json!({"a": 1, "b": 1}),
            priority: 2,
        },
    }
}

#[test]
fn test_in_memory_versions_and_conflicts() {
    let store = InMemoryStore::new();
    let task = store.create_task(new_task(1), 1_000).unwrap();
    assert_eq!(task.version(), 1);

    let mut first = store.get_task(task.id()).unwrap();
    let mut second = store.get_task(task.id()).unwrap();
    first.mark_queued(1_001).unwrap();
    store.save_task(&mut first).unwrap();
    assert_eq!(first.version(), 2);

    second.revoke(1_002).unwrap();
    assert!(matches!(
        store.save_task(&mut second),
        Err(SchedulerError::Conflict(_))
    ));
    assert_eq!(store.get_task(task.id()).unwrap().status(), TaskStatus::Queued);
}

#[test]
fn test_in_memory_filters_by_priority_and_kind() {
    let store = InMemoryStore::new();
    store.create_task(new_task(1), 1).unwrap();
    store.create_task(new_task(3), 2).unwrap();
    store
        .create_task(
            NewTask::new(TaskKind::Batch, json!({"pairs": []}), 3),
            3,
        )
        .unwrap();

    let low = store
        .list_tasks(&TaskFilter {
            priority: Some(3),
            ..TaskFilter::default()
        })
        .unwrap();
    assert_eq!(low.total, 2);

    let batches = store
        .list_tasks(&TaskFilter::default().with_kind(TaskKind::Batch))
        .unwrap();
    assert_eq!(batches.total, 1);
    assert_eq!(batches.items[0].id(), 3);
}

#[test]
fn test_due_rules_skip_inactive_and_future() {
    let store = InMemoryStore::new();
    let due = store.create_rule(new_rule(100)).unwrap();
    store.create_rule(new_rule(10_000)).unwrap();
    let mut inactive = store.create_rule(new_rule(50)).unwrap();
    inactive.active = false;
    store.save_rule(&inactive).unwrap();

    let ids: Vec<u64> = store.list_due_rules(1_000).unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![due.id]);
}

#[test]
fn test_jsonl_store_replays_journal() {
    let dir = temp_dir();
    let (kept, deleted, rule_id) = {
        let store = JsonlStore::open(&dir, "tasks").unwrap();
        let mut kept = store.create_task(new_task(1), 10).unwrap();
        let deleted = store.create_task(new_task(2), 11).unwrap();
        let extra = store.create_task(new_task(3), 12).unwrap();

        kept.mark_queued(20).unwrap();
        store.save_task(&mut kept).unwrap();
        store.delete_task(deleted.id()).unwrap();

        let mut rule = store.create_rule(new_rule(500)).unwrap();
        rule.advance();
        store.save_rule(&rule).unwrap();
        assert!(extra.id() > deleted.id());
        (kept, deleted.id(), rule.id)
    };

    let store = JsonlStore::open(&dir, "tasks").unwrap();
    let reloaded = store.get_task(kept.id()).unwrap();
    assert_eq!(reloaded, kept);
    assert_eq!(reloaded.version(), 2);
    assert!(matches!(
        store.get_task(deleted),
        Err(SchedulerError::TaskNotFound(_))
    ));
    assert_eq!(store.get_rule(rule_id).unwrap().next_run_at_ms, 500 + 10 * 60_000);

    let next = store.create_task(new_task(1), 30).unwrap();
    assert_eq!(next.id(), 4);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_jsonl_store_compaction_keeps_live_records() {
    let dir = temp_dir();
    let store = JsonlStore::open(&dir, "tasks").unwrap();
    let mut task = store.create_task(new_task(1), 10).unwrap();
    for at in 11..15 {
        task.mark_queued(at).unwrap();
        store.save_task(&mut task).unwrap();
    }
    let gone = store.create_task(new_task(2), 20).unwrap();
    store.delete_task(gone.id()).unwrap();
    store.create_rule(new_rule(99)).unwrap();

    store.compact().unwrap();
    let journal = std::fs::read_to_string(store.path()).unwrap();
    assert_eq!(journal.lines().count(), 2);

    let reopened = JsonlStore::open(&dir, "tasks").unwrap();
    assert_eq!(reopened.get_task(task.id()).unwrap(), task);
    assert_eq!(reopened.list_tasks(&TaskFilter::default()).unwrap().total, 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_jsonl_store_rejects_stale_save() {
    let dir = temp_dir();
    let store = JsonlStore::open(&dir, "tasks").unwrap();
    let task = store.create_task(new_task(1), 10).unwrap();
    let mut a = task.clone();
    let mut b = task;
    a.mark_queued(11).unwrap();
    store.save_task(&mut a).unwrap();
    b.mark_queued(12).unwrap();
    assert!(matches!(store.save_task(&mut b), Err(SchedulerError::Conflict(_))));

    let _ = std::fs::remove_dir_all(&dir);
}

fn assert_running_task_is_not_deleted(store: &dyn TaskStore) {
    let mut task = store.create_task(new_task(2), 20).unwrap();
    task.mark_queued(21).unwrap();
    store.save_task(&mut task).unwrap();
    task.mark_running(0, 22).unwrap();
    store.save_task(&mut task).unwrap();

    assert!(matches!(
        store.delete_task(task.id()),
        Err(SchedulerError::InvalidStateTransition {
            current: TaskStatus::Running,
            ..
        })
    ));
    assert_eq!(store.get_task(task.id()).unwrap().status(), TaskStatus::Running);

    task.mark_success(json!(3), 23).unwrap();
    store.save_task(&mut task).unwrap();
    assert_eq!(store.delete_task(task.id()).unwrap().status(), TaskStatus::Success);
    assert!(matches!(
        store.delete_task(task.id()),
        Err(SchedulerError::TaskNotFound(_))
    ));
}

#[test]
fn test_in_memory_refuses_to_delete_running_task() {
    assert_running_task_is_not_deleted(&InMemoryStore::new());
}

#[test]
fn test_jsonl_store_refuses_to_delete_running_task() {
    let dir = temp_dir();
    let store = JsonlStore::open(&dir, "tasks").unwrap();
    assert_running_task_is_not_deleted(&store);
    drop(store);

    let reopened = JsonlStore::open(&dir, "tasks").unwrap();
    assert!(reopened.list_tasks(&TaskFilter::default()).unwrap().items.is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}
