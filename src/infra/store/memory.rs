//! In-memory task store.
//!
//! All records live behind one `RwLock`, so id allocation and the optimistic
//! version check are atomic with respect to each other. Versions start at 1
//! and increase by one on every successful save.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::core::error::SchedulerError;
use crate::core::recurrence::{NewRule, RecurrenceRule};
use crate::core::store::{TaskFilter, TaskPage, TaskStore};
use crate::core::task::{NewTask, Task, TaskStatus};
use crate::util::serde::{RuleId, TaskId};

/// Record maps shared by the in-memory and journaled stores.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    tasks: BTreeMap<TaskId, Task>,
    rules: BTreeMap<RuleId, RecurrenceRule>,
    last_task_id: TaskId,
    last_rule_id: RuleId,
}

impl StoreState {
    pub(crate) fn new_task(&mut self, new: NewTask, now_ms: u128) -> Task {
        self.last_task_id += 1;
        let mut task = Task::from_new(self.last_task_id, new, now_ms);
        task.set_version(1);
        task
    }

    pub(crate) fn new_rule(&mut self, new: NewRule) -> RecurrenceRule {
        self.last_rule_id += 1;
        RecurrenceRule::from_new(self.last_rule_id, new)
    }

    pub(crate) fn get_task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        self.tasks.get(&id).cloned().ok_or(SchedulerError::TaskNotFound(id))
    }

    /// Check the version and return the record as it will be stored.
    pub(crate) fn prepare_save(&self, task: &Task) -> Result<Task, SchedulerError> {
        let stored = self
            .tasks
            .get(&task.id())
            .ok_or(SchedulerError::TaskNotFound(task.id()))?;
        if stored.version() != task.version() {
            return Err(SchedulerError::Conflict(task.id()));
        }
        let mut next = task.clone();
        next.set_version(task.version() + 1);
        Ok(next)
    }

    pub(crate) fn put_task(&mut self, task: Task) {
        self.last_task_id = self.last_task_id.max(task.id());
        self.tasks.insert(task.id(), task);
    }

    pub(crate) fn remove_task(&mut self, id: TaskId) -> Result<Task, SchedulerError> {
        self.tasks.remove(&id).ok_or(SchedulerError::TaskNotFound(id))
    }

    /// Fails unless `id` exists and no attempt owns it.
    pub(crate) fn check_deletable(&self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.tasks.get(&id).ok_or(SchedulerError::TaskNotFound(id))?;
        if task.status() == TaskStatus::Running {
            return Err(SchedulerError::InvalidStateTransition {
                task_id: id,
                current: task.status(),
                operation: "delete",
            });
        }
        Ok(())
    }

    pub(crate) fn list_tasks(&self, filter: &TaskFilter) -> TaskPage {
        // Ids are allocated in creation order, so descending id is newest first.
        let matching: Vec<&Task> = self.tasks.values().rev().filter(|t| filter.matches(t)).collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect();
        TaskPage { items, total }
    }

    pub(crate) fn get_rule(&self, id: RuleId) -> Result<RecurrenceRule, SchedulerError> {
        self.rules.get(&id).cloned().ok_or(SchedulerError::RuleNotFound(id))
    }

    pub(crate) fn contains_rule(&self, id: RuleId) -> bool {
        self.rules.contains_key(&id)
    }

    pub(crate) fn put_rule(&mut self, rule: RecurrenceRule) {
        self.last_rule_id = self.last_rule_id.max(rule.id);
        self.rules.insert(rule.id, rule);
    }

    pub(crate) fn due_rules(&self, now_ms: u128) -> Vec<RecurrenceRule> {
        self.rules.values().filter(|r| r.is_due(now_ms)).cloned().collect()
    }

    pub(crate) fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub(crate) fn rules(&self) -> impl Iterator<Item = &RecurrenceRule> {
        self.rules.values()
    }
}

/// Volatile task store for tests, demos and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.state.read().tasks().count()
    }
}

impl TaskStore for InMemoryStore {
    fn create_task(&self, new: NewTask, now_ms: u128) -> Result<Task, SchedulerError> {
        let mut state = self.state.write();
        let task = state.new_task(new, now_ms);
        state.put_task(task.clone());
        Ok(task)
    }

    fn get_task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        self.state.read().get_task(id)
    }

    fn save_task(&self, task: &mut Task) -> Result<(), SchedulerError> {
        let mut state = self.state.write();
        let next = state.prepare_save(task)?;
        task.set_version(next.version());
        state.put_task(next);
        Ok(())
    }

    fn delete_task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        let mut state = self.state.write();
        state.check_deletable(id)?;
        state.remove_task(id)
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<TaskPage, SchedulerError> {
        Ok(self.state.read().list_tasks(filter))
    }

    fn create_rule(&self, new: NewRule) -> Result<RecurrenceRule, SchedulerError> {
        let mut state = self.state.write();
        let rule = state.new_rule(new);
        state.put_rule(rule.clone());
        Ok(rule)
    }

    fn get_rule(&self, id: RuleId) -> Result<RecurrenceRule, SchedulerError> {
        self.state.read().get_rule(id)
    }

    fn list_due_rules(&self, now_ms: u128) -> Result<Vec<RecurrenceRule>, SchedulerError> {
        Ok(self.state.read().due_rules(now_ms))
    }

    fn save_rule(&self, rule: &RecurrenceRule) -> Result<(), SchedulerError> {
        let mut state = self.state.write();
        if !state.contains_rule(rule.id) {
            return Err(SchedulerError::RuleNotFound(rule.id));
        }
        state.put_rule(rule.clone());
        Ok(())
    }
}
