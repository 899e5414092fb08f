//! File-backed task store using an append-only JSONL journal.
//!
//! Every mutation appends one record; opening the store replays the journal
//! into memory. Later records for the same id replace earlier ones.
//! [`JsonlStore::compact`] rewrites the journal with one record per live
//! task and rule.

use std::fs::{self, create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::SchedulerError;
use crate::core::recurrence::{NewRule, RecurrenceRule};
use crate::core::store::{TaskFilter, TaskPage, TaskStore};
use crate::core::task::{NewTask, Task};
use crate::infra::store::memory::StoreState;
use crate::util::serde::{RuleId, TaskId};

/// One journal line: `{"task": {..}}`, `{"rule": {..}}` or `{"delete_task": 7}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum JournalRecord {
    Task(Task),
    Rule(RecurrenceRule),
    DeleteTask(TaskId),
}

fn backend(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Backend(e.to_string())
}

/// Durable store backed by a JSONL journal.
pub struct JsonlStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonlStore {
    /// Open (or create) the journal `<dir>/<name>.jsonl` and replay it.
    ///
    /// # Errors
    ///
    /// `Backend` if the directory cannot be created or a journal line is
    /// unreadable.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self, SchedulerError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(backend)?;
        let path = dir.join(format!("{name}.jsonl"));
        let state = Self::replay(&path)?;
        info!(
            path = %path.display(),
            tasks = state.tasks().count(),
            rules = state.rules().count(),
            "task journal loaded"
        );
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Journal file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(path: &Path) -> Result<StoreState, SchedulerError> {
        let mut state = StoreState::default();
        if !path.exists() {
            return Ok(state);
        }
        let file = OpenOptions::new().read(true).open(path).map_err(backend)?;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(backend)?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = serde_json::from_str(&line)
                .map_err(|e| backend(format!("journal line {}: {e}", lineno + 1)))?;
            match record {
                JournalRecord::Task(task) => state.put_task(task),
                JournalRecord::Rule(rule) => state.put_rule(rule),
                JournalRecord::DeleteTask(id) => {
                    let _ = state.remove_task(id);
                }
            }
        }
        Ok(state)
    }

    fn append(&self, record: &JournalRecord) -> Result<(), SchedulerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(backend)?;
        let line = serde_json::to_string(record).map_err(backend)?;
        writeln!(file, "{line}").map_err(backend)
    }

    /// Rewrite the journal with only the current records.
    ///
    /// # Errors
    ///
    /// `Backend` on I/O failure; the previous journal stays in place.
    pub fn compact(&self) -> Result<(), SchedulerError> {
        let state = self.state.write();
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(backend)?;
            for rule in state.rules() {
                let line = serde_json::to_string(&JournalRecord::Rule(rule.clone()))
                    .map_err(backend)?;
                writeln!(file, "{line}").map_err(backend)?;
            }
            for task in state.tasks() {
                let line = serde_json::to_string(&JournalRecord::Task(task.clone()))
                    .map_err(backend)?;
                writeln!(file, "{line}").map_err(backend)?;
            }
            file.sync_all().map_err(backend)?;
        }
        fs::rename(&tmp, &self.path).map_err(backend)?;
        debug!(path = %self.path.display(), "task journal compacted");
        Ok(())
    }
}

impl TaskStore for JsonlStore {
    fn create_task(&self, new: NewTask, now_ms: u128) -> Result<Task, SchedulerError> {
        let mut state = self.state.write();
        let task = state.new_task(new, now_ms);
        self.append(&JournalRecord::Task(task.clone()))?;
        state.put_task(task.clone());
        Ok(task)
    }

    fn get_task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        self.state.read().get_task(id)
    }

    fn save_task(&self, task: &mut Task) -> Result<(), SchedulerError> {
        let mut state = self.state.write();
        let next = state.prepare_save(task)?;
        self.append(&JournalRecord::Task(next.clone()))?;
        task.set_version(next.version());
        state.put_task(next);
        Ok(())
    }

    fn delete_task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        let mut state = self.state.write();
        state.check_deletable(id)?;
        self.append(&JournalRecord::DeleteTask(id))?;
        state.remove_task(id)
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<TaskPage, SchedulerError> {
        Ok(self.state.read().list_tasks(filter))
    }

    fn create_rule(&self, new: NewRule) -> Result<RecurrenceRule, SchedulerError> {
        let mut state = self.state.write();
        let rule = state.new_rule(new);
        self.append(&JournalRecord::Rule(rule.clone()))?;
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
        self.append(&JournalRecord::Rule(rule.clone()))?;
        state.put_rule(rule.clone());
        Ok(())
    }
}
