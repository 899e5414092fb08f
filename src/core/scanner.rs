//! Recurrence scanner: periodically turns due rules into tasks.
//!
//! One sweep fires each due rule at most once and advances it by exactly one
//! interval from its previous `next_run_at`. A scanner that was down for
//! several intervals therefore catches up one interval per sweep rather than
//! bursting every missed fire at once.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::dispatcher::{Dispatcher, Lane};
use crate::core::error::SchedulerError;
use crate::core::recurrence::{Advance, RecurrenceRule};
use crate::core::store::TaskStore;
use crate::util::clock::now_ms;
use crate::util::serde::{RuleId, TaskId};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rules that fired and the task each produced.
    pub fired: Vec<(RuleId, TaskId)>,
    /// Rules that could not be processed, with the reason.
    pub failures: Vec<(RuleId, String)>,
}

/// Periodic rule sweeper.
pub struct RecurrenceScanner {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    audit: Arc<dyn AuditSink>,
    interval: Duration,
}

impl RecurrenceScanner {
    /// Create a scanner running every `interval`.
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<Dispatcher>,
        audit: Arc<dyn AuditSink>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            audit,
            interval,
        }
    }

    /// Sweep period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Fire every rule due at `now_ms`. A failing rule never aborts the sweep.
    ///
    /// # Errors
    ///
    /// Only a failure to list due rules.
    pub fn sweep(&self, now_ms: u128) -> Result<SweepReport, SchedulerError> {
        let mut report = SweepReport::default();
        for rule in self.store.list_due_rules(now_ms)? {
            let rule_id = rule.id;
            match self.fire(rule, now_ms) {
                Ok(task_id) => report.fired.push((rule_id, task_id)),
                Err(err) => {
                    warn!(rule_id, error = %err, "recurrence rule skipped");
                    report.failures.push((rule_id, err.to_string()));
                }
            }
        }
        if !report.fired.is_empty() || !report.failures.is_empty() {
            info!(
                fired = report.fired.len(),
                failed = report.failures.len(),
                "recurrence sweep finished"
            );
        }
        Ok(report)
    }

    fn fire(&self, mut rule: RecurrenceRule, now_ms: u128) -> Result<TaskId, SchedulerError> {
        let mut task = self.store.create_task(rule.materialize(), now_ms)?;
        let task_id = task.id();
        self.audit.record(build_audit_event(
            task_id,
            Some(Lane::for_priority(task.priority())),
            AuditAction::Materialize,
            Some(format!("rule={}", rule.id)),
        ));

        // A refused dispatch leaves the task pending for the recovery pass;
        // the rule still advances so it does not fire twice.
        if let Err(err) = self.dispatcher.dispatch_task(&mut task, now_ms) {
            warn!(rule_id = rule.id, task_id, error = %err, "materialized task not dispatched");
        }

        match rule.advance() {
            Advance::Deactivated => debug!(rule_id = rule.id, "fire-once rule deactivated"),
            Advance::Rescheduled(next) => debug!(rule_id = rule.id, next_run_at_ms = next, "rule advanced"),
        }
        self.store.save_rule(&rule)?;
        Ok(task_id)
    }

    /// Sweep, then re-dispatch tasks stuck as `pending` for a whole period.
    fn tick(&self) {
        let now = now_ms();
        if let Err(err) = self.sweep(now) {
            error!(error = %err, "recurrence sweep failed");
        }
        if let Err(err) = self.dispatcher.recover_pending(now, self.interval) {
            error!(error = %err, "pending recovery failed");
        }
    }

    /// Run sweeps on a dedicated thread: once immediately, then every period.
    ///
    /// # Errors
    ///
    /// `Backend` if the thread cannot be spawned.
    pub fn start(self: Arc<Self>) -> Result<ScannerHandle, SchedulerError> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("task-engine-scanner".into())
            .spawn(move || {
                let (lock, cvar) = &*thread_stop;
                let mut stopped = lock.lock();
                while !*stopped {
                    MutexGuard::unlocked(&mut stopped, || self.tick());
                    if *stopped {
                        break;
                    }
                    let _ = cvar.wait_for(&mut stopped, self.interval);
                }
                debug!("scanner thread exiting");
            })
            .map_err(|e| SchedulerError::Backend(format!("failed to spawn scanner thread: {e}")))?;
        Ok(ScannerHandle {
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// Running scanner thread.
pub struct ScannerHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScannerHandle {
    /// Stop the thread and wait for the current sweep to finish.
    pub fn stop(&self) {
        {
            let (lock, cvar) = &*self.stop;
            *lock.lock() = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("scanner thread panicked");
            }
        }
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock() = true;
        cvar.notify_all();
    }
}
