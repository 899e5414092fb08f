//! Per-lane worker pools on dedicated OS threads.
//!
//! Each lane gets its own set of threads, and each thread owns a
//! single-threaded tokio runtime that drives [`AttemptRunner::run`]. Work
//! function calls therefore never block a caller's runtime, and a slow low
//! lane never starves the high lane.
//!
//! Workers block on their lane channel and on a shutdown channel at the same
//! time. Dropping the shutdown sender wakes every idle worker; a worker in the
//! middle of an attempt finishes it first. There is no preemption.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::attempt::{AttemptReport, AttemptRunner};
use crate::core::dispatcher::{DispatchItem, Lane};
use crate::core::error::SchedulerError;
use crate::core::executor::WorkExecutor;
use crate::infra::queue::LaneChannels;

/// How long [`LaneWorkerPool::shutdown`] waits for each worker.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Counters of one lane.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    received: AtomicU64,
    active: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

impl PoolCounters {
    fn record(&self, report: &Result<AttemptReport, SchedulerError>) {
        let counter = match report {
            Ok(AttemptReport::Succeeded { .. }) => &self.succeeded,
            Ok(AttemptReport::DomainFailed { .. } | AttemptReport::Exhausted { .. }) => &self.failed,
            Ok(AttemptReport::RetryScheduled { .. }) => &self.retried,
            Ok(AttemptReport::Skipped { .. }) => &self.skipped,
            Err(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, lane: Lane, worker_count: usize, queued: usize) -> LaneStats {
        LaneStats {
            lane,
            worker_count,
            queued,
            received: self.received.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time statistics of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    /// Lane described.
    pub lane: Lane,
    /// Worker threads serving the lane.
    pub worker_count: usize,
    /// Items waiting in the lane channel.
    pub queued: usize,
    /// Items taken off the channel.
    pub received: u64,
    /// Attempts currently executing.
    pub active: u64,
    /// Attempts that ended in `success`.
    pub succeeded: u64,
    /// Attempts that ended terminally `failed`.
    pub failed: u64,
    /// Faulted attempts that scheduled a retry.
    pub retried: u64,
    /// Items dropped by the status re-check.
    pub skipped: u64,
    /// Attempts aborted by a store error.
    pub errors: u64,
}

/// Statistics of all lanes, highest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// One entry per lane.
    pub lanes: Vec<LaneStats>,
}

impl PoolStats {
    /// Statistics of one lane.
    #[must_use]
    pub fn lane(&self, lane: Lane) -> Option<&LaneStats> {
        self.lanes.iter().find(|s| s.lane == lane)
    }

    /// Attempts currently executing across lanes.
    #[must_use]
    pub fn active(&self) -> u64 {
        self.lanes.iter().map(|s| s.active).sum()
    }
}

/// Worker threads for all three lanes.
pub struct LaneWorkerPool {
    channels: LaneChannels,
    worker_counts: [usize; 3],
    counters: Arc<[PoolCounters; 3]>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown: AtomicBool,
    workers: Mutex<Vec<(Lane, usize, JoinHandle<()>)>>,
}

impl LaneWorkerPool {
    /// Spawn `lanes.<lane>.worker_count` threads per lane, each pulling from
    /// its lane channel and running attempts through `runner`.
    ///
    /// # Errors
    ///
    /// `Validation` for an invalid configuration, `Backend` if a thread
    /// cannot be spawned.
    pub fn start<E: WorkExecutor>(
        config: &EngineConfig,
        channels: LaneChannels,
        runner: &AttemptRunner<E>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::Validation)?;

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let counters: Arc<[PoolCounters; 3]> = Arc::new(Default::default());
        let worker_counts = Lane::ALL.map(|lane| config.lanes.get(lane).worker_count);

        let pool = Self {
            channels,
            worker_counts,
            counters,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        };

        for lane in Lane::ALL {
            for worker_id in 0..worker_counts[lane.index()] {
                let handle = spawn_worker(
                    lane,
                    worker_id,
                    pool.channels.receiver(lane),
                    shutdown_rx.clone(),
                    Arc::clone(&pool.counters),
                    runner.clone(),
                    config.thread_stack_size,
                );
                match handle {
                    Ok(handle) => pool.workers.lock().push((lane, worker_id, handle)),
                    Err(err) => {
                        pool.shutdown();
                        return Err(err);
                    }
                }
            }
        }

        info!(
            high = worker_counts[Lane::High.index()],
            medium = worker_counts[Lane::Medium.index()],
            low = worker_counts[Lane::Low.index()],
            "lane worker pools started"
        );
        Ok(pool)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            lanes: Lane::ALL
                .iter()
                .map(|&lane| {
                    self.counters[lane.index()].snapshot(
                        lane,
                        self.worker_counts[lane.index()],
                        self.channels.depth(lane),
                    )
                })
                .collect(),
        }
    }

    /// Stop all workers. Idle workers exit at once; busy workers finish their
    /// current attempt. Workers that do not exit within the join timeout are
    /// detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down lane worker pools");
        self.shutdown_tx.lock().take();

        let mut workers = self.workers.lock();
        let count = workers.len();
        for (lane, worker_id, handle) in workers.drain(..) {
            let (tx, rx) = bounded(1);
            let joiner = thread::spawn(move || {
                let _ = tx.send(handle.join().is_ok());
            });
            match rx.recv_timeout(JOIN_TIMEOUT) {
                Ok(true) => debug!(lane = %lane, worker_id, "worker joined"),
                Ok(false) => warn!(lane = %lane, worker_id, "worker panicked"),
                Err(_) => {
                    warn!(lane = %lane, worker_id, "worker did not exit within timeout, detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
        info!(worker_count = count, "lane worker pools shut down");
    }
}

impl Drop for LaneWorkerPool {
    fn drop(&mut self) {
        // Signal only; joining here could hang on a stuck work function.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.shutdown_tx.lock().take();
            debug!("lane worker pool dropped without explicit shutdown, workers detached");
        }
    }
}

fn spawn_worker<E: WorkExecutor>(
    lane: Lane,
    worker_id: usize,
    items: Receiver<DispatchItem>,
    shutdown: Receiver<()>,
    counters: Arc<[PoolCounters; 3]>,
    runner: AttemptRunner<E>,
    stack_size: usize,
) -> Result<JoinHandle<()>, SchedulerError> {
    thread::Builder::new()
        .name(format!("{}-worker-{worker_id}", lane.queue_name()))
        .stack_size(stack_size)
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(lane = %lane, worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };
            let counters = &counters[lane.index()];
            debug!(lane = %lane, worker_id, "worker started");

            loop {
                // Either channel disconnecting ends the loop.
                let next = select! {
                    recv(items) -> msg => msg.ok(),
                    recv(shutdown) -> _ => None,
                };
                let Some(item) = next else { break };

                counters.received.fetch_add(1, Ordering::Relaxed);
                counters.active.fetch_add(1, Ordering::Relaxed);
                let report = rt.block_on(runner.run(item));
                counters.active.fetch_sub(1, Ordering::Relaxed);
                counters.record(&report);

                match report {
                    Ok(report) => debug!(lane = %lane, worker_id, task_id = report.task_id(), ?report, "attempt done"),
                    Err(err) => error!(lane = %lane, worker_id, task_id = item.task_id, error = %err, "attempt aborted"),
                }
            }
            debug!(lane = %lane, worker_id, "worker exiting");
        })
        .map_err(|e| SchedulerError::Backend(format!("failed to spawn {lane} worker: {e}")))
}
