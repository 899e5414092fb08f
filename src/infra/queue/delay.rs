//! In-process timed queue: a timer heap in front of bounded lane channels.
//!
//! Items with zero delay go straight into their lane channel. Delayed items
//! wait in a min-heap owned by one timer thread, which sleeps on a `Condvar`
//! until the earliest deadline (or until an earlier item arrives) and then
//! moves due items into the lane channels. Nothing polls and no worker thread
//! ever sleeps through a delay.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::core::dispatcher::{DispatchItem, Enqueue, Lane};
use crate::core::error::SchedulerError;
use crate::util::serde::TaskId;

/// How long a due item waits before redelivery when its lane channel is full.
const FULL_LANE_BACKOFF: Duration = Duration::from_millis(50);

/// Bounded channel per lane.
#[derive(Clone)]
pub struct LaneChannels {
    senders: [Sender<DispatchItem>; 3],
    receivers: [Receiver<DispatchItem>; 3],
}

impl LaneChannels {
    /// Three bounded channels of `capacity` each.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (hs, hr) = bounded(capacity);
        let (ms, mr) = bounded(capacity);
        let (ls, lr) = bounded(capacity);
        Self {
            senders: [hs, ms, ls],
            receivers: [hr, mr, lr],
        }
    }

    /// Sending half of a lane.
    #[must_use]
    pub const fn sender(&self, lane: Lane) -> &Sender<DispatchItem> {
        &self.senders[lane.index()]
    }

    /// Receiving half of a lane.
    #[must_use]
    pub fn receiver(&self, lane: Lane) -> Receiver<DispatchItem> {
        self.receivers[lane.index()].clone()
    }

    /// Items waiting in a lane channel.
    #[must_use]
    pub fn depth(&self, lane: Lane) -> usize {
        self.senders[lane.index()].len()
    }
}

struct Entry {
    due: Instant,
    seq: u64,
    item: DispatchItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // FIFO among equal deadlines.
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
    channels: LaneChannels,
    max_delayed: usize,
}

impl Shared {
    fn try_deliver(&self, item: DispatchItem) -> Result<(), TrySendError<DispatchItem>> {
        self.channels.sender(item.lane).try_send(item)
    }
}

/// Timed enqueue primitive backed by a timer thread.
pub struct DelayQueue {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl DelayQueue {
    /// Start the timer thread feeding `channels`. At most `max_delayed` items
    /// may wait in the heap at once.
    ///
    /// # Errors
    ///
    /// `Backend` if the timer thread cannot be spawned.
    pub fn start(channels: LaneChannels, max_delayed: usize) -> Result<Self, SchedulerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
            channels,
            max_delayed,
        });
        let timer_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("task-engine-timer".into())
            .spawn(move || timer_loop(&timer_shared))
            .map_err(|e| SchedulerError::Backend(format!("failed to spawn timer thread: {e}")))?;
        info!(max_delayed, "delay queue started");
        Ok(Self {
            shared,
            timer: Mutex::new(Some(handle)),
        })
    }

    /// Items waiting for their deadline.
    #[must_use]
    pub fn delayed_len(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Items waiting in a lane channel.
    #[must_use]
    pub fn lane_depth(&self, lane: Lane) -> usize {
        self.shared.channels.depth(lane)
    }

    /// Stop the timer thread. Undelivered delayed items are dropped; their
    /// tasks stay `queued` in the store.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.timer.lock().take() {
            if handle.join().is_err() {
                warn!("timer thread panicked");
            }
        }
        info!("delay queue shut down");
    }
}

impl Enqueue for DelayQueue {
    fn enqueue(&self, item: DispatchItem, delay: Duration) -> Result<(), SchedulerError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(SchedulerError::Shutdown);
        }
        if delay.is_zero() {
            drop(state);
            return match self.shared.try_deliver(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    Err(SchedulerError::QueueFull(item.lane.queue_name().into()))
                }
                Err(TrySendError::Disconnected(_)) => Err(SchedulerError::Shutdown),
            };
        }
        if state.heap.len() >= self.shared.max_delayed {
            return Err(SchedulerError::QueueFull("delay heap".into()));
        }
        let due = Instant::now() + delay;
        state.seq += 1;
        let seq = state.seq;
        let earliest = state.heap.peek().is_none_or(|Reverse(head)| due < head.due);
        state.heap.push(Reverse(Entry { due, seq, item }));
        if earliest {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    fn cancel(&self, task_id: TaskId, lane: Lane) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.heap.len();
        state
            .heap
            .retain(|Reverse(e)| !(e.item.task_id == task_id && e.item.lane == lane));
        let removed = before - state.heap.len();
        if removed > 0 {
            debug!(task_id, lane = %lane, removed, "cancelled delayed items");
        }
        removed > 0
    }
}

impl Drop for DelayQueue {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        self.shared.wake.notify_all();
    }
}

fn timer_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let now = Instant::now();
        let next_due = state.heap.peek().map(|Reverse(e)| e.due);
        match next_due {
            None => shared.wake.wait(&mut state),
            Some(due) if due > now => {
                let _ = shared.wake.wait_until(&mut state, due);
            }
            Some(_) => {
                let mut ready = Vec::new();
                while let Some(Reverse(head)) = state.heap.peek() {
                    if head.due > now {
                        break;
                    }
                    if let Some(Reverse(entry)) = state.heap.pop() {
                        ready.push(entry.item);
                    }
                }
                let retry = MutexGuard::unlocked(&mut state, || deliver(shared, ready));
                for item in retry {
                    state.seq += 1;
                    let seq = state.seq;
                    state.heap.push(Reverse(Entry {
                        due: Instant::now() + FULL_LANE_BACKOFF,
                        seq,
                        item,
                    }));
                }
            }
        }
    }
    debug!("timer thread exiting");
}

/// Move items into lane channels; return those whose lane was full.
fn deliver(shared: &Shared, items: Vec<DispatchItem>) -> Vec<DispatchItem> {
    let mut retry = Vec::new();
    for item in items {
        match shared.try_deliver(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                warn!(task_id = item.task_id, lane = %item.lane, "lane full, delaying delivery");
                retry.push(item);
            }
            Err(TrySendError::Disconnected(item)) => {
                debug!(task_id = item.task_id, "lane closed, dropping item");
            }
        }
    }
    retry
}
