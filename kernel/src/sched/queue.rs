//! Ready queue and delta queue: the two structures the scheduler consults
//! on every tick. The ready queue is a priority-ordered multiset with FIFO
//! tie-break; the delta queue is a list of sleepers ordered by *relative*
//! wake time so a single decrement of the head ages every sleeper at once.

extern crate alloc;

use alloc::{collections::VecDeque, sync::Arc};

use super::task::{Priority, ThreadId, PRIORITY_LEVELS};
use super::thread::Thread;

/// Priority-ordered multiset of `Ready` threads. Each priority level is its
/// own FIFO; `peek`/`pop_head` always look at the lowest populated level.
pub struct ReadyQueue {
    levels: [VecDeque<Arc<Thread>>; PRIORITY_LEVELS],
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            levels: core::array::from_fn(|_| VecDeque::new()),
        }
    }

    pub fn schedule(&mut self, thread: Arc<Thread>) {
        let level = thread.priority as usize;
        self.levels[level].push_back(thread);
    }

    pub fn peek(&self) -> Option<Arc<Thread>> {
        self.levels.iter().find_map(|l| l.front().cloned())
    }

    pub fn pop_head(&mut self) -> Option<Arc<Thread>> {
        self.levels.iter_mut().find_map(|l| l.pop_front())
    }

    /// Removes a specific thread regardless of which level it is queued at.
    /// Used by process exit to drop every thread of the dying process.
    pub fn remove(&mut self, id: ThreadId) -> bool {
        for level in self.levels.iter_mut() {
            if let Some(pos) = level.iter().position(|t| t.id == id) {
                level.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }

    /// Highest populated priority level, for diagnostics / tests.
    pub fn highest_populated(&self) -> Option<Priority> {
        self.levels.iter().position(|l| !l.is_empty()).map(|i| {
            [Priority::High, Priority::Normal, Priority::Low, Priority::Idle][i]
        })
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct DeltaNode {
    thread: Arc<Thread>,
    /// Delay, in nanoseconds, beyond the *previous* node's wake time.
    relative_wake_time: u64,
}

/// Sleepers ordered by relative wake time. The sum of the first `k` nodes'
/// `relative_wake_time` equals the absolute wake time of the `k`-th sleeper
/// minus "now" at the time of the last [`DeltaQueue::tick`].
pub struct DeltaQueue {
    nodes: VecDeque<DeltaNode>,
}

impl DeltaQueue {
    pub fn new() -> Self {
        Self {
            nodes: VecDeque::new(),
        }
    }

    /// Inserts `thread`, due to wake in `delay_ns` from now, preserving the
    /// relative-offset invariant.
    pub fn insert(&mut self, thread: Arc<Thread>, delay_ns: u64) {
        let mut remaining = delay_ns;
        let mut idx = 0;
        for node in self.nodes.iter() {
            if remaining < node.relative_wake_time {
                break;
            }
            remaining -= node.relative_wake_time;
            idx += 1;
        }
        if let Some(next) = self.nodes.get_mut(idx) {
            next.relative_wake_time -= remaining;
        }
        self.nodes.insert(
            idx,
            DeltaNode {
                thread,
                relative_wake_time: remaining,
            },
        );
    }

    /// Ages every sleeper by `elapsed_ns`, returning every thread whose wake
    /// time has now arrived (in wake order).
    pub fn tick(&mut self, elapsed_ns: u64) -> alloc::vec::Vec<Arc<Thread>> {
        let mut woken = alloc::vec::Vec::new();
        let mut remaining = elapsed_ns;
        while let Some(front) = self.nodes.front_mut() {
            if front.relative_wake_time > remaining {
                front.relative_wake_time -= remaining;
                break;
            }
            remaining -= front.relative_wake_time;
            let node = self.nodes.pop_front().unwrap();
            woken.push(node.thread);
        }
        woken
    }

    pub fn remove(&mut self, id: ThreadId) -> bool {
        if let Some(pos) = self.nodes.iter().position(|n| n.thread.id == id) {
            let removed = self.nodes.remove(pos).unwrap();
            if let Some(next) = self.nodes.get_mut(pos) {
                next.relative_wake_time += removed.relative_wake_time;
            }
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for DeltaQueue {
    fn default() -> Self {
        Self::new()
    }
}
