//! Kernel-internal mutex: `{id, name, owner?, wait_queue}`. Ownership
//! transfers to the head of the wait queue on unlock; recursive locking by
//! the current owner is a no-op.

extern crate alloc;

use alloc::{collections::VecDeque, sync::Arc};
use core::sync::atomic::{AtomicU64, Ordering};

use super::task::ThreadId;
use super::thread::Thread;

static NEXT_MUTEX_ID: AtomicU64 = AtomicU64::new(1);

pub struct Mutex {
    pub id: u64,
    pub name: &'static str,
    owner: Option<ThreadId>,
    wait_queue: VecDeque<Arc<Thread>>,
}

/// Outcome of [`Mutex::lock`].
pub enum LockOutcome {
    /// Ownership granted immediately (unowned, or the caller already owns
    /// it and this is a recursive, no-op re-lock).
    Acquired,
    /// The caller was appended to the wait queue and must block.
    Blocked,
}

impl Mutex {
    pub fn new(name: &'static str) -> Self {
        Self {
            id: NEXT_MUTEX_ID.fetch_add(1, Ordering::Relaxed),
            name,
            owner: None,
            wait_queue: VecDeque::new(),
        }
    }

    pub fn lock(&mut self, current: Arc<Thread>) -> LockOutcome {
        match self.owner {
            None => {
                self.owner = Some(current.id);
                LockOutcome::Acquired
            }
            Some(owner) if owner == current.id => LockOutcome::Acquired,
            Some(_) => {
                current.set_waiting_on(Some(self.id));
                self.wait_queue.push_back(current);
                LockOutcome::Blocked
            }
        }
    }

    /// Releases the mutex, transferring ownership to the head of the wait
    /// queue. Returns the thread that now owns it and should transition to
    /// `Ready`, if any. Only the current owner may call this; the caller is
    /// responsible for checking `owner_id() == Some(current)` first.
    pub fn unlock(&mut self) -> Option<Arc<Thread>> {
        match self.wait_queue.pop_front() {
            Some(next) => {
                next.set_waiting_on(None);
                self.owner = Some(next.id);
                Some(next)
            }
            None => {
                self.owner = None;
                None
            }
        }
    }

    pub fn owner_id(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Drops a thread from the wait queue without granting it ownership.
    /// Called from the process-exit path so dying threads release their
    /// wait-queue slots.
    pub fn remove_waiting_thread(&mut self, id: ThreadId) -> bool {
        if let Some(pos) = self.wait_queue.iter().position(|t| t.id == id) {
            self.wait_queue.remove(pos);
            true
        } else {
            false
        }
    }
}
