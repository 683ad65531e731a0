//! The scheduler's view of a thread: the record the ready queue, delta
//! queue, and mutex wait queues all operate on. The process subsystem wraps
//! this with the application-level state (open files, address space) that
//! the scheduler itself doesn't need to know about.

extern crate alloc;

use alloc::{string::String, sync::Arc};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex as SpinLock;

use super::task::{Priority, TaskContext, ThreadId, ThreadState};

/// Sentinel stored in `mutex_id_held_on`/`wake_time` meaning "none".
const NONE_U64: u64 = 0;

pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub priority: Priority,
    pub owning_app_id: u64,
    state: SpinLock<ThreadState>,
    pub context: SpinLock<TaskContext>,
    pub kernel_stack: usize,
    pub user_stack: usize,
    /// Mutex currently blocking this thread, if any (0 = none).
    mutex_id_held_on: AtomicU64,
    /// Absolute wake time in nanoseconds while `Sleeping`.
    wake_time: AtomicU64,
    /// Userspace-supplied per-thread control-block pointer, set by the
    /// `set_thread_control_block` syscall and otherwise opaque to the
    /// kernel (a thread-local storage base, typically).
    control_block: AtomicU64,
}

impl Thread {
    pub fn new(
        name: String,
        priority: Priority,
        owning_app_id: u64,
        context: TaskContext,
        kernel_stack: usize,
        user_stack: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: super::task::alloc_tid(),
            name,
            priority,
            owning_app_id,
            state: SpinLock::new(ThreadState::Ready),
            context: SpinLock::new(context),
            kernel_stack,
            user_stack,
            mutex_id_held_on: AtomicU64::new(NONE_U64),
            wake_time: AtomicU64::new(NONE_U64),
            control_block: AtomicU64::new(NONE_U64),
        })
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ThreadState) {
        *self.state.lock() = state;
    }

    pub fn waiting_on(&self) -> Option<u64> {
        match self.mutex_id_held_on.load(Ordering::Acquire) {
            NONE_U64 => None,
            id => Some(id),
        }
    }

    pub fn set_waiting_on(&self, mutex_id: Option<u64>) {
        self.mutex_id_held_on
            .store(mutex_id.unwrap_or(NONE_U64), Ordering::Release);
    }

    pub fn wake_time(&self) -> Option<u64> {
        match self.wake_time.load(Ordering::Acquire) {
            NONE_U64 => None,
            t => Some(t),
        }
    }

    pub fn set_wake_time(&self, wake_ns: Option<u64>) {
        self.wake_time
            .store(wake_ns.unwrap_or(NONE_U64), Ordering::Release);
    }

    pub fn control_block(&self) -> u64 {
        self.control_block.load(Ordering::Acquire)
    }

    pub fn set_control_block(&self, ptr: u64) {
        self.control_block.store(ptr, Ordering::Release);
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .finish()
    }
}
