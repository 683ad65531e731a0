//! Thread identity, priority, and architecture-context plumbing shared by
//! the ready queue, delta queue, and scheduler.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::context::ThreadContext as _;

/// Thread identifier, unique for the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next unique thread ID.
pub fn alloc_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

/// Thread state. Exactly one thread is `Running` at a time on this
/// single-CPU kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Waiting,
    Sleeping,
    Terminated,
}

/// Scheduling priority. A small ordered set; lower numeric value runs
/// first. Ties within a level are broken FIFO by the ready queue.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
    Idle = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Number of distinct priority levels, used to size the ready queue.
pub const PRIORITY_LEVELS: usize = 4;

/// Architecture-specific saved register state for a thread not currently
/// running. Only x86_64 is implemented.
#[derive(Debug)]
pub enum TaskContext {
    X86_64(crate::arch::x86_64::context::X86_64Context),
}

impl TaskContext {
    pub fn new_kernel(entry_point: usize, stack_pointer: usize) -> Self {
        TaskContext::X86_64(crate::arch::x86_64::context::X86_64Context::new(
            entry_point,
            stack_pointer,
        ))
    }

    pub fn new_user(entry_point: usize, stack_pointer: usize) -> Self {
        TaskContext::X86_64(crate::arch::x86_64::context::X86_64Context::new_user(
            entry_point,
            stack_pointer,
        ))
    }

    pub fn set_return_value(&mut self, value: usize) {
        match self {
            TaskContext::X86_64(c) => c.set_return_value(value),
        }
    }

    pub fn set_kernel_stack(&mut self, sp: usize) {
        match self {
            TaskContext::X86_64(c) => c.set_kernel_stack(sp),
        }
    }

    /// Points this thread's saved page-table root at `root` (a physical
    /// address). Set once at process creation; the context switch loads it
    /// on every subsequent switch into the thread.
    pub fn set_page_table_root(&mut self, root: u64) {
        match self {
            TaskContext::X86_64(c) => c.cr3 = root,
        }
    }
}
