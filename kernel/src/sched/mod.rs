//! Preemptive single-CPU scheduler: ready queue, delta queue of sleepers,
//! kernel-internal mutexes, and a nestable lock that inhibits preemption.
//!
//! [`task`] defines thread identity/priority/context, [`thread`] is the
//! scheduler's thread record, [`queue`] holds the ready and delta queues,
//! [`mutex`] is the kernel-internal mutex used for in-kernel synchronization,
//! and [`scheduler`] ties them together behind a single global instance.

pub mod mutex;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod thread;

pub use mutex::Mutex;
pub use queue::{DeltaQueue, ReadyQueue};
pub use task::{Priority, TaskContext, ThreadId, ThreadState};
pub use thread::Thread;

/// Brings up the scheduler singleton. Called once from the boot sequence,
/// after `irq::init()` and before any thread is spawned.
pub fn init() {
    scheduler::init();
}

/// Drives the first context switch and never returns: once a thread is
/// running, further rescheduling happens from the timer IRQ
/// (`timer_tick`) and from voluntary blocking calls (`scheduler::sleep_until`,
/// `scheduler::mutex_lock`), not from this loop.
pub fn run() -> ! {
    loop {
        if scheduler::ready_len() > 0 {
            scheduler::execute_next_thread();
        } else {
            crate::arch::idle();
        }
    }
}

/// Called from the PIT's IRQ0 handler every 10ms (see
/// `crate::arch::x86_64::timer::tick`). Ages the delta queue and accounts
/// the running thread's quantum, preempting it if exhausted.
pub fn timer_tick() {
    scheduler::tick(10_000_000);
}
