//! The scheduler proper: a single running thread, a ready queue, a delta
//! queue of sleepers, and a nestable lock that inhibits preemption. Runs on
//! one logical CPU -- there is no cross-CPU coordination anywhere here.

extern crate alloc;

use alloc::{collections::BTreeMap, sync::Arc};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex as SpinLock;

use crate::sync::GlobalState;

use super::mutex::{LockOutcome, Mutex};
use super::queue::{DeltaQueue, ReadyQueue};
use super::task::{ThreadId, ThreadState};
use super::thread::Thread;

/// Fixed quantum every thread is granted, in nanoseconds. The timer IRQ
/// fires every 10ms (see `crate::timer::init`), so five ticks per quantum.
pub const QUANTUM_NS: u64 = 50_000_000;

pub struct Scheduler {
    running: Option<Arc<Thread>>,
    ready: ReadyQueue,
    delta: DeltaQueue,
    lock_depth: AtomicU32,
    quantum_remaining_ns: AtomicU64,
    threads: BTreeMap<ThreadId, Arc<Thread>>,
    mutexes: BTreeMap<u64, Mutex>,
}

impl Scheduler {
    fn new() -> Self {
        Self {
            running: None,
            ready: ReadyQueue::new(),
            delta: DeltaQueue::new(),
            lock_depth: AtomicU32::new(0),
            quantum_remaining_ns: AtomicU64::new(QUANTUM_NS),
            threads: BTreeMap::new(),
            mutexes: BTreeMap::new(),
        }
    }

    fn locked(&self) -> bool {
        self.lock_depth.load(Ordering::Acquire) > 0
    }
}

static SCHEDULER: GlobalState<SpinLock<Scheduler>> = GlobalState::new();

pub fn init() {
    SCHEDULER
        .init(SpinLock::new(Scheduler::new()))
        .unwrap_or_else(|_| panic!("scheduler initialized twice"));
}

fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with(|s| f(&mut s.lock())).expect("scheduler not initialized")
}

/// Inhibits preemption. Nestable: preemption resumes only once every
/// `lock()` has a matching `unlock()`.
pub fn lock() {
    with(|s| {
        s.lock_depth.fetch_add(1, Ordering::AcqRel);
    });
}

pub fn unlock() {
    with(|s| {
        s.lock_depth.fetch_sub(1, Ordering::AcqRel);
    });
}

/// Registers a newly created thread and inserts it at the back of its
/// priority level's ready queue.
pub fn spawn(thread: Arc<Thread>) {
    with(|s| {
        s.threads.insert(thread.id, thread.clone());
        s.ready.schedule(thread);
    });
}

/// Inserts an already-known thread back into the ready queue (e.g. after a
/// mutex grant or a sleep wakes it).
pub fn schedule(thread: Arc<Thread>) {
    thread.set_state(ThreadState::Ready);
    with(|s| s.ready.schedule(thread));
}

pub fn get_running_thread() -> Option<Arc<Thread>> {
    with(|s| s.running.clone())
}

pub fn ready_len() -> usize {
    with(|s| s.ready.len())
}

/// Switches the running thread out (back to Ready, unless it's already
/// Waiting/Sleeping/Terminated) and the ready-queue head in, performing the
/// architecture context switch. Does nothing if the ready queue is empty.
pub fn execute_next_thread() {
    let (prev, next) = with(|s| {
        let next = match s.ready.pop_head() {
            Some(t) => t,
            None => return (None, None),
        };
        let prev = s.running.take();
        if let Some(p) = &prev {
            if p.state() == ThreadState::Running {
                p.set_state(ThreadState::Ready);
                s.ready.schedule(p.clone());
            }
        }
        next.set_state(ThreadState::Running);
        s.running = Some(next.clone());
        s.quantum_remaining_ns.store(QUANTUM_NS, Ordering::Release);
        (prev, Some(next))
    });

    let Some(next) = next else { return };
    let Some(prev) = prev else {
        // First thread ever scheduled: nothing to save, just load.
        let ctx = next.context.lock();
        match &*ctx {
            super::task::TaskContext::X86_64(c) => unsafe {
                crate::arch::x86_64::context::load_context(c as *const _);
            },
        }
        unreachable!("load_context does not return");
    };
    if Arc::ptr_eq(&prev, &next) {
        return;
    }

    // SAFETY: interrupts are disabled for the duration of a context switch
    // by the caller (the timer IRQ path, or a voluntary yield with
    // interrupts already off); both threads' contexts are valid, live
    // entries in the scheduler.
    unsafe {
        let mut from_ctx = prev.context.lock();
        let to_ctx = next.context.lock();
        match (&mut *from_ctx, &*to_ctx) {
            (super::task::TaskContext::X86_64(from), super::task::TaskContext::X86_64(to)) => {
                crate::arch::context::switch_context(from, to);
            }
        }
    }
}

/// Moves the current thread to `Sleeping` and links it into the delta
/// queue, then switches in the new ready-queue head.
pub fn sleep_until(wake_in_ns: u64) {
    with(|s| {
        if let Some(current) = s.running.clone() {
            current.set_state(ThreadState::Sleeping);
            s.delta.insert(current, wake_in_ns);
        }
    });
    execute_next_thread();
}

/// Acquires a kernel-internal mutex on behalf of the current thread. If the
/// mutex is held by another thread, blocks (transitions to `Waiting` and
/// switches in the next ready thread) until granted.
pub fn mutex_lock(mutex_id: u64) {
    loop {
        let outcome = with(|s| {
            let current = s.running.clone().expect("mutex_lock with no running thread");
            let m = s.mutexes.get_mut(&mutex_id).expect("unknown mutex id");
            m.lock(current)
        });
        match outcome {
            LockOutcome::Acquired => return,
            LockOutcome::Blocked => {
                with(|s| {
                    if let Some(t) = &s.running {
                        t.set_state(ThreadState::Waiting);
                    }
                });
                execute_next_thread();
            }
        }
    }
}

/// Releases a mutex held by the current thread, waking the new owner if
/// the wait queue was non-empty.
pub fn mutex_unlock(mutex_id: u64) {
    let woken = with(|s| {
        let m = s.mutexes.get_mut(&mutex_id).expect("unknown mutex id");
        m.unlock()
    });
    if let Some(t) = woken {
        schedule(t);
    }
}

pub fn create_mutex(name: &'static str) -> u64 {
    with(|s| {
        let m = Mutex::new(name);
        let id = m.id;
        s.mutexes.insert(id, m);
        id
    })
}

pub fn mutex_exists(mutex_id: u64) -> bool {
    with(|s| s.mutexes.contains_key(&mutex_id))
}

/// Releases a mutex held by the current thread if `mutex_id` both exists
/// and is owned by the caller; a non-owner's release is a no-op, matching
/// `unlock`'s non-owner-is-a-no-op policy.
pub fn mutex_unlock_if_owner(mutex_id: u64, caller: ThreadId) -> bool {
    let woken = with(|s| {
        let Some(m) = s.mutexes.get_mut(&mutex_id) else {
            return None;
        };
        if m.owner_id() != Some(caller) {
            return None;
        }
        Some(m.unlock())
    });
    match woken {
        Some(Some(t)) => {
            schedule(t);
            true
        }
        Some(None) => true,
        None => false,
    }
}

/// Destroys a mutex, provided it has no owner and no waiters. Used by the
/// `mutex_release` syscall; releasing a mutex still in use would strand
/// its waiters forever, so the caller is expected to `unlock` first.
pub fn destroy_mutex(mutex_id: u64) -> bool {
    with(|s| match s.mutexes.get(&mutex_id) {
        Some(m) if m.owner_id().is_none() => {
            s.mutexes.remove(&mutex_id);
            true
        }
        _ => false,
    })
}

/// Cancels every thread of an exiting process: removed from the ready
/// queue, the delta queue, and every mutex wait queue it might be blocked
/// in, then dropped from the thread registry.
pub fn cancel_thread(id: ThreadId) {
    with(|s| {
        s.ready.remove(id);
        s.delta.remove(id);
        for m in s.mutexes.values_mut() {
            m.remove_waiting_thread(id);
        }
        s.threads.remove(&id);
    });
}

/// Called from the timer IRQ (every 10ms). Ages the delta queue, waking
/// expired sleepers, then decrements the running thread's quantum and
/// requests a reschedule if it has expired and the scheduler is unlocked.
pub fn tick(elapsed_ns: u64) {
    let (woken, should_preempt) = with(|s| {
        let woken = s.delta.tick(elapsed_ns);
        for t in &woken {
            t.set_state(ThreadState::Ready);
        }

        let remaining = s.quantum_remaining_ns.load(Ordering::Acquire);
        let remaining = remaining.saturating_sub(elapsed_ns);
        s.quantum_remaining_ns.store(remaining, Ordering::Release);
        let preempt = remaining == 0 && !s.locked() && s.running.is_some();
        (woken, preempt)
    });

    for t in woken {
        schedule(t);
    }
    if should_preempt {
        execute_next_thread();
    }
}
