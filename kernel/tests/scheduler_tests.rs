//! Scheduler data-structure tests: the ready queue's priority ordering, the
//! delta queue's relative-wake-time invariant, and the kernel mutex's
//! ownership-transfer contract. Exercised directly against `sched`'s pure
//! data structures rather than the global scheduler singleton, so these
//! suites don't depend on boot order or on triggering a real context switch.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(runeos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::string::String;

use runeos_kernel::sched::mutex::{LockOutcome, Mutex};
use runeos_kernel::sched::queue::{DeltaQueue, ReadyQueue};
use runeos_kernel::sched::task::TaskContext;
use runeos_kernel::{kernel_assert, kernel_assert_eq, Priority, Thread, ThreadState};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Scheduler Tests");
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    runeos_kernel::test_panic_handler(info)
}

/// A thread record suitable for queue/mutex tests: never actually switched
/// to, so the context just needs to be a valid, distinct value.
fn test_thread(name: &str, priority: Priority) -> alloc::sync::Arc<Thread> {
    Thread::new(
        String::from(name),
        priority,
        0,
        TaskContext::new_kernel(0, 0x2000),
        0,
        0,
    )
}

// ===== Ready queue: priority order, FIFO tie-break =====

#[test_case]
fn test_ready_queue_priority_order() {
    let mut q = ReadyQueue::new();
    let low = test_thread("low", Priority::Low);
    let high = test_thread("high", Priority::High);
    let normal = test_thread("normal", Priority::Normal);

    q.schedule(low.clone());
    q.schedule(high.clone());
    q.schedule(normal.clone());

    kernel_assert_eq!(q.pop_head().unwrap().id, high.id);
    kernel_assert_eq!(q.pop_head().unwrap().id, normal.id);
    kernel_assert_eq!(q.pop_head().unwrap().id, low.id);
    kernel_assert!(q.is_empty());
}

#[test_case]
fn test_ready_queue_fifo_within_priority() {
    let mut q = ReadyQueue::new();
    let a = test_thread("a", Priority::Normal);
    let b = test_thread("b", Priority::Normal);
    let c = test_thread("c", Priority::Normal);

    q.schedule(a.clone());
    q.schedule(b.clone());
    q.schedule(c.clone());

    kernel_assert_eq!(q.pop_head().unwrap().id, a.id);
    kernel_assert_eq!(q.pop_head().unwrap().id, b.id);
    kernel_assert_eq!(q.pop_head().unwrap().id, c.id);
}

#[test_case]
fn test_ready_queue_remove_from_any_level() {
    let mut q = ReadyQueue::new();
    let a = test_thread("a", Priority::Low);
    let b = test_thread("b", Priority::High);
    q.schedule(a.clone());
    q.schedule(b.clone());

    kernel_assert!(q.remove(a.id));
    kernel_assert!(!q.remove(a.id), "removing twice must fail the second time");
    kernel_assert_eq!(q.len(), 1);
    kernel_assert_eq!(q.pop_head().unwrap().id, b.id);
}

// ===== Delta queue: relative wake time invariant, wake order =====

#[test_case]
fn test_delta_queue_wake_order() {
    // Scenario: sleep 10ms, 20ms, and 5ms from three threads -- wake order
    // is 5ms, 10ms, 20ms regardless of insertion order.
    let mut dq = DeltaQueue::new();
    let t10 = test_thread("t10", Priority::Normal);
    let t20 = test_thread("t20", Priority::Normal);
    let t5 = test_thread("t5", Priority::Normal);

    dq.insert(t10.clone(), 10_000_000);
    dq.insert(t20.clone(), 20_000_000);
    dq.insert(t5.clone(), 5_000_000);

    let woken_at_5 = dq.tick(5_000_000);
    kernel_assert_eq!(woken_at_5.len(), 1);
    kernel_assert_eq!(woken_at_5[0].id, t5.id);

    let woken_at_10 = dq.tick(5_000_000);
    kernel_assert_eq!(woken_at_10.len(), 1);
    kernel_assert_eq!(woken_at_10[0].id, t10.id);

    let woken_at_20 = dq.tick(10_000_000);
    kernel_assert_eq!(woken_at_20.len(), 1);
    kernel_assert_eq!(woken_at_20[0].id, t20.id);

    kernel_assert!(dq.is_empty());
}

#[test_case]
fn test_delta_queue_simultaneous_wake() {
    let mut dq = DeltaQueue::new();
    let a = test_thread("a", Priority::Normal);
    let b = test_thread("b", Priority::Normal);
    dq.insert(a.clone(), 1_000_000);
    dq.insert(b.clone(), 1_000_000);

    let woken = dq.tick(1_000_000);
    kernel_assert_eq!(woken.len(), 2);
}

#[test_case]
fn test_delta_queue_remove_redistributes_remaining_delay() {
    // Removing a middle sleeper must not change when the ones after it
    // wake relative to "now".
    let mut dq = DeltaQueue::new();
    let a = test_thread("a", Priority::Normal);
    let b = test_thread("b", Priority::Normal);
    let c = test_thread("c", Priority::Normal);
    dq.insert(a.clone(), 10_000_000);
    dq.insert(b.clone(), 20_000_000);
    dq.insert(c.clone(), 30_000_000);

    kernel_assert!(dq.remove(b.id));

    let woken_at_10 = dq.tick(10_000_000);
    kernel_assert_eq!(woken_at_10.len(), 1);
    kernel_assert_eq!(woken_at_10[0].id, a.id);

    let woken_at_30 = dq.tick(20_000_000);
    kernel_assert_eq!(woken_at_30.len(), 1);
    kernel_assert_eq!(woken_at_30[0].id, c.id);
}

// ===== Mutex: ownership transfer, recursive lock, non-owner unlock =====

#[test_case]
fn test_mutex_contention_transfers_ownership() {
    // Scenario: A locks, B calls lock (blocks), A unlocks, B becomes owner.
    let mut m = Mutex::new("test-mutex");
    let a = test_thread("A", Priority::Normal);
    let b = test_thread("B", Priority::Normal);

    match m.lock(a.clone()) {
        LockOutcome::Acquired => {}
        LockOutcome::Blocked => panic!("first lock must be granted immediately"),
    }
    kernel_assert_eq!(m.owner_id(), Some(a.id));

    match m.lock(b.clone()) {
        LockOutcome::Blocked => {}
        LockOutcome::Acquired => panic!("second locker must block"),
    }
    kernel_assert_eq!(b.waiting_on(), Some(m.id));

    let woken = m.unlock();
    kernel_assert_eq!(woken.map(|t| t.id), Some(b.id));
    kernel_assert_eq!(m.owner_id(), Some(b.id));
    kernel_assert_eq!(b.waiting_on(), None);
}

#[test_case]
fn test_mutex_recursive_lock_is_noop() {
    let mut m = Mutex::new("recursive");
    let a = test_thread("A", Priority::Normal);
    m.lock(a.clone());
    match m.lock(a.clone()) {
        LockOutcome::Acquired => {}
        LockOutcome::Blocked => panic!("owner re-locking must not block"),
    }
    kernel_assert_eq!(m.owner_id(), Some(a.id));
}

#[test_case]
fn test_mutex_unlock_with_empty_wait_queue_clears_owner() {
    let mut m = Mutex::new("solo");
    let a = test_thread("A", Priority::Normal);
    m.lock(a.clone());
    kernel_assert!(m.unlock().is_none());
    kernel_assert_eq!(m.owner_id(), None);
}

#[test_case]
fn test_mutex_remove_waiting_thread() {
    let mut m = Mutex::new("dying-waiter");
    let a = test_thread("A", Priority::Normal);
    let b = test_thread("B", Priority::Normal);
    m.lock(a.clone());
    m.lock(b.clone());

    kernel_assert!(m.remove_waiting_thread(b.id));
    // b is gone from the wait queue; unlocking now must clear the owner
    // rather than hand it to a thread that no longer wants it.
    kernel_assert!(m.unlock().is_none());
}

// ===== Thread state bookkeeping =====

#[test_case]
fn test_thread_starts_ready() {
    let t = test_thread("fresh", Priority::Normal);
    kernel_assert_eq!(t.state(), ThreadState::Ready);
}

#[test_case]
fn test_thread_state_round_trips() {
    let t = test_thread("toggle", Priority::Normal);
    t.set_state(ThreadState::Running);
    kernel_assert_eq!(t.state(), ThreadState::Running);
    t.set_state(ThreadState::Sleeping);
    kernel_assert_eq!(t.state(), ThreadState::Sleeping);
}
