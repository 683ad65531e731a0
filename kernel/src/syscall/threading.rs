//! 200-series: Threading. `mutex_create`, `mutex_lock`, `mutex_unlock`,
//! `mutex_release`, `get_thread_id`, `set_thread_control_block`.
//!
//! There is no `thread_create` -- this kernel only ever runs one thread per
//! process (see `process::creation`), so the threading surface is limited
//! to coordinating with other processes' threads via mutexes, plus each
//! thread's own id and control-block pointer.

extern crate alloc;

use alloc::sync::Arc;

use crate::sched::{self, Thread};

use super::status::Status;

/// Anonymous mutexes created through this syscall all share one
/// diagnostic name; userspace has no way to supply a `'static` string for
/// `name`, and the name is advisory only (surfaced through logging, never
/// through the ABI).
const USER_MUTEX_NAME: &str = "user";

pub fn mutex_create() -> Status {
    Status::Value(sched::scheduler::create_mutex(USER_MUTEX_NAME) as i64)
}

pub fn mutex_lock(mutex_id: u64) -> Status {
    if !sched::scheduler::mutex_exists(mutex_id) {
        return Status::UnknownId;
    }
    sched::scheduler::mutex_lock(mutex_id);
    Status::Okay
}

pub fn mutex_unlock(mutex_id: u64, caller: &Arc<Thread>) -> Status {
    if !sched::scheduler::mutex_exists(mutex_id) {
        return Status::UnknownId;
    }
    sched::scheduler::mutex_unlock_if_owner(mutex_id, caller.id);
    Status::Okay
}

pub fn mutex_release(mutex_id: u64) -> Status {
    if !sched::scheduler::mutex_exists(mutex_id) {
        return Status::UnknownId;
    }
    if sched::scheduler::destroy_mutex(mutex_id) {
        Status::Okay
    } else {
        Status::NodeInUse
    }
}

pub fn get_thread_id(caller: &Arc<Thread>) -> Status {
    Status::Value(caller.id.0 as i64)
}

pub fn set_thread_control_block(caller: &Arc<Thread>, ptr: u64) -> Status {
    caller.set_control_block(ptr);
    Status::Okay
}
