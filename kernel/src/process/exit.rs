//! Process exit and join: the release order `exit(code)` runs through, and
//! the joiner wait/wake protocol `join(id)` uses to avoid a lost wakeup.

extern crate alloc;

use alloc::sync::Arc;

use crate::sched::{self, ThreadState};

use super::pcb::{AppId, Application, JOIN_UNKNOWN_ID};
use super::table;

/// Releases every resource a process owns, in the fixed order: user-mode
/// pages, open nodes (flushed before drop), open directory streams,
/// non-main threads, then the main thread, and finally wakes any joiners
/// with `code` as their result. Removes the process from the table last,
/// so a `join()` racing this call either sees the app gone (known exited)
/// or finds it and registers as a joiner before this function drains the
/// list -- never both.
pub fn exit(app: &Arc<Application>, code: i32) {
    app.set_exit_code(code);

    let (files, _streams) = app.drain_open_handles();
    for file in files {
        let _ = file.flush();
    }

    app.take_address_space().teardown();

    sched::scheduler::lock();
    for thread in app.non_main_threads() {
        thread.set_state(ThreadState::Terminated);
        sched::scheduler::cancel_thread(thread.id);
    }
    if let Some(main) = app.main_thread() {
        main.set_state(ThreadState::Terminated);
        sched::scheduler::cancel_thread(main.id);
    }
    let joiners = app.drain_joiners();
    sched::scheduler::unlock();

    for joiner in joiners {
        joiner.set_waiting_on(None);
        sched::scheduler::schedule(joiner);
    }

    table::process_table().remove(app.id);
}

/// Blocks the calling thread until `target` exits, returning its exit
/// code, or `JOIN_UNKNOWN_ID` if `target` is not a live process.
///
/// The scheduler lock brackets "check whether it already exited, else
/// register as a joiner and switch out" so `exit`'s wake can never run
/// between the check and the registration.
pub fn join(caller: Arc<sched::Thread>, target: AppId) -> i64 {
    sched::scheduler::lock();
    let Some(app) = table::process_table().get(target) else {
        sched::scheduler::unlock();
        return JOIN_UNKNOWN_ID;
    };
    if let Some(code) = app.exit_code() {
        sched::scheduler::unlock();
        return code as i64;
    }
    app.add_joiner(caller.clone());
    caller.set_state(ThreadState::Waiting);
    sched::scheduler::unlock();
    sched::scheduler::execute_next_thread();

    // `app` is held across the switch, so this reads the code `exit`
    // stamped before it woke us -- no second table lookup, and so no race
    // against `exit`'s later removal of the app from the table.
    app.exit_code().unwrap_or(JOIN_UNKNOWN_ID as i32) as i64
}
