//! Application (process) lifecycle: the process record, loading an
//! executable into a fresh address space, its std streams, working
//! directory, per-process heap, and exit/join.

extern crate alloc;

use alloc::sync::Arc;

pub mod creation;
pub mod cwd;
pub mod exit;
pub mod memory;
pub mod pcb;
pub mod stdio;
pub mod table;

pub use pcb::{AppId, Application, StdTarget, JOIN_UNKNOWN_ID};

/// Brings up the process subsystem. There is nothing to initialize ahead
/// of the first `start_os` call -- the process table is a static, and
/// `creation`/`exit` only touch subsystems (`mm`, `fs`, `sched`) already up
/// by the time this runs in the boot sequence.
pub fn init() {}

/// Loads and schedules the init process.
pub fn start_os(path: &str, wd: &str) {
    if let Err(e) = creation::start_os(path, wd) {
        panic!("failed to start init process {path}: {e}");
    }
}

/// The application owning the currently running thread, if any (there is
/// none before the first process is scheduled).
pub fn current_app() -> Option<Arc<Application>> {
    let thread = crate::sched::scheduler::get_running_thread()?;
    table::process_table().get(pcb::AppId(thread.owning_app_id))
}
