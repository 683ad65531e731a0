//! 400-series: App. Std-stream I/O, spawning and waiting on child
//! processes, and working-directory queries -- everything a userspace
//! program needs to act like a process rather than a bare thread.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::process::pcb::AppId;
use crate::process::{creation, cwd, exit, stdio, Application};
use crate::sched::{self, Thread};

use super::status::Status;
use super::validation::write_user_bytes;

pub fn read_stdin(app: &Application, buf: &mut [u8]) -> Status {
    match stdio::read_target(app, &app.std_in, buf) {
        Ok(n) => Status::Value(n as i64),
        Err(e) => e.into(),
    }
}

pub fn write_stdout(app: &Application, data: &[u8]) -> Status {
    match stdio::write_target(app, &app.std_out, data) {
        Ok(n) => Status::Value(n as i64),
        Err(e) => e.into(),
    }
}

pub fn write_stderr(app: &Application, data: &[u8]) -> Status {
    match stdio::write_target(app, &app.std_err, data) {
        Ok(n) => Status::Value(n as i64),
        Err(e) => e.into(),
    }
}

/// Splits a single space-separated blob into the argv vector
/// `start_new_app` expects. Userspace passes argv as one string rather than
/// an array of pointers, keeping `app_start` within the ABI's six
/// machine-word argument limit.
fn split_argv(blob: &str) -> Vec<&str> {
    blob.split(' ').filter(|s| !s.is_empty()).collect()
}

#[allow(clippy::too_many_arguments)]
pub fn app_start(
    parent: &Application,
    path: &str,
    argv_blob: &str,
    wd: &str,
    stdin: &str,
    stdout: &str,
    stderr: &str,
) -> Status {
    let Some(stdin_cfg) = stdio::parse_std_target(stdin) else {
        return Status::BadArg;
    };
    let Some(stdout_cfg) = stdio::parse_std_target(stdout) else {
        return Status::BadArg;
    };
    let Some(stderr_cfg) = stdio::parse_std_target(stderr) else {
        return Status::BadArg;
    };
    let argv = split_argv(argv_blob);
    let resolved_wd = cwd::resolve_path(wd, &parent.working_directory());
    match creation::start_new_app(parent, path, &argv, &resolved_wd, stdin_cfg, stdout_cfg, stderr_cfg) {
        Ok(id) => Status::Value(id.0 as i64),
        Err(e) => e.into(),
    }
}

/// Tears the calling process down and switches away. Never returns to its
/// caller -- the thread that called this is `Terminated` by the time
/// `execute_next_thread` runs, so it never re-enters the ready queue.
pub fn app_exit(app: &Arc<Application>, code: i32) -> ! {
    exit::exit(app, code);
    sched::scheduler::execute_next_thread();
    unreachable!("a terminated thread's context is never switched back into")
}

pub fn app_join(caller: Arc<Thread>, target: u64) -> Status {
    Status::Value(exit::join(caller, AppId(target)))
}

pub fn get_directory(app: &Application, buf_ptr: usize, buf_len: usize) -> Status {
    let dir = cwd::get_directory(app);
    let bytes = dir.as_bytes();
    let n = core::cmp::min(bytes.len(), buf_len);
    match write_user_bytes(buf_ptr, &bytes[..n]) {
        Ok(()) => Status::Value(n as i64),
        Err(s) => s,
    }
}

pub fn change_directory(app: &Application, path: &str) -> Status {
    match cwd::change_directory(app, path) {
        Ok(()) => Status::Okay,
        Err(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_argv_ignores_repeated_spaces() {
        assert_eq!(split_argv("Crucible  --quiet"), alloc::vec!["Crucible", "--quiet"]);
    }

    #[test]
    fn split_argv_of_empty_blob_is_empty() {
        let argv: Vec<&str> = split_argv("");
        assert!(argv.is_empty());
    }
}
