//! Parses the std-stream target grammar syscalls use to describe a new
//! process's stdin/stdout/stderr (`void`, `inherit`, `file:<path>`,
//! `pipe:<id>`), resolves `inherit` at process-creation time, and performs
//! the actual byte transfer a resolved target names.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::pcb::{Application, StdTarget};
use crate::error::{AppError, FsError};
use crate::fs::{self, OpenFile, OpenMode, OpenedNode};

/// Parses one std-stream target string. `None` on a malformed grammar
/// (unknown keyword, missing `pipe:` id, non-numeric id).
pub fn parse_std_target(s: &str) -> Option<StdTarget> {
    if s == "void" {
        return Some(StdTarget::Void);
    }
    if s == "inherit" {
        return Some(StdTarget::Inherit);
    }
    if let Some(path) = s.strip_prefix("file:") {
        if path.is_empty() {
            return None;
        }
        return Some(StdTarget::File(path.to_string()));
    }
    if let Some(id) = s.strip_prefix("pipe:") {
        return id.parse::<u32>().ok().map(StdTarget::Pipe);
    }
    None
}

/// Resolves a syscall-supplied target against the creating process's own
/// (already-resolved) stream of the same kind. `Inherit` with no parent
/// (the init process) resolves to `Console`, the serial/E9 terminal.
pub fn resolve(target: StdTarget, parent_same_stream: Option<&StdTarget>) -> StdTarget {
    match target {
        StdTarget::Inherit => match parent_same_stream {
            Some(t) => t.clone(),
            None => StdTarget::Console,
        },
        other => other,
    }
}

/// A small in-memory byte pipe, identified by the numeric id in a
/// `pipe:<id>` target. `write` always succeeds (append); `read` is
/// non-blocking and returns 0 if the pipe is currently empty -- this
/// kernel has no blocking I/O primitive besides a mutex or a sleep, and a
/// pipe reader is expected to retry.
struct Pipe {
    buffer: Mutex<Vec<u8>>,
}

struct PipeTable {
    pipes: Mutex<BTreeMap<u32, Arc<Pipe>>>,
    next_id: AtomicU32,
}

static PIPES: PipeTable = PipeTable {
    pipes: Mutex::new(BTreeMap::new()),
    next_id: AtomicU32::new(1),
};

/// Allocates a fresh pipe id for a `pipe:<id>` target to name.
pub fn create_pipe() -> u32 {
    let id = PIPES.next_id.fetch_add(1, Ordering::Relaxed);
    PIPES.pipes.lock().insert(
        id,
        Arc::new(Pipe {
            buffer: Mutex::new(Vec::new()),
        }),
    );
    id
}

fn pipe(id: u32) -> Arc<Pipe> {
    PIPES
        .pipes
        .lock()
        .entry(id)
        .or_insert_with(|| {
            Arc::new(Pipe {
                buffer: Mutex::new(Vec::new()),
            })
        })
        .clone()
}

fn write_pipe(id: u32, buf: &[u8]) -> usize {
    pipe(id).buffer.lock().extend_from_slice(buf);
    buf.len()
}

fn read_pipe(id: u32, buf: &mut [u8]) -> usize {
    let p = pipe(id);
    let mut backing = p.buffer.lock();
    let n = core::cmp::min(buf.len(), backing.len());
    buf[..n].copy_from_slice(&backing[..n]);
    backing.drain(..n);
    n
}

fn console_write(buf: &[u8]) -> usize {
    let mut serial = crate::arch::x86_64::serial::SERIAL1.lock();
    for &b in buf {
        serial.send(b);
    }
    buf.len()
}

/// Polls the PS/2 keyboard for up to `buf.len()` bytes already queued.
/// Non-blocking: returns 0 immediately if no key has been pressed since
/// the last read, matching this kernel's policy of no native blocking I/O
/// outside mutexes and sleeps.
fn console_read(buf: &mut [u8]) -> usize {
    let mut n = 0;
    while n < buf.len() {
        match crate::drivers::keyboard::read_key() {
            Some(byte) => {
                buf[n] = byte;
                n += 1;
            }
            None => break,
        }
    }
    n
}

fn open_append(app: &Application, path: &str) -> Result<Arc<OpenFile>, AppError> {
    let resolved = super::cwd::resolve_path(path, &app.working_directory());
    match fs::vfs().open(&resolved, OpenMode::Write) {
        Ok(OpenedNode::File(f)) => {
            f.seek(f.size() as u64);
            Ok(f)
        }
        Ok(OpenedNode::Directory(_)) => Err(AppError::BadArg),
        Err(FsError::NodeNotFound) => {
            fs::vfs().create(&resolved, false).map_err(|_| AppError::NodeNotFound)?;
            match fs::vfs().open(&resolved, OpenMode::Write) {
                Ok(OpenedNode::File(f)) => Ok(f),
                _ => Err(AppError::NodeNotFound),
            }
        }
        Err(_) => Err(AppError::BadArg),
    }
}

/// Writes `buf` to `app`'s resolved `target`, per the grammar's per-kind
/// semantics (`Void` discards, `File` appends, `Pipe` buffers, `Console`
/// goes to the serial terminal). Used by the 400-series `write_stdout`/
/// `write_stderr` handlers.
pub fn write_target(app: &Application, target: &StdTarget, buf: &[u8]) -> Result<usize, AppError> {
    match target {
        StdTarget::Void => Ok(buf.len()),
        StdTarget::Console => Ok(console_write(buf)),
        StdTarget::Pipe(id) => Ok(write_pipe(*id, buf)),
        StdTarget::File(path) => {
            let file = open_append(app, path)?;
            file.write(buf).map_err(|_| AppError::BadArg)
        }
        StdTarget::Inherit => unreachable!("Inherit is resolved before an Application is created"),
    }
}

/// Reads up to `buf.len()` bytes from `app`'s resolved `target`. Used by
/// the 400-series `read_stdin` handler.
pub fn read_target(app: &Application, target: &StdTarget, buf: &mut [u8]) -> Result<usize, AppError> {
    match target {
        StdTarget::Void => Ok(0),
        StdTarget::Console => Ok(console_read(buf)),
        StdTarget::Pipe(id) => Ok(read_pipe(*id, buf)),
        StdTarget::File(path) => {
            let resolved = super::cwd::resolve_path(path, &app.working_directory());
            match fs::vfs().open(&resolved, OpenMode::Read) {
                Ok(OpenedNode::File(f)) => f.read(buf).map_err(|_| AppError::BadArg),
                _ => Err(AppError::NodeNotFound),
            }
        }
        StdTarget::Inherit => unreachable!("Inherit is resolved before an Application is created"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_void_and_inherit() {
        assert_eq!(parse_std_target("void"), Some(StdTarget::Void));
        assert_eq!(parse_std_target("inherit"), Some(StdTarget::Inherit));
    }

    #[test]
    fn parses_file_target() {
        assert_eq!(
            parse_std_target("file:/Data/out.log"),
            Some(StdTarget::File("/Data/out.log".to_string()))
        );
    }

    #[test]
    fn parses_pipe_target() {
        assert_eq!(parse_std_target("pipe:7"), Some(StdTarget::Pipe(7)));
    }

    #[test]
    fn rejects_malformed_targets() {
        assert_eq!(parse_std_target("file:"), None);
        assert_eq!(parse_std_target("pipe:abc"), None);
        assert_eq!(parse_std_target("bogus"), None);
    }

    #[test]
    fn inherit_resolves_against_parent_stream() {
        let parent_stream = StdTarget::File("/Data/log.txt".to_string());
        assert_eq!(resolve(StdTarget::Inherit, Some(&parent_stream)), parent_stream);
    }

    #[test]
    fn inherit_with_no_parent_resolves_to_console() {
        assert_eq!(resolve(StdTarget::Inherit, None), StdTarget::Console);
    }

    #[test]
    fn non_inherit_target_passes_through() {
        assert_eq!(resolve(StdTarget::Void, Some(&StdTarget::Console)), StdTarget::Void);
    }

    #[test]
    fn pipe_write_then_read_roundtrips() {
        let id = create_pipe();
        assert_eq!(write_pipe(id, b"hello"), 5);
        let mut buf = [0u8; 16];
        let n = read_pipe(id, &mut buf);
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(read_pipe(id, &mut buf), 0);
    }
}
