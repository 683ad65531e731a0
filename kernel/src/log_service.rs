//! Structured kernel log service
//!
//! Provides a fixed-size, heap-free circular buffer of structured log entries.
//! Each entry carries a timestamp, severity level, subsystem tag, and a
//! fixed-length message. The service is stored as global state behind a
//! [`spin::Mutex`] and accessed through a small public API.
//!
//! # Usage
//!
//! ```ignore
//! log_service::log_init();
//! log_service::klog(LogLevel::Info, "sched", "scheduler initialized");
//! let n = log_service::log_count();
//! ```
//!
//! The buffer holds up to [`LOG_BUFFER_CAPACITY`] entries. Once full it wraps
//! around and silently overwrites the oldest entries.
//!
//! Once [`open_file_sink`] has run (after the VFS is mounted), every record
//! is additionally persisted to `<system-dir>/<module>.log`, per-module,
//! through the [`fs`](crate::fs) VFS -- the buffer above is the
//! before-the-mount cache this sink flushes from, not a replacement for it.

// Log service module

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::sync::once_lock::GlobalState;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Maximum number of log entries the circular buffer can hold.
const LOG_BUFFER_CAPACITY: usize = 256;

/// Maximum length (in bytes) of a log message stored in a [`LogEntry`].
const LOG_MESSAGE_MAX_LEN: usize = 128;

/// Maximum length (in bytes) of the subsystem tag in a [`LogEntry`].
const LOG_SUBSYSTEM_MAX_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Severity levels for kernel log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Unrecoverable or critical errors.
    Error = 0,
    /// Conditions that may indicate a problem.
    Warn = 1,
    /// Normal operational messages.
    Info = 2,
    /// Verbose diagnostic output.
    Debug = 3,
    /// Very detailed tracing information.
    Trace = 4,
}

/// A single structured log entry.
///
/// All fields are stored inline with fixed-size arrays so that the entry
/// can live in a static circular buffer without heap allocation.
#[derive(Clone)]
pub struct LogEntry {
    /// Milliseconds since boot (via `arch::timer::get_timestamp_ms`).
    pub timestamp_ms: u64,
    /// Severity of the message.
    pub level: LogLevel,
    /// Short subsystem identifier (e.g. `"sched"`, `"mm"`, `"fs"`).
    /// Stored as a fixed-size byte array with the actual length tracked
    /// separately.
    subsystem_buf: [u8; LOG_SUBSYSTEM_MAX_LEN],
    subsystem_len: u8,
    /// The log message text, truncated to [`LOG_MESSAGE_MAX_LEN`] bytes.
    message_buf: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: u8,
}

impl LogEntry {
    /// Create a zeroed, empty entry (used to initialize the buffer).
    const fn empty() -> Self {
        Self {
            timestamp_ms: 0,
            level: LogLevel::Trace,
            subsystem_buf: [0u8; LOG_SUBSYSTEM_MAX_LEN],
            subsystem_len: 0,
            message_buf: [0u8; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    /// Return the subsystem tag as a `&str`.
    pub fn subsystem(&self) -> &str {
        let len = self.subsystem_len as usize;
        // SAFETY/invariant: subsystem_len is always set from a valid UTF-8
        // source (an incoming &str) and capped at LOG_SUBSYSTEM_MAX_LEN.
        core::str::from_utf8(&self.subsystem_buf[..len]).unwrap_or("")
    }

    /// Return the message text as a `&str`.
    pub fn message(&self) -> &str {
        let len = self.message_len as usize;
        core::str::from_utf8(&self.message_buf[..len]).unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Circular buffer
// ---------------------------------------------------------------------------

/// Fixed-size circular buffer of [`LogEntry`] items.
///
/// Uses head/tail indices with a count to distinguish empty from full.
struct LogBuffer {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    /// Index of the next slot to write.
    head: usize,
    /// Total number of valid entries (capped at `LOG_BUFFER_CAPACITY`).
    count: usize,
}

impl LogBuffer {
    /// Create a new empty buffer.
    fn new() -> Self {
        // Initialize with empty entries using array::from_fn to avoid Copy
        // requirement (LogEntry is Clone but not Copy due to large arrays).
        const EMPTY: LogEntry = LogEntry::empty();
        Self {
            entries: [EMPTY; LOG_BUFFER_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    /// Append a log entry, overwriting the oldest if full.
    fn push(&mut self, entry: LogEntry) {
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % LOG_BUFFER_CAPACITY;
        if self.count < LOG_BUFFER_CAPACITY {
            self.count += 1;
        }
    }

    /// Number of entries currently stored.
    fn len(&self) -> usize {
        self.count
    }

    /// Clear all entries.
    fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    /// Return the tail index (oldest entry).
    fn tail(&self) -> usize {
        if self.count < LOG_BUFFER_CAPACITY {
            0
        } else {
            self.head // when full, head == tail (oldest)
        }
    }

    /// Get the entry at logical index `i` (0 = oldest).
    ///
    /// Returns `None` if `i >= count`.
    fn get(&self, i: usize) -> Option<&LogEntry> {
        if i >= self.count {
            return None;
        }
        let physical = (self.tail() + i) % LOG_BUFFER_CAPACITY;
        Some(&self.entries[physical])
    }
}

// ---------------------------------------------------------------------------
// LogService
// ---------------------------------------------------------------------------

/// The kernel log service wrapping a [`LogBuffer`].
struct LogService {
    buffer: LogBuffer,
}

impl LogService {
    fn new() -> Self {
        Self {
            buffer: LogBuffer::new(),
        }
    }

    /// Record a log entry, returning a copy of the stored entry so the
    /// caller can forward it to the file sink without re-deriving it.
    fn log(&mut self, level: LogLevel, subsystem: &str, message: &str) -> LogEntry {
        let timestamp_ms = crate::arch::timer::get_timestamp_ms();

        let mut subsystem_buf = [0u8; LOG_SUBSYSTEM_MAX_LEN];
        let sub_len = subsystem.len().min(LOG_SUBSYSTEM_MAX_LEN);
        subsystem_buf[..sub_len].copy_from_slice(&subsystem.as_bytes()[..sub_len]);

        let mut message_buf = [0u8; LOG_MESSAGE_MAX_LEN];
        let msg_len = message.len().min(LOG_MESSAGE_MAX_LEN);
        message_buf[..msg_len].copy_from_slice(&message.as_bytes()[..msg_len]);

        let entry = LogEntry {
            timestamp_ms,
            level,
            subsystem_buf,
            subsystem_len: sub_len as u8,
            message_buf,
            message_len: msg_len as u8,
        };

        self.buffer.push(entry.clone());
        entry
    }

    /// Number of entries in the buffer.
    fn count(&self) -> usize {
        self.buffer.len()
    }

    /// Clear all entries.
    fn clear(&mut self) {
        self.buffer.clear();
    }
}

// ---------------------------------------------------------------------------
// Global state
// ---------------------------------------------------------------------------

static LOG_SERVICE: GlobalState<Mutex<LogService>> = GlobalState::new();

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Initialize the kernel log service.
///
/// Must be called once during kernel boot, after the timer subsystem is
/// available. Subsequent calls are silently ignored (returns `Ok(())`).
pub fn log_init() {
    let _ = LOG_SERVICE.init(Mutex::new(LogService::new()));
}

/// Record a structured log entry.
///
/// If the log service has not been initialized yet (i.e., called before
/// `log_init()`), the message is silently dropped. Once the file sink is
/// active ([`open_file_sink`] has run), the entry is also written straight
/// through to its module's `<system-dir>/<module>.log` file.
pub fn klog(level: LogLevel, subsystem: &str, message: &str) {
    let entry = LOG_SERVICE.with_mut(|lock| lock.lock().log(level, subsystem, message));
    if let Some(entry) = entry {
        if FILE_SINK_ACTIVE.load(Ordering::Acquire) {
            file_sink_write(&entry);
        }
    }
}

/// Iterate over all buffered log entries from oldest to newest, calling `f`
/// for each.
///
/// Returns the number of entries visited, or `None` if the service is not
/// initialized.
pub fn log_drain<F: FnMut(&LogEntry)>(mut f: F) -> Option<usize> {
    LOG_SERVICE.with(|lock| {
        let service = lock.lock();
        let n = service.buffer.len();
        for i in 0..n {
            if let Some(entry) = service.buffer.get(i) {
                f(entry);
            }
        }
        n
    })
}

/// Return the number of entries currently in the log buffer.
///
/// Returns `None` if the service is not initialized.
pub fn log_count() -> Option<usize> {
    LOG_SERVICE.with(|lock| lock.lock().count())
}

/// Clear all log entries.
///
/// Returns `None` if the service is not initialized.
pub fn log_clear() -> Option<()> {
    LOG_SERVICE.with_mut(|lock| lock.lock().clear())
}

// ---------------------------------------------------------------------------
// VFS-backed file sink
// ---------------------------------------------------------------------------
//
// Persisted state (spec.md §6): "The kernel writes logs to
// `<system-dir>/<module>.log` using UTF-8, newline-terminated,
// level-prefixed records." Before the VFS is mounted, `klog` above only
// fills the ring buffer; `open_file_sink` (called from `bootstrap::run`
// right after `fs::init()`) creates the log directory if it is missing,
// flushes every buffered record through `log_drain`, and flips
// `FILE_SINK_ACTIVE` so every subsequent `klog` call also writes straight
// through to disk.

use crate::fs::{self, OpenFile, OpenMode, OpenedNode};

/// Directory under which per-module log files are written, once mounted.
const LOG_DIR: &str = "/Data/Log";

static FILE_SINK_ACTIVE: AtomicBool = AtomicBool::new(false);
static LOG_FILES: GlobalState<Mutex<BTreeMap<String, Arc<OpenFile>>>> = GlobalState::new();

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "ERROR",
        LogLevel::Warn => "WARN",
        LogLevel::Info => "INFO",
        LogLevel::Debug => "DEBUG",
        LogLevel::Trace => "TRACE",
    }
}

fn module_log_path(module: &str) -> String {
    let mut path = String::from(LOG_DIR);
    path.push('/');
    path.push_str(module);
    path.push_str(".log");
    path
}

/// Opens (creating if absent) the append-mode handle for `module`'s log
/// file, caching it in `files` so repeated records don't re-resolve the
/// path every time. Mirrors `process::stdio::open_append`'s "open, or
/// create-then-open" fallback.
fn open_module_file(files: &mut BTreeMap<String, Arc<OpenFile>>, module: &str) -> Option<Arc<OpenFile>> {
    if let Some(file) = files.get(module) {
        return Some(file.clone());
    }
    let path = module_log_path(module);
    let file = match fs::vfs().open(&path, OpenMode::Write) {
        Ok(OpenedNode::File(f)) => f,
        Ok(OpenedNode::Directory(_)) => return None,
        Err(_) => {
            fs::vfs().create(&path, false).ok()?;
            match fs::vfs().open(&path, OpenMode::Write) {
                Ok(OpenedNode::File(f)) => f,
                _ => return None,
            }
        }
    };
    file.seek(file.size() as u64);
    files.insert(module.to_string(), file.clone());
    Some(file)
}

/// Formats `entry` as a UTF-8, newline-terminated, level-prefixed record
/// and appends it to its module's log file. Best-effort: a write failure
/// (e.g. the volume is full) is dropped rather than panicking, matching
/// spec.md §7's "logs are best-effort" policy.
fn write_entry_to_file(files: &mut BTreeMap<String, Arc<OpenFile>>, entry: &LogEntry) {
    let Some(file) = open_module_file(files, entry.subsystem()) else {
        return;
    };
    let line = alloc::format!(
        "[{:>10}] {:>5} {}\n",
        entry.timestamp_ms,
        level_name(entry.level),
        entry.message()
    );
    let _ = file.write(line.as_bytes());
}

fn file_sink_write(entry: &LogEntry) {
    LOG_FILES.with_mut(|lock| {
        let mut files = lock.lock();
        write_entry_to_file(&mut files, entry);
    });
}

fn ensure_log_dir() {
    if fs::vfs().find_node(LOG_DIR).is_err() {
        let _ = fs::vfs().create(LOG_DIR, true);
    }
}

/// Activates the VFS-backed file sink. Must be called after `fs::init()`
/// has mounted the volume that will hold `LOG_DIR`; a no-op if the log
/// service itself was never initialized. Flushes every record buffered
/// since boot into its module's file before returning, so nothing logged
/// before the mount existed is lost.
pub fn open_file_sink() {
    if LOG_FILES.init(Mutex::new(BTreeMap::new())).is_err() {
        return; // already active
    }
    ensure_log_dir();
    FILE_SINK_ACTIVE.store(true, Ordering::Release);
    log_drain(file_sink_write);
}

/// Whether the file sink has been activated yet.
pub fn file_sink_active() -> bool {
    FILE_SINK_ACTIVE.load(Ordering::Acquire)
}
