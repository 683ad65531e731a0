//! The application (process) record and the small value types around it:
//! process identity, std-stream wiring, and the two open-handle tables a
//! process's VFS syscalls index into.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::fs::{DirectoryStream, OpenFile};
use crate::mm::vmm::AddressSpace;
use crate::sched::Thread;

/// Process identifier, unique for the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppId(pub u64);

impl core::fmt::Display for AppId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_APP_ID: AtomicU64 = AtomicU64::new(1);

pub(super) fn alloc_app_id() -> AppId {
    AppId(NEXT_APP_ID.fetch_add(1, Ordering::Relaxed))
}

/// Where a std stream reads from or writes to, per the grammar parsed in
/// `process::stdio`: `void`, `inherit`, `file:<path>`, `pipe:<id>`.
///
/// `Inherit` only ever appears in a syscall argument; `process::creation`
/// resolves it to the parent's own (already-resolved) target at process
/// creation time, so a live `Application`'s `std_in`/`std_out`/`std_err`
/// is always one of the other four variants. `Console` is that resolution's
/// base case for the init process, which has no parent to inherit from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdTarget {
    Void,
    Inherit,
    File(String),
    Pipe(u32),
    Console,
}

/// Sentinel `join()` returns for a target id the process table has never
/// assigned (dead or never-existed process).
pub const JOIN_UNKNOWN_ID: i64 = -1;

/// The application record: everything the system-call gate's App and VFS
/// handlers read or mutate on behalf of one running process.
pub struct Application {
    pub id: AppId,
    pub path: String,
    pub name: String,
    pub vendor: String,
    pub version: (u16, u16, u16),
    working_directory: Mutex<String>,
    exit_code: Mutex<Option<i32>>,
    /// `None` only after `exit` has torn it down; every live process keeps
    /// `Some`.
    address_space: Mutex<Option<AddressSpace>>,
    pub entry_point: u64,
    pub heap_start: u64,
    heap_limit: AtomicU64,
    pub(super) threads: Mutex<Vec<Arc<Thread>>>,
    pub(super) joiners: Mutex<Vec<Arc<Thread>>>,
    open_nodes: Mutex<BTreeMap<u32, Arc<OpenFile>>>,
    next_node_handle: AtomicU32,
    open_dir_streams: Mutex<BTreeMap<u32, DirectoryStream>>,
    next_stream_handle: AtomicU32,
    pub std_in: StdTarget,
    pub std_out: StdTarget,
    pub std_err: StdTarget,
}

impl Application {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        path: String,
        name: String,
        vendor: String,
        version: (u16, u16, u16),
        working_directory: String,
        address_space: AddressSpace,
        entry_point: u64,
        heap_start: u64,
        std_in: StdTarget,
        std_out: StdTarget,
        std_err: StdTarget,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: alloc_app_id(),
            path,
            name,
            vendor,
            version,
            working_directory: Mutex::new(working_directory),
            exit_code: Mutex::new(None),
            address_space: Mutex::new(Some(address_space)),
            entry_point,
            heap_start,
            heap_limit: AtomicU64::new(heap_start),
            threads: Mutex::new(Vec::new()),
            joiners: Mutex::new(Vec::new()),
            open_nodes: Mutex::new(BTreeMap::new()),
            next_node_handle: AtomicU32::new(1),
            open_dir_streams: Mutex::new(BTreeMap::new()),
            next_stream_handle: AtomicU32::new(1),
            std_in,
            std_out,
            std_err,
        })
    }

    pub fn working_directory(&self) -> String {
        self.working_directory.lock().clone()
    }

    pub fn set_working_directory(&self, path: String) {
        *self.working_directory.lock() = path;
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    pub(super) fn set_exit_code(&self, code: i32) {
        *self.exit_code.lock() = Some(code);
    }

    /// Runs `f` against the live address space. Panics if called after
    /// `take_address_space` -- every caller runs before or during `exit`,
    /// never after.
    pub fn with_address_space<R>(&self, f: impl FnOnce(&mut AddressSpace) -> R) -> R {
        let mut guard = self.address_space.lock();
        f(guard.as_mut().expect("address space used after exit"))
    }

    /// Takes the address space out, leaving the process with none. Called
    /// once, by exit's release sequence, so the caller can tear it down
    /// (free every user-mode page) without holding the process's lock.
    pub(super) fn take_address_space(&self) -> AddressSpace {
        self.address_space
            .lock()
            .take()
            .expect("address space already taken")
    }

    pub fn heap_limit(&self) -> u64 {
        self.heap_limit.load(Ordering::Acquire)
    }

    pub fn set_heap_limit(&self, limit: u64) {
        self.heap_limit.store(limit, Ordering::Release);
    }

    pub fn insert_node(&self, file: Arc<OpenFile>) -> u32 {
        let handle = self.next_node_handle.fetch_add(1, Ordering::Relaxed);
        self.open_nodes.lock().insert(handle, file);
        handle
    }

    pub fn node(&self, handle: u32) -> Option<Arc<OpenFile>> {
        self.open_nodes.lock().get(&handle).cloned()
    }

    pub fn close_node(&self, handle: u32) -> Option<Arc<OpenFile>> {
        self.open_nodes.lock().remove(&handle)
    }

    pub fn insert_dir_stream(&self, stream: DirectoryStream) -> u32 {
        let handle = self.next_stream_handle.fetch_add(1, Ordering::Relaxed);
        self.open_dir_streams.lock().insert(handle, stream);
        handle
    }

    pub fn with_dir_stream<R>(&self, handle: u32, f: impl FnOnce(&mut DirectoryStream) -> R) -> Option<R> {
        self.open_dir_streams.lock().get_mut(&handle).map(f)
    }

    pub fn close_dir_stream(&self, handle: u32) -> Option<DirectoryStream> {
        self.open_dir_streams.lock().remove(&handle)
    }

    /// Drains every open file and directory-stream handle. Called once, at
    /// the start of exit's release sequence; the caller flushes and drops
    /// each entry in turn.
    pub(super) fn drain_open_handles(&self) -> (Vec<Arc<OpenFile>>, Vec<DirectoryStream>) {
        let files: Vec<_> = core::mem::take(&mut *self.open_nodes.lock())
            .into_values()
            .collect();
        let streams: Vec<_> = core::mem::take(&mut *self.open_dir_streams.lock())
            .into_values()
            .collect();
        (files, streams)
    }

    /// Registers a thread as belonging to this process. The first thread
    /// ever added is the main thread (see `main_thread`).
    pub(super) fn add_thread(&self, thread: Arc<Thread>) {
        self.threads.lock().push(thread);
    }

    /// The process's main thread: the one passed to `Application::new`'s
    /// creator first. `exit`'s release order cancels every other thread
    /// before this one.
    pub(super) fn main_thread(&self) -> Option<Arc<Thread>> {
        self.threads.lock().first().cloned()
    }

    /// Every thread but the main one, in no particular order.
    pub(super) fn non_main_threads(&self) -> Vec<Arc<Thread>> {
        let threads = self.threads.lock();
        threads.iter().skip(1).cloned().collect()
    }

    /// A thread calling `join()` on this process before it has exited is
    /// parked here, `Waiting`, until `exit` drains and wakes the list.
    pub(super) fn add_joiner(&self, thread: Arc<Thread>) {
        self.joiners.lock().push(thread);
    }

    pub(super) fn drain_joiners(&self) -> Vec<Arc<Thread>> {
        core::mem::take(&mut *self.joiners.lock())
    }
}
