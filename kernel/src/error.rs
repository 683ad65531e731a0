//! Per-subsystem error taxonomies.
//!
//! Every fallible kernel operation returns one of these closed enums rather
//! than a string or a boxed error. `KernelError` exists only for call sites
//! that legitimately span subsystems (the syscall gate, the application
//! module's ELF-load path); most code should work directly in terms of the
//! subsystem enum it owns.

use core::fmt;

/// Memory subsystem errors (PMM, VMM, slab heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum MemError {
    /// A syscall or internal argument failed validation.
    BadArg,
    /// A page table walk or map/unmap operation could not complete.
    Fault,
    /// No frames or no virtual range of the requested size is available.
    OutOfMemory,
    /// No usable region was large enough to host the frame index.
    MemoryRangeDetectionFailed,
    /// The frame index could not be initialized over the carved-out region.
    MemoryIndexInitFailed,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadArg => "bad argument",
            Self::Fault => "memory fault",
            Self::OutOfMemory => "out of memory",
            Self::MemoryRangeDetectionFailed => "memory range detection failed",
            Self::MemoryIndexInitFailed => "memory index init failed",
        };
        f.write_str(s)
    }
}

/// Scheduler / mutex errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SchedError {
    /// No thread or mutex exists with the given id.
    UnknownId,
    BadArg,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownId => "unknown thread or mutex id",
            Self::BadArg => "bad argument",
        };
        f.write_str(s)
    }
}

/// VFS / FAT32 errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum FsError {
    BadPath,
    NodeNotFound,
    NodeIsFile,
    NodeIsDirectory,
    NodeInUse,
    Exists,
    OutOfSpace,
    Io,
    DirectoryStreamEnd,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadPath => "malformed path",
            Self::NodeNotFound => "node not found",
            Self::NodeIsFile => "node is a file",
            Self::NodeIsDirectory => "node is a directory",
            Self::NodeInUse => "node in use",
            Self::Exists => "node already exists",
            Self::OutOfSpace => "volume out of space",
            Self::Io => "device i/o error",
            Self::DirectoryStreamEnd => "directory stream exhausted",
        };
        f.write_str(s)
    }
}

/// ELF loader errors, surfaced to the application module as `AppError::Fault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ElfError {
    BadHeader,
    BadSegment,
    IoError,
    MemoryError,
    BadVendorInfo,
    BadStdio,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadHeader => "malformed ELF header",
            Self::BadSegment => "malformed program header",
            Self::IoError => "i/o error reading image",
            Self::MemoryError => "address space error while mapping segments",
            Self::BadVendorInfo => "malformed NOTE segment",
            Self::BadStdio => "malformed std-stream target",
        };
        f.write_str(s)
    }
}

/// Application-lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum AppError {
    BadArg,
    /// Executable or working directory does not exist.
    NodeNotFound,
    /// ELF load failed; see the nested `ElfError`.
    Fault(ElfError),
    /// `join()` target does not exist.
    UnknownId,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadArg => f.write_str("bad argument"),
            Self::NodeNotFound => f.write_str("executable or working directory not found"),
            Self::Fault(e) => write!(f, "app load fault: {}", e),
            Self::UnknownId => f.write_str("unknown app id"),
        }
    }
}

/// Hardware / device errors (AHCI, PIC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum HwError {
    DeviceError,
    Timeout,
    PortHung,
    Unavailable,
}

impl fmt::Display for HwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DeviceError => "device reported an error",
            Self::Timeout => "device timed out",
            Self::PortHung => "port did not clear the command-issue bit",
            Self::Unavailable => "device not present",
        };
        f.write_str(s)
    }
}

/// Umbrella error used only where a result legitimately crosses subsystem
/// boundaries (the syscall gate translates any of these into a `Status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    Mem(MemError),
    Sched(SchedError),
    Fs(FsError),
    App(AppError),
    Hw(HwError),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mem(e) => write!(f, "memory: {}", e),
            Self::Sched(e) => write!(f, "scheduler: {}", e),
            Self::Fs(e) => write!(f, "fs: {}", e),
            Self::App(e) => write!(f, "app: {}", e),
            Self::Hw(e) => write!(f, "hardware: {}", e),
        }
    }
}

impl From<MemError> for KernelError {
    fn from(e: MemError) -> Self {
        Self::Mem(e)
    }
}
impl From<SchedError> for KernelError {
    fn from(e: SchedError) -> Self {
        Self::Sched(e)
    }
}
impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}
impl From<AppError> for KernelError {
    fn from(e: AppError) -> Self {
        Self::App(e)
    }
}
impl From<HwError> for KernelError {
    fn from(e: HwError) -> Self {
        Self::Hw(e)
    }
}
impl From<ElfError> for KernelError {
    fn from(e: ElfError) -> Self {
        Self::App(AppError::Fault(e))
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
