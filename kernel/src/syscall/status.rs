//! The closed `Status` encoding every syscall handler returns: `Okay` (0),
//! a positive id/byte-count, or a negative named failure.

use crate::error::{AppError, ElfError, FsError, KernelError, MemError, SchedError};

/// A syscall result flattened to the signed integer the ABI carries.
/// Positive values are a successful id or byte count; `Okay` is the
/// positive-zero case a handler returns when there is no value to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Okay,
    Value(i64),
    BadArg,
    NodeNotFound,
    NodeIsFile,
    NodeIsDirectory,
    NodeInUse,
    Exists,
    OutOfSpace,
    Io,
    DirectoryStreamEnd,
    UnknownId,
    Fault,
    OutOfMemory,
}

impl Status {
    pub fn encode(self) -> isize {
        match self {
            Status::Okay => 0,
            Status::Value(v) => v as isize,
            Status::BadArg => -1,
            Status::NodeNotFound => -2,
            Status::NodeIsFile => -3,
            Status::NodeIsDirectory => -4,
            Status::NodeInUse => -5,
            Status::Exists => -6,
            Status::OutOfSpace => -7,
            Status::Io => -8,
            Status::DirectoryStreamEnd => -9,
            Status::UnknownId => -10,
            Status::Fault => -11,
            Status::OutOfMemory => -12,
        }
    }
}

impl From<MemError> for Status {
    fn from(e: MemError) -> Self {
        match e {
            MemError::BadArg => Status::BadArg,
            MemError::OutOfMemory => Status::OutOfMemory,
            MemError::Fault
            | MemError::MemoryRangeDetectionFailed
            | MemError::MemoryIndexInitFailed => Status::Fault,
        }
    }
}

impl From<SchedError> for Status {
    fn from(e: SchedError) -> Self {
        match e {
            SchedError::UnknownId => Status::UnknownId,
            SchedError::BadArg => Status::BadArg,
        }
    }
}

impl From<FsError> for Status {
    fn from(e: FsError) -> Self {
        match e {
            FsError::BadPath => Status::BadArg,
            FsError::NodeNotFound => Status::NodeNotFound,
            FsError::NodeIsFile => Status::NodeIsFile,
            FsError::NodeIsDirectory => Status::NodeIsDirectory,
            FsError::NodeInUse => Status::NodeInUse,
            FsError::Exists => Status::Exists,
            FsError::OutOfSpace => Status::OutOfSpace,
            FsError::Io => Status::Io,
            FsError::DirectoryStreamEnd => Status::DirectoryStreamEnd,
        }
    }
}

impl From<ElfError> for Status {
    fn from(_: ElfError) -> Self {
        Status::Fault
    }
}

impl From<AppError> for Status {
    fn from(e: AppError) -> Self {
        match e {
            AppError::BadArg => Status::BadArg,
            AppError::NodeNotFound => Status::NodeNotFound,
            AppError::Fault(_) => Status::Fault,
            AppError::UnknownId => Status::UnknownId,
        }
    }
}

impl From<KernelError> for Status {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::Mem(e) => e.into(),
            KernelError::Sched(e) => e.into(),
            KernelError::Fs(e) => e.into(),
            KernelError::App(e) => e.into(),
            KernelError::Hw(_) => Status::Fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn okay_encodes_zero() {
        assert_eq!(Status::Okay.encode(), 0);
    }

    #[test]
    fn value_encodes_positive() {
        assert_eq!(Status::Value(42).encode(), 42);
    }

    #[test]
    fn failures_encode_negative() {
        assert!(Status::BadArg.encode() < 0);
        assert!(Status::DirectoryStreamEnd.encode() < 0);
    }

    #[test]
    fn fs_error_maps_to_matching_status() {
        assert_eq!(Status::from(FsError::NodeInUse), Status::NodeInUse);
    }
}
