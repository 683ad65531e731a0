//! Userspace pointer/string/buffer validation shared by every syscall
//! handler. Nothing below this module dereferences a userspace pointer
//! without going through one of these functions first.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::mm::user_validation::{is_user_addr_valid, validate_user_range};

use super::status::Status;

/// Longest string this kernel will copy in from userspace (a path, a
/// std-stream target, an argv entry). Matches the `file:<path>` grammar's
/// practical ceiling -- a FAT32 path component is at most 255 UCS-2 units,
/// and a full path rarely nests more than a handful of them.
pub const MAX_STRING_LEN: usize = 4096;

/// Copies `len` bytes out of userspace into a fresh kernel buffer.
///
/// # Safety
/// Callers must not hold this buffer as evidence the source bytes are
/// still valid after the call returns -- userspace can unmap or overwrite
/// its own pages at any time; only the one-shot copy itself is trusted.
pub fn read_user_bytes(ptr: usize, len: usize) -> Result<Vec<u8>, Status> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if !validate_user_range(ptr, len) {
        return Err(Status::BadArg);
    }
    // SAFETY: `validate_user_range` confirmed the whole span lies below
    // the kernel/user boundary; a non-resident page faults here rather
    // than corrupting kernel state, which is the MMU's job, not this
    // function's.
    let slice = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    Ok(slice.to_vec())
}

/// Writes `data` into a userspace buffer known to be at least `data.len()`
/// bytes long.
pub fn write_user_bytes(ptr: usize, data: &[u8]) -> Result<(), Status> {
    if data.is_empty() {
        return Ok(());
    }
    if !validate_user_range(ptr, data.len()) {
        return Err(Status::BadArg);
    }
    // SAFETY: see `read_user_bytes`.
    unsafe {
        core::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
    }
    Ok(())
}

/// Copies a NUL-terminated userspace string into a kernel `String`, up to
/// [`MAX_STRING_LEN`] bytes. Fails `BadArg` if the pointer is invalid, the
/// string isn't valid UTF-8, or no terminator is found within the limit.
pub fn copy_in_string(ptr: usize) -> Result<String, Status> {
    if !is_user_addr_valid(ptr) {
        return Err(Status::BadArg);
    }
    let mut bytes = Vec::with_capacity(64);
    let mut terminated = false;
    // SAFETY: each byte read is individually bounds-checked against the
    // user/kernel boundary before the read happens.
    for i in 0..MAX_STRING_LEN {
        let addr = ptr.checked_add(i).ok_or(Status::BadArg)?;
        if !is_user_addr_valid(addr) {
            return Err(Status::BadArg);
        }
        let byte = unsafe { core::ptr::read(addr as *const u8) };
        if byte == 0 {
            terminated = true;
            break;
        }
        bytes.push(byte);
    }
    if !terminated {
        return Err(Status::BadArg);
    }
    String::from_utf8(bytes).map_err(|_| Status::BadArg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_read_is_empty_without_validating_pointer() {
        assert_eq!(read_user_bytes(0, 0), Ok(Vec::new()));
    }

    #[test]
    fn null_pointer_range_rejected() {
        assert_eq!(read_user_bytes(0, 16), Err(Status::BadArg));
    }

    #[test]
    fn kernel_pointer_rejected() {
        assert_eq!(
            copy_in_string(crate::mm::vmm::KERNEL_MEMORY_START as usize),
            Err(Status::BadArg)
        );
    }
}
