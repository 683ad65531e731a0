//! Per-process heap: a simple bump allocator over `[heap_start, heap_limit)`
//! backing the 100-series Memory syscalls (`get_page_size`, `allocate_page`,
//! `free_page`).

use crate::error::MemError;
use crate::mm::{PageFlags, VirtualAddress, FRAME_SIZE};

use super::pcb::Application;

/// Grows the heap by `count` pages and returns the first page's address.
/// Maps fresh, zeroed, writable pages starting at the current limit.
pub fn allocate_pages(app: &Application, count: usize) -> Result<u64, MemError> {
    if count == 0 {
        return Err(MemError::BadArg);
    }
    let base = app.heap_limit();
    let new_limit = base
        .checked_add((count as u64) * FRAME_SIZE as u64)
        .ok_or(MemError::BadArg)?;

    let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER_ACCESSIBLE | PageFlags::NO_EXECUTE;
    app.with_address_space(|space| space.allocate(VirtualAddress(base), flags, count))
        .map_err(|_| MemError::OutOfMemory)?;
    app.set_heap_limit(new_limit);
    Ok(base)
}

/// Shrinks the heap by unmapping the top `count` pages, provided doing so
/// does not cross below `heap_start`.
pub fn free_pages(app: &Application, addr: u64, count: usize) -> Result<(), MemError> {
    if count == 0 || addr % FRAME_SIZE as u64 != 0 {
        return Err(MemError::BadArg);
    }
    let span = (count as u64) * FRAME_SIZE as u64;
    let end = addr.checked_add(span).ok_or(MemError::BadArg)?;
    if addr < app.heap_start || end > app.heap_limit() {
        return Err(MemError::BadArg);
    }

    app.with_address_space(|space| space.free(VirtualAddress(addr), count));

    // Only shrink the tracked limit when freeing exactly the top of the
    // heap; an interior free just drops the mapping.
    if end == app.heap_limit() {
        app.set_heap_limit(addr);
    }
    Ok(())
}

pub fn page_size() -> u64 {
    FRAME_SIZE as u64
}
