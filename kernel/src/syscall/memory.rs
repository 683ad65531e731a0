//! 100-series: Memory. `get_page_size`, `allocate_page`, `free_page` --
//! thin wrappers over the calling process's per-process heap
//! ([`crate::process::memory`]).

use crate::process::Application;
use crate::process::memory as heap;

use super::status::Status;

pub fn get_page_size() -> Status {
    Status::Value(heap::page_size() as i64)
}

pub fn allocate_page(app: &Application, count: usize) -> Status {
    match heap::allocate_pages(app, count) {
        Ok(addr) => Status::Value(addr as i64),
        Err(e) => e.into(),
    }
}

pub fn free_page(app: &Application, addr: u64, count: usize) -> Status {
    match heap::free_pages(app, addr, count) {
        Ok(()) => Status::Okay,
        Err(e) => e.into(),
    }
}
