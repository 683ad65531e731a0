//! runeOS kernel library.
//!
//! `no_std`, x86_64-only. Exposes the kernel's subsystems as a library so
//! that bare-metal `#[test_case]` tests (via the custom test runner) and
//! host-side `#[test]` unit tests can both link against it; `main.rs` is a
//! thin binary shell that hands off to [`bootstrap::run`].

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal target: the slab heap (`mm::heap::SlabAllocator`) is the
// global allocator. Host target (used for `cargo test` coverage of
// pure-logic modules): delegate to the system allocator so Vec/String/
// BTreeMap work normally in unit tests.
#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: mm::heap::SlabAllocator = mm::heap::SlabAllocator::empty();

#[cfg(target_os = "none")]
pub fn get_allocator() -> &'static mm::heap::SlabAllocator {
    &ALLOCATOR
}

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod irq;
pub mod log_service;
pub mod mm;
pub mod panic_banner;
pub mod process;
pub mod raii;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;
pub mod timer;

mod test_framework;

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}

// Re-exports used by `#[test_case]` tests and `main.rs`.
pub use mm::{FrameNumber, MemoryRegion, FRAME_SIZE};
pub use sched::{Priority, Thread, ThreadId, ThreadState};
pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, test_runner, BenchmarkRunner,
    QemuExitCode, Testable,
};
