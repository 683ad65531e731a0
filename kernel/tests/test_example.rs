//! Demonstrates the `#[test_case]` style every suite under `tests/` uses:
//! plain functions built on `kernel_assert!`/`kernel_assert_eq!`, run by the
//! custom test runner and reported over the serial console.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(runeos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use runeos_kernel::mm::PageFlags;
use runeos_kernel::syscall::status::Status;
use runeos_kernel::{kernel_assert, kernel_assert_eq};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Example Tests");
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    runeos_kernel::test_panic_handler(info)
}

#[test_case]
fn test_basic_arithmetic() {
    let result = 2 + 2;
    kernel_assert_eq!(result, 4);
}

#[test_case]
fn test_raw_pointer_read() {
    let value = 42u32;
    let ptr = &value as *const u32;
    kernel_assert!(!ptr.is_null());
    // SAFETY: ptr was just taken from a live local and outlives this read.
    kernel_assert_eq!(unsafe { *ptr }, 42);
}

#[test_case]
fn test_page_flags_combine_with_bitor() {
    let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
    kernel_assert!(flags.contains(PageFlags::PRESENT));
    kernel_assert!(flags.contains(PageFlags::WRITABLE));
    kernel_assert!(!flags.contains(PageFlags::USER_ACCESSIBLE));
}

#[test_case]
fn test_page_flags_empty_contains_nothing() {
    kernel_assert!(!PageFlags::empty().contains(PageFlags::PRESENT));
}

#[test_case]
fn test_status_value_round_trips_through_encode() {
    kernel_assert_eq!(Status::Value(7).encode(), 7);
    kernel_assert_eq!(Status::Okay.encode(), 0);
    kernel_assert_eq!(Status::BadArg.encode(), -1);
}

#[test_case]
fn test_atomic_increment_is_observable() {
    use core::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let before = COUNTER.load(Ordering::Relaxed);
    COUNTER.fetch_add(1, Ordering::Relaxed);
    kernel_assert_eq!(COUNTER.load(Ordering::Relaxed), before + 1);
}
