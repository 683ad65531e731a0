//! Smoke test: the test binary itself boots (via the same Limine handoff
//! as the real kernel) and can reach `_start` without faulting.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use runeos_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode, FRAME_SIZE};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Starting basic boot test...");

    test_println();
    test_simple_assertion();
    test_frame_size_is_page_aligned();

    serial_println!("All tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_println() {
    serial_println!("test_println output");
}

fn test_simple_assertion() {
    let x = 2 + 2;
    assert_eq!(x, 4);
}

fn test_frame_size_is_page_aligned() {
    assert_eq!(FRAME_SIZE, 4096);
    assert_eq!(FRAME_SIZE.count_ones(), 1, "frame size must be a power of two");
}
