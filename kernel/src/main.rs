//! Binary entry point. All real boot logic lives in `runeos_kernel::bootstrap`
//! so that it can also be exercised, module by module, from host-side tests.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![test_runner(runeos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

use runeos_kernel::{bootstrap, test_panic_handler};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    #[cfg(test)]
    test_main();

    bootstrap::run();
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("panic: {}", info);
    if let Some(fb) = bootstrap::framebuffer_info() {
        runeos_kernel::panic_banner::draw_banner(&fb);
    }
    runeos_kernel::arch::halt();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
