//! Memory allocation benchmark: heap allocation costs at a few size classes,
//! plus the memory-map bookkeeping (`push`/`claim`) the frame allocator's
//! index is built from. The frame allocator and VMM themselves need a real
//! boot-supplied memory map and page tables, so this measures the data
//! structures around them rather than a live `mm::init()`.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]

extern crate alloc;

use core::panic::PanicInfo;

use runeos_kernel::mm::{MemoryMap, MemoryRegion, RegionKind, FRAME_SIZE};
use runeos_kernel::{exit_qemu, serial_println, BenchmarkRunner, QemuExitCode};

const ALLOC_TARGET_NS: u64 = 1_000;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Memory Allocation Benchmark");
    serial_println!("===========================");
    serial_println!("Target: < {} ns", ALLOC_TARGET_NS);
    serial_println!();

    let runner = BenchmarkRunner::new();

    let small = runner.run_benchmark("Small heap alloc (64B)", || {
        use alloc::vec::Vec;
        let v: Vec<u8> = Vec::with_capacity(64);
        core::hint::black_box(&v);
    });

    let medium = runner.run_benchmark("Medium heap alloc (4KiB)", || {
        use alloc::vec::Vec;
        let v: Vec<u8> = Vec::with_capacity(FRAME_SIZE);
        core::hint::black_box(&v);
    });

    let map_push = runner.run_benchmark("MemoryMap::push", || {
        let mut map = MemoryMap::empty();
        map.push(MemoryRegion::new(0, 0x10_0000, RegionKind::Usable));
        core::hint::black_box(&map);
    });

    let map_claim = runner.run_benchmark("MemoryMap::claim (region split)", || {
        let mut map = MemoryMap::empty();
        map.push(MemoryRegion::new(0, 0x10_0000, RegionKind::Usable));
        map.claim(0x1000, 0x1000, RegionKind::PmmReserved);
        core::hint::black_box(&map);
    });

    serial_println!("\nResults:");
    serial_println!("--------");
    print_target("Small heap alloc", small.avg_time_ns, ALLOC_TARGET_NS);
    print_target("Medium heap alloc", medium.avg_time_ns, ALLOC_TARGET_NS * 4);
    print_target("MemoryMap::push", map_push.avg_time_ns, ALLOC_TARGET_NS);
    print_target("MemoryMap::claim", map_claim.avg_time_ns, ALLOC_TARGET_NS);

    exit_qemu(QemuExitCode::Success);
}

fn print_target(name: &str, avg_ns: u64, target_ns: u64) {
    if avg_ns < target_ns {
        serial_println!("{:<28} avg {:>6} ns  (target {} ns, PASS)", name, avg_ns, target_ns);
    } else {
        serial_println!("{:<28} avg {:>6} ns  (target {} ns, FAIL)", name, avg_ns, target_ns);
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("Benchmark panic: {}", info);
    exit_qemu(QemuExitCode::Failed)
}
