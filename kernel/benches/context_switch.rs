//! Context switch benchmark: timing for the pieces a real thread switch is
//! built from -- register save/restore, FPU state save/restore, and task
//! context construction -- without driving an actual `switch_context` into
//! an unprepared target stack.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]

extern crate alloc;

use core::panic::PanicInfo;

use runeos_kernel::arch::context::{init_fpu, restore_fpu_state, save_fpu_state};
use runeos_kernel::arch::x86_64::context::FpuState;
use runeos_kernel::sched::task::TaskContext;
use runeos_kernel::{exit_qemu, serial_println, BenchmarkRunner, QemuExitCode};

const CONTEXT_SWITCH_TARGET_NS: u64 = 10_000;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Context Switch Benchmark");
    serial_println!("========================");
    serial_println!("Target: < {} ns", CONTEXT_SWITCH_TARGET_NS);
    serial_println!();

    let runner = BenchmarkRunner::new();

    let register_result = runner.run_benchmark("Register save/restore", || {
        // SAFETY: pushes and pops are balanced; no memory is touched.
        unsafe {
            core::arch::asm!(
                "push rax", "push rbx", "push rcx", "push rdx",
                "push rsi", "push rdi", "push rbp",
                "push r8", "push r9", "push r10", "push r11",
                "push r12", "push r13", "push r14", "push r15",
                "pop r15", "pop r14", "pop r13", "pop r12", "pop r11",
                "pop r10", "pop r9", "pop r8",
                "pop rbp", "pop rdi", "pop rsi",
                "pop rdx", "pop rcx", "pop rbx", "pop rax",
                out("rax") _,
            );
        }
    });

    let construction_result = runner.run_benchmark("TaskContext::new_kernel", || {
        let ctx = TaskContext::new_kernel(0xdead_beef, 0x1000);
        core::hint::black_box(&ctx);
    });

    init_fpu();
    let mut fpu_state = FpuState {
        fxsave: [0u8; 512],
        xsave: [0u8; 2048],
    };
    let fpu_result = runner.run_benchmark("FPU save/restore", || {
        save_fpu_state(&mut fpu_state);
        restore_fpu_state(&fpu_state);
    });

    serial_println!("\nResults:");
    serial_println!("--------");
    print_target("Register save/restore", register_result.avg_time_ns, CONTEXT_SWITCH_TARGET_NS);
    print_target("TaskContext construction", construction_result.avg_time_ns, CONTEXT_SWITCH_TARGET_NS);
    print_target("FPU save/restore", fpu_result.avg_time_ns, CONTEXT_SWITCH_TARGET_NS);

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
