//! x86_64 system call entry point: the `SYSCALL`/`SYSRET` trampoline and the
//! register reshuffle that turns the gate's six-argument, call-id-bearing
//! payload into the ordinary C argument registers `syscall_handler` expects.

#![allow(function_casts_as_integer)]

use crate::syscall::syscall_handler;

/// x86_64 SYSCALL instruction entry point.
///
/// The CPU delivers `rax` = call id, `rdi,rsi,rdx,r10,r8,r9` = arg0..arg5
/// (Linux's `syscall(2)` convention, which this kernel's userland crt0
/// also uses -- `r10` stands in for `rcx`, since `syscall` clobbers `rcx`
/// with the return address). `syscall_handler` takes a plain seven-word C
/// signature `(call_id, arg0..arg5)`, so before the `call` every argument
/// is shifted down one register (`rax`->`rdi`, `rdi`->`rsi`, ...,
/// `r10`->`r8`, `r8`->`r9`) and the former `r9` (arg5) is pushed as the
/// seventh, stack-passed argument. `rcx`/`r11` are saved to the stack
/// first (the `syscall` instruction clobbers them with the return
/// address/flags), freeing `rcx` to take part in the shuffle.
///
/// # Safety
/// This function must only be called by the CPU's SYSCALL instruction.
/// It expects specific register states as defined by the x86_64 ABI.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        // Save user context on kernel stack
        "swapgs",                    // Switch to kernel GS
        "mov gs:[0x8], rsp",        // Save user RSP in per-CPU data
        "mov rsp, gs:[0x0]",        // Load kernel RSP from per-CPU data

        // Save registers
        "push rcx",                  // User RIP
        "push r11",                  // User RFLAGS
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        // Reshuffle (call_id, arg0..arg5) from the syscall convention into
        // the handler's plain C argument registers, arg5 onto the stack as
        // the 7th argument.
        "push r9",                   // arg5, consumed after the call
        "mov r9, r8",                // arg4
        "mov r8, r10",               // arg3
        "mov rcx, rdx",              // arg2
        "mov rdx, rsi",              // arg1
        "mov rsi, rdi",              // arg0
        "mov rdi, rax",              // call_id
        "call {handler}",
        "add rsp, 8",                // drop the pushed arg5

        // Restore registers
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "pop r11",                   // User RFLAGS
        "pop rcx",                   // User RIP

        // Restore user stack and return
        "mov rsp, gs:[0x8]",        // Restore user RSP
        "swapgs",                    // Switch back to user GS
        "sysretq",

        handler = sym syscall_handler
    );
}

/// Initialize SYSCALL/SYSRET support.
#[allow(dead_code)]
pub fn init_syscall() {
    use x86_64::registers::model_specific::{Efer, EferFlags, LStar, Star};

    let selectors = crate::arch::x86_64::gdt::selectors();

    unsafe {
        // Enable SYSCALL/SYSRET
        Efer::update(|flags| {
            flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS);
        });

        // Set up SYSCALL entry point
        LStar::write(x86_64::VirtAddr::new(syscall_entry as usize as u64));

        // Star::write takes (user CS for SYSRET, user SS for SYSRET,
        // kernel CS for SYSCALL, kernel SS for SYSCALL). The user pair must
        // come from the GDT's actual ring-3 descriptors (see `gdt`'s
        // layout comment for why user data precedes user code there) --
        // hardcoding different values here silently breaks every return to
        // userspace.
        Star::write(
            selectors.user_code_selector,
            selectors.user_data_selector,
            selectors.code_selector,
            selectors.data_selector,
        )
        .unwrap();
    }
}
