//! Architecture-independent thread context interface. x86_64 is the only
//! implementation, but the trait keeps the scheduler from reaching past it
//! into raw `X86_64Context` fields.

use crate::sched::task::TaskContext;

pub trait ThreadContext: Sized {
    fn new() -> Self;

    /// Initialize context for a new thread.
    fn init(&mut self, entry_point: usize, stack_pointer: usize, kernel_stack: usize);

    fn get_instruction_pointer(&self) -> usize;
    fn set_instruction_pointer(&mut self, ip: usize);
    fn get_stack_pointer(&self) -> usize;
    fn set_stack_pointer(&mut self, sp: usize);
    fn get_kernel_stack(&self) -> usize;
    fn set_kernel_stack(&mut self, sp: usize);

    /// Set return value (for syscalls and thread creation).
    fn set_return_value(&mut self, value: usize);

    fn clone_from(&mut self, other: &Self);

    fn to_task_context(&self) -> TaskContext;
}

pub type ArchThreadContext = crate::arch::x86_64::context::X86_64Context;

/// # Safety
/// Must be called with interrupts disabled; both contexts must be valid.
pub unsafe fn switch_context(from: &mut ArchThreadContext, to: &ArchThreadContext) {
    crate::arch::x86_64::context::switch_context(from, to);
}

pub fn init_fpu() {
    crate::arch::x86_64::context::init_fpu();
}

pub fn save_fpu_state(state: &mut crate::arch::x86_64::context::FpuState) {
    crate::arch::x86_64::context::save_fpu_state(state);
}

pub fn restore_fpu_state(state: &crate::arch::x86_64::context::FpuState) {
    crate::arch::x86_64::context::restore_fpu_state(state);
}
