//! Interrupt Descriptor Table.
//!
//! Every exception gate forwards to [`crate::irq::dispatch_exception`] and
//! every IRQ gate (vectors 32..48, one per legacy PIC line) forwards to
//! [`crate::irq::dispatch_irq`]. This file owns no dispatch logic of its own
//! -- it only wires CPU vectors to the architecture-independent tables.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::irq::{dispatch_exception, dispatch_irq};

macro_rules! exception_handler {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(_stack_frame: InterruptStackFrame) {
            dispatch_exception($vector, None);
        }
    };
}

macro_rules! exception_handler_with_code {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(_stack_frame: InterruptStackFrame, error_code: u64) {
            dispatch_exception($vector, Some(error_code));
        }
    };
}

macro_rules! irq_handler {
    ($name:ident, $line:expr) => {
        extern "x86-interrupt" fn $name(_stack_frame: InterruptStackFrame) {
            dispatch_irq($line);
        }
    };
}

exception_handler!(divide_error_handler, 0);
exception_handler!(debug_handler, 1);
exception_handler!(nmi_handler, 2);
exception_handler!(breakpoint_handler, 3);
exception_handler!(overflow_handler, 4);
exception_handler!(bound_range_handler, 5);
exception_handler!(invalid_opcode_handler, 6);
exception_handler!(device_not_available_handler, 7);
exception_handler_with_code!(invalid_tss_handler, 10);
exception_handler_with_code!(segment_not_present_handler, 11);
exception_handler_with_code!(stack_segment_fault_handler, 12);
exception_handler_with_code!(general_protection_fault_handler, 13);
exception_handler!(x87_floating_point_handler, 16);
exception_handler_with_code!(alignment_check_handler, 17);
exception_handler!(machine_check_handler, 18);
exception_handler!(simd_floating_point_handler, 19);
exception_handler!(virtualization_handler, 20);

extern "x86-interrupt" fn double_fault_handler(
    _stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    dispatch_exception(8, Some(error_code));
    panic!("unhandled double fault");
}

extern "x86-interrupt" fn page_fault_handler(
    _stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    dispatch_exception(14, Some(error_code.bits()));
}

irq_handler!(irq0_handler, 0);
irq_handler!(irq1_handler, 1);
irq_handler!(irq2_handler, 2);
irq_handler!(irq3_handler, 3);
irq_handler!(irq4_handler, 4);
irq_handler!(irq5_handler, 5);
irq_handler!(irq6_handler, 6);
irq_handler!(irq7_handler, 7);
irq_handler!(irq8_handler, 8);
irq_handler!(irq9_handler, 9);
irq_handler!(irq10_handler, 10);
irq_handler!(irq11_handler, 11);
irq_handler!(irq12_handler, 12);
irq_handler!(irq13_handler, 13);
irq_handler!(irq14_handler, 14);
irq_handler!(irq15_handler, 15);

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available
            .set_handler_fn(device_not_available_handler);
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present
            .set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault
            .set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point
            .set_handler_fn(x87_floating_point_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.machine_check.set_handler_fn(machine_check_handler);
        idt.simd_floating_point
            .set_handler_fn(simd_floating_point_handler);
        idt.virtualization.set_handler_fn(virtualization_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }

        idt[32].set_handler_fn(irq0_handler);
        idt[33].set_handler_fn(irq1_handler);
        idt[34].set_handler_fn(irq2_handler);
        idt[35].set_handler_fn(irq3_handler);
        idt[36].set_handler_fn(irq4_handler);
        idt[37].set_handler_fn(irq5_handler);
        idt[38].set_handler_fn(irq6_handler);
        idt[39].set_handler_fn(irq7_handler);
        idt[40].set_handler_fn(irq8_handler);
        idt[41].set_handler_fn(irq9_handler);
        idt[42].set_handler_fn(irq10_handler);
        idt[43].set_handler_fn(irq11_handler);
        idt[44].set_handler_fn(irq12_handler);
        idt[45].set_handler_fn(irq13_handler);
        idt[46].set_handler_fn(irq14_handler);
        idt[47].set_handler_fn(irq15_handler);

        idt
    };
}

pub fn init() {
    IDT.load();
}
