//! Exception and IRQ dispatch: a fixed 32-entry exception table and a
//! variable-length IRQ table, each line tracking a raised counter and the
//! device handler(s) registered against it. The CPU's interrupt gate
//! (`arch::x86_64::idt`) calls straight into [`dispatch_exception`] and
//! [`dispatch_irq`]; this module never touches the IDT itself.

pub mod pic;

extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use crate::sync::GlobalState;

/// Number of CPU exception vectors (0..31 on x86_64).
pub const EXCEPTION_COUNT: usize = 32;

/// Number of IRQ lines behind the legacy cascaded 8259 pair.
pub const IRQ_LINE_COUNT: usize = 16;

pub type ExceptionHandler = fn(vector: u8, error_code: Option<u64>);
pub type IrqHandlerFn = fn(line: u8);

/// One entry in the exception table: a fixed CPU vector, its architectural
/// name, a raised counter, and an optional handler. A vector with no handler
/// falls through to the panic path when it fires.
pub struct ExceptionEntry {
    pub name: &'static str,
    pub raised: u64,
    pub handler: Option<ExceptionHandler>,
}

/// One registered device on an IRQ line.
pub struct IrqDevice {
    pub device_id: u32,
    pub device_name: &'static str,
    pub handled_count: u64,
    pub handler: IrqHandlerFn,
}

/// One entry in the IRQ table: how many times the line has fired, how many
/// of those firings found no device claiming them, and the devices
/// registered against it.
#[derive(Default)]
pub struct IrqEntry {
    pub raised: u64,
    pub left_pending: u64,
    pub devices: Vec<IrqDevice>,
}

struct Tables {
    exceptions: [ExceptionEntry; EXCEPTION_COUNT],
    irqs: [IrqEntry; IRQ_LINE_COUNT],
}

static TABLES: GlobalState<Mutex<Tables>> = GlobalState::new();

const EXCEPTION_NAMES: [&str; EXCEPTION_COUNT] = [
    "divide-error",
    "debug",
    "nmi",
    "breakpoint",
    "overflow",
    "bound-range",
    "invalid-opcode",
    "device-not-available",
    "double-fault",
    "coprocessor-segment-overrun",
    "invalid-tss",
    "segment-not-present",
    "stack-fault",
    "general-protection",
    "page-fault",
    "reserved-15",
    "x87-fp",
    "alignment-check",
    "machine-check",
    "simd-fp",
    "virtualization",
    "control-protection",
    "reserved-22",
    "reserved-23",
    "reserved-24",
    "reserved-25",
    "reserved-26",
    "reserved-27",
    "hypervisor-injection",
    "vmm-communication",
    "security",
    "reserved-31",
];

pub fn init() {
    TABLES
        .init(Mutex::new(Tables {
            exceptions: core::array::from_fn(|i| ExceptionEntry {
                name: EXCEPTION_NAMES[i],
                raised: 0,
                handler: None,
            }),
            irqs: core::array::from_fn(|_| IrqEntry::default()),
        }))
        .unwrap_or_else(|_| panic!("irq tables initialized twice"));
    pic::init();
    log::info!("irq: exception and IRQ tables ready, legacy PIC masked");
}

/// Registers a handler for a CPU exception vector, replacing any previous
/// handler.
pub fn set_exception_handler(vector: u8, handler: ExceptionHandler) {
    TABLES.with_mut(|t| {
        let mut t = t.lock();
        if let Some(e) = t.exceptions.get_mut(vector as usize) {
            e.handler = Some(handler);
        }
    });
}

/// Called from the IDT's exception gates. Bumps the raised counter and
/// invokes the registered handler, or panics if none is registered --
/// an unhandled CPU exception is always fatal.
pub fn dispatch_exception(vector: u8, error_code: Option<u64>) {
    let handler = TABLES.with_mut(|t| {
        let mut t = t.lock();
        if let Some(e) = t.exceptions.get_mut(vector as usize) {
            e.raised += 1;
            e.handler
        } else {
            None
        }
    });
    match handler.flatten() {
        Some(h) => h(vector, error_code),
        None => {
            let name = EXCEPTION_NAMES
                .get(vector as usize)
                .copied()
                .unwrap_or("unknown");
            panic!("unhandled exception {vector} ({name}), error_code={error_code:?}");
        }
    }
}

/// Registers a device handler on an IRQ line.
pub fn register_irq_handler(line: u8, device_id: u32, device_name: &'static str, handler: IrqHandlerFn) {
    TABLES.with_mut(|t| {
        let mut t = t.lock();
        if let Some(entry) = t.irqs.get_mut(line as usize) {
            entry.devices.push(IrqDevice {
                device_id,
                device_name,
                handled_count: 0,
                handler,
            });
        }
    });
    pic::clear_mask(line);
}

/// Called from the IDT's IRQ gates, after the interrupt controller has been
/// acknowledged but before EOI. Walks the line's registered devices,
/// invoking every handler (several devices can share a line); if none claim
/// it, counts it as left pending.
pub fn dispatch_irq(line: u8) {
    TABLES.with_mut(|t| {
        let mut t = t.lock();
        let Some(entry) = t.irqs.get_mut(line as usize) else {
            return;
        };
        entry.raised += 1;
        if entry.devices.is_empty() {
            entry.left_pending += 1;
            return;
        }
        for device in entry.devices.iter_mut() {
            (device.handler)(line);
            device.handled_count += 1;
        }
    });
    pic::send_eoi(line);
}

pub fn exception_raised_count(vector: u8) -> u64 {
    TABLES
        .with(|t| t.lock().exceptions.get(vector as usize).map(|e| e.raised))
        .flatten()
        .unwrap_or(0)
}

pub fn irq_raised_count(line: u8) -> u64 {
    TABLES
        .with(|t| t.lock().irqs.get(line as usize).map(|e| e.raised))
        .flatten()
        .unwrap_or(0)
}
