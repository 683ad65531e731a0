//! Legacy cascaded 8259 PIC: the sole interrupt controller this kernel
//! drives (no APIC/IOAPIC support). Remapping and EOI go through the
//! `pic8259` crate; masking and the OCW1 read-back used to probe for the
//! controller's presence go through raw port I/O, since `pic8259` doesn't
//! expose the mask register.

use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;

/// Vector offset the master/slave PIC map their 8 lines onto. Master covers
/// 32..40 (IRQ0-7), slave 40..48 (IRQ8-15), matching the IDT's IRQ gates.
pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = 40;

const MASTER_CMD: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_CMD: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

const OCW3_READ_IRR: u8 = 0x0A;
const OCW3_READ_ISR: u8 = 0x0B;

static PICS: Mutex<ChainedPics> =
    unsafe { Mutex::new(ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET)) };

/// True if a PIC responds behind the legacy ports: written mask round-trips
/// through the data port.
fn probe_present() -> bool {
    let mut data: Port<u8> = Port::new(MASTER_DATA);
    unsafe {
        let saved = data.read();
        data.write(0xA5);
        let readback = data.read();
        data.write(saved);
        readback == 0xA5
    }
}

/// Remaps both PICs to `PIC_1_OFFSET`/`PIC_2_OFFSET` and masks every line.
/// Individual lines are unmasked as device handlers register against them
/// (see [`super::register_irq_handler`]).
pub fn init() {
    if !probe_present() {
        log::warn!("pic: no legacy 8259 detected, interrupts will not fire");
        return;
    }
    unsafe {
        PICS.lock().initialize();
    }
    mask_all();
    log::info!(
        "pic: remapped to vectors {}..{}",
        PIC_1_OFFSET,
        PIC_2_OFFSET + 8
    );
}

fn port_for(line: u8) -> (Port<u8>, u8) {
    if line < 8 {
        (Port::new(MASTER_DATA), line)
    } else {
        (Port::new(SLAVE_DATA), line - 8)
    }
}

/// Masks (disables) a single IRQ line.
pub fn mask(line: u8) {
    let (mut port, bit) = port_for(line);
    unsafe {
        let value = port.read();
        port.write(value | (1 << bit));
    }
}

/// Unmasks (enables) a single IRQ line.
pub fn clear_mask(line: u8) {
    let (mut port, bit) = port_for(line);
    unsafe {
        let value = port.read();
        port.write(value & !(1 << bit));
    }
}

/// Masks every line on both controllers.
pub fn mask_all() {
    let mut master: Port<u8> = Port::new(MASTER_DATA);
    let mut slave: Port<u8> = Port::new(SLAVE_DATA);
    unsafe {
        master.write(0xFF);
        slave.write(0xFF);
    }
}

fn read_register(cmd_port: u16, ocw3: u8) -> u8 {
    let mut cmd: Port<u8> = Port::new(cmd_port);
    unsafe {
        cmd.write(ocw3);
        cmd.read()
    }
}

/// Reads the Interrupt Request Register: lines currently asserted but not
/// yet serviced.
pub fn is_requested(line: u8) -> bool {
    let (cmd, bit) = if line < 8 {
        (MASTER_CMD, line)
    } else {
        (SLAVE_CMD, line - 8)
    };
    read_register(cmd, OCW3_READ_IRR) & (1 << bit) != 0
}

/// Reads the In-Service Register: lines currently being serviced.
pub fn is_serviced(line: u8) -> bool {
    let (cmd, bit) = if line < 8 {
        (MASTER_CMD, line)
    } else {
        (SLAVE_CMD, line - 8)
    };
    read_register(cmd, OCW3_READ_ISR) & (1 << bit) != 0
}

/// Sends end-of-interrupt for the given line, cascading to the slave PIC
/// when needed.
pub fn send_eoi(line: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + line);
    }
}
