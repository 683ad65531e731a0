//! PCI configuration-space access and bus enumeration.
//!
//! Legacy port-I/O mechanism (CONFIG_ADDRESS/CONFIG_DATA at 0xCF8/0xCFC):
//! plain, universally supported by QEMU's `q35`/`i440fx` machines, and all
//! this kernel needs to find the AHCI controller.

extern crate alloc;
use alloc::vec::Vec;

const CONFIG_ADDRESS: u16 = 0xCF8;
const CONFIG_DATA: u16 = 0xCFC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PciLocation {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciLocation {
    fn config_address(&self, offset: u16) -> u32 {
        0x8000_0000
            | ((self.bus as u32) << 16)
            | ((self.device as u32) << 11)
            | ((self.function as u32) << 8)
            | (offset as u32 & 0xFC)
    }
}

fn read_dword(loc: PciLocation, offset: u16) -> u32 {
    // SAFETY: CONFIG_ADDRESS/CONFIG_DATA is the standard PCI mechanism #1
    // pair; every x86 chipset this kernel targets implements it.
    unsafe {
        crate::arch::outl(CONFIG_ADDRESS, loc.config_address(offset));
        crate::arch::inl(CONFIG_DATA)
    }
}

fn write_dword(loc: PciLocation, offset: u16, value: u32) {
    // SAFETY: see `read_dword`.
    unsafe {
        crate::arch::outl(CONFIG_ADDRESS, loc.config_address(offset));
        crate::arch::outl(CONFIG_DATA, value);
    }
}

fn read_word(loc: PciLocation, offset: u16) -> u16 {
    let dword = read_dword(loc, offset & !3);
    ((dword >> ((offset & 2) * 8)) & 0xFFFF) as u16
}

fn read_byte(loc: PciLocation, offset: u16) -> u8 {
    let dword = read_dword(loc, offset & !3);
    ((dword >> ((offset & 3) * 8)) & 0xFF) as u8
}

/// One of a device's up to six Base Address Registers.
#[derive(Debug, Clone, Copy)]
pub enum PciBar {
    Memory { address: u64, size: u64 },
    Io { address: u32, size: u32 },
    None,
}

/// A PCI function discovered during enumeration.
#[derive(Debug, Clone)]
pub struct PciDevice {
    pub location: PciLocation,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_code: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub header_type: u8,
    pub interrupt_line: u8,
    pub bars: Vec<PciBar>,
}

impl PciDevice {
    /// Memory address of BAR `index`, if it is a memory BAR.
    pub fn bar_address(&self, index: usize) -> Option<u64> {
        match self.bars.get(index) {
            Some(PciBar::Memory { address, .. }) => Some(*address),
            _ => None,
        }
    }

    fn is_multifunction(&self) -> bool {
        self.header_type & 0x80 != 0
    }
}

fn probe(location: PciLocation) -> Option<PciDevice> {
    let vendor_id = read_word(location, 0x00);
    if vendor_id == 0xFFFF {
        return None;
    }
    let device_id = read_word(location, 0x02);
    let class_code = read_byte(location, 0x0B);
    let subclass = read_byte(location, 0x0A);
    let prog_if = read_byte(location, 0x09);
    let header_type = read_byte(location, 0x0E);
    let interrupt_line = read_byte(location, 0x3C);

    let bar_count = if header_type & 0x7F == 0 { 6 } else { 2 };
    let mut bars = Vec::with_capacity(bar_count);
    let mut i = 0;
    while i < bar_count {
        let offset = 0x10 + (i as u16) * 4;
        let raw = read_dword(location, offset);
        if raw == 0 {
            bars.push(PciBar::None);
            i += 1;
            continue;
        }
        if raw & 1 == 0 {
            let is_64bit = (raw >> 1) & 3 == 2;
            write_dword(location, offset, 0xFFFF_FFFF);
            let size_mask = read_dword(location, offset);
            write_dword(location, offset, raw);
            let size = (!(size_mask & 0xFFFF_FFF0)).wrapping_add(1);
            let mut address = (raw & 0xFFFF_FFF0) as u64;
            if is_64bit && i + 1 < bar_count {
                let upper = read_dword(location, offset + 4);
                address |= (upper as u64) << 32;
                bars.push(PciBar::Memory {
                    address,
                    size: size as u64,
                });
                bars.push(PciBar::None);
                i += 2;
            } else {
                bars.push(PciBar::Memory {
                    address,
                    size: size as u64,
                });
                i += 1;
            }
        } else {
            write_dword(location, offset, 0xFFFF_FFFF);
            let size_mask = read_dword(location, offset);
            write_dword(location, offset, raw);
            let size = (!(size_mask & 0xFFFF_FFFC)).wrapping_add(1);
            bars.push(PciBar::Io {
                address: raw & 0xFFFF_FFFC,
                size,
            });
            i += 1;
        }
    }

    Some(PciDevice {
        location,
        vendor_id,
        device_id,
        class_code,
        subclass,
        prog_if,
        header_type,
        interrupt_line,
        bars,
    })
}

/// Brute-force scan of every bus:device:function. Good enough for a
/// single-PCI-host, no-bridges-to-walk QEMU machine; a real multi-bus
/// topology would want to recurse through bridge secondary-bus numbers
/// instead.
pub fn scan() -> Vec<PciDevice> {
    let mut found = Vec::new();
    for bus in 0..=255u16 {
        for device in 0..32u8 {
            let location = PciLocation {
                bus: bus as u8,
                device,
                function: 0,
            };
            let Some(dev) = probe(location) else {
                continue;
            };
            let multifunction = dev.is_multifunction();
            found.push(dev);
            if multifunction {
                for function in 1..8u8 {
                    let loc = PciLocation {
                        bus: bus as u8,
                        device,
                        function,
                    };
                    if let Some(f) = probe(loc) {
                        found.push(f);
                    }
                }
            }
        }
    }
    found
}

/// Finds every function matching a PCI class/subclass pair (e.g. `(0x01,
/// 0x06)` for AHCI mass storage controllers).
pub fn find_by_class(devices: &[PciDevice], class_code: u8, subclass: u8) -> Vec<PciDevice> {
    devices
        .iter()
        .filter(|d| d.class_code == class_code && d.subclass == subclass)
        .cloned()
        .collect()
}

/// Enables memory space and bus mastering for a device, needed before the
/// AHCI driver touches its ABAR.
pub fn enable_bus_master(device: &PciDevice) {
    const COMMAND: u16 = 0x04;
    const MEMORY_SPACE: u16 = 1 << 1;
    const BUS_MASTER: u16 = 1 << 2;
    let current = read_word(device.location, COMMAND);
    let updated = current | MEMORY_SPACE | BUS_MASTER;
    let dword = read_dword(device.location, COMMAND & !3);
    let merged = (dword & 0xFFFF_0000) | updated as u32;
    write_dword(device.location, COMMAND & !3, merged);
}
