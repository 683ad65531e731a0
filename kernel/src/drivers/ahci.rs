//! AHCI (Advanced Host Controller Interface) port driver.
//!
//! Talks to a single HBA (Host Bus Adapter) found on the PCI bus (class
//! 0x01, subclass 0x06) through its memory-mapped ABAR (BAR5). Each
//! implemented port gets a 1-page command list (32 x 32-byte command
//! headers), a 256-byte received-FIS buffer, and 32 command tables (one per
//! slot, each with room for a 64-byte command FIS and a single PRDT entry).
//! Everything is allocated from the PMM and accessed through the HHDM, so
//! no page table mappings are created for it.
//!
//! Transfers are synchronous: `read_blocks`/`write_blocks` pick a free
//! slot, build an H2D register FIS, set the command-issue bit, and poll
//! `PxCI` until the controller clears it (or the port hangs and the call
//! times out). This kernel has exactly one thing it needs from disk at a
//! time (the FAT32 driver), so there is no benefit to the complexity of
//! completion interrupts and a request queue.

extern crate alloc;
use alloc::{string::String, vec, vec::Vec};

use spin::Mutex;

use crate::drivers::pci::PciDevice;
use crate::error::HwError;
use crate::fs::blockdev::BlockDevice;
use crate::mm::{frame_allocator::FRAME_ALLOCATOR, phys_to_virt_addr, FRAME_SIZE};

const ATA_SECTOR_SIZE: usize = 512;
const AHCI_PORT_COUNT: usize = 32;
const COMMAND_SLOTS: usize = 32;

// HBA generic registers, relative to ABAR.
const HBA_GHC: usize = 0x04;
const HBA_PI: usize = 0x0C;

const GHC_AHCI_ENABLE: u32 = 1 << 31;

// Per-port registers, relative to ABAR + 0x100 + port * 0x80.
const PORT_REGION: usize = 0x100;
const PORT_STRIDE: usize = 0x80;
const PX_CLB: usize = 0x00;
const PX_CLBU: usize = 0x04;
const PX_FB: usize = 0x08;
const PX_FBU: usize = 0x0C;
const PX_IS: usize = 0x10;
const PX_CMD: usize = 0x18;
const PX_TFD: usize = 0x20;
const PX_SIG: usize = 0x24;
const PX_SSTS: usize = 0x28;
const PX_SERR: usize = 0x30;
const PX_CI: usize = 0x38;

const PX_CMD_ST: u32 = 1 << 0; // start
const PX_CMD_FRE: u32 = 1 << 4; // fis receive enable
const PX_CMD_FR: u32 = 1 << 14; // fis receive running
const PX_CMD_CR: u32 = 1 << 15; // command list running

const ATA_DEV_BUSY: u8 = 0x80;
const ATA_DEV_DRQ: u8 = 0x08;

const SATA_SIG_ATA: u32 = 0x0000_0101;

const FIS_TYPE_REG_H2D: u8 = 0x27;

const ATA_CMD_IDENTIFY: u8 = 0xEC;
const ATA_CMD_READ_DMA_EXT: u8 = 0x25;
const ATA_CMD_WRITE_DMA_EXT: u8 = 0x35;

/// Physical and virtual address pair for a DMA-visible allocation. The HHDM
/// keeps these linearly related (virt = phys + hhdm_offset), but holding
/// both avoids re-deriving one from the other at every use site.
struct DmaRegion {
    phys: u64,
    virt: u64,
    frames: usize,
}

impl DmaRegion {
    fn alloc(frames: usize) -> Result<Self, HwError> {
        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate(frames)
            .map_err(|_| HwError::Unavailable)?;
        let phys = frame.to_addr().as_u64();
        let virt = phys_to_virt_addr(phys);
        // SAFETY: freshly allocated frames, not yet aliased.
        unsafe {
            core::ptr::write_bytes(virt as *mut u8, 0, frames * FRAME_SIZE);
        }
        Ok(Self { phys, virt, frames })
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        FRAME_ALLOCATOR
            .lock()
            .free(crate::mm::PhysicalAddress::new(self.phys), self.frames);
    }
}

unsafe fn mmio_read32(base: u64, offset: usize) -> u32 {
    core::ptr::read_volatile((base as usize + offset) as *const u32)
}

unsafe fn mmio_write32(base: u64, offset: usize, value: u32) {
    core::ptr::write_volatile((base as usize + offset) as *mut u32, value);
}

/// One implemented AHCI port, bound to a backing SATA disk.
pub struct AhciPort {
    name: String,
    abar: u64,
    port: usize,
    command_list: DmaRegion,
    fis: DmaRegion,
    /// One command table per slot, each exactly one frame (4096 bytes is
    /// comfortably more than the 64 + 16 + 48 + 16 bytes a single-PRDT
    /// table needs).
    command_tables: Vec<DmaRegion>,
    free_slots: Mutex<u32>,
    block_count: u64,
}

impl AhciPort {
    fn port_base(&self) -> u64 {
        self.abar + (PORT_REGION + self.port * PORT_STRIDE) as u64
    }

    fn reg(&self, offset: usize) -> u32 {
        // SAFETY: `port_base` stays within the ABAR's BAR-reported size for
        // every offset this module uses.
        unsafe { mmio_read32(self.port_base(), offset) }
    }

    fn set_reg(&self, offset: usize, value: u32) {
        // SAFETY: see `reg`.
        unsafe { mmio_write32(self.port_base(), offset, value) }
    }

    fn start_engine(&self) {
        while self.reg(PX_CMD) & PX_CMD_CR != 0 {
            core::hint::spin_loop();
        }
        self.set_reg(PX_CMD, self.reg(PX_CMD) | PX_CMD_FRE);
        self.set_reg(PX_CMD, self.reg(PX_CMD) | PX_CMD_ST);
    }

    fn stop_engine(&self) {
        self.set_reg(PX_CMD, self.reg(PX_CMD) & !PX_CMD_ST);
        while self.reg(PX_CMD) & PX_CMD_CR != 0 {
            core::hint::spin_loop();
        }
        self.set_reg(PX_CMD, self.reg(PX_CMD) & !PX_CMD_FRE);
        while self.reg(PX_CMD) & PX_CMD_FR != 0 {
            core::hint::spin_loop();
        }
    }

    fn acquire_slot(&self) -> Result<usize, HwError> {
        let mut free = self.free_slots.lock();
        for slot in 0..COMMAND_SLOTS {
            if *free & (1 << slot) != 0 {
                *free &= !(1 << slot);
                return Ok(slot);
            }
        }
        Err(HwError::PortHung)
    }

    fn release_slot(&self, slot: usize) {
        *self.free_slots.lock() |= 1 << slot;
    }

    /// Command header `slot` inside the command list, as a raw pointer.
    fn command_header(&self, slot: usize) -> *mut u32 {
        (self.command_list.virt as usize + slot * 32) as *mut u32
    }

    /// Builds a command header + table for a data transfer and runs it to
    /// completion. `write` selects the direction; `buffer` is the data the
    /// command reads into (read) or writes from (write).
    fn run_data_command(
        &self,
        command: u8,
        lba: u64,
        sector_count: u16,
        buffer: &mut [u8],
        write: bool,
    ) -> Result<(), HwError> {
        let slot = self.acquire_slot()?;
        let result = self.run_data_command_in_slot(slot, command, lba, sector_count, buffer, write);
        self.release_slot(slot);
        result
    }

    fn run_data_command_in_slot(
        &self,
        slot: usize,
        command: u8,
        lba: u64,
        sector_count: u16,
        buffer: &mut [u8],
        write: bool,
    ) -> Result<(), HwError> {
        let table = &self.command_tables[slot];

        if write {
            let phys_buf = virt_to_phys_of_buffer(buffer.as_ptr() as u64);
            // SAFETY: `buffer` outlives the command (caller-owned slice).
            unsafe {
                core::ptr::copy_nonoverlapping(
                    buffer.as_ptr(),
                    phys_to_virt_addr(phys_buf) as *mut u8,
                    buffer.len(),
                );
            }
        }

        // Command FIS lives at table + 0, PRDT at table + 0x80 (well clear
        // of the 64-byte CFIS + 16-byte ACMD + 48 reserved bytes).
        let cfis = table.virt as *mut u8;
        // SAFETY: `table` is a dedicated, zeroed frame; writes stay inside it.
        unsafe {
            core::ptr::write_bytes(cfis, 0, 20);
            *cfis.add(0) = FIS_TYPE_REG_H2D;
            *cfis.add(1) = 1 << 7; // "C" bit: this is a command
            *cfis.add(2) = command;
            *cfis.add(4) = (lba & 0xFF) as u8;
            *cfis.add(5) = ((lba >> 8) & 0xFF) as u8;
            *cfis.add(6) = ((lba >> 16) & 0xFF) as u8;
            *cfis.add(7) = 1 << 6; // LBA mode
            *cfis.add(8) = ((lba >> 24) & 0xFF) as u8;
            *cfis.add(9) = ((lba >> 32) & 0xFF) as u8;
            *cfis.add(10) = ((lba >> 40) & 0xFF) as u8;
            *cfis.add(12) = (sector_count & 0xFF) as u8;
            *cfis.add(13) = ((sector_count >> 8) & 0xFF) as u8;
        }

        let prdt = (table.virt as usize + 0x80) as *mut u32;
        let data_phys = if buffer.is_empty() {
            0
        } else {
            virt_to_phys_of_buffer(buffer.as_ptr() as u64)
        };
        // SAFETY: `prdt` is inside `table`, a dedicated zeroed frame.
        unsafe {
            *prdt = (data_phys & 0xFFFF_FFFF) as u32;
            *prdt.add(1) = (data_phys >> 32) as u32;
            *prdt.add(2) = 0;
            let byte_count = buffer.len().saturating_sub(1) as u32;
            *prdt.add(3) = byte_count | (1 << 31); // interrupt-on-completion bit, unused (polling)
        }

        let header = self.command_header(slot);
        // SAFETY: `header` points at command-list slot `slot`, a dedicated
        // zeroed region this port owns exclusively while the slot is held.
        unsafe {
            let cfl_words = (20u32 / 4) & 0x1F;
            let write_bit = if write { 1u32 << 6 } else { 0 };
            core::ptr::write_volatile(header, cfl_words | write_bit);
            core::ptr::write_volatile(header.add(1), 1); // PRDTL = 1
            core::ptr::write_volatile(header.add(2), (table.phys & 0xFFFF_FFFF) as u32);
            core::ptr::write_volatile(header.add(3), (table.phys >> 32) as u32);
        }

        // Wait for BSY/DRQ to clear before issuing, as the spec requires.
        let mut spins = 0u64;
        while self.reg(PX_TFD) as u8 & (ATA_DEV_BUSY | ATA_DEV_DRQ) != 0 {
            spins += 1;
            if spins > 100_000_000 {
                return Err(HwError::PortHung);
            }
            core::hint::spin_loop();
        }

        self.set_reg(PX_CI, 1 << slot);

        let start = crate::arch::timer::get_ticks();
        loop {
            if self.reg(PX_CI) & (1 << slot) == 0 {
                break;
            }
            if self.reg(PX_IS) & (1 << 30) != 0 {
                // Task file error bit in the interrupt status register.
                self.set_reg(PX_IS, 1 << 30);
                return Err(HwError::DeviceError);
            }
            if crate::arch::timer::get_ticks().saturating_sub(start) > 500 {
                return Err(HwError::Timeout);
            }
            core::hint::spin_loop();
        }

        if !write {
            let phys_buf = virt_to_phys_of_buffer(buffer.as_mut_ptr() as u64);
            // SAFETY: the command completed; the controller is done writing
            // to the DMA buffer.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    phys_to_virt_addr(phys_buf) as *const u8,
                    buffer.as_mut_ptr(),
                    buffer.len(),
                );
            }
        }

        Ok(())
    }
}

/// Every buffer this driver DMAs into/out of is itself backed by
/// identity-mapped-via-HHDM kernel memory, so its physical address is just
/// the virtual address minus the HHDM offset.
fn virt_to_phys_of_buffer(virt: u64) -> u64 {
    virt - crate::bootstrap::boot_info().hhdm_offset
}

impl BlockDevice for AhciPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_size(&self) -> usize {
        ATA_SECTOR_SIZE
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&self, start_block: u64, buffer: &mut [u8]) -> Result<(), HwError> {
        if buffer.len() % ATA_SECTOR_SIZE != 0 {
            return Err(HwError::DeviceError);
        }
        let sectors = (buffer.len() / ATA_SECTOR_SIZE) as u16;
        self.run_data_command(ATA_CMD_READ_DMA_EXT, start_block, sectors, buffer, false)
    }

    fn write_blocks(&self, start_block: u64, buffer: &[u8]) -> Result<(), HwError> {
        if buffer.len() % ATA_SECTOR_SIZE != 0 {
            return Err(HwError::DeviceError);
        }
        let sectors = (buffer.len() / ATA_SECTOR_SIZE) as u16;
        // SAFETY: `run_data_command` only reads from `buffer` on the write
        // path; the `&mut` is needed to share one code path with reads.
        let buf_mut = unsafe {
            core::slice::from_raw_parts_mut(buffer.as_ptr() as *mut u8, buffer.len())
        };
        self.run_data_command(ATA_CMD_WRITE_DMA_EXT, start_block, sectors, buf_mut, true)
    }
}

fn identify_port(abar: u64, port: usize, port_name: String) -> Result<AhciPort, HwError> {
    let command_list = DmaRegion::alloc(1)?;
    let fis = DmaRegion::alloc(1)?;
    let mut command_tables = Vec::with_capacity(COMMAND_SLOTS);
    for _ in 0..COMMAND_SLOTS {
        command_tables.push(DmaRegion::alloc(1)?);
    }

    let port_base = abar + (PORT_REGION + port * PORT_STRIDE) as u64;
    // SAFETY: `port_base` is within the ABAR's mapped MMIO region.
    unsafe {
        mmio_write32(port_base, PX_CLB, (command_list.phys & 0xFFFF_FFFF) as u32);
        mmio_write32(port_base, PX_CLBU, (command_list.phys >> 32) as u32);
        mmio_write32(port_base, PX_FB, (fis.phys & 0xFFFF_FFFF) as u32);
        mmio_write32(port_base, PX_FBU, (fis.phys >> 32) as u32);
    }
    for (slot, table) in command_tables.iter().enumerate() {
        // SAFETY: `command_header` offsets stay inside the command-list frame.
        unsafe {
            let header = (command_list.virt as usize + slot * 32) as *mut u32;
            core::ptr::write_volatile(header.add(2), (table.phys & 0xFFFF_FFFF) as u32);
            core::ptr::write_volatile(header.add(3), (table.phys >> 32) as u32);
        }
    }

    let disk = AhciPort {
        name: port_name,
        abar,
        port,
        command_list,
        fis,
        command_tables,
        free_slots: Mutex::new(u32::MAX),
        block_count: 0,
    };
    disk.start_engine();

    let mut identify_buf = vec![0u8; ATA_SECTOR_SIZE];
    disk.run_data_command(ATA_CMD_IDENTIFY, 0, 1, &mut identify_buf, false)?;

    // Word 100-103 (bytes 200..216) of the IDENTIFY buffer: 48-bit LBA
    // total sector count, little-endian words.
    let mut lba_count: u64 = 0;
    for i in 0..4 {
        let word = u16::from_le_bytes([identify_buf[200 + i * 2], identify_buf[200 + i * 2 + 1]]);
        lba_count |= (word as u64) << (16 * i);
    }

    Ok(AhciPort {
        block_count: lba_count,
        ..disk
    })
}

/// Discovers every implemented, present SATA (non-ATAPI) port on `device`
/// and returns one [`AhciPort`] block device per disk found.
pub fn probe_controller(device: &PciDevice) -> Vec<AhciPort> {
    let Some(abar_phys) = device.bar_address(5) else {
        log::warn!("ahci: controller at {:?} has no ABAR (BAR5)", device.location);
        return Vec::new();
    };
    super::pci::enable_bus_master(device);
    let abar = phys_to_virt_addr(abar_phys);

    // SAFETY: `abar` is a valid MMIO mapping for an AHCI HBA (BAR5, sized
    // and enabled by `enable_bus_master`/the BAR probe in `pci::scan`).
    unsafe {
        let ghc = mmio_read32(abar, HBA_GHC);
        mmio_write32(abar, HBA_GHC, ghc | GHC_AHCI_ENABLE);
    }

    // SAFETY: see above.
    let implemented = unsafe { mmio_read32(abar, HBA_PI) };

    let mut disks = Vec::new();
    for port in 0..AHCI_PORT_COUNT {
        if implemented & (1 << port) == 0 {
            continue;
        }
        let port_base = abar + (PORT_REGION + port * PORT_STRIDE) as u64;
        // SAFETY: within the HBA's port register window for an implemented port.
        let ssts = unsafe { mmio_read32(port_base, PX_SSTS) };
        if ssts & 0x0F != 3 {
            // No device detected and Phy communication not established.
            continue;
        }
        // SAFETY: see above.
        let sig = unsafe { mmio_read32(port_base, PX_SIG) };
        if sig != SATA_SIG_ATA {
            // ATAPI, enclosure, or port multiplier: not a plain SATA disk.
            continue;
        }

        let name = alloc::format!("ahci{}p{}", device.location.function, port);
        match identify_port(abar, port, name) {
            Ok(disk) => disks.push(disk),
            Err(e) => log::warn!("ahci: port {port} identify failed: {e}"),
        }
    }
    disks
}
