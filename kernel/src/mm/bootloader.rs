//! Limine handoff: converts the bootloader's own data (memory map,
//! framebuffer, HHDM offset, kernel load addresses) into the kernel's own
//! types before any subsystem initializes.
//!
//! The Limine protocol is treated as an opaque source of this information;
//! nothing downstream of [`BootInfo`] depends on the `limine` crate's types.

#![allow(dead_code)]

use limine::memory_map::EntryType;
use limine::request::{
    BaseRevisionRequest, FramebufferRequest, HhdmRequest, KernelAddressRequest, MemoryMapRequest,
};
use limine::BaseRevision;

use super::{MemoryMap, MemoryRegion, RegionKind};

#[used]
#[link_section = ".requests"]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[link_section = ".requests"]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[link_section = ".requests"]
static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

#[used]
#[link_section = ".requests"]
static KERNEL_ADDRESS_REQUEST: KernelAddressRequest = KernelAddressRequest::new();

/// Framebuffer descriptor as handed to the device roster's panic-path sink.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo {
    pub address: u64,
    pub width: u64,
    pub height: u64,
    pub pitch: u64,
    pub bpp: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

/// Everything the kernel needs from the bootloader before Boot Glue hands
/// control to the PMM.
pub struct BootInfo {
    pub memory_map: MemoryMap,
    pub hhdm_offset: u64,
    pub framebuffer: Option<FramebufferInfo>,
    pub kernel_physical_base: u64,
    pub kernel_virtual_base: u64,
    /// CPU physical-address width in bits, read from CPUID leaf
    /// 0x80000008 rather than supplied by Limine.
    pub phys_addr_width: u8,
}

fn map_entry_kind(kind: EntryType) -> RegionKind {
    match kind {
        EntryType::USABLE => RegionKind::Usable,
        EntryType::BOOTLOADER_RECLAIMABLE => RegionKind::BootloaderReclaimable,
        EntryType::KERNEL_AND_MODULES => RegionKind::KernelCode,
        _ => RegionKind::Reserved,
    }
}

/// Verifies the base revision, collects every Limine response, and builds a
/// [`BootInfo`]. Panics (via the panic path) if a mandatory response is
/// absent — without a memory map or the HHDM offset nothing else can start.
pub fn collect() -> BootInfo {
    assert!(BASE_REVISION.is_supported(), "unsupported Limine base revision");

    let mmap_response = MEMORY_MAP_REQUEST
        .get_response()
        .expect("bootloader did not answer the memory map request");

    let mut memory_map = MemoryMap::empty();
    for entry in mmap_response.entries() {
        memory_map.push(MemoryRegion::new(
            entry.base,
            entry.length,
            map_entry_kind(entry.entry_type),
        ));
    }

    let hhdm_offset = HHDM_REQUEST
        .get_response()
        .expect("bootloader did not answer the HHDM request")
        .offset();

    let framebuffer = FRAMEBUFFER_REQUEST
        .get_response()
        .and_then(|r| r.framebuffers().next())
        .map(|fb| FramebufferInfo {
            address: fb.addr() as u64,
            width: fb.width(),
            height: fb.height(),
            pitch: fb.pitch(),
            bpp: fb.bpp(),
            red_shift: fb.red_mask_shift(),
            green_shift: fb.green_mask_shift(),
            blue_shift: fb.blue_mask_shift(),
        });

    let kernel_addr = KERNEL_ADDRESS_REQUEST
        .get_response()
        .expect("bootloader did not answer the kernel address request");

    BootInfo {
        memory_map,
        hhdm_offset,
        framebuffer,
        kernel_physical_base: kernel_addr.physical_base(),
        kernel_virtual_base: kernel_addr.virtual_base(),
        phys_addr_width: cpu_phys_addr_width(),
    }
}

fn cpu_phys_addr_width() -> u8 {
    // CPUID leaf 0x80000008, EAX bits 0..7: physical-address width.
    let result = unsafe { core::arch::x86_64::__cpuid(0x8000_0008) };
    (result.eax & 0xff) as u8
}
