//! Four-level page table access, built on the `x86_64` crate's `Mapper`
//! abstraction rather than a hand-rolled walker.
//!
//! A [`PageTableHierarchy`] owns one root table's physical address and
//! exposes a `with_mapper` closure that builds an `OffsetPageTable` over the
//! higher-half direct map for the duration of the call — the same "borrow a
//! mapper, then drop it" pattern the VMM uses for every operation, so no
//! mapper outlives the frame allocator lock it needs for splits.

#![allow(dead_code)]

use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{
    FrameAllocator as X86FrameAllocator, FrameDeallocator, Mapper, OffsetPageTable, Page,
    PageTable, PageTableFlags, PhysFrame, Size4KiB,
};
use x86_64::{PhysAddr, VirtAddr};

use super::{FrameNumber, PageFlags, PhysicalAddress, VirtualAddress, FRAME_ALLOCATOR};
use crate::error::MemError;

/// Adapts our single-index PMM to the `x86_64` crate's frame-allocator
/// trait, used only while a mapper needs to materialize new page-table
/// pages (never for the mappings the caller asked for).
pub struct PmmFrameAllocator;

unsafe impl X86FrameAllocator<Size4KiB> for PmmFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        let frame = FRAME_ALLOCATOR.lock().allocate(1).ok()?;
        PhysFrame::from_start_address(PhysAddr::new(frame.to_addr().as_u64())).ok()
    }
}

impl FrameDeallocator<Size4KiB> for PmmFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        FRAME_ALLOCATOR
            .lock()
            .free(PhysicalAddress::new(frame.start_address().as_u64()), 1);
    }
}

fn to_x86_flags(flags: PageFlags) -> PageTableFlags {
    let mut f = PageTableFlags::empty();
    if flags.contains(PageFlags::PRESENT) {
        f |= PageTableFlags::PRESENT;
    }
    if flags.contains(PageFlags::WRITABLE) {
        f |= PageTableFlags::WRITABLE;
    }
    if flags.contains(PageFlags::USER_ACCESSIBLE) {
        f |= PageTableFlags::USER_ACCESSIBLE;
    }
    if flags.contains(PageFlags::WRITE_THROUGH) {
        f |= PageTableFlags::WRITE_THROUGH;
    }
    if flags.contains(PageFlags::CACHE_DISABLE) {
        f |= PageTableFlags::NO_CACHE;
    }
    if flags.contains(PageFlags::NO_EXECUTE) {
        f |= PageTableFlags::NO_EXECUTE;
    }
    f
}

/// One address space's root page table (PML4), reachable through the
/// higher-half direct map at `hhdm_offset`.
pub struct PageTableHierarchy {
    root: PhysFrame<Size4KiB>,
    hhdm_offset: u64,
}

impl PageTableHierarchy {
    /// Wraps the currently active root table (read from CR3). Used once, at
    /// boot, to adopt the bootloader's page tables as the kernel's own.
    pub fn current(hhdm_offset: u64) -> Self {
        let (root, _) = Cr3::read();
        Self { root, hhdm_offset }
    }

    /// Allocates a fresh, zeroed PML4 for a new address space and seeds it
    /// with the kernel's own higher-half entries so every address space
    /// shares one kernel mapping.
    pub fn new_address_space(kernel_template: &PageTableHierarchy) -> Result<Self, MemError> {
        let frame = FRAME_ALLOCATOR.lock().allocate(1).map_err(|_| MemError::OutOfMemory)?;
        let root = PhysFrame::from_start_address(PhysAddr::new(frame.to_addr().as_u64()))
            .map_err(|_| MemError::Fault)?;
        let hhdm_offset = kernel_template.hhdm_offset;
        let new_table = unsafe { table_at(root, hhdm_offset) };
        let kernel_table = unsafe { table_at(kernel_template.root, hhdm_offset) };
        for i in 256..512 {
            new_table[i] = kernel_table[i].clone();
        }
        Ok(Self { root, hhdm_offset })
    }

    pub fn root_physical(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.root.start_address().as_u64())
    }

    /// Makes this hierarchy's root the active one (loads CR3).
    ///
    /// # Safety
    /// The caller must ensure the new root maps the currently executing
    /// code and stack, or control returns into unmapped memory.
    pub unsafe fn activate(&self) {
        use x86_64::registers::control::Cr3Flags;
        Cr3::write(self.root, Cr3Flags::empty());
    }

    fn with_mapper<R>(&self, f: impl FnOnce(&mut OffsetPageTable<'_>) -> R) -> R {
        let mut table = unsafe { table_at(self.root, self.hhdm_offset) };
        let mut mapper =
            unsafe { OffsetPageTable::new(&mut table, VirtAddr::new(self.hhdm_offset)) };
        f(&mut mapper)
    }

    pub fn map(
        &self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MemError> {
        let page = Page::<Size4KiB>::containing_address(VirtAddr::new(virt.as_u64()));
        let frame = PhysFrame::<Size4KiB>::containing_address(PhysAddr::new(phys.as_u64()));
        self.with_mapper(|mapper| {
            let mut alloc = PmmFrameAllocator;
            unsafe {
                mapper
                    .map_to(page, frame, to_x86_flags(flags), &mut alloc)
                    .map_err(|_| MemError::Fault)?
                    .flush();
            }
            Ok(())
        })
    }

    pub fn unmap(&self, virt: VirtualAddress) -> Result<(), MemError> {
        let page = Page::<Size4KiB>::containing_address(VirtAddr::new(virt.as_u64()));
        self.with_mapper(|mapper| {
            let (_, flush) = mapper.unmap(page).map_err(|_| MemError::Fault)?;
            flush.flush();
            Ok(())
        })
    }

    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.with_mapper(|mapper| {
            mapper
                .translate_page(Page::<Size4KiB>::containing_address(VirtAddr::new(
                    virt.as_u64(),
                )))
                .ok()
                .map(|f| PhysicalAddress::new(f.start_address().as_u64()))
        })
    }

    pub fn set_flags(&self, virt: VirtualAddress, flags: PageFlags) -> Result<(), MemError> {
        let page = Page::<Size4KiB>::containing_address(VirtAddr::new(virt.as_u64()));
        self.with_mapper(|mapper| {
            unsafe {
                mapper
                    .update_flags(page, to_x86_flags(flags))
                    .map_err(|_| MemError::Fault)?
                    .flush();
            }
            Ok(())
        })
    }

    /// Frees this hierarchy's own root frame (the PML4). Called once, by
    /// process exit, after every mapping the root's lower half reaches has
    /// already been unmapped -- the upper half is the shared kernel
    /// template and is never owned by this frame.
    pub fn free_root(self) {
        FRAME_ALLOCATOR
            .lock()
            .free(PhysicalAddress::new(self.root.start_address().as_u64()), 1);
    }
}

unsafe fn table_at(frame: PhysFrame<Size4KiB>, hhdm_offset: u64) -> &'static mut PageTable {
    let virt = hhdm_offset + frame.start_address().as_u64();
    &mut *(virt as *mut PageTable)
}

pub fn frame_number_to_x86(frame: FrameNumber) -> PhysFrame<Size4KiB> {
    PhysFrame::from_start_address(PhysAddr::new(frame.to_addr().as_u64())).unwrap()
}
