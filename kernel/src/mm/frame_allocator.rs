//! Physical Memory Manager: a single contiguous page-frame index.
//!
//! At start-up the PMM locates the largest usable region, carves out enough
//! of it to host a `state` byte per frame covering the whole managed range,
//! and initializes every frame to `Free`. Once the VMM has established the
//! higher-half direct map the index is relocated to its virtual image there
//! (see [`FrameAllocator::relocate_to_virtual`]); after that, bootloader
//! -reclaimable regions are folded in as `Usable`.

extern crate alloc;

use spin::Mutex;

use super::{FrameNumber, MemoryMap, PhysicalAddress, RegionKind, FRAME_SIZE};
use crate::error::MemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Free,
    Used,
}

/// Per-frame metadata. Kept tiny (1 byte) because the index itself lives in
/// managed memory and must not dominate it on small machines.
struct FrameIndex {
    /// Pointer to the state array; physical on first init, relocated to its
    /// HHDM virtual image once the VMM comes up.
    states: *mut FrameState,
    /// Number of frames covered, starting at `base_frame`.
    count: usize,
    /// Lowest frame number covered by the index.
    base_frame: u64,
}

// The index is only ever touched behind `FrameAllocator`'s Mutex.
unsafe impl Send for FrameIndex {}

impl FrameIndex {
    fn slot(&self, frame: FrameNumber) -> Option<usize> {
        let rel = frame.0.checked_sub(self.base_frame)?;
        if (rel as usize) < self.count {
            Some(rel as usize)
        } else {
            None
        }
    }

    fn get(&self, frame: FrameNumber) -> Option<FrameState> {
        let i = self.slot(frame)?;
        Some(unsafe { *self.states.add(i) })
    }

    fn set(&self, frame: FrameNumber, state: FrameState) {
        if let Some(i) = self.slot(frame) {
            unsafe { *self.states.add(i) = state };
        }
    }
}

pub struct FrameAllocator {
    index: Option<FrameIndex>,
    /// Low-to-high scan cursor; allocation always starts here and wraps.
    cursor: u64,
    free_count: usize,
    total_count: usize,
}

impl FrameAllocator {
    const fn empty() -> Self {
        Self {
            index: None,
            cursor: 0,
            free_count: 0,
            total_count: 0,
        }
    }

    /// Builds the index over `memory_map`. Carves the index's own backing
    /// storage out of the largest usable region (retagging it
    /// `PmmReserved`) and marks every other usable frame `Free`.
    fn init(&mut self, memory_map: &mut MemoryMap) -> Result<(), MemError> {
        let lowest = memory_map
            .lowest_address()
            .ok_or(MemError::MemoryRangeDetectionFailed)?;
        let highest = memory_map
            .highest_address()
            .ok_or(MemError::MemoryRangeDetectionFailed)?;

        let base_frame = lowest / FRAME_SIZE as u64;
        let frame_count =
            ((highest - lowest + FRAME_SIZE as u64 - 1) / FRAME_SIZE as u64) as usize;
        let index_bytes = frame_count * core::mem::size_of::<FrameState>();
        let index_pages = (index_bytes + FRAME_SIZE - 1) / FRAME_SIZE;
        let index_size = (index_pages * FRAME_SIZE) as u64;

        let region = memory_map
            .largest_usable()
            .ok_or(MemError::MemoryRangeDetectionFailed)?;
        if region.size < index_size {
            return Err(MemError::MemoryIndexInitFailed);
        }
        let index_start = region.start;
        if !memory_map.claim(index_start, index_size, RegionKind::PmmReserved) {
            return Err(MemError::MemoryIndexInitFailed);
        }

        let states = index_start as *mut FrameState;
        unsafe {
            core::ptr::write_bytes(states as *mut u8, 0xffu8, frame_count);
        }
        self.index = Some(FrameIndex {
            states,
            count: frame_count,
            base_frame,
        });
        self.cursor = base_frame;
        self.total_count = frame_count;
        self.free_count = 0;

        for r in memory_map.regions() {
            if matches!(r.kind, RegionKind::Usable) {
                self.mark_range(r.start, r.size, FrameState::Free);
            }
        }
        Ok(())
    }

    fn mark_range(&mut self, start: u64, size: u64, state: FrameState) {
        let Some(index) = &self.index else { return };
        let first = start / FRAME_SIZE as u64;
        let count = size / FRAME_SIZE as u64;
        let marking_free = matches!(state, FrameState::Free);
        for f in first..first + count {
            let frame = FrameNumber(f);
            if let Some(prev) = index.get(frame) {
                let prev_free = matches!(prev, FrameState::Free);
                if prev_free != marking_free {
                    if marking_free {
                        self.free_count += 1;
                    } else {
                        self.free_count -= 1;
                    }
                }
                index.set(frame, state);
            }
        }
    }

    /// Relocates the index's backing storage to its higher-half direct-map
    /// virtual address. Must be called exactly once, right after the VMM
    /// maps the HHDM.
    pub fn relocate_to_virtual(&mut self, hhdm_offset: u64) {
        if let Some(index) = &mut self.index {
            index.states = ((index.states as u64) + hhdm_offset) as *mut FrameState;
        }
    }

    /// Folds bootloader-reclaimable regions back into the usable pool. Call
    /// once after `relocate_to_virtual`.
    pub fn reclaim_bootloader_regions(&mut self, memory_map: &mut MemoryMap) {
        memory_map.retag_all(RegionKind::BootloaderReclaimable, RegionKind::Usable);
        let reclaimed: alloc::vec::Vec<(u64, u64)> = memory_map
            .regions()
            .filter(|r| matches!(r.kind, RegionKind::Usable))
            .map(|r| (r.start, r.size))
            .collect();
        for (start, size) in reclaimed {
            self.mark_range(start, size, FrameState::Free);
        }
    }

    /// Allocates `n` contiguous frames, scanning low-to-high from the
    /// cursor. Returns the index of the first frame.
    pub fn allocate(&mut self, n: usize) -> Result<FrameNumber, MemError> {
        if n == 0 {
            return Err(MemError::BadArg);
        }
        let Some(index) = &self.index else {
            return Err(MemError::OutOfMemory);
        };
        if self.free_count < n {
            return Err(MemError::OutOfMemory);
        }

        let start_frame = index.base_frame;
        let end_frame = index.base_frame + index.count as u64;
        let mut scanned = 0u64;
        let mut f = self.cursor;
        while scanned < index.count as u64 {
            if f >= end_frame {
                f = start_frame;
            }
            let mut run_ok = true;
            for k in 0..n as u64 {
                match index.get(FrameNumber(f + k)) {
                    Some(FrameState::Free) => {}
                    _ => {
                        run_ok = false;
                        break;
                    }
                }
            }
            if run_ok {
                for k in 0..n as u64 {
                    index.set(FrameNumber(f + k), FrameState::Used);
                }
                self.free_count -= n;
                self.cursor = f + n as u64;
                return Ok(FrameNumber(f));
            }
            f += 1;
            scanned += 1;
        }
        Err(MemError::OutOfMemory)
    }

    /// Allocates exactly the `n` frames starting at `addr`, failing if any
    /// of them is not `Free`.
    pub fn allocate_at(&mut self, addr: PhysicalAddress, n: usize) -> Result<(), MemError> {
        let Some(index) = &self.index else {
            return Err(MemError::OutOfMemory);
        };
        let start = FrameNumber::from_addr(addr).0;
        for k in 0..n as u64 {
            match index.get(FrameNumber(start + k)) {
                Some(FrameState::Free) => {}
                _ => return Err(MemError::OutOfMemory),
            }
        }
        for k in 0..n as u64 {
            index.set(FrameNumber(start + k), FrameState::Used);
        }
        self.free_count -= n;
        Ok(())
    }

    pub fn free(&mut self, addr: PhysicalAddress, n: usize) {
        let Some(index) = &self.index else { return };
        let start = FrameNumber::from_addr(addr).0;
        for k in 0..n as u64 {
            index.set(FrameNumber(start + k), FrameState::Free);
        }
        self.free_count += n;
    }

    pub fn free_frames(&self) -> usize {
        self.free_count
    }

    pub fn total_frames(&self) -> usize {
        self.total_count
    }
}

pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::empty());

/// Boot-order initialization: builds the frame index over the bootloader's
/// memory map. The relocate/reclaim steps run later, once the VMM has
/// mapped the higher-half direct map (see `vmm::init`).
pub fn init() {
    let boot = crate::bootstrap::boot_info();
    let mut memory_map = boot.memory_map.clone();
    let mut alloc = FRAME_ALLOCATOR.lock();
    if let Err(e) = alloc.init(&mut memory_map) {
        panic!("PMM init failed: {e}");
    }
    crate::bootstrap::set_memory_map(memory_map);
    log::info!(
        "pmm: {} frames free of {} total",
        alloc.free_frames(),
        alloc.total_frames()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with_one_region(start: u64, size: u64) -> MemoryMap {
        let mut m = MemoryMap::empty();
        m.push(super::super::MemoryRegion::new(
            start,
            size,
            RegionKind::Usable,
        ));
        m
    }

    #[test]
    fn allocate_and_free_round_trip() {
        let mut a = FrameAllocator::empty();
        let mut map = map_with_one_region(0x10_0000, 16 * 1024 * 1024);
        a.init(&mut map).unwrap();
        let total = a.free_frames();

        let f = a.allocate(4).unwrap();
        assert_eq!(a.free_frames(), total - 4);
        a.free(f.to_addr(), 4);
        assert_eq!(a.free_frames(), total);
    }

    #[test]
    fn exhaustion_returns_out_of_memory() {
        let mut a = FrameAllocator::empty();
        let mut map = map_with_one_region(0x10_0000, 16 * 1024 * 1024);
        a.init(&mut map).unwrap();
        let total = a.free_frames();

        a.allocate(total)
            .expect("allocating all free frames must succeed");
        assert!(a.allocate(1).is_err());
    }
}
