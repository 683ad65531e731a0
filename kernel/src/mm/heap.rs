//! Slab Heap: power-of-two size-class object caches backed by the VMM.
//!
//! Each size class owns a linked list of slabs; a slab is one VMM page
//! carrying a free-list of fixed-size objects threaded through the objects
//! themselves. Allocation picks the smallest class `>=` the request size;
//! anything larger than the biggest class (8 KiB) falls back to a direct
//! VMM allocation tagged `KernelHeap`, sized to whole pages.

#![allow(dead_code)]

extern crate alloc;

use alloc::vec::Vec;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use spin::Mutex;

use super::{vmm, VirtualAddress, FRAME_SIZE};

/// Size classes from 8 B to 8 KiB, matching the spec's example range.
pub const SIZE_CLASSES: [usize; 11] = [8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192];

const LARGEST_CLASS: usize = SIZE_CLASSES[SIZE_CLASSES.len() - 1];

pub const HEAP_START: usize = vmm::KERNEL_HEAP_START as usize;
pub const HEAP_SIZE: usize = vmm::KERNEL_HEAP_SIZE as usize;

struct FreeObject {
    next: Option<NonNull<FreeObject>>,
}

/// One page-backed slab for a single size class.
struct Slab {
    base: VirtualAddress,
    free_list: Option<NonNull<FreeObject>>,
    free_count: usize,
    total_objects: usize,
}

// Slabs live behind `SlabAllocator::state`'s Mutex; the raw pointers inside
// never escape that lock.
unsafe impl Send for Slab {}

impl Slab {
    fn new(base: VirtualAddress, object_size: usize) -> Self {
        let total_objects = FRAME_SIZE / object_size;
        let mut free_list = None;
        for i in (0..total_objects).rev() {
            let addr = base.add(i * object_size);
            let obj = addr.as_mut_ptr::<FreeObject>();
            unsafe {
                (*obj).next = free_list;
            }
            free_list = NonNull::new(obj);
        }
        Self {
            base,
            free_list,
            free_count: total_objects,
            total_objects,
        }
    }

    fn contains(&self, ptr: *mut u8) -> bool {
        let start = self.base.as_u64();
        let end = start + FRAME_SIZE as u64;
        let addr = ptr as u64;
        addr >= start && addr < end
    }

    fn alloc(&mut self) -> Option<*mut u8> {
        let node = self.free_list?;
        unsafe {
            self.free_list = (*node.as_ptr()).next;
        }
        self.free_count -= 1;
        Some(node.as_ptr() as *mut u8)
    }

    fn dealloc(&mut self, ptr: *mut u8) {
        let obj = ptr as *mut FreeObject;
        unsafe {
            (*obj).next = self.free_list;
        }
        self.free_list = NonNull::new(obj);
        self.free_count += 1;
    }
}

struct SizeClassCache {
    object_size: usize,
    slabs: Vec<Slab>,
    next_virtual: VirtualAddress,
}

impl SizeClassCache {
    fn alloc(&mut self) -> Option<*mut u8> {
        for slab in self.slabs.iter_mut() {
            if let Some(p) = slab.alloc() {
                return Some(p);
            }
        }
        let base = self.next_virtual;
        vmm::kernel_allocate(base, 1).ok()?;
        self.next_virtual = base.add(FRAME_SIZE);
        let mut slab = Slab::new(base, self.object_size);
        let p = slab.alloc();
        self.slabs.push(slab);
        p
    }

    fn dealloc(&mut self, ptr: *mut u8) {
        for slab in self.slabs.iter_mut() {
            if slab.contains(ptr) {
                slab.dealloc(ptr);
                return;
            }
        }
    }
}

#[derive(Default, Clone, Copy)]
pub struct HeapStats {
    pub allocations: u64,
    pub deallocations: u64,
    pub bytes_in_use: usize,
    pub large_allocations: u64,
}

struct HeapState {
    classes: Vec<SizeClassCache>,
    large_cursor: usize,
    stats: HeapStats,
}

/// The slab heap, installed as the kernel's `#[global_allocator]`.
pub struct SlabAllocator {
    state: Mutex<Option<HeapState>>,
}

impl SlabAllocator {
    pub const fn empty() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    fn class_for(size: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&c| c >= size)
    }

    pub fn stats(&self) -> HeapStats {
        self.state
            .lock()
            .as_ref()
            .map(|s| s.stats)
            .unwrap_or_default()
    }

    /// Builds the per-class caches. Must run once, before the heap is used
    /// for any allocation — called from `mm::init()`, after the VMM has
    /// reserved the kernel heap's virtual range.
    pub fn init(&self) {
        let classes = SIZE_CLASSES
            .iter()
            .enumerate()
            .map(|(i, &size)| SizeClassCache {
                object_size: size,
                slabs: Vec::new(),
                next_virtual: VirtualAddress::new((HEAP_START + i * 4 * 1024 * 1024) as u64),
            })
            .collect();
        *self.state.lock() = Some(HeapState {
            classes,
            large_cursor: HEAP_START + HEAP_SIZE / 2,
            stats: HeapStats::default(),
        });
    }
}

unsafe impl GlobalAlloc for SlabAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(layout.align());
        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else {
            return core::ptr::null_mut();
        };

        let ptr = if size > LARGEST_CLASS {
            let pages = (size + FRAME_SIZE - 1) / FRAME_SIZE;
            let vaddr = VirtualAddress::new(state.large_cursor as u64);
            match vmm::kernel_allocate(vaddr, pages) {
                Ok(()) => {
                    state.large_cursor += pages * FRAME_SIZE;
                    state.stats.large_allocations += 1;
                    Some(vaddr.as_mut_ptr())
                }
                Err(_) => None,
            }
        } else {
            Self::class_for(size).and_then(|idx| state.classes[idx].alloc())
        };

        if let Some(p) = ptr {
            state.stats.allocations += 1;
            state.stats.bytes_in_use += size;
            p
        } else {
            core::ptr::null_mut()
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let size = layout.size().max(layout.align());
        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else { return };

        state.stats.deallocations += 1;
        state.stats.bytes_in_use = state.stats.bytes_in_use.saturating_sub(size);

        if size > LARGEST_CLASS {
            let pages = (size + FRAME_SIZE - 1) / FRAME_SIZE;
            vmm::kernel_free(VirtualAddress::new(ptr as u64), pages);
            return;
        }
        if let Some(idx) = Self::class_for(size) {
            state.classes[idx].dealloc(ptr);
        }
    }
}

pub fn init() {
    crate::get_allocator().init();
    log::info!(
        "heap: slab classes {}..{} bytes ready",
        SIZE_CLASSES[0],
        LARGEST_CLASS
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_for_picks_smallest_fit() {
        assert_eq!(SlabAllocator::class_for(1), Some(0));
        assert_eq!(SlabAllocator::class_for(8), Some(0));
        assert_eq!(SlabAllocator::class_for(9), Some(1));
        assert_eq!(SlabAllocator::class_for(8192), Some(SIZE_CLASSES.len() - 1));
        assert_eq!(SlabAllocator::class_for(8193), None);
    }
}
