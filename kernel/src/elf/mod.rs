//! ELF64 loader: EXEC binaries only, one optional NOTE segment carrying
//! vendor/version metadata. No dynamic linking, no relocation, no section
//! headers -- this kernel runs statically linked applications.

#![allow(clippy::slow_vector_initialization, clippy::unnecessary_cast)]

extern crate alloc;
use alloc::{string::String, vec::Vec};
use core::mem;

use crate::error::ElfError;
use crate::mm::vmm::{self, AddressSpace};
use crate::mm::{PageFlags, RegionKind, VirtualAddress};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELF_CLASS_64: u8 = 2;
const ELF_DATA_LSB: u8 = 1;
const ELF_TYPE_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    os_abi: u8,
    abi_version: u8,
    padding: [u8; 7],
    elf_type: u16,
    machine: u16,
    version2: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

fn read_struct<T: Copy>(data: &[u8], offset: usize) -> Result<T, ElfError> {
    let size = mem::size_of::<T>();
    let bytes = data.get(offset..offset + size).ok_or(ElfError::BadHeader)?;
    // SAFETY: `T` is a `#[repr(C)]` plain-data struct with no padding
    // invariants beyond byte layout, and `bytes` is exactly `size_of::<T>()`
    // long, so every bit pattern is a valid `T`.
    Ok(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

/// Vendor and version metadata decoded from the optional NOTE segment.
#[derive(Debug, Clone, Default)]
pub struct VendorInfo {
    pub vendor: String,
    pub version: (u16, u16, u16),
}

/// The result of a successful load: a freshly built address space holding
/// every LOAD segment, ready to run from `entry_point` once its root table
/// is activated.
pub struct LoadedImage {
    pub address_space: AddressSpace,
    pub entry_point: u64,
    pub vendor_info: VendorInfo,
    /// The maximum of every LOAD segment's `vaddr + memsz`, rounded up to a
    /// page boundary. The application module starts the process heap here.
    pub heap_start: u64,
}

fn parse_note(data: &[u8], mut off: usize, total: u64) -> Result<VendorInfo, ElfError> {
    let end = off.checked_add(total as usize).ok_or(ElfError::BadVendorInfo)?;
    if end > data.len() {
        return Err(ElfError::BadVendorInfo);
    }
    let namesz = u32::from_le_bytes(data[off..off + 4].try_into().unwrap()) as usize;
    let descsz = u32::from_le_bytes(data[off + 4..off + 8].try_into().unwrap()) as usize;
    off += 12; // skip namesz, descsz, type
    off += (namesz + 3) & !3;
    let desc = data.get(off..off + descsz).ok_or(ElfError::BadVendorInfo)?;
    if desc.len() < 6 {
        return Err(ElfError::BadVendorInfo);
    }
    let (name_bytes, version_bytes) = desc.split_at(desc.len() - 6);
    let vendor = String::from_utf8(name_bytes.to_vec()).map_err(|_| ElfError::BadVendorInfo)?;
    let major = u16::from_le_bytes([version_bytes[0], version_bytes[1]]);
    let minor = u16::from_le_bytes([version_bytes[2], version_bytes[3]]);
    let patch = u16::from_le_bytes([version_bytes[4], version_bytes[5]]);
    Ok(VendorInfo {
        vendor,
        version: (major, minor, patch),
    })
}

fn segment_flags(p_flags: u32) -> PageFlags {
    let mut flags = PageFlags::PRESENT | PageFlags::USER_ACCESSIBLE;
    if p_flags & PF_W != 0 {
        flags |= PageFlags::WRITABLE;
    }
    if p_flags & PF_X == 0 {
        flags |= PageFlags::NO_EXECUTE;
    }
    flags
}

/// Loads an EXEC ELF64 image from `data` into a fresh user address space.
///
/// Steps follow the fixed order: verify the header, walk program headers,
/// map each LOAD segment with the union of R/W/X needed to write its
/// contents, copy file bytes and zero the BSS tail, then re-apply the
/// segment's real (narrower) permissions, and finally decode the NOTE.
pub fn load(data: &[u8]) -> Result<LoadedImage, ElfError> {
    let header: Elf64Header = read_struct(data, 0)?;
    if header.magic != ELF_MAGIC || header.class != ELF_CLASS_64 || header.data != ELF_DATA_LSB {
        return Err(ElfError::BadHeader);
    }
    if header.elf_type != ELF_TYPE_EXEC {
        return Err(ElfError::BadHeader);
    }
    if header.entry >= crate::mm::vmm::KERNEL_MEMORY_START {
        return Err(ElfError::BadHeader);
    }

    let mut address_space = vmm::new_user_address_space().map_err(|_| ElfError::MemoryError)?;

    let mut load_count = 0usize;
    let mut vendor_info = VendorInfo::default();
    let mut max_load_end = 0u64;

    for i in 0..header.phnum as usize {
        let off = header.phoff as usize + i * header.phentsize as usize;
        let ph: Elf64ProgramHeader = read_struct(data, off)?;

        match ph.p_type {
            PT_LOAD => {
                load_count += 1;
                if ph.p_vaddr >= crate::mm::vmm::KERNEL_MEMORY_START
                    || ph.p_vaddr + ph.p_memsz >= crate::mm::vmm::KERNEL_MEMORY_START
                {
                    return Err(ElfError::BadSegment);
                }
                max_load_end = max_load_end.max(ph.p_vaddr + ph.p_memsz);
                load_segment(&mut address_space, data, &ph)?;
            }
            PT_NOTE => {
                vendor_info = parse_note(data, ph.p_offset as usize, ph.p_filesz)?;
            }
            _ => {}
        }
    }

    if load_count == 0 {
        return Err(ElfError::BadSegment);
    }

    const FRAME_SIZE: u64 = crate::mm::FRAME_SIZE as u64;
    let heap_start = max_load_end.div_ceil(FRAME_SIZE) * FRAME_SIZE;

    Ok(LoadedImage {
        address_space,
        entry_point: header.entry,
        vendor_info,
        heap_start,
    })
}

fn load_segment(
    space: &mut AddressSpace,
    data: &[u8],
    ph: &Elf64ProgramHeader,
) -> Result<(), ElfError> {
    const FRAME_SIZE: u64 = crate::mm::FRAME_SIZE as u64;

    let page_start = ph.p_vaddr & !(FRAME_SIZE - 1);
    let misalign = ph.p_vaddr - page_start;
    let span = misalign + ph.p_memsz;
    let n_pages = span.div_ceil(FRAME_SIZE) as usize;

    let writable_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER_ACCESSIBLE;
    space
        .allocate(VirtualAddress(page_start), writable_flags, n_pages)
        .map_err(|_| ElfError::MemoryError)?;

    let file_bytes = data
        .get(ph.p_offset as usize..(ph.p_offset + ph.p_filesz) as usize)
        .ok_or(ElfError::IoError)?;

    for i in 0..n_pages {
        let page_vaddr = page_start + i as u64 * FRAME_SIZE;
        let phys = match space.find_page(VirtualAddress(page_vaddr)) {
            crate::mm::PageLookup::Okay(p) => p,
            _ => return Err(ElfError::MemoryError),
        };
        let dest = crate::mm::phys_to_virt_addr(phys.as_u64()) as *mut u8;
        // SAFETY: `dest` is the HHDM alias of a frame this function just
        // mapped exclusively into `space`; writing exactly one page within
        // it is in-bounds and not aliased by any other live reference.
        let page: &mut [u8] = unsafe { core::slice::from_raw_parts_mut(dest, FRAME_SIZE as usize) };
        page.fill(0);

        let page_file_start = i as u64 * FRAME_SIZE;
        let copy_start = page_file_start.max(misalign);
        let copy_end = ((i as u64 + 1) * FRAME_SIZE).min(misalign + ph.p_filesz);
        if copy_end > copy_start {
            let src_start = (copy_start - misalign) as usize;
            let src_end = (copy_end - misalign) as usize;
            let dst_start = (copy_start - page_file_start) as usize;
            let dst_end = (copy_end - page_file_start) as usize;
            page[dst_start..dst_end].copy_from_slice(&file_bytes[src_start..src_end]);
        }
    }

    // Downgrade from the writable mapping used to populate the segment to
    // its real, narrower permissions.
    let real_flags = segment_flags(ph.p_flags);
    if real_flags != writable_flags {
        if !real_flags.contains(PageFlags::WRITABLE) {
            space
                .modify_page_flags(VirtualAddress(page_start), PageFlags::WRITABLE, false)
                .map_err(|_| ElfError::MemoryError)?;
        }
        if real_flags.contains(PageFlags::NO_EXECUTE) {
            space
                .modify_page_flags(VirtualAddress(page_start), PageFlags::NO_EXECUTE, true)
                .map_err(|_| ElfError::MemoryError)?;
        }
    }

    Ok(())
}

/// Lays out argv (a null-terminated array of null-terminated strings) and a
/// bootstrap info pointer at the top of the user stack, per the calling
/// convention `start_os`/`start_new_app` hand to a freshly loaded image.
/// Returns the stack pointer the thread should start with.
pub fn build_user_stack(
    space: &mut AddressSpace,
    stack_top: u64,
    argv: &[&str],
) -> Result<u64, ElfError> {
    // The stack page(s) are mapped by the caller (process::creation), which
    // owns stack sizing policy; here we only lay out the argv block that
    // sits just below `stack_top`.
    let mut sp = stack_top;
    let mut arg_ptrs: Vec<u64> = Vec::with_capacity(argv.len());

    for arg in argv.iter().rev() {
        let bytes = arg.as_bytes();
        sp -= (bytes.len() + 1) as u64;
        sp &= !0x7; // keep 8-byte alignment for the pointer array that follows
        write_user_bytes(space, sp, bytes)?;
        write_user_bytes(space, sp + bytes.len() as u64, &[0])?;
        arg_ptrs.push(sp);
    }

    sp &= !0xF;
    sp -= 8; // null terminator of argv[]
    write_user_u64(space, sp, 0)?;
    for ptr in arg_ptrs {
        sp -= 8;
        write_user_u64(space, sp, ptr)?;
    }

    Ok(sp)
}

fn write_user_bytes(space: &AddressSpace, vaddr: u64, bytes: &[u8]) -> Result<(), ElfError> {
    let page = VirtualAddress(vaddr & !((crate::mm::FRAME_SIZE as u64) - 1));
    let phys = match space.find_page(page) {
        crate::mm::PageLookup::Okay(p) => p,
        _ => return Err(ElfError::MemoryError),
    };
    let offset = (vaddr - page.0) as usize;
    let dest = crate::mm::phys_to_virt_addr(phys.as_u64()) as *mut u8;
    // SAFETY: `dest + offset` lies within the page mapped above, which the
    // caller (build_user_stack) sized to keep every write in-bounds.
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), dest.add(offset), bytes.len());
    }
    Ok(())
}

fn write_user_u64(space: &AddressSpace, vaddr: u64, value: u64) -> Result<(), ElfError> {
    write_user_bytes(space, vaddr, &value.to_le_bytes())
}
