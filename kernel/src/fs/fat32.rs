//! FAT32 engine: BIOS parameter block, cluster addressing, FAT table
//! maintenance, and the short+long file-name directory format.
//!
//! Directory contents are materialized into memory a cluster chain at a
//! time rather than streamed lazily -- directories in this kernel are small
//! enough (a handful of clusters) that this is simpler to get right than an
//! incremental cursor, at the cost of re-reading the chain on every
//! operation.

extern crate alloc;

use alloc::{string::String, sync::Arc, vec, vec::Vec};

use spin::Mutex;

use super::blockdev::BlockDevice;
use crate::error::FsError;

/// End-of-chain marker for a FAT32 cluster entry (low 28 bits all set).
pub const FAT32_EOF: u32 = 0x0FFF_FFFF;
/// Largest cluster number FAT32 can address; `find_free_cluster` returns
/// `MAX_CLUSTER + 1` as its "nothing found" sentinel, per spec.
pub const MAX_CLUSTER: u32 = 0x0FFF_FFF0;

const DIR_ENTRY_SIZE: usize = 32;
const LFN_CHARS_PER_SLOT: usize = 13;

pub const ATTR_READONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LFN: u8 = 0x0F;

const MARK_EMPTY_END: u8 = 0x00;
const MARK_EMPTY_MIDDLE: u8 = 0xE5;
const LFN_LAST_SLOT_BIT: u8 = 0x40;

/// The on-disk BIOS parameter block fields this driver needs. Parsed once
/// at mount time from sector 0 of the volume.
#[derive(Debug, Clone, Copy)]
pub struct BiosParameterBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub fat_count: u8,
    pub total_sectors: u32,
    pub fat_size: u32,
    pub root_cluster: u32,
}

impl BiosParameterBlock {
    /// Parses a 512-byte boot sector. Rejects anything that isn't a FAT32
    /// volume (`fat_size_16 == 0` is how FAT32 distinguishes itself from
    /// FAT12/16 in the shared BPB layout) or doesn't carry the `0x55AA`
    /// boot signature.
    pub fn parse(sector: &[u8]) -> Result<Self, FsError> {
        if sector.len() < 512 {
            return Err(FsError::Io);
        }
        if sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(FsError::Io);
        }
        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        let sectors_per_cluster = sector[13];
        let reserved_sector_count = u16::from_le_bytes([sector[14], sector[15]]);
        let fat_count = sector[16];
        let fat_size_16 = u16::from_le_bytes([sector[22], sector[23]]);
        let total_sectors_16 = u16::from_le_bytes([sector[19], sector[20]]);
        let total_sectors_32 = u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]);
        let fat_size_32 = u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]);
        let root_cluster = u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]);

        if fat_size_16 != 0 {
            // FAT12/FAT16 boot sector; this driver only speaks FAT32.
            return Err(FsError::Io);
        }
        let total_sectors = if total_sectors_16 != 0 {
            total_sectors_16 as u32
        } else {
            total_sectors_32
        };

        if bytes_per_sector == 0 || sectors_per_cluster == 0 || fat_count == 0 {
            return Err(FsError::Io);
        }

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count,
            fat_count,
            total_sectors,
            fat_size: fat_size_32,
            root_cluster,
        })
    }

    fn data_start_sector(&self) -> u64 {
        self.reserved_sector_count as u64 + self.fat_count as u64 * self.fat_size as u64
    }

    /// `reserved_sectors + fat_count * fat_size + (c - 2) * sectors_per_cluster`
    pub fn cluster_to_lba(&self, cluster: u32) -> u64 {
        self.data_start_sector() + (cluster as u64 - 2) * self.sectors_per_cluster as u64
    }

    pub fn cluster_size_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * self.bytes_per_sector as usize
    }

    pub fn entries_per_cluster(&self) -> usize {
        self.cluster_size_bytes() / DIR_ENTRY_SIZE
    }

    fn max_cluster_count(&self) -> u32 {
        let data_sectors = self.total_sectors as u64 - self.data_start_sector();
        (data_sectors / self.sectors_per_cluster as u64) as u32 + 1
    }

    fn fat_start_sector(&self, copy: u8) -> u64 {
        self.reserved_sector_count as u64 + copy as u64 * self.fat_size as u64
    }
}

/// A mounted FAT32 volume: the parsed BPB plus the block device it reads
/// and writes 512-byte sectors through. FAT table mutation is serialized by
/// `fat_lock` so concurrent creates/deletes don't race on the free-cluster
/// scan.
pub struct Fat32Volume {
    device: Arc<dyn BlockDevice>,
    pub bpb: BiosParameterBlock,
    fat_lock: Mutex<()>,
}

impl Fat32Volume {
    /// Reads sector 0 from `device` and mounts it as a FAT32 volume.
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Self, FsError> {
        let mut sector = vec![0u8; 512];
        device.read_blocks(0, &mut sector).map_err(|_| FsError::Io)?;
        let bpb = BiosParameterBlock::parse(&sector)?;
        Ok(Self {
            device,
            bpb,
            fat_lock: Mutex::new(()),
        })
    }

    pub fn root_cluster(&self) -> u32 {
        self.bpb.root_cluster
    }

    pub fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>, FsError> {
        let lba = self.bpb.cluster_to_lba(cluster);
        let mut buf = vec![0u8; self.bpb.cluster_size_bytes()];
        self.device.read_blocks(lba, &mut buf).map_err(|_| FsError::Io)?;
        Ok(buf)
    }

    pub fn write_cluster(&self, cluster: u32, data: &[u8]) -> Result<(), FsError> {
        let lba = self.bpb.cluster_to_lba(cluster);
        self.device.write_blocks(lba, data).map_err(|_| FsError::Io)
    }

    fn fat_sector_for(&self, cluster: u32) -> (u64, usize) {
        let byte_offset = cluster as u64 * 4;
        let sector_in_fat = byte_offset / self.bpb.bytes_per_sector as u64;
        let offset_in_sector = (byte_offset % self.bpb.bytes_per_sector as u64) as usize;
        (sector_in_fat, offset_in_sector)
    }

    /// Reads the 32-bit FAT entry for `cluster`, masking the reserved high
    /// nibble.
    pub fn read_fat_entry(&self, cluster: u32) -> Result<u32, FsError> {
        let (sector_in_fat, off) = self.fat_sector_for(cluster);
        let lba = self.bpb.fat_start_sector(0) + sector_in_fat;
        let mut sector = vec![0u8; self.bpb.bytes_per_sector as usize];
        self.device.read_blocks(lba, &mut sector).map_err(|_| FsError::Io)?;
        let raw = u32::from_le_bytes([sector[off], sector[off + 1], sector[off + 2], sector[off + 3]]);
        Ok(raw & 0x0FFF_FFFF)
    }

    /// Writes the FAT entry for `cluster` to both the primary and backup
    /// FAT, preserving the reserved high nibble.
    pub fn write_fat_entry(&self, cluster: u32, value: u32) -> Result<(), FsError> {
        let _guard = self.fat_lock.lock();
        let (sector_in_fat, off) = self.fat_sector_for(cluster);
        for copy in 0..self.bpb.fat_count {
            let lba = self.bpb.fat_start_sector(copy) + sector_in_fat;
            let mut sector = vec![0u8; self.bpb.bytes_per_sector as usize];
            self.device.read_blocks(lba, &mut sector).map_err(|_| FsError::Io)?;
            let existing = u32::from_le_bytes([sector[off], sector[off + 1], sector[off + 2], sector[off + 3]]);
            let merged = (existing & 0xF000_0000) | (value & 0x0FFF_FFFF);
            sector[off..off + 4].copy_from_slice(&merged.to_le_bytes());
            self.device.write_blocks(lba, &sector).map_err(|_| FsError::Io)?;
        }
        Ok(())
    }

    /// Scans the FAT two sectors (256 entries) at a time for a zero entry.
    /// Returns `max_cluster_count + 1` if the volume is full, matching the
    /// behaviour spec.md documents rather than an error -- callers compare
    /// against `max_cluster_count()` themselves.
    fn find_free_cluster(&self) -> Result<u32, FsError> {
        let _guard = self.fat_lock.lock();
        let entries_per_sector = self.bpb.bytes_per_sector as usize / 4;
        let total_fat_sectors = self.bpb.fat_size as u64;
        let mut sector_idx = 0u64;
        while sector_idx < total_fat_sectors {
            let lba = self.bpb.fat_start_sector(0) + sector_idx;
            let mut sector = vec![0u8; self.bpb.bytes_per_sector as usize];
            self.device.read_blocks(lba, &mut sector).map_err(|_| FsError::Io)?;
            let start = if sector_idx == 0 { 2 } else { 0 };
            for i in start..entries_per_sector {
                let off = i * 4;
                let entry = u32::from_le_bytes([sector[off], sector[off + 1], sector[off + 2], sector[off + 3]])
                    & 0x0FFF_FFFF;
                if entry == 0 {
                    return Ok(sector_idx as u32 * entries_per_sector as u32 + i as u32);
                }
            }
            sector_idx += 1;
        }
        Ok(self.bpb.max_cluster_count() + 1)
    }

    /// Allocates a free cluster, chains it to EOF, and zero-fills its data.
    pub fn alloc_cluster(&self) -> Result<u32, FsError> {
        let free = self.find_free_cluster()?;
        if free > self.bpb.max_cluster_count() {
            return Err(FsError::OutOfSpace);
        }
        self.write_fat_entry(free, FAT32_EOF)?;
        let zeros = vec![0u8; self.bpb.cluster_size_bytes()];
        self.write_cluster(free, &zeros)?;
        Ok(free)
    }

    /// Appends a freshly allocated cluster to the chain ending at `tail`.
    pub fn append_cluster(&self, tail: u32) -> Result<u32, FsError> {
        let new_cluster = self.alloc_cluster()?;
        self.write_fat_entry(tail, new_cluster)?;
        Ok(new_cluster)
    }

    /// Frees every cluster in the chain starting at `start`. Bounded by
    /// `max_cluster_count` iterations to guard against a corrupt, cyclic
    /// chain rather than looping forever.
    pub fn free_chain(&self, start: u32) -> Result<(), FsError> {
        let mut cluster = start;
        let limit = self.bpb.max_cluster_count() + 1;
        for _ in 0..limit {
            if cluster >= FAT32_EOF - 7 {
                return Ok(());
            }
            let next = self.read_fat_entry(cluster)?;
            self.write_fat_entry(cluster, 0)?;
            cluster = next;
        }
        Err(FsError::Io)
    }

    /// Collects every cluster number in the chain starting at `start`, in
    /// order. Bounded the same way as `free_chain`.
    pub fn chain_clusters(&self, start: u32) -> Result<Vec<u32>, FsError> {
        let mut out = Vec::new();
        let mut cluster = start;
        let limit = self.bpb.max_cluster_count() + 1;
        for _ in 0..limit {
            if cluster >= FAT32_EOF - 7 {
                return Ok(out);
            }
            out.push(cluster);
            cluster = self.read_fat_entry(cluster)?;
        }
        Err(FsError::Io)
    }
}

/// How a directory is iterated, per spec.md 4.7.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterMode {
    /// Used entries only; stops at the first empty-end marker.
    ListDirectory,
    /// Include empty entries; stops at the end of allocated clusters.
    ListAll,
    /// Also yield raw LFN slots, used by delete/rename to rewrite chains.
    Atomic,
}

/// A resolved directory entry: a short name plus, if a valid preceding LFN
/// chain was found, the long name it decoded to.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub name: String,
    pub short_name: String,
    pub attr: u8,
    pub cluster: u32,
    pub size: u32,
    /// Location of the short entry itself, for delete/update.
    pub location: EntryLocation,
    /// Locations of the LFN slots preceding it, topmost (last-written)
    /// first -- i.e. in on-disk order.
    pub lfn_locations: Vec<EntryLocation>,
}

impl ResolvedEntry {
    pub fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub cluster: u32,
    pub index: usize,
}

/// One raw 32-byte slot plus its location, as seen by `Atomic` iteration.
pub struct RawSlot {
    pub location: EntryLocation,
    pub bytes: [u8; DIR_ENTRY_SIZE],
}

fn short_name_checksum(raw_name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &b in raw_name {
        sum = (if sum & 1 != 0 { 0x80 } else { 0 }).wrapping_add(sum >> 1).wrapping_add(b);
    }
    sum
}

fn display_short_name(raw_name: &[u8; 11]) -> String {
    let base = core::str::from_utf8(&raw_name[0..8]).unwrap_or("").trim_end();
    let ext = core::str::from_utf8(&raw_name[8..11]).unwrap_or("").trim_end();
    if ext.is_empty() {
        String::from(base)
    } else {
        alloc::format!("{base}.{ext}")
    }
}

fn decode_lfn_name_utf16(units: &[u16]) -> String {
    let trimmed: Vec<u16> = units
        .iter()
        .copied()
        .take_while(|&u| u != 0x0000 && u != 0xFFFF)
        .collect();
    String::from_utf16_lossy(&trimmed)
}

/// Reads every raw 32-byte slot of the directory chain starting at
/// `start_cluster`, across every cluster in the chain (no early stop --
/// callers implementing `ListDirectory` semantics stop consuming the
/// returned vector at the first empty-end marker themselves).
pub fn read_all_raw_entries(volume: &Fat32Volume, start_cluster: u32) -> Result<Vec<RawSlot>, FsError> {
    let mut out = Vec::new();
    for cluster in volume.chain_clusters(start_cluster)? {
        let data = volume.read_cluster(cluster)?;
        let per_cluster = volume.bpb.entries_per_cluster();
        for index in 0..per_cluster {
            let off = index * DIR_ENTRY_SIZE;
            let mut bytes = [0u8; DIR_ENTRY_SIZE];
            bytes.copy_from_slice(&data[off..off + DIR_ENTRY_SIZE]);
            out.push(RawSlot {
                location: EntryLocation { cluster, index },
                bytes,
            });
        }
    }
    Ok(out)
}

/// Resolves a directory's contents per `mode`, grouping LFN chains with
/// their owning short entry. `ListDirectory` stops at the first empty-end
/// marker; `ListAll`/`Atomic` walk to the end of the allocated chain.
pub fn resolve_directory(
    volume: &Fat32Volume,
    start_cluster: u32,
    mode: IterMode,
) -> Result<Vec<ResolvedEntry>, FsError> {
    let raw = read_all_raw_entries(volume, start_cluster)?;
    let mut out = Vec::new();
    let mut pending: Vec<(u8, u8, [u16; LFN_CHARS_PER_SLOT], EntryLocation)> = Vec::new();

    for slot in &raw {
        let b = &slot.bytes;
        if b[0] == MARK_EMPTY_END {
            if mode == IterMode::ListDirectory {
                break;
            }
            pending.clear();
            continue;
        }
        if b[0] == MARK_EMPTY_MIDDLE {
            pending.clear();
            continue;
        }
        if b[11] == ATTR_LFN {
            let seq = b[0];
            let checksum = b[13];
            let mut chars = [0u16; LFN_CHARS_PER_SLOT];
            for i in 0..5 {
                chars[i] = u16::from_le_bytes([b[1 + i * 2], b[2 + i * 2]]);
            }
            for i in 0..6 {
                chars[5 + i] = u16::from_le_bytes([b[14 + i * 2], b[15 + i * 2]]);
            }
            for i in 0..2 {
                chars[11 + i] = u16::from_le_bytes([b[28 + i * 2], b[29 + i * 2]]);
            }
            pending.push((seq, checksum, chars, slot.location));
            continue;
        }

        // Short entry.
        let mut raw_name = [0u8; 11];
        raw_name.copy_from_slice(&b[0..11]);
        let attr = b[11];
        let cluster_high = u16::from_le_bytes([b[20], b[21]]) as u32;
        let cluster_low = u16::from_le_bytes([b[26], b[27]]) as u32;
        let size = u32::from_le_bytes([b[28], b[29], b[30], b[31]]);
        let checksum = short_name_checksum(&raw_name);

        let long_name = build_long_name(&pending, checksum);
        let lfn_locations = pending.iter().map(|(_, _, _, loc)| *loc).collect();
        pending.clear();

        out.push(ResolvedEntry {
            name: long_name.unwrap_or_else(|| display_short_name(&raw_name)),
            short_name: display_short_name(&raw_name),
            attr,
            cluster: (cluster_high << 16) | cluster_low,
            size,
            location: slot.location,
            lfn_locations,
        });
    }
    Ok(out)
}

/// Validates and decodes a collected LFN chain: sequence numbers must
/// descend strictly from a topmost slot with the "last" bit (0x40) set,
/// and every slot's checksum must match the owning short entry's.
fn build_long_name(
    pending: &[(u8, u8, [u16; LFN_CHARS_PER_SLOT], EntryLocation)],
    short_checksum: u8,
) -> Option<String> {
    if pending.is_empty() {
        return None;
    }
    // Slots are collected in on-disk (descending seq) order; the first one
    // read must carry the "last logical slot" bit.
    if pending[0].0 & LFN_LAST_SLOT_BIT == 0 {
        return None;
    }
    let mut expected_seq = pending[0].0 & !LFN_LAST_SLOT_BIT;
    for (seq, checksum, _, _) in pending {
        let this_seq = seq & !LFN_LAST_SLOT_BIT;
        if this_seq != expected_seq || *checksum != short_checksum {
            return None;
        }
        expected_seq -= 1;
    }
    // Reverse to ascending sequence order and concatenate the 13-char runs.
    let mut units: Vec<u16> = Vec::with_capacity(pending.len() * LFN_CHARS_PER_SLOT);
    for (_, _, chars, _) in pending.iter().rev() {
        units.extend_from_slice(chars);
    }
    Some(decode_lfn_name_utf16(&units))
}

/// Encodes `name` into LFN slots, in on-disk (last slot first) write order,
/// chained to short entry checksum `checksum`.
fn encode_lfn_slots(name: &str, checksum: u8) -> Vec<[u8; DIR_ENTRY_SIZE]> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let slot_count = units.len().div_ceil(LFN_CHARS_PER_SLOT).max(1);
    let mut slots = Vec::with_capacity(slot_count);
    for slot_idx in 0..slot_count {
        let seq = (slot_idx + 1) as u8;
        let start = slot_idx * LFN_CHARS_PER_SLOT;
        let mut chars = [0xFFFFu16; LFN_CHARS_PER_SLOT];
        let mut padded_null = false;
        for i in 0..LFN_CHARS_PER_SLOT {
            if let Some(&u) = units.get(start + i) {
                chars[i] = u;
            } else if !padded_null {
                chars[i] = 0x0000;
                padded_null = true;
            }
        }
        let seq_byte = if slot_idx == slot_count - 1 {
            seq | LFN_LAST_SLOT_BIT
        } else {
            seq
        };
        let mut bytes = [0u8; DIR_ENTRY_SIZE];
        bytes[0] = seq_byte;
        for i in 0..5 {
            bytes[1 + i * 2..3 + i * 2].copy_from_slice(&chars[i].to_le_bytes());
        }
        bytes[11] = ATTR_LFN;
        bytes[12] = 0;
        bytes[13] = checksum;
        for i in 0..6 {
            bytes[14 + i * 2..16 + i * 2].copy_from_slice(&chars[5 + i].to_le_bytes());
        }
        bytes[26] = 0;
        bytes[27] = 0;
        for i in 0..2 {
            bytes[28 + i * 2..30 + i * 2].copy_from_slice(&chars[11 + i].to_le_bytes());
        }
        slots.push(bytes);
    }
    // Slots are generated in ascending sequence order above; on-disk order
    // writes the highest sequence number first.
    slots.reverse();
    slots
}

fn encode_short_entry(raw_name: [u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; DIR_ENTRY_SIZE] {
    let mut bytes = [0u8; DIR_ENTRY_SIZE];
    bytes[0..11].copy_from_slice(&raw_name);
    bytes[11] = attr;
    let cluster_high = (cluster >> 16) as u16;
    let cluster_low = (cluster & 0xFFFF) as u16;
    bytes[20..22].copy_from_slice(&cluster_high.to_le_bytes());
    bytes[26..28].copy_from_slice(&cluster_low.to_le_bytes());
    bytes[28..32].copy_from_slice(&size.to_le_bytes());
    bytes
}

const ILLEGAL_SHORT_CHARS: &[char] = &['+', ',', ';', '=', '[', ']', '.', ' '];

fn sanitize_short_component(s: &str, max_len: usize) -> (String, bool) {
    let mut out = String::new();
    let mut dropped = s.chars().count() > max_len || s.chars().any(|c| !c.is_ascii());
    for c in s.chars() {
        if out.chars().count() >= max_len {
            dropped = true;
            break;
        }
        let upper = c.to_ascii_uppercase();
        if upper.is_ascii_alphanumeric() {
            out.push(upper);
        } else if !ILLEGAL_SHORT_CHARS.contains(&c) && c.is_ascii_graphic() {
            out.push(upper);
        } else {
            dropped = true;
        }
    }
    (out, dropped)
}

/// Builds the 11-byte 8+3 short name for `long_name`, appending `~{collision}`
/// when a numeric tail is required (any name not already a clean fit, or
/// `collision > 0`).
pub fn make_short_name(long_name: &str, collision: u32) -> [u8; 11] {
    let (stem, ext) = match long_name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s, e),
        _ => (long_name, ""),
    };
    let (mut base, base_dropped) = sanitize_short_component(stem, 8);
    let (ext_sanitized, ext_dropped) = sanitize_short_component(ext, 3);
    let needs_tail = collision > 0 || base_dropped || ext_dropped || base.is_empty();

    if needs_tail {
        let tail = alloc::format!("~{}", collision.max(1));
        let keep = 8usize.saturating_sub(tail.chars().count()).min(6);
        base.truncate(keep.max(1));
        base.push_str(&tail);
    }
    if base.is_empty() {
        base.push('_');
    }

    let mut raw = [b' '; 11];
    for (i, c) in base.chars().take(8).enumerate() {
        raw[i] = c as u8;
    }
    for (i, c) in ext_sanitized.chars().take(3).enumerate() {
        raw[8 + i] = c as u8;
    }
    raw
}

/// Number of directory-entry slots a leaf named `name` needs: one LFN slot
/// per 13 UCS-2 code units, plus the short entry itself.
pub fn slots_needed(name: &str) -> usize {
    let units = name.encode_utf16().count();
    units.div_ceil(LFN_CHARS_PER_SLOT).max(1) + 1
}

/// Finds the lowest numbered short-name collision (`~K`) not already used
/// among `siblings`' short names that share `base`'s first 6 (sanitized)
/// characters.
fn next_collision_index(existing_short_names: &[String], candidate_base: &str) -> u32 {
    let mut k = 0u32;
    loop {
        let name = make_short_name(candidate_base, k);
        let disp = display_short_name(&name);
        if !existing_short_names.iter().any(|e| e.eq_ignore_ascii_case(&disp)) {
            return k;
        }
        k += 1;
    }
}

/// Writes a new leaf (file or directory) named `name` into the directory
/// chain starting at `parent_cluster`, allocating its own data cluster.
/// Returns the new entry's cluster number.
pub fn write_new_entry(
    volume: &Fat32Volume,
    parent_cluster: u32,
    name: &str,
    attr: u8,
) -> Result<u32, FsError> {
    let siblings = resolve_directory(volume, parent_cluster, IterMode::ListAll)?;
    if siblings.iter().any(|e| e.name.eq_ignore_ascii_case(name)) {
        return Err(FsError::Exists);
    }
    let existing_short: Vec<String> = siblings.iter().map(|e| e.short_name.clone()).collect();
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    let collision = next_collision_index(&existing_short, stem);
    let short_raw = make_short_name(name, collision);
    let checksum = short_name_checksum(&short_raw);

    let new_cluster = volume.alloc_cluster()?;
    if attr & ATTR_DIRECTORY != 0 {
        write_dot_entries(volume, new_cluster, parent_cluster)?;
    }

    let mut to_write = encode_lfn_slots(name, checksum);
    to_write.push(encode_short_entry(short_raw, attr, new_cluster, 0));
    write_entries_into_chain(volume, parent_cluster, &to_write)?;
    Ok(new_cluster)
}

fn write_dot_entries(volume: &Fat32Volume, dir_cluster: u32, parent_cluster: u32) -> Result<(), FsError> {
    let dot = encode_short_entry(*b".          ", ATTR_DIRECTORY, dir_cluster, 0);
    let dotdot_target = if parent_cluster == volume.root_cluster() { 0 } else { parent_cluster };
    let dotdot = encode_short_entry(*b"..         ", ATTR_DIRECTORY, dotdot_target, 0);
    let mut data = volume.read_cluster(dir_cluster)?;
    data[0..DIR_ENTRY_SIZE].copy_from_slice(&dot);
    data[DIR_ENTRY_SIZE..DIR_ENTRY_SIZE * 2].copy_from_slice(&dotdot);
    volume.write_cluster(dir_cluster, &data)
}

/// Finds a contiguous run of `entries.len()` free (empty-end or
/// empty-middle) slots in the directory, extending it with a new cluster
/// if none exists, then writes `entries` into that run.
fn write_entries_into_chain(
    volume: &Fat32Volume,
    start_cluster: u32,
    entries: &[[u8; DIR_ENTRY_SIZE]],
) -> Result<(), FsError> {
    let raw = read_all_raw_entries(volume, start_cluster)?;
    let need = entries.len();

    let mut run_start = None;
    let mut run_len = 0usize;
    for (i, slot) in raw.iter().enumerate() {
        let free = slot.bytes[0] == MARK_EMPTY_END || slot.bytes[0] == MARK_EMPTY_MIDDLE;
        if free {
            if run_len == 0 {
                run_start = Some(i);
            }
            run_len += 1;
            if run_len >= need {
                break;
            }
        } else {
            run_len = 0;
            run_start = None;
        }
    }

    if run_len >= need {
        let start = run_start.unwrap();
        for (k, entry) in entries.iter().enumerate() {
            let loc = raw[start + k].location;
            write_one_entry(volume, loc, entry)?;
        }
        return Ok(());
    }

    // No run large enough: extend the chain with a new cluster and retry
    // against the freshly zeroed (all empty-end) space.
    let tail = volume.chain_clusters(start_cluster)?.last().copied().unwrap_or(start_cluster);
    volume.append_cluster(tail)?;
    write_entries_into_chain(volume, start_cluster, entries)
}

fn write_one_entry(volume: &Fat32Volume, loc: EntryLocation, bytes: &[u8; DIR_ENTRY_SIZE]) -> Result<(), FsError> {
    let mut data = volume.read_cluster(loc.cluster)?;
    let off = loc.index * DIR_ENTRY_SIZE;
    data[off..off + DIR_ENTRY_SIZE].copy_from_slice(bytes);
    volume.write_cluster(loc.cluster, &data)
}

/// Marks the short entry and every preceding LFN slot of `entry` as
/// empty-middle (`0xE5`).
pub fn erase_entry(volume: &Fat32Volume, entry: &ResolvedEntry) -> Result<(), FsError> {
    let marker = [MARK_EMPTY_MIDDLE; DIR_ENTRY_SIZE];
    for loc in &entry.lfn_locations {
        write_one_entry(volume, *loc, &marker)?;
    }
    write_one_entry(volume, entry.location, &marker)
}

/// Rewrites the size field of an already-placed short entry. Used by
/// `write()`/`close()` to flush the file's new length.
pub fn update_entry_size(volume: &Fat32Volume, location: EntryLocation, size: u32) -> Result<(), FsError> {
    let mut data = volume.read_cluster(location.cluster)?;
    let off = location.index * DIR_ENTRY_SIZE + 28;
    data[off..off + 4].copy_from_slice(&size.to_le_bytes());
    volume.write_cluster(location.cluster, &data)
}

/// Rewrites the `cluster_high`/`cluster_low` fields of an already-placed
/// short entry. A freshly created file's entry starts out pointing at
/// cluster 0 (no data yet); the first `write()` allocates its head
/// cluster, and `close()` patches it in here.
pub fn update_entry_cluster(volume: &Fat32Volume, location: EntryLocation, cluster: u32) -> Result<(), FsError> {
    let mut data = volume.read_cluster(location.cluster)?;
    let off = location.index * DIR_ENTRY_SIZE;
    let cluster_high = (cluster >> 16) as u16;
    let cluster_low = (cluster & 0xFFFF) as u16;
    data[off + 20..off + 22].copy_from_slice(&cluster_high.to_le_bytes());
    data[off + 26..off + 28].copy_from_slice(&cluster_low.to_le_bytes());
    volume.write_cluster(location.cluster, &data)
}

/// Looks up a single named entry in a directory without constructing the
/// full `Vec` the caller doesn't need.
pub fn find_in_directory(volume: &Fat32Volume, dir_cluster: u32, name: &str) -> Result<ResolvedEntry, FsError> {
    resolve_directory(volume, dir_cluster, IterMode::ListDirectory)?
        .into_iter()
        .find(|e| e.name.eq_ignore_ascii_case(name))
        .ok_or(FsError::NodeNotFound)
}

/// A directory is "empty" (deletable) if it contains only `.` and `..`.
pub fn is_directory_empty(volume: &Fat32Volume, dir_cluster: u32) -> Result<bool, FsError> {
    let entries = resolve_directory(volume, dir_cluster, IterMode::ListDirectory)?;
    Ok(entries
        .iter()
        .all(|e| e.short_name == "." || e.short_name == ".."))
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;
    use crate::fs::blockdev::RamBlockDevice;

    fn format_test_volume(total_sectors: u32) -> Fat32Volume {
        let dev = Arc::new(RamBlockDevice::new("test".to_string(), 512, total_sectors as u64));
        let bytes_per_sector: u16 = 512;
        let sectors_per_cluster: u8 = 1;
        let reserved: u16 = 32;
        let fat_count: u8 = 2;
        let fat_size: u32 = 32;
        let root_cluster: u32 = 2;

        let mut sector = vec![0u8; 512];
        sector[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
        sector[13] = sectors_per_cluster;
        sector[14..16].copy_from_slice(&reserved.to_le_bytes());
        sector[16] = fat_count;
        sector[22..24].copy_from_slice(&0u16.to_le_bytes());
        sector[32..36].copy_from_slice(&total_sectors.to_le_bytes());
        sector[36..40].copy_from_slice(&fat_size.to_le_bytes());
        sector[44..48].copy_from_slice(&root_cluster.to_le_bytes());
        sector[510] = 0x55;
        sector[511] = 0xAA;
        dev.write_blocks(0, &sector).unwrap();

        let volume = Fat32Volume::mount(dev).unwrap();
        // Root directory cluster 2 starts as a single zeroed (all-empty-end)
        // cluster -- write_fat_entry(2, EOF) so chain walks terminate.
        volume.write_fat_entry(2, FAT32_EOF).unwrap();
        volume
    }

    #[test_case]
    fn test_bpb_rejects_fat16() {
        let mut sector = vec![0u8; 512];
        sector[22..24].copy_from_slice(&1u16.to_le_bytes()); // fat_size_16 != 0
        sector[510] = 0x55;
        sector[511] = 0xAA;
        assert!(BiosParameterBlock::parse(&sector).is_err());
    }

    #[test_case]
    fn test_cluster_to_lba() {
        let v = format_test_volume(8192);
        // data_start = reserved(32) + fat_count(2)*fat_size(32) = 96
        assert_eq!(v.bpb.cluster_to_lba(2), 96);
        assert_eq!(v.bpb.cluster_to_lba(3), 97);
    }

    #[test_case]
    fn test_alloc_and_free_cluster_roundtrip() {
        let v = format_test_volume(8192);
        let c = v.alloc_cluster().unwrap();
        assert!(c >= 3);
        assert_eq!(v.read_fat_entry(c).unwrap(), FAT32_EOF);
        v.free_chain(c).unwrap();
        assert_eq!(v.read_fat_entry(c).unwrap(), 0);
    }

    #[test_case]
    fn test_short_name_simple() {
        let raw = make_short_name("readme.txt", 0);
        assert_eq!(display_short_name(&raw), "README.TXT");
    }

    #[test_case]
    fn test_short_name_collision_tail() {
        let raw = make_short_name("longfilename.txt", 1);
        let disp = display_short_name(&raw);
        assert!(disp.starts_with("LONGFI~1") || disp.starts_with("LONGF~1"));
    }

    #[test_case]
    fn test_lfn_round_trip() {
        let name = "a very long file name indeed.txt";
        let checksum = 0x42;
        let slots_bytes = encode_lfn_slots(name, checksum);
        // Decode back: parse each slot the way resolve_directory does.
        let mut pending = Vec::new();
        for bytes in &slots_bytes {
            let seq = bytes[0];
            let mut chars = [0u16; LFN_CHARS_PER_SLOT];
            for i in 0..5 {
                chars[i] = u16::from_le_bytes([bytes[1 + i * 2], bytes[2 + i * 2]]);
            }
            for i in 0..6 {
                chars[5 + i] = u16::from_le_bytes([bytes[14 + i * 2], bytes[15 + i * 2]]);
            }
            for i in 0..2 {
                chars[11 + i] = u16::from_le_bytes([bytes[28 + i * 2], bytes[29 + i * 2]]);
            }
            pending.push((seq, bytes[13], chars, EntryLocation { cluster: 0, index: 0 }));
        }
        let decoded = build_long_name(&pending, checksum).unwrap();
        assert_eq!(decoded, name);
    }

    #[test_case]
    fn test_create_find_delete_file() {
        let v = format_test_volume(8192);
        let root = v.root_cluster();
        write_new_entry(&v, root, "hello.txt", ATTR_ARCHIVE).unwrap();
        let found = find_in_directory(&v, root, "hello.txt").unwrap();
        assert_eq!(found.name, "hello.txt");
        assert!(!found.is_directory());

        erase_entry(&v, &found).unwrap();
        assert!(find_in_directory(&v, root, "hello.txt").is_err());
    }

    #[test_case]
    fn test_create_directory_has_dot_entries() {
        let v = format_test_volume(8192);
        let root = v.root_cluster();
        let cluster = write_new_entry(&v, root, "sub", ATTR_DIRECTORY).unwrap();
        assert!(is_directory_empty(&v, cluster).unwrap());
    }

    #[test_case]
    fn test_duplicate_create_fails() {
        let v = format_test_volume(8192);
        let root = v.root_cluster();
        write_new_entry(&v, root, "dup.txt", ATTR_ARCHIVE).unwrap();
        assert_eq!(write_new_entry(&v, root, "dup.txt", ATTR_ARCHIVE), Err(FsError::Exists));
    }
}
