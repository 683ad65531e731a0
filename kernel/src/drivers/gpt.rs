//! GPT (GUID Partition Table) discovery.
//!
//! Reads the protective-MBR-following header at LBA 1, verifies its
//! signature, revision and CRC-32, then walks the partition entry array.
//! Vendor partition-type GUIDs are compared as the raw 16-byte, mixed-endian
//! on-disk encoding (Microsoft's GUID layout: the first three fields are
//! little-endian, the last is a plain byte string) rather than through a
//! GUID-formatting crate -- this driver only ever needs equality against a
//! handful of known constants, never to print or parse an arbitrary GUID.

extern crate alloc;
use alloc::{string::String, vec, vec::Vec};

use crate::error::HwError;
use crate::fs::blockdev::BlockDevice;

const SIGNATURE: &[u8; 8] = b"EFI PART";
const SUPPORTED_REVISION: u32 = 0x0001_0000;

/// runeOS partition family type GUID (`8fa4455d-2d55-45ba-8bca-cbcedf48bdf6`).
pub const TYPE_RUNEOS_FAMILY: [u8; 16] = [
    0x5d, 0x45, 0xa4, 0x8f, 0x55, 0x2d, 0xba, 0x45, 0x8b, 0xca, 0xcb, 0xce, 0xdf, 0x48, 0xbd, 0xf6,
];
/// Kernel partition type GUID (`4d3f0533-902a-4642-b125-728c910c1f79`).
pub const TYPE_KERNEL: [u8; 16] = [
    0x33, 0x05, 0x3f, 0x4d, 0x2a, 0x90, 0x42, 0x46, 0xb1, 0x25, 0x72, 0x8c, 0x91, 0x0c, 0x1f, 0x79,
];
/// Data partition type GUID (`7574b273-9503-4d83-8617-678d4c2d30c0`).
pub const TYPE_DATA: [u8; 16] = [
    0x73, 0xb2, 0x74, 0x75, 0x03, 0x95, 0x83, 0x4d, 0x86, 0x17, 0x67, 0x8d, 0x4c, 0x2d, 0x30, 0xc0,
];

/// A decoded partition entry.
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    pub partition_type_guid: [u8; 16],
    pub start_lba: u64,
    pub end_lba: u64,
    pub name: String,
}

impl PartitionEntry {
    pub fn is_runeos(&self) -> bool {
        self.partition_type_guid == TYPE_KERNEL || self.partition_type_guid == TYPE_DATA
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

/// Reads and verifies the GPT header at LBA 1, then decodes every
/// partition entry in its array. Returns an empty `Vec` (logging a
/// warning) if the disk has no valid GPT -- this is not necessarily an
/// error, since not every AHCI disk found on the bus need be a runeOS disk.
pub fn scan(disk: &dyn BlockDevice) -> Result<Vec<PartitionEntry>, HwError> {
    let block_size = disk.block_size();
    let mut header_buf = vec![0u8; block_size];
    disk.read_blocks(1, &mut header_buf)?;

    if &header_buf[0..8] != SIGNATURE {
        log::warn!("gpt: {} has no GPT signature at LBA 1", disk.name());
        return Ok(Vec::new());
    }
    let revision = read_u32(&header_buf, 8);
    if revision != SUPPORTED_REVISION {
        log::warn!(
            "gpt: {} has unsupported GPT revision {:#x}",
            disk.name(),
            revision
        );
        return Ok(Vec::new());
    }
    let header_size = read_u32(&header_buf, 12) as usize;
    let stored_crc = read_u32(&header_buf, 16);

    let mut crc_input = header_buf[0..header_size].to_vec();
    crc_input[16..20].copy_from_slice(&0u32.to_le_bytes());
    let computed_crc = crc32fast::hash(&crc_input);
    if computed_crc != stored_crc {
        log::warn!(
            "gpt: {} header CRC mismatch (stored {:#x}, computed {:#x})",
            disk.name(),
            stored_crc,
            computed_crc
        );
        return Ok(Vec::new());
    }

    let entry_lba = read_u64(&header_buf, 72);
    let entry_count = read_u32(&header_buf, 80) as usize;
    let entry_size = read_u32(&header_buf, 84) as usize;

    let entries_per_block = block_size / entry_size;
    let blocks_needed = entry_count.div_ceil(entries_per_block);
    let mut entries_buf = vec![0u8; blocks_needed * block_size];
    disk.read_blocks(entry_lba, &mut entries_buf)?;

    let mut partitions = Vec::new();
    for i in 0..entry_count {
        let base = i * entry_size;
        let raw = &entries_buf[base..base + entry_size];
        let type_guid: [u8; 16] = raw[0..16].try_into().unwrap();
        if type_guid == [0u8; 16] {
            continue;
        }
        let start_lba = read_u64(raw, 32);
        let end_lba = read_u64(raw, 40);
        let name = decode_utf16_name(&raw[56..56 + 72]);
        partitions.push(PartitionEntry {
            partition_type_guid: type_guid,
            start_lba,
            end_lba,
            name,
        });
    }

    Ok(partitions)
}

/// Decodes a GPT partition name: 36 little-endian UTF-16 code units,
/// NUL-padded.
fn decode_utf16_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
