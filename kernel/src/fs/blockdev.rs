//! Block device abstraction the FAT32 driver reads and writes sectors
//! through. The only real implementation is the AHCI port engine
//! (`crate::drivers::ahci`); `RamBlockDevice` exists for unit tests.

extern crate alloc;
use alloc::vec::Vec;

use crate::error::HwError;

pub trait BlockDevice: Send + Sync {
    fn name(&self) -> &str;
    fn block_size(&self) -> usize;
    fn block_count(&self) -> u64;
    fn read_blocks(&self, start_block: u64, buffer: &mut [u8]) -> Result<(), HwError>;
    fn write_blocks(&self, start_block: u64, buffer: &[u8]) -> Result<(), HwError>;
    fn flush(&self) -> Result<(), HwError> {
        Ok(())
    }
}

/// RAM-backed block device, used by `fat32`'s unit tests.
pub struct RamBlockDevice {
    name: alloc::string::String,
    block_size: usize,
    data: spin::Mutex<Vec<u8>>,
}

impl RamBlockDevice {
    pub fn new(name: alloc::string::String, block_size: usize, block_count: u64) -> Self {
        let size = block_size * block_count as usize;
        Self {
            name,
            block_size,
            data: spin::Mutex::new(alloc::vec![0u8; size]),
        }
    }
}

impl BlockDevice for RamBlockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.lock().len() / self.block_size) as u64
    }

    fn read_blocks(&self, start_block: u64, buffer: &mut [u8]) -> Result<(), HwError> {
        let data = self.data.lock();
        let start = start_block as usize * self.block_size;
        let end = start + buffer.len();
        if end > data.len() {
            return Err(HwError::DeviceError);
        }
        buffer.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_blocks(&self, start_block: u64, buffer: &[u8]) -> Result<(), HwError> {
        let mut data = self.data.lock();
        let start = start_block as usize * self.block_size;
        let end = start + buffer.len();
        if end > data.len() {
            return Err(HwError::DeviceError);
        }
        data[start..end].copy_from_slice(buffer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use super::*;

    #[test_case]
    fn test_ram_block_device() {
        let dev = RamBlockDevice::new(String::from("test"), 512, 100);
        assert_eq!(dev.block_size(), 512);
        assert_eq!(dev.block_count(), 100);

        let write_data = [0x42u8; 512];
        dev.write_blocks(0, &write_data).unwrap();

        let mut read_data = [0u8; 512];
        dev.read_blocks(0, &mut read_data).unwrap();
        assert_eq!(read_data, write_data);
    }
}
