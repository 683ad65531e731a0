//! Device drivers: PCI bus enumeration, AHCI storage, PS/2 keyboard, and
//! GPT-based disk discovery.
//!
//! `init()` brings up the keyboard, then walks the PCI bus for an AHCI
//! controller and, on every disk it finds, scans for a GPT and keeps the
//! runeOS Kernel and Data partitions it recognizes. `fs::init()` reads
//! [`rune_disks`] afterwards to decide what to mount.

extern crate alloc;
use alloc::sync::Arc;

use crate::error::HwError;
use crate::fs::blockdev::BlockDevice;
use crate::sync::GlobalState;

pub mod ahci;
pub mod gpt;
pub mod keyboard;
pub mod pci;

/// A single GPT partition, presented as its own block device: reads and
/// writes are offset by `start_lba` and clamped to the partition's own
/// extent, so the FAT32 driver never needs to know it isn't the whole disk.
pub struct PartitionBlockDevice {
    disk: Arc<dyn BlockDevice>,
    start_lba: u64,
    block_count: u64,
}

impl BlockDevice for PartitionBlockDevice {
    fn name(&self) -> &str {
        self.disk.name()
    }

    fn block_size(&self) -> usize {
        self.disk.block_size()
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&self, start_block: u64, buffer: &mut [u8]) -> Result<(), HwError> {
        self.disk.read_blocks(self.start_lba + start_block, buffer)
    }

    fn write_blocks(&self, start_block: u64, buffer: &[u8]) -> Result<(), HwError> {
        self.disk.write_blocks(self.start_lba + start_block, buffer)
    }

    fn flush(&self) -> Result<(), HwError> {
        self.disk.flush()
    }
}

/// The runeOS partitions found on the boot disk, if any were.
#[derive(Default)]
pub struct RuneDisks {
    pub kernel: Option<Arc<PartitionBlockDevice>>,
    pub data: Option<Arc<PartitionBlockDevice>>,
}

static RUNE_DISKS: GlobalState<RuneDisks> = GlobalState::new();

/// The runeOS Kernel/Data partitions discovered during `init()`. Empty
/// (both `None`) if no AHCI disk carried a recognizable GPT -- this is the
/// expected state in a host-side test build, not a boot failure by itself.
pub fn rune_disks() -> &'static RuneDisks {
    RUNE_DISKS
        .try_get()
        .expect("rune_disks() called before drivers::init()")
        .as_ref()
        .unwrap()
}

fn scan_disk_for_rune_partitions(disk: Arc<dyn BlockDevice>, found: &mut RuneDisks) {
    let partitions = match gpt::scan(&*disk) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("drivers: GPT scan of {} failed: {e}", disk.name());
            return;
        }
    };

    for entry in partitions {
        if entry.partition_type_guid == gpt::TYPE_KERNEL {
            log::info!("drivers: found runeOS kernel partition {:?} on {}", entry.name, disk.name());
            found.kernel = Some(Arc::new(PartitionBlockDevice {
                disk: disk.clone(),
                start_lba: entry.start_lba,
                block_count: entry.end_lba - entry.start_lba + 1,
            }));
        } else if entry.partition_type_guid == gpt::TYPE_DATA {
            log::info!("drivers: found runeOS data partition {:?} on {}", entry.name, disk.name());
            found.data = Some(Arc::new(PartitionBlockDevice {
                disk: disk.clone(),
                start_lba: entry.start_lba,
                block_count: entry.end_lba - entry.start_lba + 1,
            }));
        }
    }
}

/// Brings up every device the boot sequence needs before the VFS mounts.
pub fn init() {
    keyboard::init();
    log::info!("drivers: PS/2 keyboard ready");

    let pci_devices = pci::scan();
    log::info!("drivers: PCI scan found {} functions", pci_devices.len());

    let ahci_controllers = pci::find_by_class(&pci_devices, 0x01, 0x06);
    let mut found = RuneDisks::default();
    for controller in &ahci_controllers {
        log::info!("drivers: AHCI controller at {:?}", controller.location);
        for disk in ahci::probe_controller(controller) {
            let disk: Arc<dyn BlockDevice> = Arc::new(disk);
            log::info!(
                "drivers: disk {} ({} blocks)",
                disk.name(),
                disk.block_count()
            );
            scan_disk_for_rune_partitions(disk, &mut found);
        }
    }

    if found.kernel.is_none() && found.data.is_none() {
        log::warn!("drivers: no runeOS GPT partitions found on any AHCI disk");
    }

    RUNE_DISKS
        .init(found)
        .unwrap_or_else(|_| panic!("drivers initialized twice"));
}
