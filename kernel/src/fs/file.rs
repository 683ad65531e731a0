//! Open file and directory-stream handles, and the FAT32 [`FsDriver`]
//! implementation that produces them.
//!
//! A directory stream is materialized eagerly into a `Vec<ResolvedEntry>`
//! when opened rather than walked lazily cluster-by-cluster on every
//! `next()` -- directories in this kernel are small, and an eager snapshot
//! means a `create`/`delete` racing a concurrent directory listing can
//! never corrupt the iterator's position.

extern crate alloc;

use alloc::{string::String, string::ToString, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use super::fat32::{self, EntryLocation, Fat32Volume, IterMode, ResolvedEntry};
use super::{split_components, FsDriver, NodeInfo, OpenMode, OpenedNode};
use crate::error::FsError;

/// An open file: caches the cluster chain, the directory entry's on-disk
/// location (to flush a new size back), and the caller's current byte
/// offset. `read`/`write` take `&self` and serialize through `state` so a
/// handle can be shared behind an `Arc` by a process's open-node table.
pub struct OpenFile {
    volume: Arc<Fat32Volume>,
    entry_location: EntryLocation,
    start_cluster: u32,
    state: Mutex<OpenFileState>,
    offset: AtomicU64,
    size: AtomicU32,
    dirty: core::sync::atomic::AtomicBool,
}

struct OpenFileState {
    /// Cluster chain, resolved once at open and extended on write.
    chain: Vec<u32>,
}

impl OpenFile {
    fn new(volume: Arc<Fat32Volume>, entry: &ResolvedEntry) -> Result<Self, FsError> {
        let chain = if entry.cluster == 0 {
            Vec::new()
        } else {
            volume.chain_clusters(entry.cluster)?
        };
        Ok(Self {
            volume,
            entry_location: entry.location,
            start_cluster: entry.cluster,
            state: Mutex::new(OpenFileState { chain }),
            offset: AtomicU64::new(0),
            size: AtomicU32::new(entry.size),
            dirty: core::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn seek(&self, offset: u64) {
        self.offset.store(offset, Ordering::Release);
    }

    /// Reads up to `buf.len()` bytes starting at the handle's current
    /// offset, following the FAT chain cluster by cluster. Returns the
    /// number of bytes actually read (0 at end of file).
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, FsError> {
        let size = self.size() as u64;
        let mut offset = self.offset.load(Ordering::Acquire);
        if offset >= size {
            return Ok(0);
        }
        let to_read = core::cmp::min(buf.len() as u64, size - offset) as usize;
        let cluster_size = self.volume.bpb.cluster_size_bytes() as u64;
        let state = self.state.lock();
        let mut read_total = 0usize;

        while read_total < to_read {
            let cluster_index = (offset / cluster_size) as usize;
            let Some(&cluster) = state.chain.get(cluster_index) else {
                break;
            };
            let in_cluster_off = (offset % cluster_size) as usize;
            let data = self.volume.read_cluster(cluster)?;
            let avail = cluster_size as usize - in_cluster_off;
            let take = core::cmp::min(avail, to_read - read_total);
            buf[read_total..read_total + take].copy_from_slice(&data[in_cluster_off..in_cluster_off + take]);
            read_total += take;
            offset += take as u64;
        }
        self.offset.store(offset, Ordering::Release);
        Ok(read_total)
    }

    /// Writes `buf` at the handle's current offset, allocating new
    /// clusters as the chain needs to grow. Updates the in-memory size;
    /// the on-disk directory entry is only rewritten by `flush`/`close`.
    pub fn write(&self, buf: &[u8]) -> Result<usize, FsError> {
        let cluster_size = self.volume.bpb.cluster_size_bytes() as u64;
        let mut offset = self.offset.load(Ordering::Acquire);
        let mut state = self.state.lock();
        let mut written = 0usize;

        while written < buf.len() {
            let cluster_index = (offset / cluster_size) as usize;
            while cluster_index >= state.chain.len() {
                let new_cluster = match state.chain.last() {
                    Some(&tail) => self.volume.append_cluster(tail)?,
                    None => self.volume.alloc_cluster()?,
                };
                state.chain.push(new_cluster);
            }
            let cluster = state.chain[cluster_index];
            let in_cluster_off = (offset % cluster_size) as usize;
            let mut data = self.volume.read_cluster(cluster)?;
            let avail = cluster_size as usize - in_cluster_off;
            let take = core::cmp::min(avail, buf.len() - written);
            data[in_cluster_off..in_cluster_off + take].copy_from_slice(&buf[written..written + take]);
            self.volume.write_cluster(cluster, &data)?;
            written += take;
            offset += take as u64;
        }

        self.offset.store(offset, Ordering::Release);
        let new_size = core::cmp::max(self.size(), offset as u32);
        self.size.store(new_size, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(written)
    }

    /// Rewrites the directory entry's size field, and its cluster fields
    /// if this handle allocated the file's first cluster, if the handle
    /// has unflushed writes. Idempotent.
    pub fn flush(&self) -> Result<(), FsError> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            if self.start_cluster == 0 {
                if let Some(head) = self.state.lock().chain.first().copied() {
                    fat32::update_entry_cluster(&self.volume, self.entry_location, head)?;
                }
            }
            fat32::update_entry_size(&self.volume, self.entry_location, self.size())?;
        }
        Ok(())
    }

    pub fn entry_location(&self) -> EntryLocation {
        self.entry_location
    }
}

/// An eagerly snapshotted directory listing.
pub struct DirectoryStream {
    entries: Vec<ResolvedEntry>,
    position: AtomicUsize,
}

impl DirectoryStream {
    fn new(entries: Vec<ResolvedEntry>) -> Self {
        Self {
            entries,
            position: AtomicUsize::new(0),
        }
    }

    /// Returns the next entry, or `Err(DirectoryStreamEnd)` once exhausted.
    pub fn next(&self) -> Result<NodeInfo, FsError> {
        let idx = self.position.fetch_add(1, Ordering::AcqRel);
        let entry = self.entries.get(idx).ok_or(FsError::DirectoryStreamEnd)?;
        Ok(NodeInfo {
            name: entry.name.clone(),
            is_directory: entry.is_directory(),
            size: entry.size,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The FAT32 flavour of [`FsDriver`]. Owns the mounted volume and
/// translates VFS-relative paths into cluster-chain walks.
pub struct Fat32Driver {
    volume: Arc<Fat32Volume>,
}

impl Fat32Driver {
    pub fn new(volume: Arc<Fat32Volume>) -> Self {
        Self { volume }
    }

    /// Walks from the root cluster through every directory component of
    /// `path` but the last, returning that directory's cluster and the
    /// leaf component's name.
    fn resolve_parent(&self, path: &str) -> Result<(u32, String), FsError> {
        let components = split_components(path);
        let Some((leaf, dirs)) = components.split_last() else {
            return Err(FsError::BadPath);
        };
        let mut cluster = self.volume.root_cluster();
        for dir in dirs {
            let entry = fat32::find_in_directory(&self.volume, cluster, dir)?;
            if !entry.is_directory() {
                return Err(FsError::NodeIsFile);
            }
            cluster = entry.cluster;
        }
        Ok((cluster, leaf.to_string()))
    }

    fn resolve_entry(&self, path: &str) -> Result<ResolvedEntry, FsError> {
        if split_components(path).is_empty() {
            return Err(FsError::BadPath);
        }
        let (parent_cluster, leaf) = self.resolve_parent(path)?;
        fat32::find_in_directory(&self.volume, parent_cluster, &leaf)
    }

    fn directory_cluster(&self, path: &str) -> Result<u32, FsError> {
        if split_components(path).is_empty() {
            return Ok(self.volume.root_cluster());
        }
        let entry = self.resolve_entry(path)?;
        if !entry.is_directory() {
            return Err(FsError::NodeIsFile);
        }
        Ok(entry.cluster)
    }
}

impl FsDriver for Fat32Driver {
    fn format(&self) -> Result<(), FsError> {
        // The volume's boot sector, FAT, and root directory are laid down
        // by the disk image this kernel boots from; a live reformat would
        // require rewriting the BPB itself, which this driver does not
        // expose. Re-zeroing the root directory is the useful subset for
        // bring-up against a blank image.
        let root = self.volume.root_cluster();
        let zeros = alloc::vec![0u8; self.volume.bpb.cluster_size_bytes()];
        self.volume.write_cluster(root, &zeros)
    }

    fn mount(&self) -> Result<(), FsError> {
        Ok(())
    }

    fn unmount(&self) -> Result<(), FsError> {
        Ok(())
    }

    fn is_valid_file_path(&self, path: &str) -> bool {
        let components = split_components(path);
        if components.is_empty() {
            return false;
        }
        components.iter().all(|c| !c.is_empty() && c.len() <= 255 && !c.contains('\0'))
    }

    fn create(&self, path: &str, is_directory: bool) -> Result<(), FsError> {
        if !self.is_valid_file_path(path) {
            return Err(FsError::BadPath);
        }
        let (parent_cluster, leaf) = self.resolve_parent(path)?;
        let attr = if is_directory { fat32::ATTR_DIRECTORY } else { fat32::ATTR_ARCHIVE };
        fat32::write_new_entry(&self.volume, parent_cluster, &leaf, attr)?;
        Ok(())
    }

    fn open(&self, path: &str, _mode: OpenMode) -> Result<OpenedNode, FsError> {
        let entry = self.resolve_entry(path)?;
        if entry.is_directory() {
            let entries = fat32::resolve_directory(&self.volume, entry.cluster, IterMode::ListDirectory)?;
            return Ok(OpenedNode::Directory(DirectoryStream::new(entries)));
        }
        Ok(OpenedNode::File(Arc::new(OpenFile::new(self.volume.clone(), &entry)?)))
    }

    fn find_node(&self, path: &str) -> Result<NodeInfo, FsError> {
        if split_components(path).is_empty() {
            return Ok(NodeInfo {
                name: String::from("/"),
                is_directory: true,
                size: 0,
            });
        }
        let entry = self.resolve_entry(path)?;
        Ok(NodeInfo {
            name: entry.name,
            is_directory: entry.is_directory(),
            size: entry.size,
        })
    }

    fn delete_node(&self, path: &str) -> Result<(), FsError> {
        let entry = self.resolve_entry(path)?;
        if entry.is_directory() {
            if !fat32::is_directory_empty(&self.volume, entry.cluster)? {
                return Err(FsError::NodeInUse);
            }
        } else if entry.cluster != 0 {
            self.volume.free_chain(entry.cluster)?;
        }
        fat32::erase_entry(&self.volume, &entry)
    }

    fn open_directory_stream(&self, path: &str, mode: IterMode) -> Result<DirectoryStream, FsError> {
        let cluster = self.directory_cluster(path)?;
        let entries = fat32::resolve_directory(&self.volume, cluster, mode)?;
        Ok(DirectoryStream::new(entries))
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::fs::blockdev::RamBlockDevice;

    fn new_test_driver() -> Fat32Driver {
        let dev = Arc::new(RamBlockDevice::new(String::from("test"), 512, 8192));
        let mut sector = vec![0u8; 512];
        sector[11..13].copy_from_slice(&512u16.to_le_bytes());
        sector[13] = 1;
        sector[14..16].copy_from_slice(&32u16.to_le_bytes());
        sector[16] = 2;
        sector[32..36].copy_from_slice(&8192u32.to_le_bytes());
        sector[36..40].copy_from_slice(&32u32.to_le_bytes());
        sector[44..48].copy_from_slice(&2u32.to_le_bytes());
        sector[510] = 0x55;
        sector[511] = 0xAA;
        dev.write_blocks(0, &sector).unwrap();
        let volume = Fat32Volume::mount(dev).unwrap();
        volume.write_fat_entry(2, fat32::FAT32_EOF).unwrap();
        Fat32Driver::new(Arc::new(volume))
    }

    #[test_case]
    fn test_create_and_write_read_file() {
        let driver = new_test_driver();
        driver.create("/hello.txt", false).unwrap();
        match driver.open("/hello.txt", OpenMode::ReadWrite).unwrap() {
            OpenedNode::File(f) => {
                assert_eq!(f.write(b"hello\n").unwrap(), 6);
                f.flush().unwrap();
                assert_eq!(f.size(), 6);
            }
            OpenedNode::Directory(_) => panic!("expected file"),
        }

        match driver.open("/hello.txt", OpenMode::Read).unwrap() {
            OpenedNode::File(f) => {
                let mut buf = [0u8; 16];
                let n = f.read(&mut buf).unwrap();
                assert_eq!(&buf[..n], b"hello\n");
            }
            OpenedNode::Directory(_) => panic!("expected file"),
        }
    }

    #[test_case]
    fn test_nested_create_and_find() {
        let driver = new_test_driver();
        driver.create("/A", true).unwrap();
        driver.create("/A/B", true).unwrap();
        driver.create("/A/B/C.txt", false).unwrap();
        let info = driver.find_node("/A/B/C.txt").unwrap();
        assert!(!info.is_directory);
    }

    #[test_case]
    fn test_delete_nonempty_directory_fails() {
        let driver = new_test_driver();
        driver.create("/D", true).unwrap();
        driver.create("/D/E", true).unwrap();
        assert_eq!(driver.delete_node("/D"), Err(FsError::NodeInUse));
        driver.delete_node("/D/E").unwrap();
        driver.delete_node("/D").unwrap();
        assert_eq!(driver.find_node("/D"), Err(FsError::NodeNotFound));
    }

    #[test_case]
    fn test_directory_stream_lists_entries() {
        let driver = new_test_driver();
        driver.create("/one.txt", false).unwrap();
        driver.create("/two.txt", false).unwrap();
        let stream = driver.open_directory_stream("/", IterMode::ListDirectory).unwrap();
        let mut names = Vec::new();
        while let Ok(info) = stream.next() {
            names.push(info.name);
        }
        assert!(names.contains(&String::from("one.txt")));
        assert!(names.contains(&String::from("two.txt")));
    }
}
