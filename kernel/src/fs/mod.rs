//! Virtual filesystem: a mount table keyed by the longest matching path
//! prefix, directing each operation at the [`FsDriver`] responsible for
//! that subtree. FAT32 (see [`fat32`]) is the only driver this kernel
//! ships; the trait exists so a second flavour could be added without
//! touching path resolution.

extern crate alloc;

use alloc::{string::String, string::ToString, sync::Arc, vec::Vec};

use spin::RwLock;

use crate::drivers;
use crate::error::FsError;

pub mod blockdev;
pub mod fat32;
pub mod file;

pub use file::{DirectoryStream, OpenFile};

/// Information about a resolved node, independent of its driver.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub is_directory: bool,
    pub size: u32,
}

/// How an `open()` call intends to use the returned handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

/// A resolved, driver-agnostic handle: either a readable/writable file or
/// a directory stream ready to be iterated.
pub enum OpenedNode {
    File(Arc<OpenFile>),
    Directory(DirectoryStream),
}

/// The operations a filesystem flavour must provide. Every path argument
/// is already relative to the driver's mount point (leading mount prefix
/// stripped by [`Vfs::resolve`]).
pub trait FsDriver: Send + Sync {
    /// Writes a fresh BPB, FAT, and root directory over the backing
    /// device. Destructive; not invoked by normal boot (the disk image is
    /// pre-formatted), kept for bring-up tooling.
    fn format(&self) -> Result<(), FsError>;
    /// Re-validates the mounted volume's BPB. The driver is already
    /// mounted by construction; this re-reads the boot sector to catch a
    /// volume that changed out from under a long-lived mount.
    fn mount(&self) -> Result<(), FsError>;
    fn unmount(&self) -> Result<(), FsError>;
    fn is_valid_file_path(&self, path: &str) -> bool;
    fn create(&self, path: &str, is_directory: bool) -> Result<(), FsError>;
    fn open(&self, path: &str, mode: OpenMode) -> Result<OpenedNode, FsError>;
    fn find_node(&self, path: &str) -> Result<NodeInfo, FsError>;
    fn delete_node(&self, path: &str) -> Result<(), FsError>;
    fn open_directory_stream(&self, path: &str, mode: fat32::IterMode) -> Result<DirectoryStream, FsError>;
}

/// Splits an absolute path into non-empty components, ignoring repeated
/// or trailing slashes. `"/"` and `""` both split to an empty vector.
pub fn split_components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Joins path components back into an absolute path. The inverse of
/// `split_components` on well-formed input: `join(&split_components(p)) == p`
/// for any `p` that was already in canonical (no repeated/trailing slash)
/// form.
pub fn join_components(components: &[&str]) -> String {
    if components.is_empty() {
        return String::from("/");
    }
    let mut out = String::new();
    for c in components {
        out.push('/');
        out.push_str(c);
    }
    out
}

/// Expresses `path` relative to `mount_point`. Returns `None` if `path`
/// does not fall under `mount_point` at all. A path that shares only a
/// partial prefix with `mount_point` (diverges on a middle component) is
/// also `None` -- the mount table treats it as "no match" so a shorter,
/// actually-matching mount further up the tree can be tried instead rather
/// than the resolver stopping on a guaranteed-wrong candidate.
pub fn relative_to(path: &str, mount_point: &str) -> Option<String> {
    let path_parts = split_components(path);
    let mount_parts = split_components(mount_point);
    if path_parts.len() < mount_parts.len() {
        return None;
    }
    if path_parts[..mount_parts.len()] != mount_parts[..] {
        return None;
    }
    Some(join_components(&path_parts[mount_parts.len()..]))
}

struct Mount {
    path: String,
    driver: Arc<dyn FsDriver>,
}

/// The mount table. Mounts are kept sorted longest-prefix-first so
/// `resolve` always finds the most specific mount covering a path.
pub struct Vfs {
    mounts: RwLock<Vec<Mount>>,
}

impl Vfs {
    const fn new() -> Self {
        Self {
            mounts: RwLock::new(Vec::new()),
        }
    }

    pub fn mount(&self, path: &str, driver: Arc<dyn FsDriver>) {
        let mut mounts = self.mounts.write();
        mounts.push(Mount {
            path: path.to_string(),
            driver,
        });
        mounts.sort_by(|a, b| split_components(&b.path).len().cmp(&split_components(&a.path).len()));
    }

    pub fn unmount(&self, path: &str) -> Result<(), FsError> {
        let mut mounts = self.mounts.write();
        let idx = mounts.iter().position(|m| m.path == path).ok_or(FsError::NodeNotFound)?;
        mounts[idx].driver.unmount()?;
        mounts.remove(idx);
        Ok(())
    }

    /// Resolves `path` to its owning driver and the path relative to that
    /// driver's mount point.
    fn resolve(&self, path: &str) -> Result<(Arc<dyn FsDriver>, String), FsError> {
        let mounts = self.mounts.read();
        for mount in mounts.iter() {
            if let Some(rel) = relative_to(path, &mount.path) {
                return Ok((mount.driver.clone(), rel));
            }
        }
        Err(FsError::NodeNotFound)
    }

    pub fn create(&self, path: &str, is_directory: bool) -> Result<(), FsError> {
        let (driver, rel) = self.resolve(path)?;
        if !driver.is_valid_file_path(&rel) {
            return Err(FsError::BadPath);
        }
        driver.create(&rel, is_directory)
    }

    pub fn open(&self, path: &str, mode: OpenMode) -> Result<OpenedNode, FsError> {
        let (driver, rel) = self.resolve(path)?;
        driver.open(&rel, mode)
    }

    pub fn find_node(&self, path: &str) -> Result<NodeInfo, FsError> {
        let (driver, rel) = self.resolve(path)?;
        if rel.is_empty() || rel == "/" {
            return Ok(NodeInfo {
                name: String::from("/"),
                is_directory: true,
                size: 0,
            });
        }
        driver.find_node(&rel)
    }

    pub fn delete_node(&self, path: &str) -> Result<(), FsError> {
        let (driver, rel) = self.resolve(path)?;
        driver.delete_node(&rel)
    }

    pub fn open_directory_stream(&self, path: &str, mode: fat32::IterMode) -> Result<DirectoryStream, FsError> {
        let (driver, rel) = self.resolve(path)?;
        driver.open_directory_stream(&rel, mode)
    }
}

static VFS: Vfs = Vfs::new();

pub fn vfs() -> &'static Vfs {
    &VFS
}

/// Mounts the runeOS Kernel partition at `/` and, if present, the Data
/// partition at `/Data`. Absence of either (a host-side test build, or a
/// disk image with only one partition) is not a boot failure: the mount
/// table is simply left without that entry.
pub fn init() {
    let disks = drivers::rune_disks();
    if let Some(kernel_disk) = &disks.kernel {
        match fat32::Fat32Volume::mount(kernel_disk.clone()) {
            Ok(volume) => {
                VFS.mount("/", Arc::new(file::Fat32Driver::new(Arc::new(volume))));
                log::info!("fs: mounted kernel partition at /");
            }
            Err(e) => log::warn!("fs: failed to mount kernel partition: {e}"),
        }
    } else {
        log::warn!("fs: no kernel partition found, / is unmounted");
    }

    if let Some(data_disk) = &disks.data {
        match fat32::Fat32Volume::mount(data_disk.clone()) {
            Ok(volume) => {
                VFS.mount("/Data", Arc::new(file::Fat32Driver::new(Arc::new(volume))));
                log::info!("fs: mounted data partition at /Data");
            }
            Err(e) => log::warn!("fs: failed to mount data partition: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_split_join_roundtrip() {
        let p = "/A/B/C.txt";
        let parts = split_components(p);
        assert_eq!(join_components(&parts), p);
    }

    #[test_case]
    fn test_split_join_root() {
        assert_eq!(join_components(&split_components("/")), "/");
    }

    #[test_case]
    fn test_relative_to_under_mount() {
        assert_eq!(relative_to("/Data/logs/kernel.log", "/Data").as_deref(), Some("/logs/kernel.log"));
    }

    #[test_case]
    fn test_relative_to_exact_mount() {
        assert_eq!(relative_to("/Data", "/Data").as_deref(), Some("/"));
    }

    #[test_case]
    fn test_relative_to_not_under_mount() {
        assert_eq!(relative_to("/Apps/Crucible.app", "/Data"), None);
    }

    #[test_case]
    fn test_relative_to_middle_mismatch() {
        assert_eq!(relative_to("/Datazzz/x", "/Data"), None);
    }
}
