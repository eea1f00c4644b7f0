//! The in-memory filesystem backing the modelled machine.
//!
//! [`MemFs`] stands in for the disk-backed filesystem of the real machine.
//! It implements the full [`traits`](super::traits) interface over heap
//! storage, which is all the paging subsystem needs: swap files and
//! executables behave exactly like inode-backed files, minus the disk.

use super::{Directory, File, InodeNumber, RegularFile, traits};
use crate::KernelError;
use crate::sync::SpinLock;
use crate::sync::atomic::AtomicU32;
use alloc::{
    collections::btree_map::BTreeMap,
    string::{String, ToString},
    vec::Vec,
};

static INO: AtomicU32 = AtomicU32::new(1);

fn alloc_ino() -> InodeNumber {
    InodeNumber::new(INO.fetch_add(1)).unwrap()
}

/// An in-memory filesystem.
pub struct MemFs {
    root: Directory,
}

impl MemFs {
    /// Creates an empty filesystem with a fresh root directory.
    pub fn new() -> Self {
        Self {
            root: Directory::new(MemDirectory {
                ino: alloc_ino(),
                entries: SpinLock::new(BTreeMap::new()),
            }),
        }
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl traits::FileSystem for MemFs {
    fn root(&self) -> Option<Directory> {
        Some(self.root.clone())
    }
}

struct MemDirectory {
    ino: InodeNumber,
    entries: SpinLock<BTreeMap<String, File>>,
}

impl traits::Directory for MemDirectory {
    fn ino(&self) -> InodeNumber {
        self.ino
    }

    fn open_entry(&self, entry: &str) -> Result<File, KernelError> {
        let guard = self.entries.lock();
        let found = guard.get(entry).cloned();
        guard.unlock();
        found.ok_or(KernelError::NoSuchEntry)
    }

    fn create_entry(&self, entry: &str, is_dir: bool) -> Result<File, KernelError> {
        let mut guard = self.entries.lock();
        if guard.contains_key(entry) {
            guard.unlock();
            return Err(KernelError::FileExist);
        }
        let file = if is_dir {
            File::Directory(Directory::new(MemDirectory {
                ino: alloc_ino(),
                entries: SpinLock::new(BTreeMap::new()),
            }))
        } else {
            File::RegularFile(RegularFile::new(MemFile {
                ino: alloc_ino(),
                data: SpinLock::new(Vec::new()),
            }))
        };
        guard.insert(entry.to_string(), file.clone());
        guard.unlock();
        Ok(file)
    }

    fn unlink_entry(&self, entry: &str) -> Result<(), KernelError> {
        let mut guard = self.entries.lock();
        let removed = guard.remove(entry);
        guard.unlock();
        removed.map(|_| ()).ok_or(KernelError::NoSuchEntry)
    }

    fn read_dir(&self) -> Result<Vec<(InodeNumber, String)>, KernelError> {
        let guard = self.entries.lock();
        let list = guard
            .iter()
            .map(|(name, file)| (file.ino(), name.clone()))
            .collect();
        guard.unlock();
        Ok(list)
    }
}

struct MemFile {
    ino: InodeNumber,
    data: SpinLock<Vec<u8>>,
}

impl traits::RegularFile for MemFile {
    fn ino(&self) -> InodeNumber {
        self.ino
    }

    fn size(&self) -> usize {
        let guard = self.data.lock();
        let size = guard.len();
        guard.unlock();
        size
    }

    fn read_at(&self, off: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let guard = self.data.lock();
        let read_bytes = guard.len().saturating_sub(off).min(buf.len());
        buf[..read_bytes].copy_from_slice(&guard[off..off + read_bytes]);
        guard.unlock();
        Ok(read_bytes)
    }

    fn write_at(&self, off: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let end = off.checked_add(buf.len()).ok_or(KernelError::NoSpace)?;
        let mut guard = self.data.lock();
        if guard.len() < end {
            guard.resize(end, 0);
        }
        guard[off..end].copy_from_slice(buf);
        guard.unlock();
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::root;

    #[test]
    fn create_write_read_unlink() {
        let root = root();
        let file = root
            .create("/mem-fs-selftest", false)
            .unwrap()
            .into_regular_file()
            .unwrap();
        assert_eq!(file.size(), 0);

        // A sparse write zero-fills the gap.
        assert_eq!(file.write(8, b"edos").unwrap(), 4);
        assert_eq!(file.size(), 12);
        let mut buf = [0xffu8; 12];
        assert_eq!(file.read(0, &mut buf).unwrap(), 12);
        assert_eq!(&buf[..8], &[0; 8]);
        assert_eq!(&buf[8..], b"edos");

        // Reads past the end are empty.
        assert_eq!(file.read(100, &mut buf).unwrap(), 0);

        assert!(
            root.read_dir()
                .unwrap()
                .iter()
                .any(|(ino, name)| name == "mem-fs-selftest" && *ino == file.ino())
        );

        root.unlink("/mem-fs-selftest").unwrap();
        assert!(root.open("/mem-fs-selftest").is_err());
    }
}
