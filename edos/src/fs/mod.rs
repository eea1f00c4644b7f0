//! Filesystem abstraction.
//!
//! The kernel consumes storage through a small inode-style interface: byte
//! granular [`read_at`]/[`write_at`] on regular files, and name-based entry
//! management on directories. The paging subsystem keeps its per-process swap
//! files here and demand-loads program segments from executables opened
//! through the same interface.
//!
//! [`read_at`]: traits::RegularFile::read_at
//! [`write_at`]: traits::RegularFile::write_at

pub mod mem;

/// Defines traits for file system operations.
pub mod traits {
    use super::{File, InodeNumber};
    use crate::KernelError;
    use alloc::{string::String, vec::Vec};

    /// Trait representing a filesystem.
    ///
    /// This trait provides access to the root directory of the filesystem,
    /// allowing operations on files and directories.
    pub trait FileSystem
    where
        Self: Sync + Send,
    {
        /// Retrieves the root directory of the filesystem.
        fn root(&self) -> Option<super::Directory>;
    }

    /// Trait representing a regular file in the filesystem.
    ///
    /// A regular file contains user data and supports positional read and
    /// write operations.
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// Returns the inode number of the file.
        fn ino(&self) -> InodeNumber;

        /// Returns the size of the file in bytes.
        fn size(&self) -> usize;

        /// Reads data from the file at byte offset `off` into `buf`.
        ///
        /// # Returns
        /// - `Ok(n)`: The number of bytes read. Reads beyond the end of the
        ///   file return `Ok(0)`.
        /// - `Err(KernelError)`: An error occurred during the read.
        fn read_at(&self, off: usize, buf: &mut [u8]) -> Result<usize, KernelError>;

        /// Writes `buf` into the file at byte offset `off`.
        ///
        /// If the write position is beyond the current file size, the file is
        /// extended (zero-filled) to reflect the update.
        ///
        /// # Returns
        /// - `Ok(n)`: The number of bytes written.
        /// - `Err(KernelError)`: An error occurred during the write.
        fn write_at(&self, off: usize, buf: &[u8]) -> Result<usize, KernelError>;
    }

    /// Trait representing a directory in the filesystem.
    ///
    /// A directory contains entries that reference other files or
    /// directories.
    pub trait Directory
    where
        Self: Send + Sync,
    {
        /// Returns the inode number of the directory.
        fn ino(&self) -> InodeNumber;

        /// Opens an entry by name.
        fn open_entry(&self, entry: &str) -> Result<File, KernelError>;

        /// Creates an entry by name.
        fn create_entry(&self, entry: &str, is_dir: bool) -> Result<File, KernelError>;

        /// Unlinks a directory entry by name.
        fn unlink_entry(&self, entry: &str) -> Result<(), KernelError>;

        /// Lists all the entries within the directory.
        fn read_dir(&self) -> Result<Vec<(InodeNumber, String)>, KernelError>;
    }
}

use crate::KernelError;
use crate::sync::SpinLock;
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::num::NonZeroU32;

static FS: SpinLock<Option<Box<dyn traits::FileSystem>>> = SpinLock::new(None);

/// Retrieves the root directory of the global filesystem.
///
/// The in-memory filesystem is installed on first use when nothing else has
/// been registered.
pub fn root() -> Directory {
    let mut guard = FS.lock();
    let root = guard
        .get_or_insert_with(|| {
            crate::info!("Filesystem: installing the in-memory filesystem.");
            Box::new(mem::MemFs::new())
        })
        .root();
    guard.unlock();
    root.expect("Filesystem is not available.")
}

/// Register the global file system.
pub fn register(fs: impl traits::FileSystem + 'static) {
    let mut guard = FS.lock();
    *guard = Some(Box::new(fs));
    guard.unlock();
}

/// Represents a unique identifier for an inode in the filesystem.
///
/// An inode number uniquely identifies a file or directory within a
/// filesystem. It is typically used to reference file metadata rather than
/// file names.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct InodeNumber(NonZeroU32);

impl InodeNumber {
    /// Creates an [`InodeNumber`] if the given value is not zero.
    pub const fn new(n: u32) -> Option<Self> {
        if let Some(v) = NonZeroU32::new(n) {
            Some(Self(v))
        } else {
            None
        }
    }

    /// Returns the contained value as a u32.
    #[inline]
    pub fn into_u32(&self) -> u32 {
        self.0.get()
    }
}

/// A handle to a regular file.
///
/// This struct provides a reference-counted handle to a file that supports
/// reading and writing operations at the kernel level.
#[derive(Clone)]
pub struct RegularFile(pub Arc<dyn traits::RegularFile>);

impl RegularFile {
    /// Creates a new [`RegularFile`] handle from a given implementation of
    /// [`traits::RegularFile`].
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Inode number of the file.
    pub fn ino(&self) -> InodeNumber {
        self.0.ino()
    }

    /// Returns the size of the file in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Reads data from the file at byte offset `position` into `buf`.
    #[inline]
    pub fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.0.read_at(position, buf)
    }

    /// Writes data from `buf` into the file at byte offset `position`.
    #[inline]
    pub fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.0.write_at(position, buf)
    }
}

/// A handle to a directory.
///
/// This struct represents a reference-counted directory that supports file
/// entry management, including opening, creating, and removing entries.
#[derive(Clone)]
pub struct Directory(pub Arc<dyn traits::Directory>);

impl Directory {
    /// Creates a new [`Directory`] handle from a given implementation of
    /// [`traits::Directory`].
    pub fn new(r: impl traits::Directory + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Inode number of the directory.
    pub fn ino(&self) -> InodeNumber {
        self.0.ino()
    }

    /// Opens a path from the directory.
    #[inline]
    pub fn open(&self, mut path: &str) -> Result<File, KernelError> {
        let mut ret = File::Directory(if path.starts_with("/") {
            path = &path[1..];
            root()
        } else {
            self.clone()
        });

        for part in path.split("/").filter(|&s| !s.is_empty()) {
            match ret {
                File::Directory(d) => ret = d.0.open_entry(part)?,
                File::RegularFile(_) => return Err(KernelError::NotDirectory),
            }
        }
        Ok(ret)
    }

    /// Creates an entry at `path`.
    #[inline]
    pub fn create(&self, mut path: &str, is_dir: bool) -> Result<File, KernelError> {
        let mut dstdir = if path.starts_with("/") {
            path = &path[1..];
            root()
        } else {
            self.clone()
        };

        let mut list: Vec<&str> = path.split("/").filter(|&s| !s.is_empty()).collect();
        let entry = list.pop().ok_or(KernelError::InvalidArgument)?;

        for part in list {
            dstdir = dstdir
                .0
                .open_entry(part)?
                .into_directory()
                .ok_or(KernelError::NoSuchEntry)?;
        }

        dstdir.0.create_entry(entry, is_dir)
    }

    /// Unlinks the entry at `path`.
    #[inline]
    pub fn unlink(&self, mut path: &str) -> Result<(), KernelError> {
        let mut dstdir = if path.starts_with("/") {
            path = &path[1..];
            root()
        } else {
            self.clone()
        };

        let mut list: Vec<&str> = path.split("/").filter(|&s| !s.is_empty()).collect();
        let entry = list.pop().ok_or(KernelError::InvalidArgument)?;

        for part in list {
            dstdir = dstdir
                .0
                .open_entry(part)?
                .into_directory()
                .ok_or(KernelError::NoSuchEntry)?;
        }

        dstdir.0.unlink_entry(entry)
    }

    /// Lists all the entries within the directory.
    #[inline]
    pub fn read_dir(&self) -> Result<Vec<(InodeNumber, String)>, KernelError> {
        self.0.read_dir()
    }
}

/// Represents a file system entry, which can be either a file or a
/// directory.
#[derive(Clone)]
pub enum File {
    /// A regular file.
    RegularFile(RegularFile),
    /// A directory.
    Directory(Directory),
}

impl File {
    /// Converts the [`File`] into a [`RegularFile`], if it is one.
    pub fn into_regular_file(self) -> Option<RegularFile> {
        if let File::RegularFile(r) = self {
            Some(r)
        } else {
            None
        }
    }

    /// Converts the [`File`] into a [`Directory`], if it is one.
    pub fn into_directory(self) -> Option<Directory> {
        if let File::Directory(d) = self {
            Some(d)
        } else {
            None
        }
    }

    /// Get the [`InodeNumber`] of this [`File`] regardless of its inner
    /// type.
    pub fn ino(&self) -> InodeNumber {
        match self {
            File::RegularFile(r) => r.ino(),
            File::Directory(d) => d.ino(),
        }
    }
}
