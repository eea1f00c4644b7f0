//! Per-process swap storage.
//!
//! Every process owns a swap file `/pgswp<pid>` divided into
//! [`MAX_SWAP_SLOTS`] fixed-size slots; slot `i` occupies the byte range
//! `[i * PAGE_SIZE, (i + 1) * PAGE_SIZE)`. A bitmap tracks which slots are
//! in use. The allocator does **not** serialize slot reuse with I/O: a
//! caller must write a slot before releasing it, and must not release it
//! until the corresponding page is either unmapped or swapped back in.
//!
//! The file itself is created lazily on the first swap-out and unlinked when
//! the owning process exits, forgetting all slots with it.

use alloc::format;
use edos::KernelError;
use edos::addressing::PAGE_SIZE;
use edos::fs::{self, RegularFile};

/// Number of slots of a swap file. 1024 slots of one page each, 4 MiB of
/// backing store per process, as a hard ceiling.
pub const MAX_SWAP_SLOTS: usize = 1024;

/// The swap file of one process together with its slot allocator.
pub struct SwapFile {
    pid: u64,
    file: Option<RegularFile>,
    // bit i set: slot i in use
    bitmap: [u64; MAX_SWAP_SLOTS / 64],
}

impl SwapFile {
    /// Creates the slot accounting for process `pid`. No file exists until
    /// the first write.
    pub fn new(pid: u64) -> Self {
        Self {
            pid,
            file: None,
            bitmap: [0; MAX_SWAP_SLOTS / 64],
        }
    }

    fn path(&self) -> alloc::string::String {
        format!("/pgswp{}", self.pid)
    }

    /// Allocates the lowest free slot.
    ///
    /// # Returns
    /// The slot index, or `None` when all [`MAX_SWAP_SLOTS`] slots are in
    /// use.
    pub fn alloc_slot(&mut self) -> Option<usize> {
        for (pos, word) in self.bitmap.iter_mut().enumerate() {
            if *word != u64::MAX {
                let ofs = word.trailing_ones() as usize;
                *word |= 1 << ofs;
                return Some(pos * 64 + ofs);
            }
        }
        None
    }

    /// Releases slot `slot`. Out-of-range indices are a no-op.
    pub fn free_slot(&mut self, slot: usize) {
        if slot < MAX_SWAP_SLOTS {
            self.bitmap[slot / 64] &= !(1 << (slot % 64));
        }
    }

    /// Whether slot `slot` is currently allocated.
    pub fn is_allocated(&self, slot: usize) -> bool {
        slot < MAX_SWAP_SLOTS && self.bitmap[slot / 64] & (1 << (slot % 64)) != 0
    }

    /// Number of slots currently in use.
    pub fn used_slots(&self) -> usize {
        self.bitmap.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Writes one page of data into `slot`, creating the swap file on first
    /// use.
    pub fn write_slot(&mut self, slot: usize, buf: &[u8]) -> Result<(), KernelError> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        if self.file.is_none() {
            let root = fs::root();
            let file = match root.open(&self.path()) {
                Ok(f) => f,
                Err(KernelError::NoSuchEntry) => root.create(&self.path(), false)?,
                Err(e) => return Err(e),
            };
            self.file = file.into_regular_file();
        }
        let file = self.file.as_ref().ok_or(KernelError::IOError)?;
        if file.write(slot * PAGE_SIZE, buf)? != PAGE_SIZE {
            return Err(KernelError::IOError);
        }
        Ok(())
    }

    /// Reads one page of data out of `slot`.
    pub fn read_slot(&self, slot: usize, buf: &mut [u8]) -> Result<(), KernelError> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let file = self.file.as_ref().ok_or(KernelError::IOError)?;
        if file.read(slot * PAGE_SIZE, buf)? != PAGE_SIZE {
            return Err(KernelError::IOError);
        }
        Ok(())
    }

    /// Forgets every slot and unlinks the swap file.
    ///
    /// # Returns
    /// The number of slots that were still in use.
    pub fn cleanup(&mut self) -> usize {
        let freed = self.used_slots();
        self.bitmap = [0; MAX_SWAP_SLOTS / 64];
        if self.file.take().is_some() {
            let _ = fs::root().unlink(&self.path());
        }
        freed
    }
}
