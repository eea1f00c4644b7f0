//! The software page table of the modelled machine and its entries.
//!
//! The machine translates every user memory access through a per-process
//! [`PageTable`]. Entries carry RISC-V-style permission bits: a page must be
//! mapped with `V` to be reachable at all, and the `R`/`W`/`X`/`U` bits gate
//! reads, writes, instruction fetches, and user-mode access. The paging
//! subsystem maps user pages read-only first and upgrades them on the first
//! write fault, which is how dirty tracking is realised; the `D` bit mirrors
//! that upgrade in the entry itself.

use crate::addressing::{Pa, Va};
use crate::mm::{Frame, FramePool, FrameRef};
use alloc::collections::btree_map::BTreeMap;

bitflags::bitflags! {
    /// Flags of a page table entry.
    pub struct PteFlags: usize {
        /// Valid; must be 1 for the entry to take part in translation.
        const V = 1 << 0;
        /// Readable.
        const R = 1 << 1;
        /// Writable.
        const W = 1 << 2;
        /// Executable; instruction fetches are allowed from the page.
        const X = 1 << 3;
        /// User; user-mode accesses are allowed to the page.
        const U = 1 << 4;
        /// Accessed; the entry has been used for a translation.
        const A = 1 << 6;
        /// Dirty; the page has been written through this entry.
        const D = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Memory permission of a mapping, as requested by the paging subsystem.
    pub struct Permission: usize {
        /// Readable.
        const READ = 1 << 0;
        /// Writable.
        const WRITE = 1 << 1;
        /// Executable.
        const EXECUTABLE = 1 << 2;
        /// Accessible from user mode.
        const USER = 1 << 3;
    }
}

impl Permission {
    /// Translates the permission into the page table entry flags that
    /// realise it.
    pub fn into_pte_flags(self) -> PteFlags {
        let mut flags = PteFlags::V;
        if self.contains(Permission::READ) {
            flags |= PteFlags::R;
        }
        if self.contains(Permission::WRITE) {
            flags |= PteFlags::W | PteFlags::D;
        }
        if self.contains(Permission::EXECUTABLE) {
            flags |= PteFlags::X;
        }
        if self.contains(Permission::USER) {
            flags |= PteFlags::U;
        }
        flags
    }
}

/// Enum representing errors of page table operations.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PageTableMappingError {
    /// The given address is not page-aligned.
    Unaligned,
    /// No mapping exists for the given address.
    NotExist,
    /// A mapping already exists for the given address.
    Duplicated,
}

/// A page table entry.
///
/// An entry packs the physical address of the mapped frame with its
/// [`PteFlags`]. The flag bits live in the low bits of the word; the physical
/// address is page-aligned, so the two never overlap.
#[derive(Clone, Copy, Default)]
#[repr(transparent)]
pub struct Pte(pub usize);

impl core::fmt::Debug for Pte {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.pa() {
            Some(pa) => write!(f, "Pte({:#x}, {:?})", pa.into_usize(), self.flags()),
            None => write!(f, "."),
        }
    }
}

impl Pte {
    /// Get the physical address pointed to by this entry.
    ///
    /// # Returns
    /// - `Some(Pa)` if the entry is valid, containing the physical address.
    /// - `None` if the entry is not valid.
    #[inline]
    pub fn pa(&self) -> Option<Pa> {
        if self.flags().contains(PteFlags::V) {
            Pa::new(self.0 & !PteFlags::all().bits())
        } else {
            None
        }
    }

    /// Get the flags associated with this entry.
    #[inline]
    pub const fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    /// Set the physical address for this entry, preserving the flags and
    /// marking it valid.
    ///
    /// # Returns
    /// - `Ok(&mut Self)` if the address is page-aligned.
    /// - `Err(PageTableMappingError::Unaligned)` otherwise.
    #[inline]
    pub fn set_pa(&mut self, pa: Pa) -> Result<&mut Self, PageTableMappingError> {
        let pa = pa.into_usize();
        if pa & 0xfff != 0 {
            Err(PageTableMappingError::Unaligned)
        } else {
            self.0 = pa | self.flags().bits() | PteFlags::V.bits();
            Ok(self)
        }
    }

    /// Set the flags for this entry without modifying the physical address.
    #[inline]
    pub fn set_flags(&mut self, flags: PteFlags) -> &mut Self {
        self.0 = self.pa().map(|n| n.into_usize()).unwrap_or(0) | flags.bits();
        self
    }

    /// Clears the entry, returning the physical address it held.
    #[inline]
    pub fn clear(&mut self) -> Option<Pa> {
        self.pa().inspect(|_| {
            self.0 = 0;
        })
    }
}

/// Page table structure of the modelled machine.
///
/// This represents the page table of a user process. It provides methods for
/// mapping virtual addresses to physical frames with permission levels,
/// unmapping pages, and walking the table to find the entry for a given
/// virtual address. Frames owned by valid entries are released back to the
/// frame pool when the table is cleared or dropped.
pub struct PageTable {
    pool: FramePool,
    entries: BTreeMap<Va, Pte>,
}

impl PageTable {
    /// Create an empty page table backed by `pool`.
    pub fn new(pool: FramePool) -> Self {
        Self {
            pool,
            entries: BTreeMap::new(),
        }
    }

    /// The frame pool this table draws from.
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// Map a virtual address `va` to a frame `frame` with the specified
    /// permission `perm`.
    ///
    /// # Returns
    /// - `Ok(())` on success.
    /// - `Err(PageTableMappingError::Unaligned)` if `va` is not page-aligned.
    /// - `Err(PageTableMappingError::Duplicated)` if `va` is already mapped.
    ///   The frame is released in the error cases.
    pub fn map(
        &mut self,
        va: Va,
        frame: Frame,
        perm: Permission,
    ) -> Result<(), PageTableMappingError> {
        if va.page_offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        let entry = self.entries.entry(va).or_default();
        if entry.flags().contains(PteFlags::V) {
            return Err(PageTableMappingError::Duplicated);
        }
        entry
            .set_pa(frame.into_raw())?
            .set_flags(perm.into_pte_flags());
        Ok(())
    }

    /// Unmap the given virtual address and return the frame that was mapped
    /// to it.
    pub fn unmap(&mut self, va: Va) -> Result<Frame, PageTableMappingError> {
        self.walk_mut(va)?
            .clear()
            .ok_or(PageTableMappingError::NotExist)
    }

    /// Walk the page table to find the entry for the given virtual address.
    ///
    /// # Returns
    /// A reference to the entry, or `Err` if `va` is unaligned or no valid
    /// entry exists.
    pub fn walk(&self, va: Va) -> Result<&Pte, PageTableMappingError> {
        if va.page_offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        match self.entries.get(&va) {
            Some(pte) if pte.flags().contains(PteFlags::V) => Ok(pte),
            _ => Err(PageTableMappingError::NotExist),
        }
    }

    /// Walk the page table to find a mutable view of the entry for the given
    /// virtual address.
    pub fn walk_mut(&mut self, va: Va) -> Result<Walked<'_>, PageTableMappingError> {
        if va.page_offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        let Self { pool, entries } = self;
        match entries.get_mut(&va) {
            Some(pte) if pte.flags().contains(PteFlags::V) => Ok(Walked { pool, pte }),
            _ => Err(PageTableMappingError::NotExist),
        }
    }

    /// Whether a valid mapping exists for `va`.
    pub fn is_mapped(&self, va: Va) -> bool {
        self.walk(va.page_down()).is_ok()
    }

    /// A borrowed view of the frame mapped by a valid entry.
    ///
    /// # Safety
    /// `pa` must come from an entry of this table that stays valid for the
    /// lifetime of the reference.
    pub unsafe fn frame_ref(&self, pa: Pa) -> FrameRef<'_> {
        unsafe { FrameRef::from_pa(&self.pool, pa) }
    }

    /// Clears all entries from the page table and releases the mapped
    /// frames.
    ///
    /// This method is automatically called when a [`PageTable`] is dropped.
    fn clear(&mut self) {
        let Self { pool, entries } = self;
        for (_, pte) in core::mem::take(entries) {
            if let Some(pa) = pte.pa() {
                unsafe { drop(Frame::from_pa(pool, pa)) };
            }
        }
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        self.clear()
    }
}

/// A mutable view of a page table entry associated with a virtual address.
///
/// `Walked` provides safe access for modifying an existing mapping. It is the
/// result of a successful [`PageTable::walk_mut`] and is used for clearing
/// mappings or changing permissions in place.
pub struct Walked<'a> {
    pool: &'a FramePool,
    pte: &'a mut Pte,
}

impl Walked<'_> {
    /// Clears the mapping, returning ownership of the mapped frame.
    ///
    /// # Returns
    /// - `Some(Frame)` if the entry was mapped.
    /// - `None` if the entry was not valid.
    pub fn clear(&mut self) -> Option<Frame> {
        self.pte
            .clear()
            .map(|pa| unsafe { Frame::from_pa(self.pool, pa) })
    }

    /// Adds `flags` to the entry.
    pub fn add_flags(&mut self, flags: PteFlags) {
        let current = self.pte.flags();
        self.pte.set_flags(current | flags);
    }
}

impl core::ops::Deref for Walked<'_> {
    type Target = Pte;

    fn deref(&self) -> &Self::Target {
        self.pte
    }
}

#[cfg(test)]
mod tests {
    use super::{PageTable, PageTableMappingError, Permission, PteFlags};
    use crate::addressing::Va;
    use crate::mm::FramePool;

    #[test]
    fn map_walk_unmap() {
        let pool = FramePool::new(4);
        let mut pt = PageTable::new(pool.clone());
        let va = Va::new(0x4000).unwrap();

        let frame = pool.alloc().unwrap();
        pt.map(va, frame, Permission::READ | Permission::USER)
            .unwrap();
        assert!(pt.is_mapped(va));
        let pte = pt.walk(va).unwrap();
        assert!(pte.flags().contains(PteFlags::V | PteFlags::R | PteFlags::U));
        assert!(!pte.flags().contains(PteFlags::W));

        let frame = pool.alloc().unwrap();
        assert_eq!(
            pt.map(va, frame, Permission::READ),
            Err(PageTableMappingError::Duplicated)
        );

        drop(pt.unmap(va).unwrap());
        assert!(!pt.is_mapped(va));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn drop_releases_frames() {
        let pool = FramePool::new(4);
        let mut pt = PageTable::new(pool.clone());
        for i in 0..3 {
            let frame = pool.alloc().unwrap();
            pt.map(
                Va::new(i * 0x1000).unwrap(),
                frame,
                Permission::READ | Permission::WRITE | Permission::USER,
            )
            .unwrap();
        }
        assert_eq!(pool.in_use(), 3);
        drop(pt);
        assert_eq!(pool.in_use(), 0);
    }
}
