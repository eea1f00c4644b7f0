//! Memory state of a process.
//!
//! The state of a process's memory is represented by the [`MmStruct`]
//! structure, pairing the process's page table with the [`DemandPager`]
//! that backs it. Every piece of kernel code that touches user memory goes
//! through here: the copy paths validate and translate like the machine's
//! MMU would, taking the page-fault path on a missing translation or an
//! insufficient permission and retrying the access afterwards. The kernel
//! must never crash due to user input; a fault the pager cannot resolve
//! surfaces as an error to the caller.

use crate::pager::{DemandPager, PageFaultReason};
use alloc::{string::String, vec, vec::Vec};
use edos::KernelError;
use edos::addressing::{PAGE_SIZE, Va};
use edos::mm::FramePool;
use edos::mm::page_table::{PageTable, Permission, PteFlags};
use edos::task::AccessKind;
use core::ops::Range;

/// The memory state of one process.
pub struct MmStruct {
    /// The page table that maintains mappings between virtual addresses and
    /// physical frames.
    pub page_table: PageTable,
    /// The pager that materializes pages on demand and evicts them under
    /// pressure.
    pub pager: DemandPager,
}

impl MmStruct {
    /// Creates an empty memory state for process `pid` drawing frames from
    /// `pool`.
    pub fn new(pool: FramePool, pid: u64) -> Self {
        Self {
            page_table: PageTable::new(pool),
            pager: DemandPager::new(pid),
        }
    }

    /// Delegates a page fault to the pager.
    pub fn handle_page_fault(&mut self, reason: &PageFaultReason) -> Result<(), KernelError> {
        let Self { page_table, pager } = self;
        pager.handle_page_fault(page_table, reason)
    }

    /// Check whether a given memory range is accessible by the process.
    ///
    /// This function ensures that system calls using memory addresses
    /// operate only on **valid and accessible** memory regions. It does not
    /// trigger demand paging.
    pub fn access_ok(&self, addr: Range<Va>, is_write: bool) -> bool {
        if addr.start.into_usize() == 0 || addr.end < addr.start {
            return false;
        }
        let mut page = addr.start.page_down();
        let end = addr.end;
        while page < end {
            match self.pager.region_permission(page) {
                Some(perm) if !is_write || perm.contains(Permission::WRITE) => {}
                _ => return false,
            }
            page = page + PAGE_SIZE;
        }
        true
    }

    /// Resolves `page` for an `access`, faulting it in as needed.
    ///
    /// Retries the access after each resolved fault, the way the machine
    /// re-executes a faulting instruction. A write to a swapped page takes
    /// two faults: one to swap the page in read-only, one to upgrade the
    /// entry and record dirty.
    fn ensure_access(&mut self, page: Va, access: AccessKind) -> Result<(), KernelError> {
        let needed = match access {
            AccessKind::Read => PteFlags::R,
            AccessKind::Write => PteFlags::W,
            AccessKind::Execute => PteFlags::X,
        };
        for _ in 0..3 {
            if let Ok(pte) = self.page_table.walk(page)
                && pte.flags().contains(needed | PteFlags::U)
            {
                return Ok(());
            }
            let is_present = self.page_table.is_mapped(page);
            self.handle_page_fault(&PageFaultReason {
                fault_addr: page,
                access,
                is_present,
            })?;
        }
        Err(KernelError::InvalidAccess)
    }

    fn user_copy(
        &mut self,
        va: Va,
        len: usize,
        access: AccessKind,
        mut per_page: impl FnMut(&mut [u8], usize),
    ) -> Result<(), KernelError> {
        let mut off = 0;
        while off < len {
            let addr = va + off;
            let page = addr.page_down();
            let in_page = (PAGE_SIZE - addr.page_offset()).min(len - off);
            self.ensure_access(page, access)?;
            let pa = self
                .page_table
                .walk(page)
                .ok()
                .and_then(|pte| pte.pa())
                .ok_or(KernelError::BadAddress)?;
            let mut frame = unsafe { self.page_table.frame_ref(pa) };
            per_page(
                &mut frame.inner_mut()[addr.page_offset()..addr.page_offset() + in_page],
                off,
            );
            off += in_page;
        }
        Ok(())
    }

    /// Copies `buf.len()` bytes of user memory at `va` into `buf`.
    pub fn copy_from_user(&mut self, va: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        let len = buf.len();
        self.user_copy(va, len, AccessKind::Read, |page, off| {
            buf[off..off + page.len()].copy_from_slice(page);
        })
    }

    /// Copies `buf` into user memory at `va`.
    pub fn copy_to_user(&mut self, va: Va, buf: &[u8]) -> Result<(), KernelError> {
        let len = buf.len();
        self.user_copy(va, len, AccessKind::Write, |page, off| {
            page.copy_from_slice(&buf[off..off + page.len()]);
        })
    }

    /// Performs an instruction fetch at `va`, demand-loading the page when
    /// needed.
    pub fn fetch_instruction(&mut self, va: Va) -> Result<(), KernelError> {
        self.ensure_access(va.page_down(), AccessKind::Execute)
    }

    /// Reads a NUL-terminated string of at most `max` bytes from user
    /// memory.
    pub fn read_user_cstr(&mut self, va: Va, max: usize) -> Result<String, KernelError> {
        let mut bytes = Vec::new();
        let mut off = 0;
        let mut terminated = false;
        'outer: while off < max {
            let chunk = (max - off).min(PAGE_SIZE - (va + off).page_offset());
            let mut buf = vec![0u8; chunk];
            self.copy_from_user(va + off, &mut buf)?;
            for b in buf {
                if b == 0 {
                    terminated = true;
                    break 'outer;
                }
                bytes.push(b);
            }
            off += chunk;
        }
        if !terminated {
            return Err(KernelError::InvalidArgument);
        }
        String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument)
    }

    /// Reads one pointer-sized word from user memory.
    pub fn read_user_usize(&mut self, va: Va) -> Result<usize, KernelError> {
        let mut buf = [0u8; core::mem::size_of::<usize>()];
        self.copy_from_user(va, &mut buf)?;
        Ok(usize::from_le_bytes(buf))
    }
}
