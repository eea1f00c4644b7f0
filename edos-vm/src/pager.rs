//! # Demand paging
//!
//! Physical frames are allocated only at the moment of first access. The
//! `exec` path records **metadata** about the program image and waits; the
//! first touch of each page takes a page fault, and the kernel materializes
//! the page on demand: reading it back from the swap file, demand-loading it
//! from the executable, or zero-filling it for heap and stack growth.
//!
//! The [`DemandPager`] owns everything the policy needs for one process: the
//! [`PageInfoTable`] mirroring the page table, the [`SwapFile`] with its slot
//! bitmap, the executable handle for demand loads, and the FIFO residency
//! counter. [`DemandPager::handle_page_fault`] is the only writer of user
//! page mappings after `exec`.
//!
//! ## Replacement
//!
//! When the frame pool runs dry, the faulting process evicts one of its own
//! resident pages: always the one with the smallest FIFO sequence stamp,
//! assigned when the page became resident. A clean page of the text segment
//! is discarded outright since it can be re-read from the executable;
//! everything else is written to a swap slot first. FIFO is chosen for
//! pedagogical transparency, not performance.
//!
//! ## Dirty tracking
//!
//! Pages are installed read-only unless the installing fault is itself a
//! heap or stack write. The first write through a read-only mapping takes a
//! second fault, which records `dirty` and upgrades the entry with `W`.
//! The `dirty` flag at install time is set iff the installation granted
//! write and the fault was a write.

use crate::page_info::{PageInfo, PageInfoTable, PageState};
use crate::swap::SwapFile;
use alloc::{sync::Arc, vec, vec::Vec};
use edos::addressing::{PAGE_SIZE, Va};
use edos::mm::page_table::{PageTable, Permission, PteFlags};
use edos::sync::atomic::AtomicBool;
use edos::task::AccessKind;
use edos::{KernelError, println};
use core::ops::Range;

/// Number of user stack pages of a process.
pub const USERSTACK: usize = 4;

/// Number of page records a memory-stats snapshot carries.
pub const MAX_PAGES_INFO: usize = 32;

/// The legal address-space intervals of a process after `exec`.
///
/// Text and data are the bounding boxes of the executable's LOAD segments.
/// The stack occupies `[stack_bottom, stack_top)` with a guard page below
/// `stack_bottom`, and the heap grows upward from `heap_start` to the
/// high-water mark `sz`.
#[derive(Clone, Debug)]
pub struct MemoryLayout {
    /// Bounding box of the executable LOAD segments.
    pub text: Range<Va>,
    /// Bounding box of the non-executable LOAD segments.
    pub data: Range<Va>,
    /// Lowest heap address.
    pub heap_start: Va,
    /// Lowest stack address; the page below it is the guard.
    pub stack_bottom: Va,
    /// One past the highest stack address.
    pub stack_top: Va,
    /// Current address-space high-water mark, moved by `sbrk`.
    pub sz: usize,
}

impl MemoryLayout {
    /// A layout with every interval empty.
    pub fn empty() -> Self {
        Self {
            text: Va::ZERO..Va::ZERO,
            data: Va::ZERO..Va::ZERO,
            heap_start: Va::ZERO,
            stack_bottom: Va::ZERO,
            stack_top: Va::ZERO,
            sz: 0,
        }
    }
}

/// Growth mode of [`DemandPager::sbrk`].
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum SbrkMode {
    /// Classical eager growth: new pages are backed immediately.
    Eager,
    /// Adjust the high-water mark only; faults back the new pages.
    Lazy,
}

/// Represents the reason for a page fault.
///
/// This struct captures the details the fault handler classifies on: the
/// faulting address, the kind of access that caused the fault, and whether a
/// translation was present (a permission fault) or not (a missing page).
#[derive(Debug)]
pub struct PageFaultReason {
    /// The address that caused the page fault.
    pub fault_addr: Va,
    /// The kind of the faulting access.
    pub access: AccessKind,
    /// Whether the faulting page had a valid translation.
    pub is_present: bool,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum FaultCause {
    Swap,
    Exec,
    Heap,
    Stack,
    Invalid,
}

impl core::fmt::Display for FaultCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            FaultCause::Swap => "swap",
            FaultCause::Exec => "exec",
            FaultCause::Heap => "heap",
            FaultCause::Stack => "stack",
            FaultCause::Invalid => "unknown",
        })
    }
}

/// A snapshot entry of one page, as reported by [`DemandPager::memstat`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PageStat {
    /// Page-aligned virtual address.
    pub va: u64,
    /// Page state: 0 unmapped, 1 resident, 2 swapped.
    pub state: u32,
    /// Whether the page has been written since it became resident.
    pub dirty: u32,
    /// FIFO sequence stamp.
    pub seq: u64,
    /// Swap slot index, or -1.
    pub swap_slot: i64,
}

impl Default for PageStat {
    fn default() -> Self {
        Self {
            va: 0,
            state: 0,
            dirty: 0,
            seq: 0,
            swap_slot: -1,
        }
    }
}

/// A read-only snapshot of a process's page states, for observability.
///
/// Counts are recomputed from the metadata table; they are not authoritative
/// state.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct MemStat {
    /// Process id.
    pub pid: u64,
    /// `ceil(sz / PAGE_SIZE)`.
    pub num_pages_total: u64,
    /// Number of resident pages.
    pub num_resident: u64,
    /// Number of swapped pages.
    pub num_swapped: u64,
    /// Next FIFO sequence stamp to be assigned.
    pub next_fifo_seq: u64,
    /// Number of valid entries in `pages`.
    pub num_reported: u64,
    /// The first [`MAX_PAGES_INFO`] page records.
    pub pages: [PageStat; MAX_PAGES_INFO],
}

/// The demand-paging state of one process.
pub struct DemandPager {
    pid: u64,
    /// The legal address-space intervals.
    pub layout: MemoryLayout,
    pages: PageInfoTable,
    swap: SwapFile,
    exec_file: Option<edos::fs::RegularFile>,
    next_fifo_seq: u64,
    num_swapped_pages: usize,
    killed: Arc<AtomicBool>,
}

impl DemandPager {
    /// Creates the paging state of process `pid` with an empty address
    /// space.
    pub fn new(pid: u64) -> Self {
        Self {
            pid,
            layout: MemoryLayout::empty(),
            pages: PageInfoTable::new(),
            swap: SwapFile::new(pid),
            exec_file: None,
            next_fifo_seq: 0,
            num_swapped_pages: 0,
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The owning process id.
    pub fn pid(&self) -> u64 {
        self.pid
    }

    /// Handle to the asynchronous kill flag of the process.
    ///
    /// The fault handler checks the flag before retrying a frame
    /// allocation, bounding the work done on behalf of a dying process.
    pub fn kill_flag(&self) -> Arc<AtomicBool> {
        self.killed.clone()
    }

    /// Whether the process has been marked killed.
    pub fn is_killed(&self) -> bool {
        self.killed.load()
    }

    /// Marks the process killed.
    pub fn set_killed(&self) {
        self.killed.store(true);
    }

    /// The metadata records of every page the process has touched.
    pub fn pages(&self) -> impl Iterator<Item = &PageInfo> {
        self.pages.iter()
    }

    /// Count of pages whose contents live in the swap file.
    pub fn num_swapped_pages(&self) -> usize {
        self.num_swapped_pages
    }

    /// The FIFO stamp the next resident page will receive.
    pub fn next_fifo_seq(&self) -> u64 {
        self.next_fifo_seq
    }

    /// The swap-slot accounting of the process.
    pub fn swap(&self) -> &SwapFile {
        &self.swap
    }

    /// Records the executable backing demand loads of text and data.
    pub(crate) fn set_exec_file(&mut self, file: edos::fs::RegularFile) {
        self.exec_file = Some(file);
    }

    /// Creates the metadata record for an exec-backed page.
    pub(crate) fn record_exec_page(
        &mut self,
        va: Va,
        file_off: usize,
        file_len: usize,
    ) -> Result<(), KernelError> {
        let info = self
            .pages
            .get_or_insert(va)
            .ok_or(KernelError::NoMemory)?;
        info.file_off = file_off;
        info.file_len = file_len;
        Ok(())
    }

    /// Registers a page the exec path mapped directly (the argv stack page)
    /// as resident.
    pub(crate) fn record_premapped_page(&mut self, va: Va) -> Result<(), KernelError> {
        let seq = self.next_fifo_seq;
        let info = self
            .pages
            .get_or_insert(va)
            .ok_or(KernelError::NoMemory)?;
        info.state = PageState::Resident;
        info.seq = seq;
        info.dirty = true;
        self.next_fifo_seq += 1;
        Ok(())
    }

    /// The maximal permission the segment containing `va` allows, or `None`
    /// outside every legal interval.
    pub fn region_permission(&self, va: Va) -> Option<Permission> {
        let va = va.page_down();
        if self.layout.text.contains(&va) {
            Some(Permission::USER | Permission::READ | Permission::EXECUTABLE)
        } else if self.layout.data.contains(&va)
            || (va >= self.layout.heap_start && va.into_usize() < self.layout.sz)
            || (va >= self.layout.stack_bottom && va < self.layout.stack_top)
        {
            Some(Permission::USER | Permission::READ | Permission::WRITE)
        } else {
            None
        }
    }

    fn classify(&self, va: Va) -> FaultCause {
        if matches!(self.pages.get(va), Some(p) if p.state == PageState::Swapped) {
            return FaultCause::Swap;
        }
        if self.layout.text.contains(&va) || self.layout.data.contains(&va) {
            return FaultCause::Exec;
        }
        if va >= self.layout.heap_start && va.into_usize() < self.layout.sz {
            return FaultCause::Heap;
        }
        if va >= self.layout.stack_bottom && va < self.layout.stack_top {
            return FaultCause::Stack;
        }
        FaultCause::Invalid
    }

    /// Handles a page fault at `reason.fault_addr`.
    ///
    /// The handler runs the state machine of the demand pager:
    /// 1. A present mapping with sufficient permission makes the fault
    ///    spurious.
    /// 2. A write fault on a resident read-only page whose segment allows
    ///    writes records `dirty` and upgrades the entry. This second fault
    ///    is how dirty tracking is realised.
    /// 3. Otherwise the faulting page is classified (swap-in, demand load,
    ///    zero-fill, or invalid), a frame is acquired with at most one
    ///    eviction retry, populated, and mapped.
    ///
    /// # Returns
    /// - `Ok(())` when the access can be retried.
    /// - `Err(KernelError)` when the fault is fatal to the process.
    pub fn handle_page_fault(
        &mut self,
        page_table: &mut PageTable,
        reason: &PageFaultReason,
    ) -> Result<(), KernelError> {
        let va = reason.fault_addr.page_down();
        let is_write = reason.access.is_write();

        if reason.is_present {
            if let Ok(mut walked) = page_table.walk_mut(va) {
                let flags = walked.flags();
                let needed = match reason.access {
                    AccessKind::Read => PteFlags::R,
                    AccessKind::Write => PteFlags::W,
                    AccessKind::Execute => PteFlags::X,
                };
                if flags.contains(needed) {
                    // Spurious: resolved before this fault was serviced.
                    return Ok(());
                }
                let upgradable = is_write
                    && matches!(self.region_permission(va), Some(p) if p.contains(Permission::WRITE));
                if upgradable {
                    let info = self.pages.get_mut(va).ok_or(KernelError::InvalidAccess)?;
                    info.dirty = true;
                    walked.add_flags(PteFlags::W | PteFlags::D);
                    return Ok(());
                }
                return Err(KernelError::InvalidAccess);
            }
        }

        let cause = self.classify(va);
        println!(
            "[pid {}] PAGEFAULT va={:#x} access={} cause={}",
            self.pid,
            va.into_usize(),
            reason.access,
            cause
        );
        if cause == FaultCause::Invalid {
            return Err(KernelError::InvalidAccess);
        }

        // Make sure a metadata record exists before committing a frame; heap
        // and stack pages come into existence here.
        if self.pages.get_or_insert(va).is_none() {
            println!("[pid {}] MEMFULL", self.pid);
            self.killed.store(true);
            return Err(KernelError::NoMemory);
        }

        // Acquire a frame, evicting one of our own pages under pressure.
        let frame = match page_table.pool().alloc() {
            Some(frame) => frame,
            None => {
                if self.killed.load() {
                    return Err(KernelError::OperationNotPermitted);
                }
                self.evict_one(page_table)?;
                match page_table.pool().alloc() {
                    Some(frame) => frame,
                    None => {
                        println!("[pid {}] MEMFULL", self.pid);
                        self.killed.store(true);
                        return Err(KernelError::NoMemory);
                    }
                }
            }
        };
        let mut frame = frame;
        // Frames leave the pool zero-filled; heap and stack pages need no
        // further population.

        match cause {
            FaultCause::Swap => {
                let slot = self
                    .pages
                    .get(va)
                    .and_then(|p| p.swap_slot)
                    .ok_or(KernelError::InvalidAccess)?;
                self.swap.read_slot(slot, frame.inner_mut())?;
                // The read must complete before the entry is installed, and
                // the state is re-validated after the I/O.
                let info = self.pages.get_mut(va).ok_or(KernelError::InvalidAccess)?;
                if info.state != PageState::Swapped {
                    return Ok(());
                }
                info.swap_slot = None;
                self.swap.free_slot(slot);
                self.num_swapped_pages -= 1;
                println!("[pid {}] SWAPIN  va={:#x} slot={}", self.pid, va.into_usize(), slot);
            }
            FaultCause::Exec => {
                let (file_off, file_len) = self
                    .pages
                    .get(va)
                    .map(|p| (p.file_off, p.file_len))
                    .ok_or(KernelError::InvalidAccess)?;
                if file_len > 0 {
                    let file = self.exec_file.as_ref().ok_or(KernelError::NoExec)?;
                    if file.read(file_off, &mut frame.inner_mut()[..file_len])? != file_len {
                        return Err(KernelError::IOError);
                    }
                }
                println!("[pid {}] LOADEXEC va={:#x}", self.pid, va.into_usize());
            }
            FaultCause::Heap | FaultCause::Stack => {
                println!("[pid {}] ALLOC   va={:#x}", self.pid, va.into_usize());
            }
            FaultCause::Invalid => unreachable!(),
        }

        // Install the entry: user-readable always, executable iff text,
        // writable only for a heap or stack write fault so that the first
        // write elsewhere upgrades the page and records dirty.
        let mut perm = Permission::USER | Permission::READ;
        if self.layout.text.contains(&va) {
            perm |= Permission::EXECUTABLE;
        }
        let writable = is_write && matches!(cause, FaultCause::Heap | FaultCause::Stack);
        if writable {
            perm |= Permission::WRITE;
        }
        page_table
            .map(va, frame, perm)
            .map_err(|_| KernelError::NoMemory)?;

        let seq = self.next_fifo_seq;
        self.next_fifo_seq += 1;
        let info = self.pages.get_mut(va).ok_or(KernelError::InvalidAccess)?;
        info.state = PageState::Resident;
        info.seq = seq;
        info.dirty = writable;
        println!(
            "[pid {}] RESIDENT va={:#x} seq={}",
            self.pid,
            va.into_usize(),
            seq
        );
        Ok(())
    }

    /// Evicts the resident page with the smallest FIFO sequence stamp.
    ///
    /// A clean text page is discarded; anything else is swapped out, with
    /// the slot write completing before the entry is cleared. The physical
    /// frame is released in both cases.
    ///
    /// # Returns
    /// - `Ok(())` when a frame was freed.
    /// - `Err(KernelError::NoMemory)` when no resident page exists.
    /// - `Err(KernelError::NoSpace)` when the swap file is out of slots; the
    ///   process is marked killed.
    pub fn evict_one(&mut self, page_table: &mut PageTable) -> Result<(), KernelError> {
        let (va, seq, dirty) = self
            .pages
            .iter()
            .filter(|p| p.state == PageState::Resident)
            .min_by_key(|p| p.seq)
            .map(|p| (p.va, p.seq, p.dirty))
            .ok_or(KernelError::NoMemory)?;

        println!(
            "[pid {}] VICTIM  va={:#x} seq={} algo=FIFO",
            self.pid,
            va.into_usize(),
            seq
        );
        println!(
            "[pid {}] EVICT   va={:#x} state={}",
            self.pid,
            va.into_usize(),
            if dirty { "dirty" } else { "clean" }
        );

        if !dirty && self.layout.text.contains(&va) {
            // Re-readable from the executable.
            println!("[pid {}] DISCARD va={:#x}", self.pid, va.into_usize());
            drop(
                page_table
                    .unmap(va)
                    .map_err(|_| KernelError::InvalidAccess)?,
            );
            let info = self.pages.get_mut(va).ok_or(KernelError::InvalidAccess)?;
            info.state = PageState::Unmapped;
            info.swap_slot = None;
            return Ok(());
        }

        let Some(slot) = self.swap.alloc_slot() else {
            println!(
                "[pid {}] KILL    swap-exhausted used_slots={}",
                self.pid,
                self.swap.used_slots()
            );
            self.killed.store(true);
            return Err(KernelError::NoSpace);
        };

        // The slot write must be durable before the entry is cleared.
        let pa = page_table
            .walk(va)
            .ok()
            .and_then(|pte| pte.pa())
            .ok_or(KernelError::InvalidAccess)?;
        let contents = unsafe { page_table.frame_ref(pa) };
        if let Err(e) = self.swap.write_slot(slot, contents.inner()) {
            self.swap.free_slot(slot);
            return Err(e);
        }
        println!(
            "[pid {}] SWAPOUT va={:#x} slot={}",
            self.pid,
            va.into_usize(),
            slot
        );

        drop(
            page_table
                .unmap(va)
                .map_err(|_| KernelError::InvalidAccess)?,
        );
        let info = self.pages.get_mut(va).ok_or(KernelError::InvalidAccess)?;
        info.state = PageState::Swapped;
        info.swap_slot = Some(slot);
        self.num_swapped_pages += 1;
        Ok(())
    }

    /// Grows or shrinks the address space by `n` bytes.
    ///
    /// Positive growth moves `sz`; in [`SbrkMode::Eager`] the new pages are
    /// backed and mapped immediately (read-only, so the first write still
    /// funnels through the dirty-tracking upgrade). Negative `n` always
    /// shrinks eagerly, releasing frames, swap slots, and metadata of the
    /// dropped pages.
    ///
    /// # Returns
    /// The previous high-water mark.
    pub fn sbrk(
        &mut self,
        page_table: &mut PageTable,
        n: isize,
        mode: SbrkMode,
    ) -> Result<usize, KernelError> {
        let old = self.layout.sz;
        if n == 0 {
            return Ok(old);
        }
        if n > 0 {
            let new = old
                .checked_add(n as usize)
                .and_then(|end| Va::new(end).map(|_| end))
                .ok_or(KernelError::NoMemory)?;
            if mode == SbrkMode::Eager {
                let mut va = Va::new(old).unwrap().page_up();
                let end = Va::new(new).unwrap().page_up();
                while va < end {
                    let frame = match page_table.pool().alloc() {
                        Some(frame) => frame,
                        None => {
                            self.evict_one(page_table)?;
                            page_table.pool().alloc().ok_or(KernelError::NoMemory)?
                        }
                    };
                    page_table
                        .map(va, frame, Permission::USER | Permission::READ)
                        .map_err(|_| KernelError::NoMemory)?;
                    let seq = self.next_fifo_seq;
                    self.next_fifo_seq += 1;
                    let info = self
                        .pages
                        .get_or_insert(va)
                        .ok_or(KernelError::NoMemory)?;
                    info.state = PageState::Resident;
                    info.seq = seq;
                    info.dirty = false;
                    va = va + PAGE_SIZE;
                }
            }
            self.layout.sz = new;
        } else {
            let shrink = n.unsigned_abs();
            let new = old.checked_sub(shrink).ok_or(KernelError::InvalidArgument)?;
            if new < self.layout.heap_start.into_usize() {
                return Err(KernelError::InvalidArgument);
            }
            let first_dropped = Va::new(new).unwrap().page_up();
            let dropped: Vec<Va> = self
                .pages
                .iter()
                .filter(|p| p.va >= first_dropped && p.va >= self.layout.heap_start)
                .map(|p| p.va)
                .collect();
            for va in dropped {
                let info = self.pages.remove(va).unwrap();
                match info.state {
                    PageState::Resident => {
                        drop(
                            page_table
                                .unmap(va)
                                .map_err(|_| KernelError::InvalidAccess)?,
                        );
                    }
                    PageState::Swapped => {
                        if let Some(slot) = info.swap_slot {
                            self.swap.free_slot(slot);
                        }
                        self.num_swapped_pages -= 1;
                    }
                    PageState::Unmapped => {}
                }
            }
            self.layout.sz = new;
        }
        Ok(old)
    }

    /// Takes the observability snapshot of the process's page states.
    pub fn memstat(&self) -> MemStat {
        let mut stat = MemStat {
            pid: self.pid,
            num_pages_total: self.layout.sz.div_ceil(PAGE_SIZE) as u64,
            num_resident: 0,
            num_swapped: 0,
            next_fifo_seq: self.next_fifo_seq,
            num_reported: 0,
            pages: [PageStat::default(); MAX_PAGES_INFO],
        };
        for info in self.pages.iter() {
            match info.state {
                PageState::Resident => stat.num_resident += 1,
                PageState::Swapped => stat.num_swapped += 1,
                PageState::Unmapped => {}
            }
            if (stat.num_reported as usize) < MAX_PAGES_INFO {
                stat.pages[stat.num_reported as usize] = PageStat {
                    va: info.va.into_usize() as u64,
                    state: match info.state {
                        PageState::Unmapped => 0,
                        PageState::Resident => 1,
                        PageState::Swapped => 2,
                    },
                    dirty: info.dirty as u32,
                    seq: info.seq,
                    swap_slot: info.swap_slot.map(|s| s as i64).unwrap_or(-1),
                };
                stat.num_reported += 1;
            }
        }
        stat
    }

    /// Copies this address space into a fresh pager for a forked child.
    ///
    /// Resident pages are copied into newly allocated frames with the
    /// parent's current entry permissions; swapped pages are copied slot to
    /// slot into the child's swap file. Metadata, including the FIFO stamps
    /// and the residency counter, carries over so the child ages exactly
    /// like its parent.
    pub fn fork_into(
        &self,
        parent_pt: &PageTable,
        child_pid: u64,
        child_pt: &mut PageTable,
    ) -> Result<DemandPager, KernelError> {
        let mut child = DemandPager::new(child_pid);
        child.layout = self.layout.clone();
        child.exec_file = self.exec_file.clone();
        child.next_fifo_seq = self.next_fifo_seq;

        let mut bounce = vec![0u8; PAGE_SIZE];
        for info in self.pages.iter() {
            let mut cinfo: PageInfo = info.clone();
            match info.state {
                PageState::Resident => {
                    let pte = parent_pt
                        .walk(info.va)
                        .map_err(|_| KernelError::InvalidAccess)?;
                    let flags = pte.flags();
                    let pa = pte.pa().ok_or(KernelError::InvalidAccess)?;
                    let mut frame = child_pt.pool().alloc().ok_or(KernelError::NoMemory)?;
                    frame
                        .inner_mut()
                        .copy_from_slice(unsafe { parent_pt.frame_ref(pa) }.inner());
                    let mut perm = Permission::USER | Permission::READ;
                    if flags.contains(PteFlags::W) {
                        perm |= Permission::WRITE;
                    }
                    if flags.contains(PteFlags::X) {
                        perm |= Permission::EXECUTABLE;
                    }
                    child_pt
                        .map(info.va, frame, perm)
                        .map_err(|_| KernelError::NoMemory)?;
                }
                PageState::Swapped => {
                    let slot = info.swap_slot.ok_or(KernelError::InvalidAccess)?;
                    self.swap.read_slot(slot, &mut bounce)?;
                    let child_slot = child.swap.alloc_slot().ok_or(KernelError::NoSpace)?;
                    child.swap.write_slot(child_slot, &bounce)?;
                    cinfo.swap_slot = Some(child_slot);
                    child.num_swapped_pages += 1;
                }
                PageState::Unmapped => {}
            }
            child.pages.insert(cinfo).ok_or(KernelError::NoMemory)?;
        }
        Ok(child)
    }
}

impl Drop for DemandPager {
    fn drop(&mut self) {
        let freed = self.swap.cleanup();
        println!("[pid {}] SWAPCLEANUP freed_slots={}", self.pid, freed);
    }
}
