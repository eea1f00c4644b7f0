//! Shared helpers of the user-program tests: a minimal ELF image builder,
//! process setup shortcuts, and the universal invariant checker.
#![allow(dead_code)]

use edos::addressing::{PAGE_SIZE, Va};
use edos::fs;
use edos::mm::FramePool;
use edos_vm::Process;
use edos_vm::page_info::PageState;
use edos_vm::pager::SbrkMode;

/// Segment is executable.
pub const PF_X: u32 = 1;
/// Segment is writable.
pub const PF_W: u32 = 2;
/// Segment is readable.
pub const PF_R: u32 = 4;

/// One LOAD segment of a synthesized executable.
pub struct SegmentSpec {
    pub vaddr: usize,
    pub flags: u32,
    pub data: Vec<u8>,
    pub memsz: usize,
}

fn put16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}
fn put32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}
fn put64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Assembles an ELF64 executable for the modelled machine.
pub fn build_elf(entry: usize, segments: &[SegmentSpec]) -> Vec<u8> {
    const EHDR_SIZE: usize = 64;
    const PHDR_SIZE: usize = 0x38;

    let mut out = vec![0u8; EHDR_SIZE + segments.len() * PHDR_SIZE];
    out[0..4].copy_from_slice(b"\x7fELF");
    out[4] = 2; // 64-bit
    out[5] = 1; // little endian
    out[6] = 1; // version
    put16(&mut out, 16, 2); // ET_EXEC
    put16(&mut out, 18, 0xf3); // the RISC machine
    put32(&mut out, 20, 1);
    put64(&mut out, 24, entry as u64);
    put64(&mut out, 32, EHDR_SIZE as u64); // phoff
    put16(&mut out, 52, EHDR_SIZE as u16);
    put16(&mut out, 54, PHDR_SIZE as u16);
    put16(&mut out, 56, segments.len() as u16);

    let mut file_off = out.len();
    for (i, seg) in segments.iter().enumerate() {
        let at = EHDR_SIZE + i * PHDR_SIZE;
        put32(&mut out, at, 1); // PT_LOAD
        put32(&mut out, at + 4, seg.flags);
        put64(&mut out, at + 8, file_off as u64);
        put64(&mut out, at + 16, seg.vaddr as u64);
        put64(&mut out, at + 24, seg.vaddr as u64);
        put64(&mut out, at + 32, seg.data.len() as u64);
        put64(&mut out, at + 40, seg.memsz.max(seg.data.len()) as u64);
        put64(&mut out, at + 48, PAGE_SIZE as u64);
        file_off += seg.data.len();
    }
    for seg in segments {
        out.extend_from_slice(&seg.data);
    }
    out
}

/// Installs an executable image into the filesystem.
pub fn install_program(path: &str, image: &[u8]) {
    let file = fs::root()
        .create(path, false)
        .unwrap()
        .into_regular_file()
        .unwrap();
    assert_eq!(file.write(0, image).unwrap(), image.len());
}

/// Base virtual address the heap-only test processes use.
pub const HEAP_BASE: usize = 0x40000;

/// Creates a process with no program image and a heap of `pages` lazily
/// granted pages starting at [`HEAP_BASE`].
pub fn heap_process(pool: &FramePool, pages: usize) -> Process {
    let mut p = Process::new(pool.clone());
    p.mm_struct.pager.layout.heap_start = Va::new(HEAP_BASE).unwrap();
    p.mm_struct.pager.layout.sz = HEAP_BASE;
    if pages > 0 {
        p.sbrk((pages * PAGE_SIZE) as isize, SbrkMode::Lazy).unwrap();
    }
    p
}

/// The virtual address of heap page `i` of a [`heap_process`].
pub fn heap_page(i: usize) -> Va {
    Va::new(HEAP_BASE + i * PAGE_SIZE).unwrap()
}

/// Drains the kernel console and returns the lines of process `pid`.
pub fn drain_logs_for(pid: u64) -> Vec<String> {
    let tag = format!("[pid {}]", pid);
    edos::kprint::drain()
        .into_iter()
        .filter(|l| l.starts_with(&tag))
        .collect()
}

/// Checks the universal invariants of the paging subsystem:
/// - A page table entry is present iff the page is resident.
/// - A swapped page holds an allocated slot; the swapped count, the slot
///   bitmap population, and the metadata agree.
/// - FIFO stamps of resident pages are pairwise distinct and all below the
///   next stamp to be handed out.
pub fn check_invariants(p: &Process) {
    let pager = &p.mm_struct.pager;
    let pt = &p.mm_struct.page_table;
    let mut swapped = 0;
    let mut resident_seqs = Vec::new();
    for info in pager.pages() {
        match info.state {
            PageState::Resident => {
                assert!(pt.is_mapped(info.va), "resident page unmapped: {:?}", info);
                assert_eq!(info.swap_slot, None);
                resident_seqs.push(info.seq);
            }
            PageState::Swapped => {
                assert!(!pt.is_mapped(info.va), "swapped page mapped: {:?}", info);
                let slot = info.swap_slot.expect("swapped page without a slot");
                assert!(pager.swap().is_allocated(slot));
                swapped += 1;
            }
            PageState::Unmapped => {
                assert!(!pt.is_mapped(info.va), "unmapped page mapped: {:?}", info);
                assert_eq!(info.swap_slot, None);
            }
        }
    }
    assert_eq!(swapped, pager.num_swapped_pages());
    assert_eq!(swapped, pager.swap().used_slots());

    let next = pager.next_fifo_seq();
    for (i, a) in resident_seqs.iter().enumerate() {
        assert!(*a < next);
        for b in &resident_seqs[i + 1..] {
            assert_ne!(a, b, "duplicate FIFO stamp");
        }
    }
}
