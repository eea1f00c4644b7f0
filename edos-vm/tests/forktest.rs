//! Address-space duplication: a forked child carries an exact copy of its
//! parent's pages, whether resident, swapped, or not yet materialized.

mod common;

use common::*;
use edos::addressing::PAGE_SIZE;
use edos::mm::FramePool;
use edos_vm::page_info::PageState;

#[test]
fn forktest() {
    fork_copies_address_space();
    fork_isolates_parent_and_child();
    failed_exec_preserves_image();
}

fn state_of(p: &edos_vm::Process, i: usize) -> PageState {
    p.mm_struct
        .pager
        .pages()
        .find(|info| info.va == heap_page(i))
        .map(|info| info.state)
        .unwrap_or(PageState::Unmapped)
}

/// A child sees its parent's memory, page for page.
///
/// This test ensures that:
/// - Resident pages are copied into fresh frames.
/// - Swapped pages are copied slot to slot into the child's own swap file.
/// - Untouched lazy pages stay untouched and materialize independently.
fn fork_copies_address_space() {
    let pool = FramePool::new(8);
    let mut parent = heap_process(&pool, 4);

    parent.mem_write(heap_page(0), b"page zero").unwrap();
    parent.mem_write(heap_page(1), b"page one").unwrap();
    // Push both behind the swap file, then bring one forward again.
    {
        let m = &mut parent.mm_struct;
        m.pager.evict_one(&mut m.page_table).unwrap();
        m.pager.evict_one(&mut m.page_table).unwrap();
    }
    parent.mem_write(heap_page(2), b"page two").unwrap();
    assert_eq!(state_of(&parent, 0), PageState::Swapped);
    assert_eq!(state_of(&parent, 1), PageState::Swapped);
    assert_eq!(state_of(&parent, 2), PageState::Resident);

    let mut child = parent.fork().unwrap();
    assert_ne!(child.pid, parent.pid);
    check_invariants(&parent);
    check_invariants(&child);

    // The metadata carried over, including the swap state.
    assert_eq!(state_of(&child, 0), PageState::Swapped);
    assert_eq!(state_of(&child, 1), PageState::Swapped);
    assert_eq!(state_of(&child, 2), PageState::Resident);
    assert_eq!(child.mm_struct.pager.num_swapped_pages(), 2);
    assert_eq!(child.mm_struct.pager.swap().used_slots(), 2);

    // Contents match, wherever the pages lived.
    for (i, expect) in [&b"page zero"[..], b"page one", b"page two"].iter().enumerate() {
        let mut buf = vec![0u8; expect.len()];
        child.mem_read(heap_page(i), &mut buf).unwrap();
        assert_eq!(&buf[..], *expect, "child page {}", i);
    }
    // The untouched page zero-fills on first touch, in the child alone.
    let mut buf = [0xffu8; 4];
    child.mem_read(heap_page(3), &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
    assert_eq!(state_of(&parent, 3), PageState::Unmapped);
}

/// Writes after the fork stay private to each side.
fn fork_isolates_parent_and_child() {
    let pool = FramePool::new(8);
    let mut parent = heap_process(&pool, 2);
    parent.mem_write(heap_page(0), b"original").unwrap();

    let mut child = parent.fork().unwrap();
    child.mem_write(heap_page(0), b"childish").unwrap();

    let mut buf = [0u8; 8];
    parent.mem_read(heap_page(0), &mut buf).unwrap();
    assert_eq!(&buf, b"original");
    child.mem_read(heap_page(0), &mut buf).unwrap();
    assert_eq!(&buf, b"childish");
}

/// A failing `exec` leaves the old address space intact.
fn failed_exec_preserves_image() {
    let pool = FramePool::new(8);
    let mut p = heap_process(&pool, 1);
    p.mem_write(heap_page(0), b"survivor").unwrap();

    assert!(p.exec("/no-such-program", &[]).is_err());

    // A malformed image (memsz < filesz) is rejected after parsing.
    let mut image = build_elf(
        0x10000,
        &[SegmentSpec {
            vaddr: 0x10000,
            flags: PF_R | PF_X,
            data: vec![0u8; 32],
            memsz: PAGE_SIZE,
        }],
    );
    // Corrupt memsz of the first program header down to 1 byte.
    image[64 + 40..64 + 48].copy_from_slice(&1u64.to_le_bytes());
    install_program("/broken-memsz", &image);
    assert!(p.exec("/broken-memsz", &[]).is_err());

    // An unaligned segment address is rejected.
    let image = build_elf(
        0x10010,
        &[SegmentSpec {
            vaddr: 0x10010,
            flags: PF_R | PF_X,
            data: vec![0u8; 32],
            memsz: 32,
        }],
    );
    install_program("/broken-align", &image);
    assert!(p.exec("/broken-align", &[]).is_err());

    // Not an ELF at all.
    install_program("/broken-magic", b"#!/bin/sh");
    assert!(p.exec("/broken-magic", &[]).is_err());

    let mut buf = [0u8; 8];
    p.mem_read(heap_page(0), &mut buf).unwrap();
    assert_eq!(&buf, b"survivor");
    check_invariants(&p);
}
