//! Page replacement under memory pressure: FIFO victim selection, dirty
//! writeback, clean text discard, round-trip fidelity, and the swap-slot
//! ceiling.

mod common;

use common::*;
use edos::addressing::{PAGE_SIZE, Va};
use edos::fs;
use edos::mm::FramePool;
use edos_vm::Process;
use edos_vm::page_info::PageState;

#[test]
fn swaptest() {
    fifo_eviction_with_dirty_writeback();
    fifo_eviction_order();
    swap_round_trip();
    clean_text_discard();
    swap_exhaustion_kill();
    cleanup_on_exit();
}

/// Under a frame budget of 8, the ninth page evicts the first.
///
/// This test ensures that:
/// - The victim is the page with the smallest FIFO stamp.
/// - A dirty victim is written back to slot 0 before the entry goes away.
/// - Reading the victim later swaps it back in with its contents intact.
fn fifo_eviction_with_dirty_writeback() {
    let pool = FramePool::new(8);
    let mut p = heap_process(&pool, 10);
    edos::kprint::drain();

    for i in 0..8 {
        p.mem_write(heap_page(i), &[0xb0 + i as u8]).unwrap();
    }
    assert_eq!(pool.in_use(), 8);
    drain_logs_for(p.pid);

    p.mem_write(heap_page(8), &[0xb8]).unwrap();
    let logs = drain_logs_for(p.pid);
    let victim = format!("va={:#x}", heap_page(0).into_usize());
    assert!(
        logs.iter()
            .any(|l| l.contains("VICTIM") && l.contains(&victim) && l.contains("seq=0") && l.contains("algo=FIFO")),
        "{logs:?}"
    );
    assert!(logs.iter().any(|l| l.contains("EVICT") && l.contains("state=dirty")), "{logs:?}");
    assert!(
        logs.iter().any(|l| l.contains("SWAPOUT") && l.contains(&victim) && l.contains("slot=0")),
        "{logs:?}"
    );
    check_invariants(&p);

    // Reading the evicted page swaps it back in, byte-identical.
    let mut byte = [0u8; 1];
    p.mem_read(heap_page(0), &mut byte).unwrap();
    assert_eq!(byte[0], 0xb0);
    let logs = drain_logs_for(p.pid);
    assert!(
        logs.iter().any(|l| l.contains("SWAPIN") && l.contains(&victim) && l.contains("slot=0")),
        "{logs:?}"
    );
    check_invariants(&p);
}

/// Pages are evicted in the order they first became resident.
fn fifo_eviction_order() {
    let pool = FramePool::new(4);
    let mut p = heap_process(&pool, 8);
    for i in 0..4 {
        p.mem_write(heap_page(i), &[i as u8]).unwrap();
    }
    edos::kprint::drain();
    for i in 4..8 {
        p.mem_write(heap_page(i), &[i as u8]).unwrap();
    }
    let logs = drain_logs_for(p.pid);
    let victims: Vec<&String> = logs.iter().filter(|l| l.contains("VICTIM")).collect();
    assert_eq!(victims.len(), 4, "{logs:?}");
    for (i, line) in victims.iter().enumerate() {
        assert!(
            line.contains(&format!("va={:#x}", heap_page(i).into_usize())),
            "{line}"
        );
        assert!(line.contains(&format!("seq={}", i)), "{line}");
    }
    check_invariants(&p);
}

/// Writing, swapping out, and swapping back in reproduces the exact page
/// contents.
fn swap_round_trip() {
    let pool = FramePool::new(2);
    let mut p = heap_process(&pool, 4);

    let patterns: Vec<Vec<u8>> = (0..4u8)
        .map(|i| (0..PAGE_SIZE).map(|j| i ^ (j as u8).rotate_left(3)).collect())
        .collect();
    for (i, pattern) in patterns.iter().enumerate() {
        p.mem_write(heap_page(i), pattern).unwrap();
    }
    // Only the last two can still be resident.
    assert_eq!(p.mm_struct.pager.num_swapped_pages(), 2);

    for (i, pattern) in patterns.iter().enumerate() {
        let mut back = vec![0u8; PAGE_SIZE];
        p.mem_read(heap_page(i), &mut back).unwrap();
        assert_eq!(&back, pattern, "page {} corrupted", i);
    }
    check_invariants(&p);
}

/// A clean text page under pressure is discarded, not swapped, and can be
/// demand-loaded again from the executable.
fn clean_text_discard() {
    let pool = FramePool::new(3);
    let mut p = Process::new(pool.clone());

    let text: Vec<u8> = (0..4 * PAGE_SIZE).map(|i| (i / PAGE_SIZE) as u8).collect();
    let image = build_elf(
        0x10000,
        &[SegmentSpec {
            vaddr: 0x10000,
            flags: PF_R | PF_X,
            data: text.clone(),
            memsz: 4 * PAGE_SIZE,
        }],
    );
    install_program("/textheavy", &image);
    p.exec("/textheavy", &[]).unwrap();

    let page = |i: usize| Va::new(0x10000 + i * PAGE_SIZE).unwrap();
    p.mem_fetch(page(0)).unwrap();
    p.mem_fetch(page(1)).unwrap();
    edos::kprint::drain();

    // Third text fetch: the frames are gone; the argv stack page (stamp 0,
    // dirty) is written out first.
    p.mem_fetch(page(2)).unwrap();
    let logs = drain_logs_for(p.pid);
    assert!(logs.iter().any(|l| l.contains("EVICT") && l.contains("state=dirty")), "{logs:?}");
    assert!(logs.iter().any(|l| l.contains("SWAPOUT")), "{logs:?}");

    // Fourth fetch: the oldest text page is clean and simply discarded.
    p.mem_fetch(page(3)).unwrap();
    let logs = drain_logs_for(p.pid);
    let victim = format!("va={:#x}", page(0).into_usize());
    assert!(logs.iter().any(|l| l.contains("VICTIM") && l.contains(&victim)), "{logs:?}");
    assert!(
        logs.iter().any(|l| l.contains("EVICT") && l.contains(&victim) && l.contains("state=clean")),
        "{logs:?}"
    );
    assert!(logs.iter().any(|l| l.contains("DISCARD") && l.contains(&victim)), "{logs:?}");
    assert!(!logs.iter().any(|l| l.contains("SWAPOUT") && l.contains(&victim)), "{logs:?}");
    let info = p.mm_struct.pager.pages().find(|i| i.va == page(0)).unwrap();
    assert_eq!(info.state, PageState::Unmapped);

    // A later fetch re-reads the page from the executable.
    p.mem_fetch(page(0)).unwrap();
    let logs = drain_logs_for(p.pid);
    assert!(logs.iter().any(|l| l.contains("LOADEXEC") && l.contains(&victim)), "{logs:?}");
    let mut byte = [0xffu8; 1];
    p.mem_read(page(0), &mut byte).unwrap();
    assert_eq!(byte[0], 0);
    check_invariants(&p);
}

/// Dirtying more pages than the swap file can hold kills the process.
///
/// The 1024-slot ceiling is a correctness boundary, not a soft policy.
fn swap_exhaustion_kill() {
    let pool = FramePool::new(8);
    let frames = pool.capacity();
    let total = 1024 + frames + 1;
    let mut p = heap_process(&pool, total);
    edos::kprint::drain();

    for i in 0..total - 1 {
        p.mem_write(heap_page(i), &[i as u8]).unwrap();
    }
    assert_eq!(p.mm_struct.pager.swap().used_slots(), 1024);
    check_invariants(&p);

    // The next eviction has no slot left.
    assert!(p.mem_write(heap_page(total - 1), &[0]).is_err());
    assert!(p.is_killed());
    let logs = drain_logs_for(p.pid);
    assert!(
        logs.iter().any(|l| l.contains("KILL") && l.contains("swap-exhausted")),
        "{logs:?}"
    );
}

/// Exiting forgets every slot and unlinks the swap file.
fn cleanup_on_exit() {
    let pool = FramePool::new(2);
    let mut p = heap_process(&pool, 4);
    for i in 0..4 {
        p.mem_write(heap_page(i), &[i as u8]).unwrap();
    }
    let pid = p.pid;
    assert_eq!(p.mm_struct.pager.num_swapped_pages(), 2);
    assert!(fs::root().open(&format!("/pgswp{}", pid)).is_ok());

    edos::kprint::drain();
    drop(p);
    let logs = drain_logs_for(pid);
    assert!(logs.iter().any(|l| l.contains("SWAPCLEANUP freed_slots=2")), "{logs:?}");
    assert!(fs::root().open(&format!("/pgswp{}", pid)).is_err());
}
