//! Demand-paging behavior of a single process: lazy program loading, lazy
//! heap growth, and the dirty-tracking write upgrade.

mod common;

use common::*;
use edos::KernelError;
use edos::addressing::{PAGE_SIZE, Va};
use edos::mm::FramePool;
use edos::mm::page_table::PteFlags;
use edos_vm::Process;
use edos_vm::page_info::PageState;
use edos_vm::pager::SbrkMode;

#[test]
fn memtest() {
    demand_load_text();
    heap_growth();
    write_upgrade_records_dirty();
    eager_sbrk_is_backed();
    negative_sbrk_releases();
    invalid_access_kills();
    killed_process_stops_faulting();
}

/// Executing a program maps nothing but the argument stack page.
///
/// This test ensures that:
/// - `exec` records the segment layout without allocating frames for text
///   or data.
/// - The first instruction fetch demand-loads the text page from the
///   executable, in the expected log order.
/// - The BSS tail of the data segment reads as zeroes.
fn demand_load_text() {
    let pool = FramePool::new(16);
    let mut p = Process::new(pool.clone());

    let text = (0u8..255).cycle().take(PAGE_SIZE).collect::<Vec<_>>();
    let image = build_elf(
        0x10000,
        &[
            SegmentSpec {
                vaddr: 0x10000,
                flags: PF_R | PF_X,
                data: text.clone(),
                memsz: PAGE_SIZE,
            },
            SegmentSpec {
                vaddr: 0x11000,
                flags: PF_R | PF_W,
                data: b"initialized".to_vec(),
                // One page of initialized data, one page of BSS tail.
                memsz: 2 * PAGE_SIZE,
            },
        ],
    );
    install_program("/init", &image);

    edos::kprint::drain();
    let regs = p.exec("/init", &["init"]).unwrap();
    assert_eq!(regs.pc, 0x10000);
    assert_eq!(regs.a[0], 1);

    let logs = drain_logs_for(p.pid);
    assert!(logs.iter().any(|l| l.contains("INIT-LAZYMAP")), "{logs:?}");
    // Only the argument stack page is backed by a frame.
    assert_eq!(pool.in_use(), 1);

    // First instruction fetch demand-loads the text page.
    p.mem_fetch(Va::new(regs.pc).unwrap()).unwrap();
    let logs = drain_logs_for(p.pid);
    let order = ["PAGEFAULT", "LOADEXEC", "RESIDENT"];
    let mut at = 0;
    for l in &logs {
        if at < order.len() && l.contains(order[at]) {
            at += 1;
        }
    }
    assert_eq!(at, order.len(), "{logs:?}");
    assert!(
        logs.iter()
            .any(|l| l.contains("PAGEFAULT") && l.contains("access=exec") && l.contains("cause=exec")),
        "{logs:?}"
    );
    // The argv stack page took stamp 0 at exec time.
    assert!(logs.iter().any(|l| l.contains("RESIDENT") && l.contains("seq=1")), "{logs:?}");
    assert_eq!(pool.in_use(), 2);

    // The loaded page carries the bytes of the executable.
    let mut buf = vec![0u8; 64];
    p.mem_read(Va::new(0x10000).unwrap(), &mut buf).unwrap();
    assert_eq!(buf[..], text[..64]);

    // Initialized data, then the zero BSS tail.
    let mut buf = vec![0u8; "initialized".len()];
    p.mem_read(Va::new(0x11000).unwrap(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"initialized");
    let mut buf = vec![0xffu8; 32];
    p.mem_read(Va::new(0x12000).unwrap(), &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));

    check_invariants(&p);
}

/// `sbrk(.., LAZY)` moves the high-water mark without touching memory.
///
/// This test ensures that:
/// - The mark moves immediately while no frame is allocated.
/// - Touching the new memory takes exactly one heap fault, one zero-fill,
///   one residency.
fn heap_growth() {
    let pool = FramePool::new(8);
    let mut p = heap_process(&pool, 0);
    edos::kprint::drain();

    let old = p.sbrk(2 * PAGE_SIZE as isize, SbrkMode::Lazy).unwrap();
    assert_eq!(old, HEAP_BASE);
    assert_eq!(p.mm_struct.pager.layout.sz, HEAP_BASE + 2 * PAGE_SIZE);
    assert_eq!(pool.in_use(), 0);
    assert!(drain_logs_for(p.pid).is_empty());

    // Read the last byte of the newly granted region.
    let last = Va::new(p.mm_struct.pager.layout.sz - 1).unwrap();
    let mut byte = [0xffu8; 1];
    p.mem_read(last, &mut byte).unwrap();
    assert_eq!(byte[0], 0);

    let logs = drain_logs_for(p.pid);
    assert_eq!(
        logs.iter()
            .filter(|l| l.contains("PAGEFAULT") && l.contains("cause=heap"))
            .count(),
        1,
        "{logs:?}"
    );
    assert_eq!(logs.iter().filter(|l| l.contains("ALLOC")).count(), 1);
    assert_eq!(logs.iter().filter(|l| l.contains("RESIDENT")).count(), 1);
    assert_eq!(pool.in_use(), 1);
    check_invariants(&p);
}

/// The first write to a read-only resident page upgrades it and records
/// dirty.
fn write_upgrade_records_dirty() {
    let pool = FramePool::new(8);
    let mut p = heap_process(&pool, 2);

    // A write fault installs the page writable and dirty right away.
    p.mem_write(heap_page(0), b"written").unwrap();
    let info = p.mm_struct.pager.pages().find(|i| i.va == heap_page(0)).unwrap();
    assert!(info.dirty);

    // A read fault installs read-only and clean; the first write upgrades.
    let mut buf = [0u8; 1];
    p.mem_read(heap_page(1), &mut buf).unwrap();
    {
        let info = p.mm_struct.pager.pages().find(|i| i.va == heap_page(1)).unwrap();
        assert_eq!(info.state, PageState::Resident);
        assert!(!info.dirty);
        let pte = p.mm_struct.page_table.walk(heap_page(1)).unwrap();
        assert!(!pte.flags().contains(PteFlags::W));
    }
    p.mem_write(heap_page(1), b"x").unwrap();
    let info = p.mm_struct.pager.pages().find(|i| i.va == heap_page(1)).unwrap();
    assert!(info.dirty);
    let pte = p.mm_struct.page_table.walk(heap_page(1)).unwrap();
    assert!(pte.flags().contains(PteFlags::W | PteFlags::D));
    check_invariants(&p);
}

/// `sbrk(.., EAGER)` backs the new pages immediately, still read-only so
/// dirty tracking keeps working.
fn eager_sbrk_is_backed() {
    let pool = FramePool::new(8);
    let mut p = heap_process(&pool, 0);
    edos::kprint::drain();

    p.sbrk(3 * PAGE_SIZE as isize, SbrkMode::Eager).unwrap();
    assert_eq!(pool.in_use(), 3);
    // No faults for reads of eagerly granted memory.
    let mut buf = [0xffu8; 8];
    p.mem_read(heap_page(1), &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
    let logs = drain_logs_for(p.pid);
    assert!(!logs.iter().any(|l| l.contains("PAGEFAULT")), "{logs:?}");

    // The first write still funnels through the upgrade path.
    p.mem_write(heap_page(1), b"dirty").unwrap();
    let info = p.mm_struct.pager.pages().find(|i| i.va == heap_page(1)).unwrap();
    assert!(info.dirty);
    check_invariants(&p);
}

/// Negative `sbrk` shrinks eagerly, releasing frames and metadata.
fn negative_sbrk_releases() {
    let pool = FramePool::new(8);
    let mut p = heap_process(&pool, 4);
    for i in 0..4 {
        p.mem_write(heap_page(i), &[i as u8]).unwrap();
    }
    assert_eq!(pool.in_use(), 4);

    p.sbrk(-(2 * PAGE_SIZE as isize), SbrkMode::Lazy).unwrap();
    assert_eq!(pool.in_use(), 2);
    assert!(p.mm_struct.pager.pages().all(|i| i.va < heap_page(2)));
    // The dropped range is no longer legal.
    assert!(p.mem_read(heap_page(2), &mut [0u8; 1]).is_err());
    // Shrinking below the heap base is refused.
    assert!(p.sbrk(-(1 << 30), SbrkMode::Lazy).is_err());
    check_invariants(&p);
}

/// A fault outside every legal interval kills the process.
fn invalid_access_kills() {
    let pool = FramePool::new(4);
    let mut p = heap_process(&pool, 1);
    edos::kprint::drain();

    assert!(p.mem_read(Va::new(0x3f00_0000).unwrap(), &mut [0u8; 1]).is_err());
    assert!(p.is_killed());
    let logs = drain_logs_for(p.pid);
    assert!(
        logs.iter().any(|l| l.contains("PAGEFAULT") && l.contains("cause=unknown")),
        "{logs:?}"
    );
    assert!(logs.iter().any(|l| l.contains("KILL") && l.contains("invalid-access")), "{logs:?}");
}

/// An asynchronously killed process stops evicting on behalf of new
/// faults.
fn killed_process_stops_faulting() {
    let pool = FramePool::new(1);
    let mut p = heap_process(&pool, 2);
    p.mem_write(heap_page(0), b"only frame").unwrap();

    let kill = p.mm_struct.pager.kill_flag();
    kill.store(true);
    assert!(p.is_killed());

    edos::kprint::drain();
    assert_eq!(
        p.mem_write(heap_page(1), b"denied"),
        Err(KernelError::OperationNotPermitted)
    );
    // The dying process did not evict anything.
    let logs = drain_logs_for(p.pid);
    assert!(!logs.iter().any(|l| l.contains("VICTIM")), "{logs:?}");
}
