//! The `getreadcount` counter, driven through the full trap path: thread
//! dispatch, syscall routing, and process teardown.

mod common;

use common::*;
use edos::interrupt::{TrapCause, handle_trap};
use edos::mm::FramePool;
use edos::syscall::Registers;
use edos::thread::{Cpu, ThreadBuilder};
use edos_sched::RoundRobin;
use edos_vm::SyscallNumber;

fn syscall_regs(no: SyscallNumber, args: [usize; 3]) -> Registers {
    let mut regs = Registers::default();
    regs.a[7] = no as usize;
    regs.a[0] = args[0];
    regs.a[1] = args[1];
    regs.a[2] = args[2];
    regs
}

/// `getreadcount` advances by exactly the bytes successful reads return.
///
/// This test ensures that:
/// - The counter is monotonic and counts every successful `read` across
///   the whole boot.
/// - Zero-byte reads at end of file and failing reads do not advance it.
/// - An exiting process is reaped through the trap glue and releases its
///   resources.
#[test]
fn readcount() {
    let pool = FramePool::new(16);
    let mut p = heap_process(&pool, 4);
    let pid = p.pid;

    // A file with 100 known bytes.
    let file = edos::fs::root()
        .create("/data", false)
        .unwrap()
        .into_regular_file()
        .unwrap();
    let content: Vec<u8> = (0u8..100).collect();
    assert_eq!(file.write(0, &content).unwrap(), 100);

    // The path string lives in user memory, like any syscall argument.
    let path_va = heap_page(0);
    let buf_va = heap_page(1);
    let out_path_va = heap_page(2);
    p.mem_write(path_va, b"/data\0").unwrap();
    p.mem_write(out_path_va, b"/out\0").unwrap();

    let sched = RoundRobin::new();
    let mut cpu = Cpu::new(0);
    ThreadBuilder::new("readcount")
        .attach_task(Box::new(p))
        .spawn(&sched);
    assert!(cpu.schedule(&sched).is_some());

    let mut do_syscall = |cpu: &mut Cpu, no, args| {
        let mut regs = syscall_regs(no, args);
        let reaped = handle_trap(cpu, &sched, TrapCause::Syscall(&mut regs));
        (regs.a[0], reaped)
    };

    let (fd, _) = do_syscall(&mut cpu, SyscallNumber::Open, [path_va.into_usize(), 0, 0]);
    assert!(fd >= 2);

    let (base, _) = do_syscall(&mut cpu, SyscallNumber::GetReadCount, [0, 0, 0]);

    // First read: 64 bytes.
    let (n, _) = do_syscall(&mut cpu, SyscallNumber::Read, [fd, buf_va.into_usize(), 64]);
    assert_eq!(n, 64);
    let (c, _) = do_syscall(&mut cpu, SyscallNumber::GetReadCount, [0, 0, 0]);
    assert_eq!(c, base.wrapping_add(64) & 0xffff_ffff);

    // Second read: the remaining 36 bytes.
    let (n, _) = do_syscall(&mut cpu, SyscallNumber::Read, [fd, buf_va.into_usize(), 64]);
    assert_eq!(n, 36);
    let (c2, _) = do_syscall(&mut cpu, SyscallNumber::GetReadCount, [0, 0, 0]);
    assert_eq!(c2, c.wrapping_add(36) & 0xffff_ffff);

    // End of file returns 0 bytes and does not advance the counter.
    let (n, _) = do_syscall(&mut cpu, SyscallNumber::Read, [fd, buf_va.into_usize(), 64]);
    assert_eq!(n, 0);
    // Neither does a failing read.
    let (err, _) = do_syscall(&mut cpu, SyscallNumber::Read, [9, buf_va.into_usize(), 64]);
    assert_eq!(
        edos::KernelError::try_from(err as isize),
        Ok(edos::KernelError::BadFileDescriptor)
    );
    let (c3, _) = do_syscall(&mut cpu, SyscallNumber::GetReadCount, [0, 0, 0]);
    assert_eq!(c3, c2);

    // The data landed in user memory through the copy path: write the user
    // buffer out to a fresh file and compare.
    let (out_fd, _) = do_syscall(
        &mut cpu,
        SyscallNumber::Open,
        [out_path_va.into_usize(), 1, 0],
    );
    assert!(out_fd >= 2);
    let (n, _) = do_syscall(&mut cpu, SyscallNumber::Write, [out_fd, buf_va.into_usize(), 64]);
    assert_eq!(n, 64);
    let out = edos::fs::root()
        .open("/out")
        .unwrap()
        .into_regular_file()
        .unwrap();
    let mut got = vec![0u8; 64];
    assert_eq!(out.read(0, &mut got).unwrap(), 64);
    assert_eq!(got[..], content[..64]);

    // A closed descriptor stops reading (and counting).
    let (r, _) = do_syscall(&mut cpu, SyscallNumber::Close, [fd, 0, 0]);
    assert_eq!(r, 0);
    let (err, _) = do_syscall(&mut cpu, SyscallNumber::Read, [fd, buf_va.into_usize(), 8]);
    assert!((err as isize) < 0);
    let (c4, _) = do_syscall(&mut cpu, SyscallNumber::GetReadCount, [0, 0, 0]);
    assert_eq!(c4, c3);

    // Exit reaps the thread through the glue and tears the process down.
    edos::kprint::drain();
    let (_, reaped) = do_syscall(&mut cpu, SyscallNumber::Exit, [0, 0, 0]);
    let thread = reaped.expect("exit must reap the running thread");
    assert_eq!(thread.exit_code(), Some(0));
    drop(thread);
    let logs = drain_logs_for(pid);
    assert!(logs.iter().any(|l| l.contains("SWAPCLEANUP")), "{logs:?}");
    assert!(cpu.current().is_none());
}
