//! # The EdOS virtual-memory subsystem.
//!
//! This crate implements the demand-paged process model of EdOS on top of
//! the base kernel: per-page metadata next to the page table, per-process
//! swap files with a slot bitmap, FIFO page replacement, lazy program
//! loading, and the system call surface that exposes it all
//! (`sbrk`, `memstat`, `getreadcount`, and the file calls).
//!
//! The moving parts, leaves first:
//! - [`page_info`]: the bounded table of per-page records.
//! - [`swap`]: the swap-slot allocator and slot I/O.
//! - [`pager`]: the fault handler and the eviction policy.
//! - [`mm_struct`]: the per-process memory state and the user copy paths.
//! - [`loader`]: ELF parsing and the lazy `exec` path.
//! - [`file_struct`], [`syscall`], [`process`]: the process model around
//!   it.

#![no_std]
#![deny(rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod file_struct;
pub mod loader;
pub mod mm_struct;
pub mod page_info;
pub mod pager;
pub mod process;
pub mod swap;
pub mod syscall;

use alloc::{boxed::Box, format};
use edos::sync::SpinLock;
use edos::syscall::Registers;
use edos::task::{AccessKind, Task};
use edos::thread::{SchedInfo, ThreadBuilder, scheduler};
use edos::{KernelError, addressing::Va};
use num_enum::TryFromPrimitive;
use syscall::SyscallAbi;

pub use process::Process;

/// Represents the system call numbers of the kernel.
///
/// Each variant corresponds to a specific system call that can be invoked
/// using the system call interface. The numeric values align with the
/// syscall table of the operating system.
#[repr(usize)]
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
pub enum SyscallNumber {
    /// Terminates the calling process.
    Exit = 0,
    /// Opens a file and returns a file descriptor.
    Open = 1,
    /// Reads data from a file descriptor.
    Read = 2,
    /// Writes data to a file descriptor.
    Write = 3,
    /// Closes an open file descriptor.
    Close = 6,
    /// Forks the process.
    Fork = 10,
    /// Replaces the address space with a new program image.
    Exec = 11,
    /// Grows or shrinks the address space.
    Sbrk = 12,
    /// Returns the boot-global count of bytes returned by `read`.
    GetReadCount = 13,
    /// Writes the memory-stats snapshot to a user buffer.
    MemStat = 14,
}

impl Process {
    fn exec_syscall(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let path_va = Va::new(abi.arg1).ok_or(KernelError::BadAddress)?;
        let path = self.mm_struct.read_user_cstr(path_va, 256)?;

        // argv is a NULL-terminated array of string pointers, or 0.
        let mut args = alloc::vec::Vec::new();
        if abi.arg2 != 0 {
            let argv_va = Va::new(abi.arg2).ok_or(KernelError::BadAddress)?;
            for i in 0..16 {
                let ptr = self
                    .mm_struct
                    .read_user_usize(argv_va + i * core::mem::size_of::<usize>())?;
                if ptr == 0 {
                    break;
                }
                let arg_va = Va::new(ptr).ok_or(KernelError::BadAddress)?;
                args.push(self.mm_struct.read_user_cstr(arg_va, 128)?);
            }
        }
        let argv: alloc::vec::Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let argc = argv.len();
        let regs = self.exec(&path, &argv)?;
        self.exec_regs = Some(regs);
        Ok(argc)
    }

    fn fork_syscall(&mut self) -> Result<usize, KernelError> {
        let child = self.fork()?;
        let child_pid = child.pid;
        let mut builder = ThreadBuilder::new(format!("pid{}", child_pid));
        if let Some(sched) = &self.sched {
            let guard = sched.lock();
            let info = guard.clone();
            guard.unlock();
            builder = builder.inherit_sched(&info);
        }
        builder
            .attach_task(Box::new(child))
            .spawn(scheduler::scheduler());
        Ok(child_pid as usize)
    }

    fn sbrk_syscall(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let n = abi.arg1 as isize;
        let mode = match abi.arg2 {
            0 => pager::SbrkMode::Eager,
            1 => pager::SbrkMode::Lazy,
            _ => return Err(KernelError::InvalidArgument),
        };
        self.sbrk(n, mode)
    }

    fn memstat_syscall(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let buf_va = Va::new(abi.arg1).ok_or(KernelError::BadAddress)?;
        let stat = self.memstat();
        // The snapshot travels through the ordinary copy path, which may
        // itself demand-fault the destination pages.
        let bytes = unsafe {
            core::slice::from_raw_parts(
                &stat as *const pager::MemStat as *const u8,
                core::mem::size_of::<pager::MemStat>(),
            )
        };
        self.mm_struct.copy_to_user(buf_va, bytes)?;
        Ok(0)
    }
}

impl Task for Process {
    /// Handles a system call request from a user program.
    ///
    /// The ABI is extracted from the captured registers, the handler is
    /// selected by the system call number, and the result (or the error
    /// code) is placed back into `a0`. A successful `exec` additionally
    /// replaces the whole register state with the entry state of the new
    /// image.
    fn syscall(&mut self, regs: &mut Registers) {
        let abi = SyscallAbi::from_registers(regs);
        let return_val = SyscallNumber::try_from_primitive(abi.sysno)
            .map_err(|_| KernelError::NoSuchSyscall)
            .and_then(|no| match no {
                SyscallNumber::Exit => {
                    self.exit(abi.arg1 as i32);
                    Ok(0)
                }
                SyscallNumber::Open => {
                    let Self {
                        file_struct,
                        mm_struct,
                        ..
                    } = self;
                    file_struct.open(mm_struct, &abi)
                }
                SyscallNumber::Read => {
                    let Self {
                        file_struct,
                        mm_struct,
                        ..
                    } = self;
                    file_struct.read(mm_struct, &abi)
                }
                SyscallNumber::Write => {
                    let Self {
                        file_struct,
                        mm_struct,
                        ..
                    } = self;
                    file_struct.write(mm_struct, &abi)
                }
                SyscallNumber::Close => self.file_struct.close(&abi),
                SyscallNumber::Fork => self.fork_syscall(),
                SyscallNumber::Exec => self.exec_syscall(&abi),
                SyscallNumber::Sbrk => self.sbrk_syscall(&abi),
                SyscallNumber::GetReadCount => Ok(file_struct::getreadcount() as usize),
                SyscallNumber::MemStat => self.memstat_syscall(&abi),
            });
        abi.set_return_value(return_val);
        if let Some(new_regs) = self.exec_regs.take() {
            *regs = new_regs;
        }
    }

    /// Handles a page fault by delegating to the demand pager.
    ///
    /// An unresolvable fault kills the faulting process and nothing else.
    fn page_fault(&mut self, va: Va, access: AccessKind) -> Result<(), KernelError> {
        self.fault(va, access)
    }

    /// Validates a user memory range against the process's address-space
    /// intervals.
    fn access_ok(&self, addr: core::ops::Range<Va>, is_write: bool) -> bool {
        self.mm_struct.access_ok(addr, is_write)
    }

    fn exited(&self) -> Option<i32> {
        self.exit_code
    }

    fn bind_thread(&mut self, _tid: u64, sched: alloc::sync::Arc<SpinLock<SchedInfo>>) {
        self.sched = Some(sched);
    }
}
