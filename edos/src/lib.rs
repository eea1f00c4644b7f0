//! # EdOS: an educational demand-paging operating system
//!
//! EdOS is a teaching kernel built around the two subsystems that carry the
//! hardest invariants of a small operating system: a **demand-paged virtual
//! memory subsystem** with per-process swap files and FIFO page replacement,
//! and a set of **CPU schedulers** (round-robin, first-come-first-served, and
//! a simplified fair scheduler driven by virtual runtime).
//!
//! The kernel targets a simple RISC-style machine which this crate models in
//! software: physical memory is a fixed-capacity frame pool, address
//! translation goes through a software page table with RISC-V-style entry
//! bits, and traps are delivered through an explicit routing entry instead of
//! an interrupt vector. Everything above that line is real kernel code: the
//! page-fault path, the eviction policy, the swap-slot accounting, and the
//! scheduling decisions behave exactly as they would on hardware, and every
//! invariant can be exercised from ordinary tests.
//!
//! ## Crate layout
//!
//! This crate is the base of the system. It provides:
//! - [`addressing`]: virtual and physical address types.
//! - [`mm`]: the physical frame pool and the software page table.
//! - [`fs`]: the inode-style file system interface and its in-memory backing.
//! - [`thread`]: thread control blocks, the [`Scheduler`] seam, and the
//!   per-core dispatcher.
//! - [`interrupt`]: the trap-routing glue that feeds timer ticks to the
//!   scheduler and page faults to the faulting task.
//! - [`tick`]: the global tick counter and sleep queue.
//! - [`sync`]: spinlocks and SeqCst atomic wrappers.
//!
//! The virtual-memory subsystem and the scheduling policies live in their own
//! crates on top of this one, wired through the [`Task`] and [`Scheduler`]
//! traits.
//!
//! [`Scheduler`]: thread::scheduler::Scheduler
//! [`Task`]: task::Task

#![no_std]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod addressing;
pub mod fs;
pub mod interrupt;
#[macro_use]
pub mod kprint;
pub mod mm;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod thread;
pub mod tick;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Number of cores of the modelled machine.
pub const MAX_CPU: usize = 4;

/// Suppresses [`info!`] and [`debug!`] output when set.
pub static QUIET: sync::atomic::AtomicBool = sync::atomic::AtomicBool::new(false);

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by the kernel. Each
/// variant corresponds to a specific type of error that might occur during
/// the handling of a kernel operation, and carries its errno-style code as
/// the discriminant. These errors can be returned to the user program to
/// indicate the nature of the failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(isize)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted = -1,
    /// No such file or directory. (ENOENT)
    NoSuchEntry = -2,
    /// IO Error. (EIO)
    IOError = -5,
    /// Exec format error. (ENOEXEC)
    NoExec = -8,
    /// Bad file descriptor. (EBADF)
    BadFileDescriptor = -9,
    /// Out of memory. (ENOMEM)
    NoMemory = -12,
    /// Permission denied. (EACCES)
    InvalidAccess = -13,
    /// Bad address. (EFAULT)
    BadAddress = -14,
    /// File exists. (EEXIST)
    FileExist = -17,
    /// Not a directory. (ENOTDIR)
    NotDirectory = -20,
    /// Is a directory. (EISDIR)
    IsDirectory = -21,
    /// Invalid argument. (EINVAL)
    InvalidArgument = -22,
    /// Too many open files. (EMFILE)
    TooManyOpenFile = -24,
    /// No space left on device. (ENOSPC)
    NoSpace = -28,
    /// Invalid system call number. (ENOSYS)
    NoSuchSyscall = -38,
}

impl KernelError {
    /// Converts the [`KernelError`] into a corresponding `usize` error code.
    ///
    /// The result is cast to `usize` for use as a return value in system
    /// calls, following the kernel convention of returning small negative
    /// numbers in a register.
    pub fn into_usize(self) -> usize {
        isize::from(self) as usize
    }
}
