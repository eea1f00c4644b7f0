//! Task trait for interacting with a user process.

use crate::KernelError;
use crate::addressing::Va;
use crate::sync::SpinLock;
use crate::syscall::Registers;
use crate::thread::SchedInfo;
use alloc::sync::Arc;
use core::ops::Range;

/// The kind of a user memory access.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum AccessKind {
    /// A data read.
    Read,
    /// A data write.
    Write,
    /// An instruction fetch.
    Execute,
}

impl AccessKind {
    /// Whether the access writes memory.
    pub fn is_write(self) -> bool {
        matches!(self, AccessKind::Write)
    }
}

impl core::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
            AccessKind::Execute => "exec",
        })
    }
}

/// Represents a **task** executed by a thread.
///
/// This trait defines the core functionality required for handling events
/// triggered by a user process, such as **system calls** and **page
/// faults**.
pub trait Task: Send + Sync {
    /// Handles a **system call** triggered by the user program.
    ///
    /// - The `registers` parameter contains the state of the CPU registers
    ///   at the time of the system call.
    /// - Implementations of this function should parse the system call
    ///   arguments, execute the corresponding operation, and store the
    ///   result back in `registers`.
    fn syscall(&mut self, registers: &mut Registers);

    /// Handles a **page fault** that occurs when accessing an unmapped
    /// memory page, or one mapped with insufficient permission.
    ///
    /// # Returns
    /// - `Ok(())` when the fault was resolved and the access can be retried.
    /// - `Err(KernelError)` when the fault is fatal to the process; the trap
    ///   glue then kills the faulting process.
    fn page_fault(&mut self, va: Va, access: AccessKind) -> Result<(), KernelError> {
        let _ = (va, access);
        Err(KernelError::InvalidAccess)
    }

    /// Validates a given **memory address range** before use.
    ///
    /// - `addr`: The range of virtual addresses being accessed.
    /// - `is_write`: Indicates whether the memory is being **read** (`false`)
    ///   or **written to** (`true`).
    #[allow(unused_variables)]
    fn access_ok(&self, addr: Range<Va>, is_write: bool) -> bool {
        // Currently, check only addr is null pointer.
        addr.start.into_usize() != 0
    }

    /// Exit code the task requested through its exit path, if any.
    ///
    /// The trap glue polls this after every system call and reaps the
    /// thread when it returns `Some`.
    fn exited(&self) -> Option<i32> {
        None
    }

    /// Called when the task is attached to a thread.
    ///
    /// Hands the task its thread id and a handle to the thread's scheduling
    /// record, which a fork-style system call needs to let the child inherit
    /// the parent's virtual runtime.
    fn bind_thread(&mut self, tid: u64, sched: Arc<SpinLock<SchedInfo>>) {
        let _ = (tid, sched);
    }
}

impl Task for () {
    fn syscall(&mut self, _registers: &mut Registers) {
        unreachable!()
    }
}
