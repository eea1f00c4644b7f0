//! The process model.
//!
//! A [`Process`] bundles the two per-process states of the kernel: the
//! descriptor table ([`FileStruct`]) and the memory state ([`MmStruct`]).
//! It is attached to a thread as its [`Task`](edos::task::Task); the trap
//! glue routes the thread's system calls and page faults here.
//!
//! The `mem_read`/`mem_write`/`mem_fetch` entry points model user
//! instructions touching memory: a fault the pager cannot resolve kills the
//! process, exactly like the machine's trap path would. Kernel accesses on
//! behalf of system calls use the copy paths of [`MmStruct`] instead and
//! surface errors to user space.

use crate::file_struct::FileStruct;
use crate::loader;
use crate::mm_struct::MmStruct;
use crate::pager::{MemStat, PageFaultReason, SbrkMode};
use alloc::sync::Arc;
use edos::mm::page_table::PageTable;
use edos::addressing::Va;
use edos::mm::FramePool;
use edos::sync::SpinLock;
use edos::sync::atomic::AtomicU64;
use edos::syscall::Registers;
use edos::task::AccessKind;
use edos::thread::SchedInfo;
use edos::{KernelError, println};

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

/// A process: the unit of isolation of the kernel.
pub struct Process {
    /// Process id.
    pub pid: u64,
    /// Per-process file state.
    pub file_struct: FileStruct,
    /// Per-process memory state.
    pub mm_struct: MmStruct,
    pub(crate) sched: Option<Arc<SpinLock<SchedInfo>>>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) exec_regs: Option<Registers>,
}

impl Process {
    /// Creates a process with an empty address space drawing frames from
    /// `pool`.
    pub fn new(pool: FramePool) -> Self {
        let pid = NEXT_PID.fetch_add(1);
        Self {
            pid,
            file_struct: FileStruct::new(),
            mm_struct: MmStruct::new(pool, pid),
            sched: None,
            exit_code: None,
            exec_regs: None,
        }
    }

    /// Whether the process has been marked killed.
    pub fn is_killed(&self) -> bool {
        self.mm_struct.pager.is_killed()
    }

    /// Marks the process killed asynchronously.
    pub fn set_killed(&self) {
        self.mm_struct.pager.set_killed();
    }

    /// Replaces the address space with the program at `path`.
    ///
    /// # Returns
    /// The register state the new image starts from. On error the old
    /// address space is left intact.
    pub fn exec(&mut self, path: &str, argv: &[&str]) -> Result<Registers, KernelError> {
        let pool = self.mm_struct.page_table.pool().clone();
        let (mm, regs) = loader::exec(pool, self.pid, path, argv)?;
        self.mm_struct = mm;
        Ok(regs)
    }

    /// Clones this process into a child with a copy of the address space
    /// and the descriptor table.
    pub fn fork(&self) -> Result<Process, KernelError> {
        let pid = NEXT_PID.fetch_add(1);
        let pool = self.mm_struct.page_table.pool().clone();
        let mut child_pt = PageTable::new(pool);
        let pager =
            self.mm_struct
                .pager
                .fork_into(&self.mm_struct.page_table, pid, &mut child_pt)?;
        Ok(Process {
            pid,
            file_struct: self.file_struct.clone(),
            mm_struct: MmStruct {
                page_table: child_pt,
                pager,
            },
            sched: None,
            exit_code: None,
            exec_regs: None,
        })
    }

    /// Grows or shrinks the address space by `n` bytes.
    pub fn sbrk(&mut self, n: isize, mode: SbrkMode) -> Result<usize, KernelError> {
        let MmStruct { page_table, pager } = &mut self.mm_struct;
        pager.sbrk(page_table, n, mode)
    }

    /// Takes the observability snapshot of the process's page states.
    pub fn memstat(&self) -> MemStat {
        self.mm_struct.pager.memstat()
    }

    /// Requests process termination with `exit_code`.
    ///
    /// Resources are released when the process is dropped; the trap glue
    /// reaps the thread after the system call returns.
    pub fn exit(&mut self, exit_code: i32) {
        self.exit_code = Some(exit_code);
    }

    /// A user load instruction at `va`, reading `buf.len()` bytes.
    ///
    /// A fatal fault kills the process.
    pub fn mem_read(&mut self, va: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        self.mm_struct
            .copy_from_user(va, buf)
            .inspect_err(|e| self.report_fatal(*e, va))
    }

    /// A user store instruction at `va`, writing `buf`.
    ///
    /// A fatal fault kills the process.
    pub fn mem_write(&mut self, va: Va, buf: &[u8]) -> Result<(), KernelError> {
        self.mm_struct
            .copy_to_user(va, buf)
            .inspect_err(|e| self.report_fatal(*e, va))
    }

    /// A user instruction fetch at `va`.
    ///
    /// A fatal fault kills the process.
    pub fn mem_fetch(&mut self, va: Va) -> Result<(), KernelError> {
        self.mm_struct
            .fetch_instruction(va)
            .inspect_err(|e| self.report_fatal(*e, va))
    }

    /// The single page-fault entry used by the trap glue.
    pub(crate) fn fault(&mut self, va: Va, access: AccessKind) -> Result<(), KernelError> {
        let page = va.page_down();
        let is_present = self.mm_struct.page_table.is_mapped(page);
        let result = self.mm_struct.handle_page_fault(&PageFaultReason {
            fault_addr: va,
            access,
            is_present,
        });
        if let Err(e) = result {
            self.report_fatal(e, va);
            return Err(e);
        }
        Ok(())
    }

    fn report_fatal(&self, e: KernelError, va: Va) {
        if e == KernelError::InvalidAccess {
            println!(
                "[pid {}] KILL    invalid-access va={:#x}",
                self.pid,
                va.into_usize()
            );
        }
        // Swap exhaustion and frame exhaustion mark the process killed at
        // the point of failure, with their own log lines.
        self.set_killed();
    }
}
