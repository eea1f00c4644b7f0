//! Trap routing.
//!
//! A single entry distinguishes the three traps of the modelled machine:
//! timer ticks, page faults, and system calls. Timer ticks advance the tick
//! subsystem and drive the scheduler's accounting hook, yielding the running
//! thread when the hook requests it. Page faults are delegated to the
//! running task; a fault the task cannot resolve kills the faulting process
//! and nothing else. System calls are handed to the task's syscall
//! dispatcher.

use crate::addressing::Va;
use crate::syscall::Registers;
use crate::task::AccessKind;
use crate::thread::{Cpu, scheduler::Scheduler};
use crate::tick;
use alloc::boxed::Box;

/// Cause of a trap.
pub enum TrapCause<'a> {
    /// The periodic timer interrupt.
    Timer,
    /// A page fault on `va` caused by an `access`.
    PageFault {
        /// The faulting virtual address.
        va: Va,
        /// The kind of the faulting access.
        access: AccessKind,
    },
    /// A system call with the captured register state.
    Syscall(&'a mut Registers),
}

/// Routes one trap taken on `cpu`.
///
/// # Returns
/// The thread reaped by this trap, if the trap ended the running thread
/// (a fatal fault, or an exiting system call).
pub fn handle_trap(
    cpu: &mut Cpu,
    sched: &dyn Scheduler,
    cause: TrapCause<'_>,
) -> Option<Box<crate::thread::Thread>> {
    match cause {
        TrapCause::Timer => {
            tick::advance();
            cpu.on_timer_tick(sched);
            None
        }
        TrapCause::PageFault { va, access } => {
            let Some(current) = cpu.current() else {
                panic!("page fault with no running thread: {:?}", va);
            };
            let resolved = match current.task.as_mut() {
                Some(task) => task.page_fault(va, access).is_ok(),
                None => false,
            };
            if resolved {
                None
            } else {
                cpu.exit_current(-1)
            }
        }
        TrapCause::Syscall(regs) => {
            let Some(current) = cpu.current() else {
                panic!("system call with no running thread");
            };
            let exited = match current.task.as_mut() {
                Some(task) => {
                    task.syscall(regs);
                    current.task.as_ref().and_then(|task| task.exited())
                }
                None => Some(-1),
            };
            exited.and_then(|code| cpu.exit_current(code))
        }
    }
}
