//! System call entry of the modelled machine.
//!
//! User programs request kernel services by executing the machine's system
//! call instruction with the **system call number** in register `a7` and up
//! to six **arguments** in `a0..a5`. The **return value** travels back in
//! `a0`. The trap glue captures the register state into [`Registers`] and
//! hands it to the running task's syscall handler, which may manipulate any
//! register value (including the return value) before the machine resumes
//! the user program.

/// Captured register state of the RISC-style machine.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct Registers {
    /// Argument registers `a0..a7`. `a7` carries the system call number on a
    /// syscall trap; `a0` carries the return value back.
    pub a: [usize; 8],
    /// Stack pointer.
    pub sp: usize,
    /// Program counter.
    pub pc: usize,
}
