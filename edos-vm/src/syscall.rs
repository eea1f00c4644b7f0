//! System call ABI.
//!
//! The machine places the **system call number** in register `a7` and the
//! **arguments** in `a0..a5`; the **return value** is stored back to `a0`.
//! [`SyscallAbi`] captures that convention once so the individual handlers
//! work with named arguments instead of raw registers.
//!
//! Errors incurred by the user **must not** stop the kernel: handlers
//! propagate a [`KernelError`] with the `?` operator and the dispatch
//! epilogue encodes it into `a0` for user space.

use edos::KernelError;
use edos::syscall::Registers;

/// A struct representing the system call ABI.
///
/// This struct provides a way to access and manipulate the system call's
/// arguments and return value in the context of the system call handler. It
/// stores the system call number and up to six arguments, as well as a
/// mutable reference to the captured CPU registers.
pub struct SyscallAbi<'a> {
    /// The system call number that identifies the requested kernel service.
    pub sysno: usize,
    /// First argument for the system call.
    pub arg1: usize,
    /// Second argument for the system call.
    pub arg2: usize,
    /// Third argument for the system call.
    pub arg3: usize,
    /// Fourth argument for the system call.
    pub arg4: usize,
    /// Fifth argument for the system call.
    pub arg5: usize,
    /// Sixth argument for the system call.
    pub arg6: usize,
    /// A mutable reference to the captured register state, used to place
    /// the return value.
    pub regs: &'a mut Registers,
}

impl<'a> SyscallAbi<'a> {
    /// Constructs a [`SyscallAbi`] instance from the provided registers.
    pub fn from_registers(regs: &'a mut Registers) -> Self {
        Self {
            sysno: regs.a[7],
            arg1: regs.a[0],
            arg2: regs.a[1],
            arg3: regs.a[2],
            arg4: regs.a[3],
            arg5: regs.a[4],
            arg6: regs.a[5],
            regs,
        }
    }

    /// Sets the return value for the system call.
    ///
    /// On success, `a0` receives the returned value; on failure it receives
    /// the error code of the [`KernelError`].
    pub fn set_return_value(self, return_val: Result<usize, KernelError>) {
        self.regs.a[0] = match return_val {
            Ok(v) => v,
            Err(e) => e.into_usize(),
        };
    }
}
