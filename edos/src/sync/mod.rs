//! Synchronization primitives.

pub mod atomic;
pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
