//! # The EdOS scheduling policies.
//!
//! Three policies implement the base kernel's
//! [`Scheduler`](edos::thread::scheduler::Scheduler) seam:
//!
//! - [`RoundRobin`]: the default; a single ready queue cycled on every
//!   tick.
//! - [`Fcfs`]: non-preemptive first-come-first-served by creation tick.
//! - [`Fair`]: a simplified fair scheduler driven by virtual runtime.
//!
//! The policy of a built kernel is selected at build time through cargo
//! features (`rr`, `fcfs`, `cfs`); [`install_default`] registers the
//! selected one as the system scheduler. All three types are available for
//! direct instantiation regardless of the selection.

#![no_std]
#![deny(rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod fair;
pub mod fcfs;
pub mod round_robin;

pub use fair::Fair;
pub use fcfs::Fcfs;
pub use round_robin::RoundRobin;

/// The policy selected at build time.
#[cfg(feature = "cfs")]
pub type DefaultScheduler = Fair;
/// The policy selected at build time.
#[cfg(all(feature = "fcfs", not(feature = "cfs")))]
pub type DefaultScheduler = Fcfs;
/// The policy selected at build time.
#[cfg(not(any(feature = "cfs", feature = "fcfs")))]
pub type DefaultScheduler = RoundRobin;

/// Installs the build-time-selected policy as the system scheduler.
pub fn install_default() {
    edos::info!(
        "Scheduler: installing {}.",
        core::any::type_name::<DefaultScheduler>()
    );
    edos::thread::scheduler::set_scheduler(DefaultScheduler::new());
}
