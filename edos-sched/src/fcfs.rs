//! First-come-first-served scheduling.
//!
//! A non-preemptive policy: among the runnable threads, the one created
//! earliest (smallest creation tick, ties broken by thread id) is selected,
//! and once running it keeps the core until it exits, sleeps, or yields
//! voluntarily. The timer tick never preempts the running thread under this
//! policy; starvation of late arrivals behind a long-running thread is
//! inherent and accepted.

use alloc::{boxed::Box, vec::Vec};
use edos::sync::SpinLock;
use edos::thread::{Thread, scheduler::Scheduler};

/// A first-come-first-served scheduler.
pub struct Fcfs {
    runqueue: SpinLock<Vec<Box<Thread>>>,
}

unsafe impl Send for Fcfs {}
unsafe impl Sync for Fcfs {}

impl Fcfs {
    /// Create a new [`Fcfs`] scheduler.
    pub fn new() -> Self {
        Self {
            runqueue: SpinLock::new(Vec::new()),
        }
    }
}

impl Default for Fcfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Fcfs {
    fn next_to_run(&self) -> Option<Box<Thread>> {
        let mut guard = self.runqueue.lock();
        let chosen = guard
            .iter()
            .enumerate()
            .min_by_key(|(_, th)| (th.sched_info().ctime, th.tid))
            .map(|(idx, _)| idx);
        let th = chosen.map(|idx| guard.swap_remove(idx));
        guard.unlock();
        th
    }

    fn push_to_queue(&self, th: Box<Thread>) {
        let mut guard = self.runqueue.lock();
        guard.push(th);
        guard.unlock();
    }

    fn timer_tick(&self, _current: &mut Thread) -> bool {
        // Non-preemptive: the running thread leaves the core only by
        // exiting, sleeping, or yielding on its own.
        false
    }
}
