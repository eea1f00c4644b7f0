//! Thread scheduler.

use super::Thread;
use crate::sync::SpinLock;
use alloc::{boxed::Box, collections::VecDeque};

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler. It provides an interface for managing threads,
/// determining which thread to run next, and handling periodic timer ticks.
/// The scheduler determines when each thread is allowed to run and ensures
/// allocation of CPU time among all threads according to its policy.
///
/// This trait can be implemented by different types of schedulers, such as
/// round-robin, first-come-first-served, or fairness-driven schedulers. Each
/// implementation may have a unique strategy for selecting the next thread to
/// run and for reacting to timer ticks.
pub trait Scheduler
where
    Self: Send + Sync,
{
    /// Peek a next thread to run.
    ///
    /// This method checks the ready queue and returns the next thread to
    /// run. If no threads are available, it returns `None`.
    fn next_to_run(&self) -> Option<Box<Thread>>;

    /// Push a thread `th` into the scheduling queue.
    fn push_to_queue(&self, th: Box<Thread>);

    /// Per-tick accounting hook for the running thread.
    ///
    /// Called once per timer tick with the thread that was RUNNING during
    /// the tick. The policy updates its accounting here.
    ///
    /// # Returns
    /// `true` when the running thread must be preempted after this tick.
    fn timer_tick(&self, current: &mut Thread) -> bool;

    /// Called right before `th` starts running on a core.
    ///
    /// Policies that hand out time slices size them here.
    fn on_dispatch(&self, _th: &mut Thread) {}
}

/// A first-in-first-out scheduler.
///
/// The fallback policy of the kernel: threads run in arrival order and are
/// never preempted by the tick.
struct Fifo {
    runqueue: SpinLock<VecDeque<Box<Thread>>>,
}

unsafe impl Sync for Fifo {}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<Box<Thread>> {
        let mut guard = self.runqueue.lock();
        let val = guard.pop_front();
        guard.unlock();
        val
    }
    fn push_to_queue(&self, th: Box<Thread>) {
        let mut guard = self.runqueue.lock();
        guard.push_back(th);
        guard.unlock();
    }
    fn timer_tick(&self, _current: &mut Thread) -> bool {
        false
    }
}

static FIFO: Fifo = Fifo {
    runqueue: SpinLock::new(VecDeque::new()),
};

static SCHEDULER: SpinLock<Option<&'static dyn Scheduler>> = SpinLock::new(None);

/// Set the scheduler of the kernel.
///
/// The scheduler is installed for the lifetime of the kernel; exactly one
/// policy is active in a built kernel.
pub fn set_scheduler(t: impl Scheduler + 'static) {
    let mut guard = SCHEDULER.lock();
    *guard = Some(Box::leak(Box::new(t)));
    guard.unlock();
}

/// Get the reference of the kernel scheduler.
pub fn scheduler() -> &'static dyn Scheduler {
    let guard = SCHEDULER.lock();
    let sched = *guard;
    guard.unlock();
    sched.unwrap_or(&FIFO)
}
