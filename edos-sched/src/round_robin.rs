//! Round-robin scheduling.
//!
//! The classic time-sharing baseline: every runnable thread waits in one
//! ready queue, the dispatcher takes them in order, and the timer tick
//! preempts the running thread so the next one in line gets the core. The
//! queue itself is a lock-free FIFO; pushing a preempted thread to the back
//! and popping the next from the front is the whole policy.

use alloc::boxed::Box;
use crossbeam_queue::SegQueue;
use edos::thread::{Thread, scheduler::Scheduler};

/// A round-robin scheduler.
///
/// Each thread runs for one tick before it is preempted and pushed to the
/// back of the queue. This guarantees that all threads receive a fair share
/// of CPU time and prevents starvation.
pub struct RoundRobin {
    runqueue: SegQueue<Box<Thread>>,
}

unsafe impl Send for RoundRobin {}
unsafe impl Sync for RoundRobin {}

impl RoundRobin {
    /// Create a new [`RoundRobin`] scheduler.
    pub fn new() -> Self {
        Self {
            runqueue: SegQueue::new(),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for RoundRobin {
    fn next_to_run(&self) -> Option<Box<Thread>> {
        self.runqueue.pop()
    }

    fn push_to_queue(&self, th: Box<Thread>) {
        self.runqueue.push(th);
    }

    fn timer_tick(&self, _current: &mut Thread) -> bool {
        // Yield on every tick.
        true
    }
}
