//! The tick subsystem.
//!
//! The machine delivers a timer interrupt once per tick. This module owns
//! the global tick counter (behind its own lock, independent of everything
//! else in the kernel) and the sleep queue. A sleeping thread is parked
//! together with the scheduler it belongs to, so [`advance`] can hand it
//! back to the right ready queue when its deadline passes.

use crate::sync::SpinLock;
use crate::thread::{ParkHandle, scheduler::Scheduler};
use alloc::{sync::Arc, vec::Vec};

struct Sleeper {
    wake_at: u64,
    handle: ParkHandle,
    sched: Arc<dyn Scheduler>,
}

unsafe impl Send for Sleeper {}

static TICKS: SpinLock<u64> = SpinLock::new(0);
static SLEEPERS: SpinLock<Vec<Sleeper>> = SpinLock::new(Vec::new());

/// The current value of the tick counter.
pub fn current() -> u64 {
    let guard = TICKS.lock();
    let now = *guard;
    guard.unlock();
    now
}

/// Advances the tick counter by one and wakes every sleeper whose deadline
/// has passed.
///
/// Woken threads are pushed into the scheduler they were put to sleep with.
pub fn advance() -> u64 {
    let mut guard = TICKS.lock();
    *guard += 1;
    let now = *guard;
    guard.unlock();

    let mut due = Vec::new();
    let mut guard = SLEEPERS.lock();
    let mut i = 0;
    while i < guard.len() {
        if guard[i].wake_at <= now {
            due.push(guard.swap_remove(i));
        } else {
            i += 1;
        }
    }
    guard.unlock();

    // Unpark outside the sleeper lock; push_to_queue takes the scheduler's
    // own lock.
    for sleeper in due {
        sleeper.handle.unpark(&*sleeper.sched);
    }
    now
}

/// Puts a parked thread to sleep for `ticks` ticks.
///
/// After the deadline, the thread is made runnable again on `sched`. The
/// scheduling record of the thread is left untouched; in particular a
/// sleeper keeps its virtual runtime.
pub fn sleep_for(handle: ParkHandle, ticks: u64, sched: Arc<dyn Scheduler>) {
    let wake_at = current() + ticks;
    let mut guard = SLEEPERS.lock();
    guard.push(Sleeper {
        wake_at,
        handle,
        sched,
    });
    guard.unlock();
}
