//! Fair scheduling driven by virtual runtime.
//!
//! Every thread accumulates **virtual runtime** while it runs: one tick of
//! real time advances `vruntime` by `NICE_0_WEIGHT / weight(nice)` (integer
//! division, wrapping on overflow), so heavier threads age slower. The
//! policy always dispatches the runnable thread with the smallest virtual
//! runtime, ties broken by thread id.
//!
//! The **weight** of a niceness value is `round(1024 / 1.25^nice)`, so each
//! niceness step changes the share of CPU time by about 25%.
//!
//! Time slices are sized at dispatch: with `n` runnable candidates, the
//! base slice is `max(TARGET_LATENCY / n, MIN_SLICE)` ticks, scaled by the
//! chosen thread's weight relative to [`NICE_0_WEIGHT`]. The tick hook
//! decrements the slice and requests a yield when it runs out.
//!
//! A forked child inherits its parent's virtual runtime, which keeps a
//! newborn from dominating the queue. A sleeper keeps its virtual runtime
//! across the sleep; a long sleeper can therefore monopolise the core for a
//! while after waking. This coarseness is a known property of the policy.
//!
//! Every scheduling decision emits a snapshot of the candidates and the
//! chosen thread on the kernel console, in a stable format.

use alloc::{boxed::Box, format, string::String, vec::Vec};
use edos::sync::SpinLock;
use edos::thread::{Thread, scheduler::Scheduler};
use edos::print;

/// The weight of niceness 0.
pub const NICE_0_WEIGHT: u64 = 1024;

/// Scheduling period the slice computation aims to cycle all runnable
/// threads within, in ticks.
pub const TARGET_LATENCY: u64 = 48;

/// Lower bound of the base time slice, in ticks.
pub const MIN_SLICE: u64 = 3;

// round(1024 / 1.25^nice) for nice in -20..=19.
const NICE_TO_WEIGHT: [u64; 40] = [
    88818, 71054, 56843, 45475, 36380, 29104, 23283, 18626, 14901, 11921, //
    9537, 7629, 6104, 4883, 3906, 3125, 2500, 2000, 1600, 1280, //
    1024, 819, 655, 524, 419, 336, 268, 215, 172, 137, //
    110, 88, 70, 56, 45, 36, 29, 23, 18, 15,
];

/// The weight of niceness `nice`.
pub fn weight(nice: i32) -> u64 {
    NICE_TO_WEIGHT[(nice + 20) as usize]
}

fn slice_for(candidates: usize, weight: u64) -> u64 {
    let n = candidates.max(1) as u64;
    (TARGET_LATENCY / n).max(MIN_SLICE) * weight / NICE_0_WEIGHT
}

/// A fair scheduler driven by virtual runtime.
pub struct Fair {
    runqueue: SpinLock<Vec<Box<Thread>>>,
}

unsafe impl Send for Fair {}
unsafe impl Sync for Fair {}

impl Fair {
    /// Create a new [`Fair`] scheduler.
    pub fn new() -> Self {
        Self {
            runqueue: SpinLock::new(Vec::new()),
        }
    }
}

impl Default for Fair {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Fair {
    /// Picks the runnable thread with the smallest virtual runtime, sizes
    /// its time slice, and emits the decision snapshot.
    fn next_to_run(&self) -> Option<Box<Thread>> {
        let mut guard = self.runqueue.lock();
        if guard.is_empty() {
            guard.unlock();
            return None;
        }

        let n = guard.len();
        let mut snapshot = String::from("[Scheduler Tick]\n");
        let mut chosen: Option<(usize, u64, u64)> = None;
        for (idx, th) in guard.iter().enumerate() {
            let info = th.sched_info();
            let w = weight(info.nice);
            snapshot += &format!(
                "PID: {} | vRuntime: {} | Weight: {} | TimeSlice: {}\n",
                th.tid,
                info.vruntime,
                w,
                slice_for(n, w)
            );
            match chosen {
                Some((_, vruntime, tid))
                    if (vruntime, tid) <= (info.vruntime, th.tid) => {}
                _ => chosen = Some((idx, info.vruntime, th.tid)),
            }
        }
        let Some((idx, vruntime, tid)) = chosen else {
            guard.unlock();
            return None;
        };
        snapshot += &format!("--> Scheduling PID {} (lowest vRuntime: {})\n", tid, vruntime);

        let th = guard.swap_remove(idx);
        let mut info = th.sched.lock();
        info.slice_remaining = slice_for(n, weight(info.nice)) as i64;
        info.unlock();
        guard.unlock();

        print!("{}", snapshot);
        Some(th)
    }

    fn push_to_queue(&self, th: Box<Thread>) {
        let mut guard = self.runqueue.lock();
        guard.push(th);
        guard.unlock();
    }

    /// Charges one tick of virtual runtime and burns one tick of the time
    /// slice.
    fn timer_tick(&self, current: &mut Thread) -> bool {
        let mut info = current.sched.lock();
        let delta = NICE_0_WEIGHT / weight(info.nice);
        info.vruntime = info.vruntime.wrapping_add(delta);
        info.slice_remaining -= 1;
        let expired = info.slice_remaining <= 0;
        info.unlock();
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::{NICE_0_WEIGHT, weight};

    #[test]
    fn weight_table_matches_formula() {
        assert_eq!(weight(0), NICE_0_WEIGHT);
        assert_eq!(weight(-20), 88818);
        assert_eq!(weight(-5), 3125);
        assert_eq!(weight(1), 819);
        assert_eq!(weight(5), 336);
        assert_eq!(weight(19), 15);
        // Each niceness step scales by about 25%.
        for nice in -20..19 {
            let percent = weight(nice) * 100 / weight(nice + 1);
            assert!(
                (120..=130).contains(&percent),
                "nice {}: {}%",
                nice,
                percent
            );
        }
    }
}
