//! Thread abstraction, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own state and scheduling record. A thread that carries a user process
//! attaches it as a [`Task`]; the trap glue routes system calls and page
//! faults of the running thread to that task.
//!
//! On the modelled machine, a core is represented by a [`Cpu`]: an explicit
//! dispatcher state machine holding the currently running thread. The
//! scheduling policy behind [`Cpu::schedule`] and the per-tick accounting is
//! whatever implementation of [`Scheduler`] the caller hands in, so policies
//! can be swapped without touching the dispatch path.
//!
//! [`Scheduler`]: scheduler::Scheduler

pub mod scheduler;

use crate::sync::SpinLock;
use crate::sync::atomic::AtomicU64;
use crate::task::Task;
use alloc::{boxed::Box, string::String, sync::Arc};
use scheduler::Scheduler;

const EXITED: u64 = 0x8000_0000_0000_0000;

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is exited with exitcode.
    Exited(i32),
    /// Thread is parked.
    Parked,
}

/// The per-thread scheduling record.
///
/// The scheduler is the only component that mutates the ordering fields in
/// here; everything else treats the record as opaque.
#[derive(Clone, Debug)]
pub struct SchedInfo {
    /// Tick at which the thread was created. First-come-first-served
    /// selection orders by this field.
    pub ctime: u64,
    /// Niceness in `[-20, 19]`. Translated into a weight by the fair policy.
    pub nice: i32,
    /// Virtual runtime. Advances while running at a rate inversely
    /// proportional to the weight; wraps on overflow.
    pub vruntime: u64,
    /// Remaining ticks of the current time slice.
    pub slice_remaining: i64,
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id.
    pub tid: u64,
    /// Thread name.
    pub name: String,
    /// State of the thread.
    pub state: Arc<SpinLock<ThreadState>>,
    /// Mixture of exit state (63th and 62th bit) and exit code (lower 32
    /// bits).
    pub exit_status: Arc<AtomicU64>,
    /// Scheduling record. Shared with the attached task so that a fork can
    /// inherit the parent's record.
    pub sched: Arc<SpinLock<SchedInfo>>,
    /// The user process driven by this thread, if any.
    pub task: Option<Box<dyn Task>>,
}

static TID: AtomicU64 = AtomicU64::new(0);

impl Thread {
    #[doc(hidden)]
    pub fn new<I>(name: I) -> Box<Self>
    where
        String: From<I>,
    {
        Box::new(Self {
            tid: TID.fetch_add(1),
            name: String::from(name),
            state: Arc::new(SpinLock::new(ThreadState::Runnable)),
            exit_status: Arc::new(AtomicU64::new(0)),
            sched: Arc::new(SpinLock::new(SchedInfo {
                ctime: crate::tick::current(),
                nice: 0,
                vruntime: 0,
                slice_remaining: 0,
            })),
            task: None,
        })
    }

    /// Reads a copy of the scheduling record.
    pub fn sched_info(&self) -> SchedInfo {
        let guard = self.sched.lock();
        let info = guard.clone();
        guard.unlock();
        info
    }

    /// Reads the current state of the thread.
    pub fn state(&self) -> ThreadState {
        let guard = self.state.lock();
        let state = *guard;
        guard.unlock();
        state
    }

    /// Overwrites the state of the thread.
    pub fn set_state(&self, state: ThreadState) {
        let mut guard = self.state.lock();
        *guard = state;
        guard.unlock();
    }

    /// Exit code of the thread, once it has exited.
    pub fn exit_code(&self) -> Option<i32> {
        let status = self.exit_status.load();
        if status & EXITED != 0 {
            Some(status as u32 as i32)
        } else {
            None
        }
    }

    fn set_exited(&self, exit_code: i32) {
        // Bit 63 marks the thread exited; the low 32 bits carry the code.
        self.exit_status.store(EXITED | exit_code as u32 as u64);
        self.set_state(ThreadState::Exited(exit_code));
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    th: Box<Thread>,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self { th: Thread::new(name) }
    }

    /// Set the niceness of the thread.
    pub fn nice(self, nice: i32) -> Self {
        assert!((-20..=19).contains(&nice), "nice out of range");
        let mut guard = self.th.sched.lock();
        guard.nice = nice;
        guard.unlock();
        self
    }

    /// Inherit the scheduling record of `parent`.
    ///
    /// A forked child starts from its parent's virtual runtime and niceness,
    /// which keeps a newborn from dominating the fair policy.
    pub fn inherit_sched(self, parent: &SchedInfo) -> Self {
        let mut guard = self.th.sched.lock();
        guard.nice = parent.nice;
        guard.vruntime = parent.vruntime;
        guard.unlock();
        self
    }

    /// Attach a task to the thread.
    ///
    /// The task is handed the thread id and a handle to the thread's
    /// scheduling record through [`Task::bind_thread`].
    pub fn attach_task(mut self, mut task: Box<dyn Task>) -> Self {
        task.bind_thread(self.th.tid, self.th.sched.clone());
        self.th.task = Some(task);
        self
    }

    /// Get the thread id of this thread.
    pub fn get_tid(&self) -> u64 {
        self.th.tid
    }

    /// Hand the thread to `sched` as runnable.
    ///
    /// # Returns
    /// The thread id of the spawned thread.
    pub fn spawn(self, sched: &dyn Scheduler) -> u64 {
        let tid = self.th.tid;
        sched.push_to_queue(self.th);
        tid
    }

    /// Finish building without queueing, handing the thread to the caller.
    pub fn into_thread(self) -> Box<Thread> {
        self.th
    }
}

/// A handle that represents a parked thread.
pub struct ParkHandle {
    pub(crate) th: Box<Thread>,
}

unsafe impl Send for ParkHandle {}
unsafe impl Sync for ParkHandle {}

impl ParkHandle {
    /// Consume the handle and unpark the underlying thread into `sched`.
    pub fn unpark(self, sched: &dyn Scheduler) {
        self.th.set_state(ThreadState::Runnable);
        sched.push_to_queue(self.th);
    }

    /// The thread id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.th.tid
    }
}

/// A core of the modelled machine.
///
/// Each core runs its own dispatcher loop: pull the next thread from the
/// scheduler, run it until a trap takes it off the core, repeat. On real
/// hardware the "run" step is a context switch; here the running thread is
/// simply parked in `current` while the trap glue drives its task.
pub struct Cpu {
    /// Core id.
    pub id: usize,
    current: Option<Box<Thread>>,
}

impl Cpu {
    /// Creates the dispatcher state of core `id`.
    pub fn new(id: usize) -> Self {
        assert!(id < crate::MAX_CPU);
        Self { id, current: None }
    }

    /// The currently running thread.
    pub fn current(&mut self) -> Option<&mut Thread> {
        self.current.as_deref_mut()
    }

    /// Dispatches the next runnable thread if the core is idle.
    ///
    /// # Returns
    /// The tid of the thread running on the core after the call, or `None`
    /// when the scheduler has nothing to offer.
    pub fn schedule(&mut self, sched: &dyn Scheduler) -> Option<u64> {
        if self.current.is_none() {
            let mut th = sched.next_to_run()?;
            th.set_state(ThreadState::Running);
            sched.on_dispatch(&mut th);
            self.current = Some(th);
        }
        self.current.as_ref().map(|th| th.tid)
    }

    /// Runs the scheduler's per-tick accounting for the running thread and
    /// preempts it when the policy requests a yield.
    ///
    /// # Returns
    /// The tid of the thread that was charged for this tick.
    pub fn on_timer_tick(&mut self, sched: &dyn Scheduler) -> Option<u64> {
        let cur = self.current.as_deref_mut()?;
        let tid = cur.tid;
        if sched.timer_tick(cur) {
            self.yield_now(sched);
        }
        Some(tid)
    }

    /// Voluntarily puts the running thread back into the ready queue.
    pub fn yield_now(&mut self, sched: &dyn Scheduler) {
        if let Some(th) = self.current.take() {
            th.set_state(ThreadState::Runnable);
            sched.push_to_queue(th);
        }
    }

    /// Takes the running thread off the core as a parked thread.
    pub fn park_current(&mut self) -> Option<ParkHandle> {
        let th = self.current.take()?;
        th.set_state(ThreadState::Parked);
        Some(ParkHandle { th })
    }

    /// Terminates the running thread with `exit_code`.
    ///
    /// The thread is handed back to the caller so its resources (the
    /// attached task among them) can be inspected before the drop releases
    /// them.
    pub fn exit_current(&mut self, exit_code: i32) -> Option<Box<Thread>> {
        let th = self.current.take()?;
        th.set_exited(exit_code);
        Some(th)
    }
}
