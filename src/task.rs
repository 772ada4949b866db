//! The suspendable unit of work the scheduler drives, and the values that
//! cross the suspension boundary in each direction.
//!
//! The source material expresses a task as a generator that `yield`s wait
//! descriptors and receives a resume value back. There is no stable,
//! allocation-free generator in Rust, so a task here is a state machine: a
//! trait object whose `step` runs until the next suspension point and
//! returns either a new wait descriptor or `Done`. This is the "tagged
//! state enum with an explicit `step`" alternative the design notes call
//! out, rather than a stackful coroutine.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::scheduler::SchedCtl;
use crate::wait::WaitDescriptor;

/// Stable integer identity for a task, unique for the lifetime of the
/// [`crate::scheduler::Sched`] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u64);

impl Pid {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw integer identity, for logging or display.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Lifecycle state of a task as seen by [`crate::scheduler::Sched::status`].
///
/// The numeric mapping (`Terminated = 0, Running = 1, Paused = 2`) mirrors
/// the source's `status()` return convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Terminated,
    Running,
    Paused,
}

impl TaskStatus {
    /// The numeric code the source's `status()` used.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            TaskStatus::Terminated => 0,
            TaskStatus::Running => 1,
            TaskStatus::Paused => 2,
        }
    }
}

/// The value delivered to a task at the start of a `step` call.
///
/// Distinguishing `NewlyAdded` from `Tuple` as separate `Resume` cases
/// (rather than folding `NewlyAdded` into the wait-descriptor enum the way
/// the source's dynamic dispatch does) keeps the type a task yields
/// (`WaitDescriptor`) disjoint from the type it receives (`Resume`) — the
/// source conflates them because a generator's first `send` and its
/// `yield`ed values share one dynamically-typed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Delivered exactly once, on a task's first `step` call.
    NewlyAdded,
    /// The scheduling tuple computed for the wait descriptor this task most
    /// recently yielded.
    Tuple { pin_hits: u32, poll_value: i32, lateness_us: u64 },
}

/// What a task's `step` call reports back to the scheduler.
pub enum StepOutcome {
    /// Suspend, waiting on `descriptor`.
    Yield(WaitDescriptor),
    /// The task's body has run to completion; terminate it.
    Done,
    /// The task detected it could not produce a valid wait descriptor for
    /// its current state. Terminates the task; the scheduler logs and
    /// continues with the rest of the population.
    BadYield,
}

/// A suspendable activity. The scheduler owns every task from `add_thread`
/// until it terminates or is `stop`ped.
///
/// `step` receives a [`SchedCtl`] handle rather than a reference to the full
/// scheduler: a task resumed by `Sched::run_once` is spliced out of the task
/// table for the duration of the call (see `scheduler::mod`), so the handle
/// it is given only ever reaches the *rest* of the population, never back
/// into itself. This is the non-owning task-to-scheduler edge the design
/// notes require to avoid a reference cycle.
pub trait Task {
    /// Advances the task from its last suspension point to its next one.
    fn step(&mut self, ctl: &mut SchedCtl<'_>, resume: Resume) -> StepOutcome;

    /// Optional diagnostic name, surfaced through `status`/logging only;
    /// lookup is always by `Pid`.
    fn name(&self) -> Option<&'static str> {
        None
    }
}
