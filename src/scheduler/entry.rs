//! Internal per-task bookkeeping. Not part of the public API.

use alloc::boxed::Box;

use crate::task::{Pid, Task, TaskStatus};
use crate::wait::{IsrHandle, Poller};

/// The armed form of a [`crate::wait::WaitDescriptor`]: deadlines resolved
/// to absolute microsecond values at the moment the task yielded, so the
/// dispatch loop never has to re-derive "when was this armed".
pub(crate) enum Armed {
    NewlyAdded,
    RoundRobin,
    Timeout { deadline_us: u64 },
    Poller { callback: Box<dyn FnMut() -> i32>, deadline_us: Option<u64> },
    Pinblock { isr: IsrHandle, deadline_us: Option<u64> },
}

impl Armed {
    pub(crate) fn from_poller(p: Poller, now_us: u64) -> Self {
        let deadline_us = p.timeout_secs.map(|secs| crate::time::arm_deadline(now_us, secs));
        Armed::Poller { callback: p.callback, deadline_us }
    }
}

pub(crate) struct TaskEntry {
    pub(crate) pid: Pid,
    pub(crate) name: Option<&'static str>,
    pub(crate) task: Box<dyn Task>,
    pub(crate) status: TaskStatus,
    pub(crate) wait: Armed,
    /// Monotonic "last serviced" generation, used to rank round-robin tasks.
    pub(crate) rr_last_run: u64,
    /// Cumulative Poller-callback invocation count for this task, ambient
    /// observability grounded in `SchedulerMetrics`'s per-crate counters.
    pub(crate) poller_invocations: u64,
}
