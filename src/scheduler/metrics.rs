//! Dispatch counters, ambient observability grounded in
//! `helix_execution::scheduler::metrics::SchedulerMetrics`: a handful of
//! relaxed atomics a caller can sample without taking a lock.

use core::sync::atomic::{AtomicU64, Ordering};

/// Counters accumulated across a [`crate::scheduler::Sched`]'s lifetime.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    dispatch_cycles: AtomicU64,
    context_switches: AtomicU64,
    gc_compactions: AtomicU64,
    heartbeat_toggles: AtomicU64,
    poller_invocations: AtomicU64,
    bad_yields: AtomicU64,
    tasks_added: AtomicU64,
    tasks_terminated: AtomicU64,
}

impl SchedulerMetrics {
    pub const fn new() -> Self {
        Self {
            dispatch_cycles: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            gc_compactions: AtomicU64::new(0),
            heartbeat_toggles: AtomicU64::new(0),
            poller_invocations: AtomicU64::new(0),
            bad_yields: AtomicU64::new(0),
            tasks_added: AtomicU64::new(0),
            tasks_terminated: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_dispatch_cycle(&self) {
        self.dispatch_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_context_switch(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc_compaction(&self) {
        self.gc_compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_toggle(&self) {
        self.heartbeat_toggles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poller_invocations(&self, n: u64) {
        self.poller_invocations.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_bad_yield(&self) {
        self.bad_yields.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task_added(&self) {
        self.tasks_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task_terminated(&self) {
        self.tasks_terminated.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn dispatch_cycles(&self) -> u64 {
        self.dispatch_cycles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn gc_compactions(&self) -> u64 {
        self.gc_compactions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn heartbeat_toggles(&self) -> u64 {
        self.heartbeat_toggles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn poller_invocations(&self) -> u64 {
        self.poller_invocations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bad_yields(&self) -> u64 {
        self.bad_yields.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn tasks_added(&self) -> u64 {
        self.tasks_added.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn tasks_terminated(&self) -> u64 {
        self.tasks_terminated.load(Ordering::Relaxed)
    }
}
