//! The scheduler: owns every task, drives suspension-point-to-suspension-point
//! progress, and picks the next runnable task each dispatch cycle per the
//! priority order documented on [`Sched::run_once`].

pub mod config;
mod entry;
pub mod metrics;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use log::{debug, warn};

pub use config::{HeartbeatConfig, SchedConfig};
pub use metrics::SchedulerMetrics;

use entry::{Armed, TaskEntry};

use crate::error::SchedError;
use crate::heap::HeapCompactor;
use crate::task::{Pid, Resume, StepOutcome, Task, TaskStatus};
use crate::time::{ticks_diff, Clock};
use crate::wait::WaitDescriptor;

/// Internal idle task: performs heap compaction when `gc_enable` is set and
/// nothing higher-priority is ready. Added first, at construction, so it is
/// always part of the round-robin tier and therefore only ever dispatched
/// when no tuple-eligible task exists — the "only when no higher-priority
/// task is ready" rule from the concurrency model is a direct consequence
/// of it being an ordinary round-robin task rather than special-cased.
struct IdleTask;

impl Task for IdleTask {
    fn step(&mut self, ctl: &mut SchedCtl<'_>, _resume: Resume) -> StepOutcome {
        let sched = ctl.sched_mut();
        if sched.config.gc_enable {
            let now = sched.clock.now_us();
            if crate::time::elapsed(sched.last_gc_us, now) >= config::GCTIME_US {
                if let Some(heap) = sched.heap.as_deref() {
                    heap.compact();
                }
                sched.last_gc_us = now;
                sched.metrics.record_gc_compaction();
                debug!("idle task: heap compaction pass");
            }
        }
        StepOutcome::Yield(WaitDescriptor::RoundRobin)
    }

    fn name(&self) -> Option<&'static str> {
        Some("idle")
    }
}

/// A handle to the scheduler passed to a task's `step`, scoped to the rest
/// of the task population. The task currently executing has been spliced
/// out of the table for the duration of the call — this is the non-owning
/// task-to-scheduler edge the design notes require to avoid a reference
/// cycle between a task and the scheduler that owns it.
pub struct SchedCtl<'a> {
    sched: &'a mut Sched,
    current: Pid,
}

impl<'a> SchedCtl<'a> {
    pub(crate) fn sched_mut(&mut self) -> &mut Sched {
        self.sched
    }

    /// The `pid` of the task this handle was given to.
    #[must_use]
    pub fn current_pid(&self) -> Pid {
        self.current
    }

    /// Current time, as read from the scheduler's clock.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.sched.clock.now_us()
    }

    /// Adds a new task. It is immediately driven to its first suspension
    /// point, but only competes for dispatch starting the next `run_once`
    /// iteration, even when called from within another task's `step`.
    pub fn add_thread(&mut self, task: Box<dyn Task>) -> Result<Pid, SchedError> {
        self.sched.add_thread_staged(task, None)
    }

    /// As [`SchedCtl::add_thread`], with a diagnostic name.
    pub fn add_named_thread(
        &mut self,
        name: &'static str,
        task: Box<dyn Task>,
    ) -> Result<Pid, SchedError> {
        self.sched.add_thread_staged(task, Some(name))
    }

    /// Terminates `pid`. If `pid` is the task currently executing, the
    /// termination is deferred and takes effect the instant this `step`
    /// call returns (mirrors the source's `stop(pid)` acting on a task that
    /// stops itself).
    pub fn stop(&mut self, pid: Pid) -> Result<(), SchedError> {
        if pid == self.current {
            self.sched.pending_self_terminate = true;
            Ok(())
        } else {
            self.sched.terminate_task(pid)
        }
    }

    /// Stops the scheduler itself: the current task finishes this `step`
    /// call normally, then `run()` returns to its caller without any
    /// further dispatch. Corresponds to the source's `stop()`/`stop(0)`.
    pub fn stop_scheduler(&mut self) {
        self.sched.stop_requested = true;
    }

    /// Marks `pid` ineligible for selection until `resume`d. Pausing the
    /// current task takes effect at its next suspension, i.e. as soon as
    /// this `step` call returns.
    pub fn pause(&mut self, pid: Pid) -> Result<(), SchedError> {
        if pid == self.current {
            self.sched.pending_self_pause = true;
            Ok(())
        } else {
            self.sched.pause_task(pid)
        }
    }

    /// Restores `pid` to Running with whatever wait descriptor it had
    /// before `pause`.
    pub fn resume(&mut self, pid: Pid) -> Result<(), SchedError> {
        if pid == self.current {
            Ok(())
        } else {
            self.sched.resume_task(pid)
        }
    }

    /// Reports `pid`'s lifecycle state.
    pub fn status(&self, pid: Pid) -> Result<TaskStatus, SchedError> {
        if pid == self.current {
            Ok(TaskStatus::Running)
        } else {
            self.sched.status_of(pid)
        }
    }
}

/// The scheduler. At most one instance drives a given task population; all
/// state is process-local — `Sched` is passed around by explicit handle
/// rather than stashed behind a `static`, per the design notes.
pub struct Sched {
    clock: Box<dyn Clock>,
    heap: Option<Box<dyn HeapCompactor>>,
    config: SchedConfig,
    tasks: BTreeMap<Pid, TaskEntry>,
    pending_add: Vec<TaskEntry>,
    rr_seq: u64,
    running: bool,
    stop_requested: bool,
    pending_self_pause: bool,
    pending_self_terminate: bool,
    last_gc_us: u64,
    heartbeat_state: bool,
    heartbeat_last_us: u64,
    metrics: SchedulerMetrics,
    last_fault: Option<(Pid, SchedError)>,
}

impl Sched {
    /// Builds a scheduler reading time from `clock`, configured per
    /// `config`. Installs the internal idle task immediately, so a freshly
    /// constructed scheduler always has exactly one task before any caller
    /// adds their own.
    pub fn new(clock: Box<dyn Clock>, config: SchedConfig) -> Self {
        let now = clock.now_us();
        let mut sched = Self {
            clock,
            heap: None,
            config,
            tasks: BTreeMap::new(),
            pending_add: Vec::new(),
            rr_seq: 0,
            running: false,
            stop_requested: false,
            pending_self_pause: false,
            pending_self_terminate: false,
            last_gc_us: now,
            heartbeat_state: false,
            heartbeat_last_us: now,
            metrics: SchedulerMetrics::new(),
            last_fault: None,
        };
        sched
            .add_thread_inner(Box::new(IdleTask), Some("idle"))
            .expect("idle task always suspends on its first step");
        sched
    }

    /// Installs the collaborator the idle task invokes to compact the heap.
    #[must_use]
    pub fn with_heap_compactor(mut self, heap: Box<dyn HeapCompactor>) -> Self {
        self.heap = Some(heap);
        self
    }

    /// Adds a task before `run()` begins, or from an outer frame / ISR
    /// context (the normal setup path). From inside a running task, use
    /// [`SchedCtl::add_thread`] instead.
    pub fn add_thread(&mut self, task: Box<dyn Task>) -> Result<Pid, SchedError> {
        self.add_thread_inner(task, None)
    }

    /// As [`Sched::add_thread`], with a diagnostic name surfaced through
    /// logging only (lookup is always by `Pid`).
    pub fn add_named_thread(&mut self, name: &'static str, task: Box<dyn Task>) -> Result<Pid, SchedError> {
        self.add_thread_inner(task, Some(name))
    }

    fn add_thread_inner(
        &mut self,
        mut task: Box<dyn Task>,
        name: Option<&'static str>,
    ) -> Result<Pid, SchedError> {
        let pid = Pid::next();
        let now = self.clock.now_us();
        let outcome = {
            let mut ctl = SchedCtl { sched: &mut *self, current: pid };
            task.step(&mut ctl, Resume::NewlyAdded)
        };
        match outcome {
            StepOutcome::Done | StepOutcome::BadYield => {
                warn!("add_thread: task terminated before its first suspension point");
                Err(SchedError::BadThread)
            }
            StepOutcome::Yield(descriptor) => {
                let wait = self.arm(descriptor, now);
                let entry = TaskEntry {
                    pid,
                    name,
                    task,
                    status: TaskStatus::Running,
                    wait,
                    rr_last_run: 0,
                    poller_invocations: 0,
                };
                self.tasks.insert(pid, entry);
                self.metrics.record_task_added();
                debug!("add_thread: pid={} name={:?}", pid.raw(), name);
                Ok(pid)
            }
        }
    }

    /// As `add_thread_inner`, but stages the resulting entry so it only
    /// competes starting the *next* dispatch cycle, even though its
    /// initializing code has already run. This is the fixed answer to the
    /// "does a mid-cycle add compete in that cycle?" open question.
    fn add_thread_staged(
        &mut self,
        mut task: Box<dyn Task>,
        name: Option<&'static str>,
    ) -> Result<Pid, SchedError> {
        let pid = Pid::next();
        let now = self.clock.now_us();
        let outcome = {
            let mut ctl = SchedCtl { sched: &mut *self, current: pid };
            task.step(&mut ctl, Resume::NewlyAdded)
        };
        match outcome {
            StepOutcome::Done | StepOutcome::BadYield => {
                warn!("add_thread: task terminated before its first suspension point");
                Err(SchedError::BadThread)
            }
            StepOutcome::Yield(descriptor) => {
                let wait = self.arm(descriptor, now);
                let entry = TaskEntry {
                    pid,
                    name,
                    task,
                    status: TaskStatus::Running,
                    wait,
                    rr_last_run: 0,
                    poller_invocations: 0,
                };
                self.pending_add.push(entry);
                self.metrics.record_task_added();
                debug!("add_thread (staged): pid={} name={:?}", pid.raw(), name);
                Ok(pid)
            }
        }
    }

    /// Terminates `pid` (no `pid`/`pid == 0` in the source maps to `None`
    /// here, stopping the scheduler itself instead).
    pub fn stop(&mut self, pid: Option<Pid>) -> Result<(), SchedError> {
        match pid {
            Some(pid) => self.terminate_task(pid),
            None => {
                self.stop_requested = true;
                Ok(())
            }
        }
    }

    /// Marks `pid` ineligible for selection until `resume`d.
    pub fn pause(&mut self, pid: Pid) -> Result<(), SchedError> {
        self.pause_task(pid)
    }

    /// Restores `pid` to Running.
    pub fn resume(&mut self, pid: Pid) -> Result<(), SchedError> {
        self.resume_task(pid)
    }

    /// Reports `pid`'s lifecycle state.
    pub fn status(&self, pid: Pid) -> Result<TaskStatus, SchedError> {
        self.status_of(pid)
    }

    /// Current time, as read from the scheduler's clock. Lets an external
    /// collaborator like [`crate::syncom::SynCom`] stamp liveness state
    /// (`last_rx_us`) from `start()`, which runs outside any task's `step`.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// Dispatch counters accumulated since construction.
    #[must_use]
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// The most recent `BadYield` fault, if any task has hit one.
    #[must_use]
    pub fn last_fault(&self) -> Option<(Pid, SchedError)> {
        self.last_fault
    }

    /// Number of tasks currently owned by the scheduler (including the
    /// internal idle task and any staged-but-not-yet-competing additions).
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len() + self.pending_add.len()
    }

    fn terminate_task(&mut self, pid: Pid) -> Result<(), SchedError> {
        match self.tasks.remove(&pid) {
            Some(_) => {
                self.metrics.record_task_terminated();
                debug!("stop: pid={}", pid.raw());
                Ok(())
            }
            None => Err(SchedError::TaskGone),
        }
    }

    fn pause_task(&mut self, pid: Pid) -> Result<(), SchedError> {
        match self.tasks.get_mut(&pid) {
            Some(entry) => {
                entry.status = TaskStatus::Paused;
                Ok(())
            }
            None => Err(SchedError::TaskGone),
        }
    }

    fn resume_task(&mut self, pid: Pid) -> Result<(), SchedError> {
        match self.tasks.get_mut(&pid) {
            Some(entry) => {
                entry.status = TaskStatus::Running;
                Ok(())
            }
            None => Err(SchedError::TaskGone),
        }
    }

    fn status_of(&self, pid: Pid) -> Result<TaskStatus, SchedError> {
        self.tasks.get(&pid).map(|e| e.status).ok_or(SchedError::TaskGone)
    }

    fn arm(&self, descriptor: WaitDescriptor, now: u64) -> Armed {
        match descriptor {
            WaitDescriptor::RoundRobin => Armed::RoundRobin,
            WaitDescriptor::Timeout(t) => {
                Armed::Timeout { deadline_us: crate::time::arm_deadline(now, t.secs()) }
            }
            WaitDescriptor::Poller(p) => Armed::from_poller(p, now),
            WaitDescriptor::Pinblock(pb) => {
                let deadline_us = pb.timeout_secs.map(|s| crate::time::arm_deadline(now, s));
                Armed::Pinblock { isr: pb.isr, deadline_us }
            }
        }
    }

    fn tick_heartbeat(&mut self) {
        if let Some(hb) = self.config.heartbeat.clone() {
            let now = self.clock.now_us();
            if crate::time::elapsed(self.heartbeat_last_us, now) >= hb.period_us {
                self.heartbeat_state = !self.heartbeat_state;
                hb.pins.write(hb.pin, self.heartbeat_state);
                self.heartbeat_last_us = now;
                self.metrics.record_heartbeat_toggle();
            }
        }
    }

    /// Enters the dispatch loop until every task has terminated or
    /// `stop(None)`/`stop_scheduler` is observed.
    ///
    /// A second, nested call while already running is rejected with
    /// `Reentrant`. In safe Rust this guard is unreachable — nothing in
    /// this crate re-enters `run` on the same `&mut Sched`, and the borrow
    /// checker forbids a caller from holding two such references — but it
    /// documents the invariant the way the source's reentrancy check does.
    pub fn run(&mut self) -> Result<(), SchedError> {
        if self.running {
            return Err(SchedError::Reentrant);
        }
        self.running = true;
        self.stop_requested = false;
        while !self.stop_requested {
            if self.tasks.is_empty() && self.pending_add.is_empty() {
                break;
            }
            self.run_once();
        }
        self.running = false;
        Ok(())
    }

    /// Runs exactly one dispatch cycle:
    ///
    /// 1. Drain staged additions into the live table.
    /// 2. Tick the heartbeat, independent of which task (if any) wins.
    /// 3. For each `Running` task, evaluate its scheduling tuple
    ///    `(pin_hits, poll_value, lateness_us)`, snapshotting-and-clearing
    ///    `Pinblock` counters and invoking `Poller` callbacks along the way.
    /// 4. Select the winner: lexicographic maximum tuple among
    ///    tuple-eligible tasks, falling back to the least-recently-run
    ///    round-robin task when none is eligible. Ties broken by lowest
    ///    `pid` (guaranteed by ascending `BTreeMap` iteration order plus a
    ///    strict-improvement replacement rule).
    /// 5. Resume the winner with the tuple as its resume payload; record
    ///    its new wait descriptor (or terminate it).
    ///
    /// Exposed directly (not only through `run`'s loop) so callers can
    /// interleave their own housekeeping between cycles, and so tests can
    /// drive the scheduler deterministically one cycle at a time.
    pub fn run_once(&mut self) {
        if !self.pending_add.is_empty() {
            for staged in self.pending_add.drain(..).collect::<Vec<_>>() {
                self.tasks.insert(staged.pid, staged);
            }
        }

        self.tick_heartbeat();

        let now = self.clock.now_us();
        let mut best_tuple: Option<(u32, i32, u64)> = None;
        let mut best_pid: Option<Pid> = None;
        let mut best_rr_key: Option<u64> = None;
        let mut best_rr_pid: Option<Pid> = None;
        let mut poller_calls = 0u64;

        for entry in self.tasks.values_mut() {
            if entry.status != TaskStatus::Running {
                continue;
            }
            let pid = entry.pid;
            match &mut entry.wait {
                Armed::RoundRobin | Armed::NewlyAdded => {
                    let key = entry.rr_last_run;
                    if best_rr_key.map_or(true, |bk| key < bk) {
                        best_rr_key = Some(key);
                        best_rr_pid = Some(pid);
                    }
                }
                Armed::Timeout { deadline_us } => {
                    let diff = ticks_diff(now, *deadline_us);
                    if diff >= 0 {
                        let tuple = (0u32, 0i32, diff as u64);
                        if best_tuple.map_or(true, |b| tuple > b) {
                            best_tuple = Some(tuple);
                            best_pid = Some(pid);
                        }
                    }
                }
                Armed::Poller { callback, deadline_us } => {
                    let r = callback();
                    poller_calls += 1;
                    entry.poller_invocations += 1;
                    // Eligibility is tracked explicitly rather than inferred
                    // from "tuple != (0,0,0)": a timer that elapsed exactly
                    // at `now` yields a legitimate zero-lateness tuple, which
                    // must still win, the same as `Armed::Timeout` below.
                    let (eligible, tuple) = if r != 0 {
                        (true, (0u32, r, 0u64))
                    } else if let Some(dl) = *deadline_us {
                        let diff = ticks_diff(now, dl);
                        if diff >= 0 {
                            (true, (0u32, 0i32, diff as u64))
                        } else {
                            (false, (0u32, 0i32, 0u64))
                        }
                    } else {
                        (false, (0u32, 0i32, 0u64))
                    };
                    if eligible && best_tuple.map_or(true, |b| tuple > b) {
                        best_tuple = Some(tuple);
                        best_pid = Some(pid);
                    }
                }
                Armed::Pinblock { isr, deadline_us } => {
                    let pin_hits = isr.snapshot_and_clear();
                    // Same explicit-eligibility treatment as `Armed::Poller`
                    // above: a zero-lateness timeout must still be eligible.
                    let (eligible, tuple) = if pin_hits > 0 {
                        (true, (pin_hits, 0i32, 0u64))
                    } else if let Some(dl) = *deadline_us {
                        let diff = ticks_diff(now, dl);
                        if diff >= 0 {
                            (true, (0u32, 0i32, diff as u64))
                        } else {
                            (false, (0u32, 0i32, 0u64))
                        }
                    } else {
                        (false, (0u32, 0i32, 0u64))
                    };
                    if eligible && best_tuple.map_or(true, |b| tuple > b) {
                        best_tuple = Some(tuple);
                        best_pid = Some(pid);
                    }
                }
            }
        }

        if poller_calls > 0 {
            self.metrics.record_poller_invocations(poller_calls);
        }

        let winner = match (best_pid, best_tuple, best_rr_pid) {
            (Some(p), Some(t), _) => Some((p, t)),
            (None, None, Some(p)) => Some((p, (0u32, 0i32, 0u64))),
            _ => None,
        };

        let (winner_pid, (pin_hits, poll_value, lateness_us)) = match winner {
            Some(w) => w,
            None => {
                // Nothing eligible this cycle (every task Paused, or no
                // deadline due yet). Housekeeping above already ran.
                self.metrics.record_dispatch_cycle();
                return;
            }
        };

        let mut entry = self
            .tasks
            .remove(&winner_pid)
            .expect("winner_pid was just observed in self.tasks");
        // Assign *after* incrementing: a freshly-run task must land strictly
        // above every task still sitting at the default `0`, or it would tie
        // with (and, via the pid tie-break, permanently starve) them.
        self.rr_seq = self.rr_seq.wrapping_add(1);
        entry.rr_last_run = self.rr_seq;

        let resume = Resume::Tuple { pin_hits, poll_value, lateness_us };
        let outcome = {
            let mut ctl = SchedCtl { sched: &mut *self, current: winner_pid };
            entry.task.step(&mut ctl, resume)
        };

        self.metrics.record_dispatch_cycle();
        self.metrics.record_context_switch();

        let self_pause = core::mem::take(&mut self.pending_self_pause);
        let self_terminate = core::mem::take(&mut self.pending_self_terminate);

        if self_terminate {
            self.metrics.record_task_terminated();
            debug!("task self-terminated: pid={}", winner_pid.raw());
            return;
        }

        match outcome {
            StepOutcome::Done => {
                self.metrics.record_task_terminated();
                debug!("task finished: pid={}", winner_pid.raw());
            }
            StepOutcome::BadYield => {
                self.metrics.record_bad_yield();
                self.metrics.record_task_terminated();
                self.last_fault = Some((winner_pid, SchedError::BadYield(winner_pid)));
                warn!("task surrendered an invalid wait descriptor: pid={}", winner_pid.raw());
            }
            StepOutcome::Yield(descriptor) => {
                let now = self.clock.now_us();
                entry.wait = self.arm(descriptor, now);
                entry.status = if self_pause { TaskStatus::Paused } else { TaskStatus::Running };
                self.tasks.insert(winner_pid, entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};

    use super::*;
    use crate::pin::{Edge, PinController, PinId, Pull};
    use crate::testutil::FakePinController;
    use crate::time::FakeClock;
    use crate::wait::{Pinblock, Poller, Timeout};

    fn sched_with_gc_off() -> Sched {
        Sched::new(Box::new(FakeClock::new()), SchedConfig::new().with_gc_enable(false))
    }

    /// Yields `RoundRobin` forever, recording (in order) every `pid` it is
    /// resumed with into a shared log. Used to observe dispatch order and
    /// fairness without depending on timing.
    struct RrRecorder {
        log: Rc<RefCell<Vec<u32>>>,
    }

    impl Task for RrRecorder {
        fn step(&mut self, ctl: &mut SchedCtl<'_>, _resume: Resume) -> StepOutcome {
            self.log.borrow_mut().push(ctl.current_pid().raw());
            StepOutcome::Yield(WaitDescriptor::RoundRobin)
        }
    }

    /// Re-yields the `Timeout` it was built with forever, recording every
    /// `lateness_us` it is resumed with.
    struct TimeoutRecorder {
        secs: f64,
        lateness: Rc<RefCell<Vec<u64>>>,
    }

    impl Task for TimeoutRecorder {
        fn step(&mut self, _ctl: &mut SchedCtl<'_>, resume: Resume) -> StepOutcome {
            if let Resume::Tuple { lateness_us, .. } = resume {
                self.lateness.borrow_mut().push(lateness_us);
            }
            StepOutcome::Yield(WaitDescriptor::Timeout(Timeout::new(self.secs).unwrap()))
        }
    }

    /// A `Poller` that always reports a fixed non-zero strength — eligible
    /// every single cycle, the saturated-poller half of the starvation
    /// scenario.
    struct SaturatedPoller {
        strength: i32,
        runs: Rc<Cell<u32>>,
    }

    impl Task for SaturatedPoller {
        fn step(&mut self, _ctl: &mut SchedCtl<'_>, _resume: Resume) -> StepOutcome {
            self.runs.set(self.runs.get() + 1);
            let strength = self.strength;
            StepOutcome::Yield(WaitDescriptor::Poller(Poller::new(move || strength, None).unwrap()))
        }
    }

    /// Waits on a pin edge, recording every `pin_hits` it is resumed with.
    /// Constructs its `Pinblock` exactly once, on `NewlyAdded`, and re-yields
    /// the same (cloned) value thereafter — reinstalling the ISR on every
    /// suspension would be a distinct bug from the one this harness tests.
    struct PinWaiter {
        pins: Rc<dyn PinController>,
        pin: PinId,
        pb: Option<Pinblock>,
        hits: Rc<RefCell<Vec<u32>>>,
    }

    impl Task for PinWaiter {
        fn step(&mut self, _ctl: &mut SchedCtl<'_>, resume: Resume) -> StepOutcome {
            if let Resume::Tuple { pin_hits, .. } = resume {
                self.hits.borrow_mut().push(pin_hits);
            }
            if self.pb.is_none() {
                self.pb =
                    Some(Pinblock::new(&*self.pins, self.pin, Edge::RISING, Pull::None, |_| {}, None).unwrap());
            }
            StepOutcome::Yield(WaitDescriptor::Pinblock(self.pb.clone().unwrap()))
        }
    }

    /// Returns `Done` on the very first `step`, used to exercise `BadThread`.
    struct DoneImmediately;

    impl Task for DoneImmediately {
        fn step(&mut self, _ctl: &mut SchedCtl<'_>, _resume: Resume) -> StepOutcome {
            StepOutcome::Done
        }
    }

    /// Yields `RoundRobin` once, then reports `BadYield` on its second step —
    /// models a task that discovers mid-flight it has nothing sensible to
    /// wait on.
    struct GoesBadOnSecondStep {
        stepped_once: bool,
    }

    impl Task for GoesBadOnSecondStep {
        fn step(&mut self, _ctl: &mut SchedCtl<'_>, _resume: Resume) -> StepOutcome {
            if self.stepped_once {
                StepOutcome::BadYield
            } else {
                self.stepped_once = true;
                StepOutcome::Yield(WaitDescriptor::RoundRobin)
            }
        }
    }

    /// Pauses itself on the first resume after `NewlyAdded`, then would
    /// record further resumes if any arrived.
    struct SelfPauser {
        resumed: Rc<Cell<u32>>,
    }

    impl Task for SelfPauser {
        fn step(&mut self, ctl: &mut SchedCtl<'_>, resume: Resume) -> StepOutcome {
            if matches!(resume, Resume::Tuple { .. }) {
                self.resumed.set(self.resumed.get() + 1);
                let pid = ctl.current_pid();
                ctl.pause(pid).unwrap();
            }
            StepOutcome::Yield(WaitDescriptor::RoundRobin)
        }
    }

    #[test]
    fn add_order_drives_each_task_to_its_first_suspension_in_call_order() {
        let mut sched = sched_with_gc_off();
        let log = Rc::new(RefCell::new(Vec::new()));
        for id in 1..=3u32 {
            let log = Rc::clone(&log);
            // A task whose very first `step` (NewlyAdded) records its own
            // logical id before suspending, so the order here reflects
            // add_thread's synchronous initializer run, not dispatch order.
            struct Init {
                id: u32,
                log: Rc<RefCell<Vec<u32>>>,
            }
            impl Task for Init {
                fn step(&mut self, _ctl: &mut SchedCtl<'_>, resume: Resume) -> StepOutcome {
                    if matches!(resume, Resume::NewlyAdded) {
                        self.log.borrow_mut().push(self.id);
                    }
                    StepOutcome::Yield(WaitDescriptor::RoundRobin)
                }
            }
            sched.add_thread(Box::new(Init { id, log })).unwrap();
        }
        assert_eq!(*log.borrow(), alloc::vec![1, 2, 3]);
    }

    #[test]
    fn round_robin_rotates_fairly_across_idle_and_user_tasks() {
        let mut sched = sched_with_gc_off();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&log) })).unwrap();
        let b = sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&log) })).unwrap();

        for _ in 0..9 {
            sched.run_once();
        }

        // Three round-robin participants (idle + a + b, idle not logging):
        // nine cycles should land exactly three dispatches on each of a, b.
        let log = log.borrow();
        let count = |pid: Pid| log.iter().filter(|&&p| p == pid.raw()).count();
        assert_eq!(count(a), 3);
        assert_eq!(count(b), 3);
        assert_eq!(log.len(), 6);
    }

    #[test]
    fn timeout_wins_over_round_robin_once_due() {
        let clock = Rc::new(FakeClock::new());
        struct ClockRef(Rc<FakeClock>);
        impl Clock for ClockRef {
            fn now_us(&self) -> u64 {
                self.0.now_us()
            }
        }
        let mut sched = Sched::new(Box::new(ClockRef(Rc::clone(&clock))), SchedConfig::new().with_gc_enable(false));

        let rr_log = Rc::new(RefCell::new(Vec::new()));
        let rr = sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&rr_log) })).unwrap();
        let lateness = Rc::new(RefCell::new(Vec::new()));
        let timeout = sched
            .add_thread(Box::new(TimeoutRecorder { secs: 0.01, lateness: Rc::clone(&lateness) }))
            .unwrap();
        let _ = rr;
        let _ = timeout;

        // Not due yet: only the round-robin tier (idle + rr) is eligible.
        sched.run_once();
        sched.run_once();
        assert!(lateness.borrow().is_empty());

        clock.advance_secs(0.02);
        sched.run_once();
        assert_eq!(lateness.borrow().len(), 1);
        assert!(lateness.borrow()[0] >= 10_000);
    }

    /// A `Poller` whose callback never reports an event, so it can only ever
    /// become eligible through its own `timeout_secs`. Records every
    /// `lateness_us` it is resumed with.
    struct NeverFiresPoller {
        timeout_secs: f64,
        lateness: Rc<RefCell<Vec<u64>>>,
    }

    impl Task for NeverFiresPoller {
        fn step(&mut self, _ctl: &mut SchedCtl<'_>, resume: Resume) -> StepOutcome {
            if let Resume::Tuple { lateness_us, .. } = resume {
                self.lateness.borrow_mut().push(lateness_us);
            }
            StepOutcome::Yield(WaitDescriptor::Poller(Poller::new(|| 0, Some(self.timeout_secs)).unwrap()))
        }
    }

    #[test]
    fn poller_timeout_is_eligible_at_exactly_zero_lateness() {
        let clock = Rc::new(FakeClock::new());
        struct ClockRef(Rc<FakeClock>);
        impl Clock for ClockRef {
            fn now_us(&self) -> u64 {
                self.0.now_us()
            }
        }
        let mut sched = Sched::new(Box::new(ClockRef(Rc::clone(&clock))), SchedConfig::new().with_gc_enable(false));

        let lateness = Rc::new(RefCell::new(Vec::new()));
        sched
            .add_thread(Box::new(NeverFiresPoller { timeout_secs: 0.01, lateness: Rc::clone(&lateness) }))
            .unwrap();

        // Advance the clock by exactly the armed interval, so the timeout's
        // deadline is reached with lateness_us == 0 — the tuple is
        // (0, 0, 0), which must still be selected over round-robin rather
        // than mistaken for "not eligible".
        clock.advance_secs(0.01);
        sched.run_once();
        assert_eq!(
            lateness.borrow().as_slice(),
            &[0],
            "a Poller timeout due at exactly now must win the same cycle it elapses, not the next one"
        );
    }

    #[test]
    fn saturated_poller_starves_round_robin_tasks() {
        let mut sched = sched_with_gc_off();
        let rr_log = Rc::new(RefCell::new(Vec::new()));
        let rr = sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&rr_log) })).unwrap();
        let poller_runs = Rc::new(Cell::new(0));
        sched
            .add_thread(Box::new(SaturatedPoller { strength: 5, runs: Rc::clone(&poller_runs) }))
            .unwrap();

        for _ in 0..50 {
            sched.run_once();
        }

        assert_eq!(poller_runs.get(), 50);
        assert!(
            !rr_log.borrow().iter().any(|&p| p == rr.raw()),
            "round-robin task ran while a tuple-eligible poller was always due"
        );
    }

    #[test]
    fn pin_hits_accumulate_between_dispatches_and_clear_on_read() {
        let pins: Rc<dyn PinController> = Rc::new(FakePinController::new());
        let mut sched = sched_with_gc_off();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let watch_pin = PinId(7);
        sched
            .add_thread(Box::new(PinWaiter {
                pins: Rc::clone(&pins),
                pin: watch_pin,
                pb: None,
                hits: Rc::clone(&hits),
            }))
            .unwrap();

        // Two rising edges before the task is ever dispatched again: the ISR
        // counter accumulates both.
        pins.write(watch_pin, true);
        pins.write(watch_pin, false);
        pins.write(watch_pin, true);

        sched.run_once();
        assert_eq!(*hits.borrow().last().unwrap(), 2);

        // No further edges: subsequent cycles must not keep reporting hits,
        // and the round-robin idle task picks up the slack instead.
        sched.run_once();
        sched.run_once();
        assert_eq!(hits.borrow().len(), 1);
    }

    #[test]
    fn bad_thread_rejects_a_task_that_completes_before_its_first_suspension() {
        let mut sched = sched_with_gc_off();
        let err = sched.add_thread(Box::new(DoneImmediately)).unwrap_err();
        assert_eq!(err, SchedError::BadThread);
    }

    #[test]
    fn bad_yield_terminates_only_the_offending_task() {
        let mut sched = sched_with_gc_off();
        let bad = sched.add_thread(Box::new(GoesBadOnSecondStep { stepped_once: false })).unwrap();
        let rr_log = Rc::new(RefCell::new(Vec::new()));
        sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&rr_log) })).unwrap();

        let before = sched.task_count();
        // Two round-robin passes: first resumes `bad` with RoundRobin
        // (stepped_once flips true), second resumes it again and it reports
        // BadYield.
        for _ in 0..6 {
            sched.run_once();
            if sched.status(bad).is_err() {
                break;
            }
        }

        assert_eq!(sched.status(bad), Err(SchedError::TaskGone));
        assert_eq!(sched.task_count(), before - 1);
        let (faulted_pid, err) = sched.last_fault().unwrap();
        assert_eq!(faulted_pid, bad);
        assert_eq!(err, SchedError::BadYield(bad));
        // The other round-robin task kept running.
        assert!(!rr_log.borrow().is_empty());
    }

    #[test]
    fn pause_removes_a_task_from_dispatch_until_resumed() {
        let mut sched = sched_with_gc_off();
        let rr_log = Rc::new(RefCell::new(Vec::new()));
        let paused = sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&rr_log) })).unwrap();
        sched.pause(paused).unwrap();
        assert_eq!(sched.status(paused).unwrap(), TaskStatus::Paused);

        for _ in 0..5 {
            sched.run_once();
        }
        assert!(!rr_log.borrow().iter().any(|&p| p == paused.raw()));

        sched.resume(paused).unwrap();
        assert_eq!(sched.status(paused).unwrap(), TaskStatus::Running);
        for _ in 0..5 {
            sched.run_once();
        }
        assert!(rr_log.borrow().iter().any(|&p| p == paused.raw()));
    }

    #[test]
    fn self_pause_takes_effect_only_after_the_current_step_returns() {
        let mut sched = sched_with_gc_off();
        let resumed = Rc::new(Cell::new(0));
        let pid = sched.add_thread(Box::new(SelfPauser { resumed: Rc::clone(&resumed) })).unwrap();

        for _ in 0..5 {
            sched.run_once();
        }

        assert_eq!(resumed.get(), 1);
        assert_eq!(sched.status(pid).unwrap(), TaskStatus::Paused);
    }

    #[test]
    fn stop_removes_the_task_immediately_without_disturbing_others() {
        let mut sched = sched_with_gc_off();
        let rr_log = Rc::new(RefCell::new(Vec::new()));
        let victim = sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&rr_log) })).unwrap();
        let survivor = sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&rr_log) })).unwrap();

        let before = sched.task_count();
        sched.stop(Some(victim)).unwrap();
        assert_eq!(sched.task_count(), before - 1);
        assert_eq!(sched.status(victim), Err(SchedError::TaskGone));

        for _ in 0..6 {
            sched.run_once();
        }
        assert!(!rr_log.borrow().iter().any(|&p| p == victim.raw()));
        assert!(rr_log.borrow().iter().any(|&p| p == survivor.raw()));
    }

    #[test]
    fn operations_against_a_terminated_task_report_task_gone() {
        let mut sched = sched_with_gc_off();
        let rr_log = Rc::new(RefCell::new(Vec::new()));
        let pid = sched.add_thread(Box::new(RrRecorder { log: rr_log })).unwrap();
        sched.stop(Some(pid)).unwrap();

        assert_eq!(sched.stop(Some(pid)), Err(SchedError::TaskGone));
        assert_eq!(sched.pause(pid), Err(SchedError::TaskGone));
        assert_eq!(sched.resume(pid), Err(SchedError::TaskGone));
        assert_eq!(sched.status(pid), Err(SchedError::TaskGone));
    }

    #[test]
    fn staged_add_does_not_compete_until_the_next_cycle() {
        let mut sched = sched_with_gc_off();
        let rr_log = Rc::new(RefCell::new(Vec::new()));
        let existing = sched.add_thread(Box::new(RrRecorder { log: Rc::clone(&rr_log) })).unwrap();

        struct Spawner {
            rr_log: Rc<RefCell<Vec<u32>>>,
        }
        impl Task for Spawner {
            fn step(&mut self, ctl: &mut SchedCtl<'_>, _resume: Resume) -> StepOutcome {
                let log = Rc::clone(&self.rr_log);
                ctl.add_thread(Box::new(RrRecorder { log })).unwrap();
                StepOutcome::Yield(WaitDescriptor::RoundRobin)
            }
        }
        sched.add_thread(Box::new(Spawner { rr_log: Rc::clone(&rr_log) })).unwrap();

        let before = sched.task_count();
        sched.run_once(); // idle runs first (pid 1, lowest, still tied at 0)
        sched.run_once(); // existing runs
        sched.run_once(); // spawner runs, stages a new task; table grows by one
        assert_eq!(sched.task_count(), before + 1);

        let _ = existing;
    }

    #[test]
    fn reentrant_run_is_rejected() {
        let mut sched = sched_with_gc_off();
        sched.running = true;
        assert_eq!(sched.run(), Err(SchedError::Reentrant));
        sched.running = false;
    }

    #[test]
    fn run_returns_promptly_once_stop_scheduler_is_requested() {
        struct StopsAfterN {
            remaining: u32,
        }
        impl Task for StopsAfterN {
            fn step(&mut self, ctl: &mut SchedCtl<'_>, _resume: Resume) -> StepOutcome {
                if self.remaining == 0 {
                    ctl.stop_scheduler();
                } else {
                    self.remaining -= 1;
                }
                StepOutcome::Yield(WaitDescriptor::RoundRobin)
            }
        }
        let mut sched = sched_with_gc_off();
        sched.add_thread(Box::new(StopsAfterN { remaining: 3 })).unwrap();
        // `run()` must return control once `stop_scheduler` is observed,
        // without waiting for every task to terminate on its own — neither
        // task here ever yields `Done`.
        sched.run().unwrap();
        assert_eq!(sched.task_count(), 2);
    }
}
