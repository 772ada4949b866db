//! `SynCom` — a deterministic full-duplex synchronous link over four GPIOs,
//! built as a single background [`Task`] on top of [`crate::scheduler::Sched`].
//!
//! The background task fuses transmitter and receiver into one loop (spec.md
//! §4.4): each dispatch it exchanges through a [`phy::Phy`] up to `latency`
//! completed characters — or fewer, since the protocol is bilateral and a
//! half-edge frequently has to wait on the peer's own task running before
//! this phy can advance again — then yields
//! [`crate::wait::WaitDescriptor::RoundRobin`]. See
//! [`SynComTask::run_batch`] for the exact accounting.
//! Framing, the `Unsynced`/`Synced`/`TimedOut` handshake, and the queues live
//! in [`link::LinkState`], shared with the public handle through an
//! `Arc<spin::Mutex<..>>` so `send`/`get` can be called from any task's body
//! without going through the scheduler at all.

pub mod codec;
mod link;
pub mod phy;

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

pub use codec::Codec;
pub use link::Phase;
pub use phy::Role;

use link::{LinkState, DEFAULT_BITS, DEFAULT_LATENCY, RESET_PULSE_US};
use phy::{GpioPhy, Phy};

use crate::error::{SchedError, SynComError};
use crate::pin::{PinController, PinId};
use crate::scheduler::{SchedCtl, Sched};
use crate::task::{Pid, Resume, StepOutcome, Task};
use crate::wait::{Poller, Timeout, WaitDescriptor};

enum TaskPhase {
    /// Reset pin is being held at its active level for [`RESET_PULSE_US`].
    ResetAsserted,
    /// Normal exchange loop.
    Running,
}

struct SynComTask<T, C: Codec<T>> {
    link: Arc<Mutex<LinkState<T, C>>>,
    phy: Box<dyn Phy>,
    latency: u32,
    pins: Rc<dyn PinController>,
    reset: Option<(PinId, bool)>,
    phase: TaskPhase,
}

impl<T, C: Codec<T>> SynComTask<T, C> {
    /// Drives the phy until `latency` characters have fully exchanged or it
    /// stops making progress, whichever comes first.
    ///
    /// `next_tx_byte` is only called when the phy [`Phy::is_idle`], i.e. it
    /// is actually about to latch a fresh byte — calling it on every loop
    /// iteration regardless of phy state would advance the tx queue/cursor
    /// for bytes the phy silently drops mid-exchange. In practice a single
    /// dispatch rarely completes more than one character: the protocol is
    /// bilateral, so most half-edges are waiting on the peer's own task to
    /// run before this phy can advance again. `latency` still bounds the
    /// work this call will do on dispatches where the phy *can* keep going
    /// (e.g. several characters already in flight across a backlog), rather
    /// than being a dead constructor argument.
    fn run_batch(&mut self, ctl: &mut SchedCtl<'_>) -> StepOutcome {
        let mut link = self.link.lock();
        link.check_timeout(ctl.now_us());
        let mut exchanged = 0u32;
        while exchanged < self.latency.max(1) {
            let out_byte = if self.phy.is_idle() { link.next_tx_byte() } else { 0 };
            match self.phy.poll(out_byte) {
                None => break,
                Some(received) => {
                    link.on_char_received(received, ctl.now_us());
                    exchanged += 1;
                }
            }
        }
        drop(link);
        StepOutcome::Yield(WaitDescriptor::RoundRobin)
    }
}

impl<T: 'static, C: Codec<T> + 'static> Task for SynComTask<T, C> {
    fn step(&mut self, ctl: &mut SchedCtl<'_>, resume: Resume) -> StepOutcome {
        match resume {
            Resume::NewlyAdded => {
                if let Some((pin, level)) = self.reset {
                    self.pins.write(pin, level);
                    self.phase = TaskPhase::ResetAsserted;
                    return StepOutcome::Yield(WaitDescriptor::Timeout(
                        Timeout::new(RESET_PULSE_US as f64 / 1_000_000.0)
                            .expect("fixed 100ms reset pulse is well within MAXSECS"),
                    ));
                }
                self.run_batch(ctl)
            }
            Resume::Tuple { .. } => match self.phase {
                TaskPhase::ResetAsserted => {
                    if let Some((pin, level)) = self.reset {
                        self.pins.write(pin, !level);
                    }
                    self.phase = TaskPhase::Running;
                    self.run_batch(ctl)
                }
                TaskPhase::Running => self.run_batch(ctl),
            },
        }
    }

    fn name(&self) -> Option<&'static str> {
        Some("syncom")
    }
}

/// A synchronous link carrying application values of type `T`, encoded and
/// decoded through `C`. Construct with [`SynCom::new`], bring the link up
/// with [`SynCom::start`], then exchange values with [`SynCom::send`] /
/// [`SynCom::get`] (or [`SynCom::send_str`] / [`SynCom::get_str`] for raw
/// 7-bit strings).
pub struct SynCom<T, C: Codec<T>> {
    link: Arc<Mutex<LinkState<T, C>>>,
    pins: Rc<dyn PinController>,
    role: Role,
    bits: u8,
    latency: u32,
    ckin: PinId,
    ckout: PinId,
    din: PinId,
    dout: PinId,
    task_pid: Option<Pid>,
}

impl<T: 'static, C: Codec<T> + 'static> SynCom<T, C> {
    /// Builds a link. Does not start the background task — call
    /// [`SynCom::start`] once the scheduler is ready to drive it.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        sched: &Sched,
        passive: bool,
        pins: Rc<dyn PinController>,
        ckin: PinId,
        ckout: PinId,
        din: PinId,
        dout: PinId,
        codec: C,
        latency: u32,
        verbose: bool,
    ) -> Self {
        let now = sched.now_us();
        Self {
            link: Arc::new(Mutex::new(LinkState::new(codec, 0, verbose, now))),
            pins,
            role: if passive { Role::Passive } else { Role::Initiator },
            bits: DEFAULT_BITS,
            latency: if latency == 0 { DEFAULT_LATENCY } else { latency },
            ckin,
            ckout,
            din,
            dout,
            task_pid: None,
        }
    }

    /// Switches to 8-bit characters (spec.md's deployment-time wide build).
    #[must_use]
    pub fn with_bits(mut self, bits: u8) -> Self {
        self.bits = bits;
        self
    }

    /// Starts (or restarts) the background task. If `reset_pin` is given,
    /// it is driven to `reset_level` for 100 ms to reboot the peer, then
    /// released, before synchronisation begins. Restarting kills whatever
    /// background task was previously running for this link — the
    /// documented recovery path after `TimedOut`.
    pub fn start(
        &mut self,
        sched: &mut Sched,
        reset_pin: Option<PinId>,
        reset_level: Option<bool>,
    ) -> Result<Pid, SchedError> {
        if let Some(old) = self.task_pid.take() {
            let _ = sched.stop(Some(old));
        }
        let now = sched.now_us();
        self.link.lock().reset_for_restart(now);
        let phy =
            GpioPhy::new(Rc::clone(&self.pins), self.role, self.bits, self.ckin, self.ckout, self.din, self.dout);
        let task = SynComTask {
            link: Arc::clone(&self.link),
            phy: Box::new(phy),
            latency: self.latency,
            pins: Rc::clone(&self.pins),
            reset: reset_pin.map(|p| (p, reset_level.unwrap_or(true))),
            phase: TaskPhase::Running,
        };
        let pid = sched.add_named_thread("syncom", Box::new(task))?;
        self.task_pid = Some(pid);
        Ok(pid)
    }

    /// Queues `value` for transmission. Encoding happens immediately, so an
    /// [`SynComError::EncodeError`] is reported to the caller synchronously
    /// rather than discovered later by the background task.
    pub fn send(&self, value: &T) -> Result<(), SynComError> {
        let mut link = self.link.lock();
        let bytes = link.encode(value)?;
        link.queue_bytes(bytes);
        Ok(())
    }

    /// Pops the oldest fully-received message, or `None` if none is ready.
    pub fn get(&self) -> Result<Option<T>, SynComError> {
        self.link.lock().pop_value()
    }

    /// Queues a raw 7-bit-clean string, bypassing `C` entirely.
    pub fn send_str(&self, s: &str) -> Result<(), SynComError> {
        if s.as_bytes().iter().any(|b| *b == 0 || *b >= 0x80) {
            return Err(SynComError::EncodeError);
        }
        self.link.lock().queue_bytes(s.as_bytes().to_vec());
        Ok(())
    }

    /// Pops the oldest received frame as a raw string, bypassing `C`.
    pub fn get_str(&self) -> Result<Option<String>, SynComError> {
        self.link.lock().pop_str()
    }

    /// Exact count of values `get`/`get_str` will return before `None`.
    #[must_use]
    pub fn any(&self) -> usize {
        self.link.lock().any()
    }

    /// Sets the liveness timeout (`0`/`None` disables it); returns the
    /// previous value.
    pub fn set_timeout(&self, us: Option<u64>) -> u64 {
        let mut link = self.link.lock();
        let prev = link.timeout_us;
        link.timeout_us = us.unwrap_or(0);
        prev
    }

    /// Whether the link is in [`Phase::Synced`].
    #[must_use]
    pub fn running(&self) -> bool {
        self.link.lock().is_running()
    }

    /// The link's current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.link.lock().phase
    }

    /// Builds a fresh [`Poller`] that reports `1` once a value is ready to
    /// `get`, `2` once the link has gone `TimedOut`, else `0` — spec.md's
    /// `await_obj`. Built on demand (rather than stored once) since a
    /// [`Poller`] owns a boxed closure that isn't `Clone`.
    pub fn await_poller(&self, timeout_secs: Option<f64>) -> Result<Poller, SchedError> {
        let link = Arc::clone(&self.link);
        Poller::new(
            move || {
                let link = link.lock();
                if link.any() > 0 {
                    1
                } else if link.is_timed_out() {
                    2
                } else {
                    0
                }
            },
            timeout_secs,
        )
    }
}
