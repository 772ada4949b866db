//! Wait primitives: the small values a task yields to describe why it is
//! suspended and what would make it runnable again.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::SchedError;
use crate::pin::{Direction, Edge, PinController, PinId, Pull};
use crate::time::{secs_to_us, MAXSECS};

/// The wait descriptor a task yields at a suspension point.
///
/// The source's fifth case, `NewlyAdded`, is represented instead as
/// [`crate::task::Resume::NewlyAdded`] — it describes what a task *receives*
/// on its first `step`, never something a task constructs and yields, so it
/// has no place in the type a task hands back to the scheduler.
pub enum WaitDescriptor {
    /// Run again after every other pending round-robin task has had a turn.
    RoundRobin,
    /// Run no earlier than the armed deadline.
    Timeout(Timeout),
    /// Runnable when the callback reports a non-zero strength, or on timeout.
    Poller(Poller),
    /// Runnable when the ISR counter is non-zero, or on timeout.
    Pinblock(Pinblock),
}

/// A fixed-delay wait. Re-yielding a `Timeout` re-arms it: the scheduler
/// arms the absolute deadline at the moment it observes the yield (`now +
/// secs`), so there is no stored-identity requirement — two structurally
/// equal `Timeout` values yielded a minute apart arm to different
/// deadlines, matching the "observable semantics must match" design note.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    pub(crate) secs: f64,
}

impl Timeout {
    /// Builds a `Timeout`, rejecting delays the wrap-aware counter cannot
    /// unambiguously represent.
    pub fn new(secs: f64) -> Result<Self, SchedError> {
        secs_to_us(secs)?;
        Ok(Self { secs })
    }

    #[must_use]
    pub fn secs(&self) -> f64 {
        self.secs
    }
}

/// A polled condition. `callback` must be cheap: the scheduler calls it on
/// every dispatch cycle while any `Poller` task is pending, so its cost
/// directly constrains dispatch throughput.
pub struct Poller {
    pub(crate) callback: Box<dyn FnMut() -> i32>,
    pub(crate) timeout_secs: Option<f64>,
}

impl Poller {
    /// `callback` returns 0 for "no event", or a non-zero strength. If
    /// `timeout_secs` is set and the callback keeps returning 0 past it, the
    /// task becomes runnable anyway via `lateness_us`.
    pub fn new(
        callback: impl FnMut() -> i32 + 'static,
        timeout_secs: Option<f64>,
    ) -> Result<Self, SchedError> {
        if let Some(secs) = timeout_secs {
            secs_to_us(secs)?;
        }
        Ok(Self { callback: Box::new(callback), timeout_secs })
    }
}

/// Shared, ISR-incremented counter backing a [`Pinblock`]. Cloning is cheap
/// (an `Arc` bump); the scheduler and the installed ISR each hold one.
#[derive(Clone)]
pub struct IsrHandle {
    pin: PinId,
    counter: Arc<AtomicU32>,
}

impl IsrHandle {
    /// The pin this handle watches.
    #[must_use]
    pub fn pin(&self) -> PinId {
        self.pin
    }

    /// Reads and clears the counter. `isr_counter` is monotonically
    /// non-decreasing between reads; a read always clears it.
    pub(crate) fn snapshot_and_clear(&self) -> u32 {
        self.counter.swap(0, Ordering::SeqCst)
    }
}

/// A wait on a pin-change interrupt. Construction installs the ISR; the
/// returned value is cheap to clone and re-yield (the ISR is installed
/// exactly once, at construction — re-yielding must not reinstall it).
#[derive(Clone)]
pub struct Pinblock {
    pub(crate) isr: IsrHandle,
    pub(crate) timeout_secs: Option<f64>,
}

impl Pinblock {
    /// Configures `pin` as an input with `pull`, installs an ISR for `edge`
    /// that increments an atomic counter and then calls `user_cb`, and
    /// returns the descriptor the owning task yields.
    ///
    /// The ISR is the only preemptive code in the system: `user_cb` must
    /// execute in bounded time, must not allocate, and must not block.
    pub fn new(
        pins: &dyn PinController,
        pin: PinId,
        edge: Edge,
        pull: Pull,
        mut user_cb: impl FnMut(PinId) + 'static,
        timeout_secs: Option<f64>,
    ) -> Result<Self, SchedError> {
        if let Some(secs) = timeout_secs {
            secs_to_us(secs)?;
        }
        pins.configure(pin, Direction::Input, pull);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_isr = Arc::clone(&counter);
        pins.attach_isr(
            pin,
            edge,
            Box::new(move || {
                counter_isr.fetch_add(1, Ordering::SeqCst);
                user_cb(pin);
            }),
        );
        Ok(Self { isr: IsrHandle { pin, counter }, timeout_secs })
    }
}

/// Composes a sleep longer than [`MAXSECS`] out of bounded `Timeout`
/// sub-sleeps. A task that needs `wait(secs)` semantics keeps one of these
/// in its own state and drives it across multiple `step` calls, yielding
/// the descriptor it hands back each time until it returns `None`.
#[derive(Debug, Clone, Copy)]
pub struct LongWait {
    remaining_secs: f64,
}

impl LongWait {
    /// Starts a composed wait for `total_secs` (may exceed `MAXSECS`).
    #[must_use]
    pub fn new(total_secs: f64) -> Self {
        Self { remaining_secs: total_secs.max(0.0) }
    }

    /// Whether the composed wait has been fully served.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.remaining_secs <= 0.0
    }

    /// Consumes one sub-sleep's worth of `lateness_us` (if the caller is
    /// resuming from a previous leg of this wait) and returns the next
    /// `Timeout` to yield, or `None` once the full interval has elapsed.
    pub fn next_leg(&mut self, elapsed_secs: f64) -> Option<Timeout> {
        self.remaining_secs -= elapsed_secs;
        if self.remaining_secs <= 0.0 {
            return None;
        }
        let chunk = self.remaining_secs.min(MAXSECS as f64);
        Some(Timeout::new(chunk).expect("chunk is clamped to MAXSECS"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_rejects_over_cap() {
        assert!(Timeout::new(MAXSECS as f64 + 0.1).is_err());
        assert!(Timeout::new(MAXSECS as f64).is_ok());
    }

    #[test]
    fn long_wait_splits_into_bounded_legs_covering_the_full_interval() {
        let mut w = LongWait::new(1_200.0);
        let mut total = 0.0;
        let mut elapsed_of_prior_leg = 0.0;
        let mut legs = 0;
        while let Some(t) = w.next_leg(elapsed_of_prior_leg) {
            assert!(t.secs() <= MAXSECS as f64);
            total += t.secs();
            elapsed_of_prior_leg = t.secs();
            legs += 1;
            assert!(legs < 10, "runaway leg count");
        }
        assert!(total >= 1_200.0 - elapsed_of_prior_leg);
        assert!(legs >= 3); // 1200 / 536 rounds up to 3 legs
    }
}
