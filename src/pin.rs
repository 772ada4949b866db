//! GPIO pin collaborator consumed by [`crate::wait::Pinblock`] and
//! [`crate::syncom`]. Modeled on the shape of an interrupt controller HAL
//! trait: a handful of narrow, object-safe operations the core calls into,
//! with the concrete hardware binding left to the platform.

use alloc::boxed::Box;

/// Opaque pin identity. The concrete mapping to a physical pad is a platform
/// concern; the core only ever threads this value through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PinId(pub u32);

/// Pin direction, set via [`PinController::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Internal pull resistor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
    Down,
}

bitflags::bitflags! {
    /// Edge(s) an ISR installed via [`PinController::attach_isr`] triggers
    /// on. A bitset rather than a three-way enum because that is how edge
    /// selection is actually wired on the MCUs this targets: one register
    /// bit per edge direction, `RISING | FALLING` set together for "both".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Edge: u8 {
        /// Trigger on the transition from low to high.
        const RISING = 0b01;
        /// Trigger on the transition from high to low.
        const FALLING = 0b10;
    }
}

impl Edge {
    /// Trigger on either transition.
    pub const BOTH: Edge = Edge::RISING.union(Edge::FALLING);
}


/// GPIO collaborator: reads, writes, configuration and ISR attachment.
///
/// Latency of `read`/`write` is assumed well under a microsecond — the
/// scheduler's dispatch loop calls these every cycle for every `Pinblock`
/// and `SynCom` task, so an implementation that blocks or allocates here
/// defeats the cooperative model.
///
/// `&self` rather than `&mut self`: implementations hold whatever interior
/// mutability the platform needs (a `spin::Mutex` over a register block, or
/// nothing at all for memory-mapped registers), the same way
/// `InterruptController` implementations do for the rest of the hardware.
pub trait PinController {
    /// Reads the current logic level of `pin`.
    fn read(&self, pin: PinId) -> bool;

    /// Drives `pin` to `level`. No-op (or platform-defined) on an input pin.
    fn write(&self, pin: PinId, level: bool);

    /// Configures `pin`'s direction and pull resistor.
    fn configure(&self, pin: PinId, dir: Direction, pull: Pull);

    /// Installs an interrupt handler on `pin` for the given `edge`.
    ///
    /// The handler is the **only** preemptive code in the system: it must
    /// execute in bounded time, must not allocate, and must not block.
    /// [`crate::wait::Pinblock::new`] wraps whatever closure the caller
    /// supplies with the counter increment this contract depends on; this
    /// method only needs to arrange for that wrapped closure to run when the
    /// edge occurs.
    fn attach_isr(&self, pin: PinId, edge: Edge, handler: Box<dyn FnMut() + 'static>);
}
