//! Crate-wide error types.
//!
//! Flat, `Copy` error enums with no `core::error::Error` impl (not available
//! in `no_std` on the MSRV this crate targets) — callers match on the
//! variant, the scheduler never unwinds on a caller-facing error path.

use crate::task::Pid;

/// Errors returned by [`crate::scheduler::Sched`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// A caller-supplied delay exceeded [`crate::time::MAXSECS`].
    TimeRange,
    /// A task's body ran to completion before its first suspension point.
    BadThread,
    /// `pause`/`resume`/`stop` targeted a task that has already terminated.
    TaskGone,
    /// `run()` was invoked while the scheduler was already running.
    Reentrant,
    /// A task's `step` reported a state it could not reconcile into a valid
    /// wait descriptor. The offending task is terminated; dispatch continues.
    BadYield(Pid),
}

/// Errors surfaced by [`crate::syncom::SynCom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynComError {
    /// No characters received within `timeout_us`; the link is down.
    LinkLost,
    /// The external serializer refused to encode a value.
    EncodeError,
    /// The external serializer could not decode a received byte stream.
    DecodeError,
}
