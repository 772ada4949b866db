//! # microsched
//!
//! A cooperative microthread scheduler for small embedded targets (tens to
//! low-hundreds of KiB of RAM, single-core MCUs with no preemptive OS), and
//! `SynCom`, a bit-banged synchronous transport built as two scheduled tasks
//! on top of it.
//!
//! ## Layout
//!
//! - [`time`] — the monotonic, wrap-aware microsecond [`time::Clock`].
//! - [`wait`] — the wait primitives a task yields at a suspension point:
//!   [`wait::Timeout`], [`wait::Poller`], [`wait::Pinblock`], plus the
//!   `RoundRobin` descriptor and the [`wait::LongWait`] composition helper.
//! - [`task`] — [`task::Task`], the suspendable unit the scheduler drives.
//! - [`scheduler`] — [`scheduler::Sched`], the dispatch loop itself.
//! - [`syncom`] — the `SynCom` link built on top of the scheduler.
//! - [`pin`], [`heap`] — the external-collaborator traits the core calls
//!   into (GPIO, heap compaction).
//! - [`error`] — the crate's flat, `Copy` error enums.
//!
//! This crate is `no_std` + `alloc`: the target has a heap (the task table,
//! queued bytes, and closures all need one) but no OS-backed `std`.

#![no_std]
#![warn(missing_debug_implementations)]

extern crate alloc;

pub mod error;
pub mod heap;
pub mod pin;
pub mod scheduler;
pub mod syncom;
pub mod task;
pub mod time;
pub mod wait;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use error::{SchedError, SynComError};
pub use scheduler::{Sched, SchedConfig, SchedCtl};
pub use task::{Pid, Resume, StepOutcome, Task, TaskStatus};
pub use time::{Clock, MAXSECS};
pub use wait::{LongWait, Pinblock, Poller, Timeout, WaitDescriptor};
