//! Heap compaction hook invoked by the scheduler's idle task.
//!
//! The scheduler never manages memory itself; it only calls this nullary
//! hook when `gc_enable` is set and the idle task is chosen, the same way
//! `RoundRobinScheduler` defers load-balancing policy to a collaborator
//! rather than embedding it.

/// A compactor the idle task invokes when no higher-priority task is ready.
pub trait HeapCompactor {
    /// Performs one compaction pass. Expected to be bounded but may take
    /// longer than a single dispatch cycle would otherwise allow — it is
    /// only ever called when nothing else is runnable.
    fn compact(&self);
}

/// A [`HeapCompactor`] that does nothing; the default when `gc_enable` is
/// true but the platform has no compacting allocator to drive.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompactor;

impl HeapCompactor for NoopCompactor {
    fn compact(&self) {}
}
