//! Scheduler configuration, in the manner of `RoundRobinConfig`: a plain
//! struct with sensible defaults and builder-style setters rather than a
//! long constructor argument list.

use alloc::rc::Rc;

use crate::pin::{PinController, PinId};

/// Idle-task heap-compaction interval (≈50 ms).
pub const GCTIME_US: u64 = 50_000;

/// Default heartbeat toggle cadence (500 ms).
pub const HEARTBEAT_PERIOD_US: u64 = 500_000;

/// Indicator-LED heartbeat: toggled on [`HEARTBEAT_PERIOD_US`] (or
/// `period_us`, if overridden) regardless of system load, so a still-beating
/// heartbeat is a visible liveness signal even on a saturated scheduler.
#[derive(Clone)]
pub struct HeartbeatConfig {
    pub pins: Rc<dyn PinController>,
    pub pin: PinId,
    pub period_us: u64,
}

impl HeartbeatConfig {
    #[must_use]
    pub fn new(pins: Rc<dyn PinController>, pin: PinId) -> Self {
        Self { pins, pin, period_us: HEARTBEAT_PERIOD_US }
    }

    #[must_use]
    pub fn with_period_us(mut self, period_us: u64) -> Self {
        self.period_us = period_us;
        self
    }
}

/// Construction-time scheduler configuration.
#[derive(Clone)]
pub struct SchedConfig {
    pub gc_enable: bool,
    pub heartbeat: Option<HeartbeatConfig>,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedConfig {
    #[must_use]
    pub fn new() -> Self {
        Self { gc_enable: true, heartbeat: None }
    }

    #[must_use]
    pub fn with_gc_enable(mut self, enable: bool) -> Self {
        self.gc_enable = enable;
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }
}
