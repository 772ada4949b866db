//! Fakes shared by this crate's own test suites: a software GPIO bank that
//! fires ISRs synchronously on the write that crosses an edge, and a trivial
//! ASCII [`crate::syncom::codec::Codec`]. Gated behind `cfg(test)` /
//! `test-util` rather than `#[cfg(test)]`-per-module so integration tests in
//! `tests/` can reach them too, the same way `helix-hal` ships a `mock`
//! module for its trait-based hardware abstractions.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::SynComError;
use crate::pin::{Direction, Edge, PinController, PinId, Pull};
use crate::syncom::codec::Codec;

struct PinState {
    level: bool,
    direction: Direction,
    pull: Pull,
    isr: Option<(Edge, Box<dyn FnMut() + 'static>)>,
}

impl Default for PinState {
    fn default() -> Self {
        Self { level: false, direction: Direction::Input, pull: Pull::None, isr: None }
    }
}

/// An in-memory GPIO bank. Two [`crate::syncom::SynCom`] instances wired to
/// the *same* `FakePinController` with crossed pin assignments (A's `ckout`
/// is B's `ckin`, and so on) reproduce a back-to-back wiring harness without
/// any real hardware: one device's `write` is the other's next `read`.
///
/// `attach_isr` fires its handler synchronously, inline in `write`, the
/// instant the matching edge is observed — there is no real interrupt
/// controller in a test binary, so this is the closest a single-threaded
/// fake can come to "the ISR runs preemptively, between two statements of
/// whichever task is currently executing".
pub struct FakePinController {
    pins: Mutex<BTreeMap<PinId, PinState>>,
}

impl Default for FakePinController {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePinController {
    #[must_use]
    pub fn new() -> Self {
        Self { pins: Mutex::new(BTreeMap::new()) }
    }

    fn edge_matches(edge: Edge, old: bool, new: bool) -> bool {
        if old == new {
            return false;
        }
        if new {
            edge.contains(Edge::RISING)
        } else {
            edge.contains(Edge::FALLING)
        }
    }
}

impl PinController for FakePinController {
    fn read(&self, pin: PinId) -> bool {
        self.pins.lock().get(&pin).map_or(false, |p| p.level)
    }

    fn write(&self, pin: PinId, level: bool) {
        let mut fired = None;
        {
            let mut pins = self.pins.lock();
            let state = pins.entry(pin).or_default();
            let old = state.level;
            state.level = level;
            if let Some((edge, _)) = &state.isr {
                if Self::edge_matches(*edge, old, level) {
                    fired = state.isr.take();
                }
            }
        }
        if let Some((edge, mut handler)) = fired {
            handler();
            self.pins.lock().entry(pin).or_default().isr = Some((edge, handler));
        }
    }

    fn configure(&self, pin: PinId, dir: Direction, pull: Pull) {
        let mut pins = self.pins.lock();
        let state = pins.entry(pin).or_default();
        state.direction = dir;
        state.pull = pull;
    }

    fn attach_isr(&self, pin: PinId, edge: Edge, handler: Box<dyn FnMut() + 'static>) {
        self.pins.lock().entry(pin).or_default().isr = Some((edge, handler));
    }
}

/// A [`Codec`] over plain ASCII strings: bytes are already 7-bit clean and
/// zero-free as long as the string has no embedded `NUL`, so this is a
/// round-trip identity transform rather than a real serializer — enough to
/// exercise `SynCom`'s framing without pulling in an external pickling
/// format the core only ever treats as opaque.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiCodec;

impl Codec<String> for AsciiCodec {
    fn encode(&self, value: &String) -> Result<Vec<u8>, SynComError> {
        let bytes = value.as_bytes();
        if bytes.iter().any(|b| *b == 0 || *b >= 0x80) {
            return Err(SynComError::EncodeError);
        }
        Ok(bytes.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, SynComError> {
        if bytes.iter().any(|b| *b == 0 || *b >= 0x80) {
            return Err(SynComError::DecodeError);
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| SynComError::DecodeError)
    }
}
