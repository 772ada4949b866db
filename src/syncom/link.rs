//! Link state shared between `SynCom`'s public handle and its background
//! task: phase, queues, framing, and the liveness timestamp. Protected by a
//! [`spin::Mutex`] (per `SchedulerFramework`'s `Arc<RwLock<..>>` pattern in
//! the teacher) rather than a plain `RefCell`, since `send`/`get` may be
//! called from any task's body while the background task is mid-exchange —
//! a real mutex, not "only one task ever touches this", is the honest
//! contract even though nothing here ever actually contends.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::SynComError;
use crate::syncom::codec::Codec;
use crate::time::elapsed;

/// Reserved in-band byte: filler during [`Phase::Unsynced`], frame
/// terminator once [`Phase::Synced`]. Payload bytes are guaranteed
/// zero-free by the codec contract, so `0x00` unambiguously means "frame
/// boundary" once synchronised.
pub const SYNC_BYTE: u8 = 0x00;

/// Default character width. 8 in the wide-character deployment build
/// (spec.md's open question on 8-bit mode); exposed as a constructor
/// parameter rather than a compile-time switch since nothing else about
/// this crate is per-target conditional.
pub const DEFAULT_BITS: u8 = 7;

/// Default characters exchanged per scheduler yield.
pub const DEFAULT_LATENCY: u32 = 5;

/// How long the reset pin (if configured) is held at its active level
/// before `start()` begins synchronisation.
pub const RESET_PULSE_US: u64 = 100_000;

/// `SynCom`'s link-level synchronisation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Exchanging [`SYNC_BYTE`] until the peer's sync byte has been seen.
    Unsynced,
    /// Normal framed operation.
    Synced,
    /// No character received for `timeout_us`; `send`/`get` queues stop
    /// draining until a fresh `start()`.
    TimedOut,
}

struct TxCursor {
    buf: Vec<u8>,
    idx: usize,
}

/// Shared state behind `SynCom`'s `Arc<Mutex<..>>` handle.
pub(crate) struct LinkState<T, C: Codec<T>> {
    pub(crate) phase: Phase,
    codec: C,
    tx_queue: VecDeque<Vec<u8>>,
    tx_cursor: Option<TxCursor>,
    rx_frames: VecDeque<Vec<u8>>,
    rx_accum: Vec<u8>,
    pub(crate) timeout_us: u64,
    pub(crate) last_rx_us: u64,
    verbose: bool,
    _marker: core::marker::PhantomData<T>,
}

impl<T, C: Codec<T>> LinkState<T, C> {
    pub(crate) fn new(codec: C, timeout_us: u64, verbose: bool, now_us: u64) -> Self {
        Self {
            phase: Phase::Unsynced,
            codec,
            tx_queue: VecDeque::new(),
            tx_cursor: None,
            rx_frames: VecDeque::new(),
            rx_accum: Vec::new(),
            timeout_us,
            last_rx_us: now_us,
            verbose,
            _marker: core::marker::PhantomData,
        }
    }

    /// Resets framing/liveness state for a fresh `start()`, keeping queued
    /// outgoing messages and already-decoded incoming ones intact — only
    /// the wire-level bookkeeping is per-session.
    pub(crate) fn reset_for_restart(&mut self, now_us: u64) {
        self.phase = Phase::Unsynced;
        self.tx_cursor = None;
        self.rx_accum.clear();
        self.last_rx_us = now_us;
    }

    /// The byte to transmit this character slot. While `Unsynced`, the
    /// queues are not drained (spec.md §4.4): always the sync byte.
    pub(crate) fn next_tx_byte(&mut self) -> u8 {
        if !matches!(self.phase, Phase::Synced) {
            return SYNC_BYTE;
        }
        if let Some(cursor) = &mut self.tx_cursor {
            if cursor.idx < cursor.buf.len() {
                let b = cursor.buf[cursor.idx];
                cursor.idx += 1;
                return b;
            }
            self.tx_cursor = None;
            return SYNC_BYTE; // terminator for the frame just finished
        }
        if let Some(buf) = self.tx_queue.pop_front() {
            if buf.is_empty() {
                return SYNC_BYTE;
            }
            let b = buf[0];
            self.tx_cursor = Some(TxCursor { buf, idx: 1 });
            return b;
        }
        SYNC_BYTE // idle filler, keeps the clock alive with nothing queued
    }

    /// Applies one received character: advances the `Unsynced` handshake,
    /// or accumulates/terminates a frame once `Synced`.
    pub(crate) fn on_char_received(&mut self, byte: u8, now_us: u64) {
        self.last_rx_us = now_us;
        match self.phase {
            Phase::Unsynced => {
                if byte == SYNC_BYTE {
                    self.phase = Phase::Synced;
                    if self.verbose {
                        log::info!("syncom: phase Unsynced -> Synced");
                    }
                }
            }
            Phase::Synced => {
                if byte == SYNC_BYTE {
                    if !self.rx_accum.is_empty() {
                        let frame = core::mem::take(&mut self.rx_accum);
                        self.rx_frames.push_back(frame);
                    }
                } else {
                    self.rx_accum.push(byte);
                }
            }
            Phase::TimedOut => {
                // A still-running passive peer may keep clocking characters
                // after we declared the link down; they are ignored until
                // the caller observes `TimedOut` and calls `start` again.
            }
        }
    }

    /// Checks the liveness deadline; transitions to `TimedOut` if exceeded.
    pub(crate) fn check_timeout(&mut self, now_us: u64) {
        if self.timeout_us == 0 || self.phase != Phase::Synced {
            return;
        }
        if elapsed(self.last_rx_us, now_us) >= self.timeout_us {
            self.phase = Phase::TimedOut;
            if self.verbose {
                log::warn!("syncom: phase Synced -> TimedOut");
            }
        }
    }

    pub(crate) fn queue_bytes(&mut self, bytes: Vec<u8>) {
        self.tx_queue.push_back(bytes);
    }

    pub(crate) fn pop_value(&mut self) -> Result<Option<T>, SynComError> {
        match self.rx_frames.pop_front() {
            Some(frame) => self.codec.decode(&frame).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn pop_str(&mut self) -> Result<Option<String>, SynComError> {
        match self.rx_frames.pop_front() {
            Some(frame) => String::from_utf8(frame).map(Some).map_err(|_| SynComError::DecodeError),
            None => Ok(None),
        }
    }

    pub(crate) fn encode(&self, value: &T) -> Result<Vec<u8>, SynComError> {
        self.codec.encode(value)
    }

    pub(crate) fn any(&self) -> usize {
        self.rx_frames.len()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.phase == Phase::Synced
    }

    pub(crate) fn is_timed_out(&self) -> bool {
        self.phase == Phase::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::AsciiCodec;

    fn synced_link() -> LinkState<String, AsciiCodec> {
        let mut link = LinkState::new(AsciiCodec, 0, false, 0);
        link.on_char_received(SYNC_BYTE, 0);
        assert_eq!(link.phase, Phase::Synced);
        link
    }

    #[test]
    fn unsynced_until_sync_byte_seen() {
        let mut link = LinkState::new(AsciiCodec, 0, false, 0);
        link.on_char_received(b'x', 0);
        assert_eq!(link.phase, Phase::Unsynced);
        link.on_char_received(SYNC_BYTE, 1);
        assert_eq!(link.phase, Phase::Synced);
    }

    #[test]
    fn queues_not_drained_before_synced() {
        let mut link: LinkState<String, AsciiCodec> = LinkState::new(AsciiCodec, 0, false, 0);
        link.queue_bytes(alloc::vec![b'h', b'i']);
        assert_eq!(link.next_tx_byte(), SYNC_BYTE);
        assert_eq!(link.next_tx_byte(), SYNC_BYTE);
    }

    #[test]
    fn frames_round_trip_through_terminator() {
        let mut link = synced_link();
        link.queue_bytes(alloc::vec![b'h', b'i']);
        assert_eq!(link.next_tx_byte(), b'h');
        assert_eq!(link.next_tx_byte(), b'i');
        assert_eq!(link.next_tx_byte(), SYNC_BYTE); // terminator
        assert_eq!(link.next_tx_byte(), SYNC_BYTE); // idle filler after

        link.on_char_received(b'h', 10);
        link.on_char_received(b'i', 11);
        assert_eq!(link.any(), 0);
        link.on_char_received(SYNC_BYTE, 12);
        assert_eq!(link.any(), 1);
        assert_eq!(link.pop_str().unwrap(), Some(String::from("hi")));
        assert_eq!(link.any(), 0);
    }

    #[test]
    fn idle_filler_terminator_does_not_emit_empty_frame() {
        let mut link = synced_link();
        link.on_char_received(SYNC_BYTE, 5);
        link.on_char_received(SYNC_BYTE, 6);
        assert_eq!(link.any(), 0);
    }

    #[test]
    fn timeout_trips_only_in_synced_phase() {
        let mut link = synced_link();
        link.timeout_us = 1_000;
        link.check_timeout(500);
        assert_eq!(link.phase, Phase::Synced);
        link.check_timeout(2_000);
        assert_eq!(link.phase, Phase::TimedOut);
    }

    #[test]
    fn disabled_timeout_never_trips() {
        let mut link = synced_link();
        link.timeout_us = 0;
        link.check_timeout(1_000_000);
        assert_eq!(link.phase, Phase::Synced);
    }
}
