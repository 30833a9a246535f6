//! DTLS-specific record-layer concerns: the anti-replay window, handshake fragment reassembly,
//! and flight retransmission timing. The `(epoch, sequence_number)` header
//! itself is encoded/decoded in [`crate::record::write_dtls_header`]/
//! [`crate::record::read_dtls_record`]; the endpoint's per-connection record
//! state tracks the current epoch and consults a [`ReplayWindow`] per epoch
//! before handing a record to the cipher.
//!
//! Grounded on the generic shape of `webrtc-rs`'s DTLS record layer
//! (`examples/other_examples/.../webrtc-rs-webrtc__dtls-src-record_layer-mod.rs.rs`):
//! a `(epoch, sequence_number)` pair replaces TLS's implicit sequence
//! counter, and received records are checked against a sliding replay
//! window before they're even handed to the cipher.

use std::time::Duration;

/// A 64-entry sliding bitmap rejecting duplicate or too-old sequence
/// numbers within the current epoch (RFC 6347 §4.1.2.6).
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    highest: u64,
    /// Bit `i` set means `highest - i` has been seen, for `i` in `0..64`.
    bitmap: u64,
    /// Distinguishes "no record accepted yet" from "sequence number 0 was
    /// accepted" — both leave `highest == 0, bitmap == 1`, so without this
    /// flag a replay of the very first record in an epoch would be accepted
    /// forever as long as no higher sequence number had arrived yet.
    initialized: bool,
}

impl ReplayWindow {
    pub fn new() -> Self {
        ReplayWindow {
            highest: 0,
            bitmap: 1,
            initialized: false,
        }
    }

    /// Returns `true` if `seq` is new (not a duplicate, not too old to fit
    /// the window) — the caller should only call [`ReplayWindow::accept`]
    /// after the record has also passed MAC verification, so a forged
    /// record never consumes a window slot (RFC 6347 §4.1.2.6 step 2 runs
    /// *before* step 3's MAC check only to cheaply drop obvious replays;
    /// the window is only updated after authentication succeeds).
    pub fn is_fresh(&self, seq: u64) -> bool {
        if !self.initialized {
            return true;
        }
        if seq > self.highest {
            return true;
        }
        let distance = self.highest - seq;
        if distance >= 64 {
            return false;
        }
        (self.bitmap >> distance) & 1 == 0
    }

    pub fn accept(&mut self, seq: u64) {
        if !self.initialized {
            self.initialized = true;
            self.highest = seq;
            self.bitmap = 1;
            return;
        }
        if seq > self.highest {
            let shift = seq - self.highest;
            self.bitmap = if shift >= 64 { 0 } else { self.bitmap << shift };
            self.bitmap |= 1;
            self.highest = seq;
        } else {
            let distance = self.highest - seq;
            if distance < 64 {
                self.bitmap |= 1 << distance;
            }
        }
    }
}

/// Exponential-backoff retransmission timer for the flight currently
/// awaiting a response.
pub struct RetransmitTimer {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
    max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do yet.
    Idle,
    /// The timer expired: the caller should retransmit the current flight
    /// and call [`RetransmitTimer::armed_after_retransmit`].
    Retransmit,
    /// The retransmission budget is exhausted
    /// ([`crate::error::Error::HandshakeTimeout`]).
    GiveUp,
}

impl RetransmitTimer {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        RetransmitTimer {
            initial,
            max,
            current: initial,
            attempts: 0,
            max_attempts,
        }
    }

    /// Call once when a new flight is sent for the first time.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// The absolute `now + current_timeout` deadline, for
    /// `Endpoint::next_timeout`.
    pub fn deadline(&self, now_offset: Duration) -> Duration {
        now_offset + self.current
    }

    pub fn tick(&mut self, elapsed_since_send: Duration) -> TickOutcome {
        if elapsed_since_send < self.current {
            return TickOutcome::Idle;
        }
        if self.attempts >= self.max_attempts {
            return TickOutcome::GiveUp;
        }
        TickOutcome::Retransmit
    }

    pub fn armed_after_retransmit(&mut self) {
        self.attempts += 1;
        self.current = (self.current * 2).min(self.max);
    }
}

/// Reassembles a single fragmented DTLS handshake message (RFC 6347
/// §4.2.3). Handshake messages within a flight can arrive as several
/// records, each carrying a `(message_seq, fragment_offset,
/// fragment_length)` triple rather than the whole body; the reassembler
/// tracks which byte ranges have arrived and reports completion once every
/// byte up to the declared total length is present.
pub struct FragmentReassembler {
    total_len: u32,
    buf: Vec<u8>,
    /// Half-open `[start, end)` ranges already filled in, kept sorted and
    /// merged so "is this message complete" is a single length check.
    received: Vec<(u32, u32)>,
}

impl FragmentReassembler {
    pub fn new(total_len: u32) -> Self {
        FragmentReassembler {
            total_len,
            buf: vec![0u8; total_len as usize],
            received: Vec::new(),
        }
    }

    pub fn add_fragment(&mut self, offset: u32, data: &[u8]) {
        let end = offset.saturating_add(data.len() as u32).min(self.total_len);
        let start = offset.min(self.total_len);
        if start >= end {
            return;
        }
        self.buf[start as usize..end as usize]
            .copy_from_slice(&data[..(end - start) as usize]);
        self.received.push((start, end));
        self.received.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.received.len());
        for &(s, e) in &self.received {
            if let Some(last) = merged.last_mut() {
                if s <= last.1 {
                    last.1 = last.1.max(e);
                    continue;
                }
            }
            merged.push((s, e));
        }
        self.received = merged;
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == 1 && self.received[0] == (0, self.total_len)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_out_of_order_fragments() {
        let mut r = FragmentReassembler::new(10);
        r.add_fragment(5, &[5, 6, 7, 8, 9]);
        assert!(!r.is_complete());
        r.add_fragment(0, &[0, 1, 2, 3, 4]);
        assert!(r.is_complete());
        assert_eq!(r.into_bytes(), (0u8..10).collect::<Vec<u8>>());
    }

    #[test]
    fn overlapping_fragments_merge() {
        let mut r = FragmentReassembler::new(8);
        r.add_fragment(0, &[0, 1, 2, 3, 4]);
        r.add_fragment(3, &[3, 4, 5, 6, 7]);
        assert!(r.is_complete());
    }

    #[test]
    fn replay_window_accepts_monotonic_sequence() {
        let mut w = ReplayWindow::new();
        assert!(w.is_fresh(0));
        w.accept(0);
        assert!(w.is_fresh(1));
        w.accept(1);
        assert!(!w.is_fresh(0));
        assert!(!w.is_fresh(1));
    }

    #[test]
    fn replay_window_accepts_reordered_within_range() {
        let mut w = ReplayWindow::new();
        w.accept(10);
        assert!(w.is_fresh(5));
        w.accept(5);
        assert!(!w.is_fresh(5));
        assert!(w.is_fresh(9));
    }

    #[test]
    fn replay_window_rejects_too_old() {
        let mut w = ReplayWindow::new();
        w.accept(1000);
        assert!(!w.is_fresh(900));
    }

    #[test]
    fn replay_window_rejects_replay_of_sequence_zero() {
        let mut w = ReplayWindow::new();
        assert!(w.is_fresh(0));
        w.accept(0);
        assert!(!w.is_fresh(0));
    }

    #[test]
    fn retransmit_timer_doubles_and_gives_up() {
        let mut t = RetransmitTimer::new(Duration::from_millis(100), Duration::from_secs(1), 2);
        assert_eq!(t.tick(Duration::from_millis(50)), TickOutcome::Idle);
        assert_eq!(t.tick(Duration::from_millis(150)), TickOutcome::Retransmit);
        t.armed_after_retransmit();
        assert_eq!(t.tick(Duration::from_millis(150)), TickOutcome::Idle);
        assert_eq!(t.tick(Duration::from_millis(250)), TickOutcome::Retransmit);
        t.armed_after_retransmit();
        assert_eq!(t.tick(Duration::from_millis(500)), TickOutcome::GiveUp);
    }
}
