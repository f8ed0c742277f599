//! Half-duplex radio TX scheduling: two last-writer-wins slots.
//!
//! The high-priority slot carries ACKs and any other non-telemetry uplink;
//! overwriting it is harmless because ACKs are idempotent per
//! (seq, msg_type). The telemetry slot is lossy by design and rate-gated
//! by the caller.

use heapless::Vec;
use link_protocol::frame::{MAX_FRAME, SYNC1, SYNC2};
use link_protocol::{RadioPort, TxOutcome};
use tracing::warn;

pub type SlotFrame = Vec<u8, MAX_FRAME>;

#[derive(Debug, Default)]
pub struct TxSlots {
    high: Option<SlotFrame>,
    telem: Option<SlotFrame>,
    /// Frames replaced before they made it onto the air.
    pub high_overwrites: u32,
    pub telem_overwrites: u32,
}

impl TxSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer_high(&mut self, frame: SlotFrame) {
        if self.high.replace(frame).is_some() {
            self.high_overwrites += 1;
        }
    }

    pub fn offer_telemetry(&mut self, frame: SlotFrame) {
        if self.telem.replace(frame).is_some() {
            self.telem_overwrites += 1;
        }
    }

    pub fn high_pending(&self) -> bool {
        self.high.is_some()
    }

    pub fn telemetry_pending(&self) -> bool {
        self.telem.is_some()
    }

    /// One TX service pass. The high-priority slot is always tried first;
    /// while it is occupied (or its attempt returned BUSY/FAIL) telemetry
    /// stays queued. Returns true when a telemetry frame went out, so the
    /// caller can stamp its rate gate.
    pub fn service<R: RadioPort>(
        &mut self,
        radio: &mut R,
        telemetry_allowed: bool,
        now_ms: u32,
    ) -> bool {
        if let Some(frame) = self.high.as_ref() {
            if frame.len() < 2 || frame[0] != SYNC1 || frame[1] != SYNC2 {
                warn!(len = frame.len(), "Discarding malformed high-priority frame");
                self.high = None;
                return false;
            }
            match radio.transmit(frame, now_ms) {
                TxOutcome::Ok => {
                    self.high = None;
                }
                TxOutcome::Busy => {}
                TxOutcome::Fail => {
                    warn!("High-priority radio TX failed, keeping frame queued");
                }
            }
            return false;
        }

        if !telemetry_allowed {
            return false;
        }
        if let Some(frame) = self.telem.as_ref() {
            match radio.transmit(frame, now_ms) {
                TxOutcome::Ok => {
                    self.telem = None;
                    return true;
                }
                TxOutcome::Busy | TxOutcome::Fail => {}
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_protocol::MAX_PACKET;

    struct ScriptedRadio {
        outcome: TxOutcome,
        sent: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl ScriptedRadio {
        fn new(outcome: TxOutcome) -> Self {
            Self {
                outcome,
                sent: std::vec::Vec::new(),
            }
        }
    }

    impl RadioPort for ScriptedRadio {
        fn reinit(&mut self, _now_ms: u32) {}

        fn transmit(&mut self, bytes: &[u8], _now_ms: u32) -> TxOutcome {
            if self.outcome == TxOutcome::Ok {
                self.sent.push(bytes.to_vec());
            }
            self.outcome
        }

        fn poll_receive(&mut self, _buf: &mut [u8; MAX_PACKET], _now_ms: u32) -> Option<usize> {
            None
        }
    }

    fn frame(msg_type: u8, seq: u8) -> SlotFrame {
        link_protocol::encode(msg_type, seq, &[]).unwrap()
    }

    #[test]
    fn test_high_priority_blocks_telemetry_same_tick() {
        let mut slots = TxSlots::new();
        slots.offer_high(frame(0x20, 1));
        slots.offer_telemetry(frame(0x01, 2));

        let mut radio = ScriptedRadio::new(TxOutcome::Ok);
        assert!(!slots.service(&mut radio, true, 0));
        assert_eq!(radio.sent.len(), 1);
        assert!(!slots.high_pending());
        assert!(slots.telemetry_pending());

        // Next pass, the telemetry goes.
        assert!(slots.service(&mut radio, true, 10));
        assert_eq!(radio.sent.len(), 2);
    }

    #[test]
    fn test_busy_keeps_high_slot() {
        let mut slots = TxSlots::new();
        slots.offer_high(frame(0x20, 1));

        let mut radio = ScriptedRadio::new(TxOutcome::Busy);
        assert!(!slots.service(&mut radio, true, 0));
        assert!(slots.high_pending());
    }

    #[test]
    fn test_fail_keeps_high_slot() {
        let mut slots = TxSlots::new();
        slots.offer_high(frame(0x20, 1));

        let mut radio = ScriptedRadio::new(TxOutcome::Fail);
        assert!(!slots.service(&mut radio, true, 0));
        assert!(slots.high_pending());
    }

    #[test]
    fn test_telemetry_gate_respected() {
        let mut slots = TxSlots::new();
        slots.offer_telemetry(frame(0x01, 1));

        let mut radio = ScriptedRadio::new(TxOutcome::Ok);
        assert!(!slots.service(&mut radio, false, 0));
        assert!(slots.telemetry_pending());

        assert!(slots.service(&mut radio, true, 0));
        assert!(!slots.telemetry_pending());
    }

    #[test]
    fn test_busy_telemetry_stays_queued() {
        let mut slots = TxSlots::new();
        slots.offer_telemetry(frame(0x01, 1));

        let mut radio = ScriptedRadio::new(TxOutcome::Busy);
        assert!(!slots.service(&mut radio, true, 0));
        assert!(slots.telemetry_pending());
    }

    #[test]
    fn test_last_writer_wins() {
        let mut slots = TxSlots::new();
        slots.offer_telemetry(frame(0x01, 1));
        slots.offer_telemetry(frame(0x01, 2));
        assert_eq!(slots.telem_overwrites, 1);

        let mut radio = ScriptedRadio::new(TxOutcome::Ok);
        slots.service(&mut radio, true, 0);
        // seq byte of the surviving frame
        assert_eq!(radio.sent[0][4], 2);
    }

    #[test]
    fn test_malformed_high_frame_discarded() {
        let mut slots = TxSlots::new();
        let mut bad = SlotFrame::new();
        bad.extend_from_slice(&[0x00, 0x01, 0x02]).unwrap();
        slots.offer_high(bad);

        let mut radio = ScriptedRadio::new(TxOutcome::Ok);
        assert!(!slots.service(&mut radio, true, 0));
        assert!(!slots.high_pending());
        assert!(radio.sent.is_empty());
    }
}
