//! Frame codec: encoder and resumable streaming parser.
//!
//! The parser accepts one byte at a time and emits at most one frame per
//! fed byte as a borrowed view into its own storage. Any deviation (wrong
//! sync, length out of range, CRC mismatch) drops a single octet and
//! rescans, so a valid frame embedded in garbage, or inside the body of a
//! corrupted frame, is still recovered. Errors never surface to the
//! caller; they only show up as "no frame emitted" and in [`ParserStats`].

use crc::{Crc, CRC_16_MODBUS};
use heapless::Vec;
use thiserror::Error;

/// First sync octet.
pub const SYNC1: u8 = 0x55;
/// Second sync octet.
pub const SYNC2: u8 = 0xAA;

/// Maximum payload bytes in one frame.
pub const MAX_PAYLOAD: usize = 220;

/// LEN counts TYPE + SEQ + PAYLOAD + CRC.
pub const MIN_LEN: usize = 4;
pub const MAX_LEN: usize = MAX_PAYLOAD + 4;

/// Whole-frame byte count: sync(2) + LEN(1) + LEN bytes.
pub const MAX_FRAME: usize = MAX_PAYLOAD + 7;

/// Parser stream storage. One unresolved candidate never exceeds
/// [`MAX_FRAME`] bytes, so this never overflows in practice.
const STREAM_BUF_CAP: usize = 256;

/// CRC-16/Modbus, same table the Modbus-style framing uses on the wire.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload length {0} exceeds {MAX_PAYLOAD}")]
    PayloadTooLong(usize),
}

/// Encode one frame: `[SYNC1, SYNC2, LEN, TYPE, SEQ, payload..., CRCL, CRCH]`.
pub fn encode(msg_type: u8, seq: u8, payload: &[u8]) -> Result<Vec<u8, MAX_FRAME>, EncodeError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(EncodeError::PayloadTooLong(payload.len()));
    }

    let len = (payload.len() + 4) as u8;
    let mut out: Vec<u8, MAX_FRAME> = Vec::new();
    out.extend_from_slice(&[SYNC1, SYNC2, len, msg_type, seq]).ok();
    out.extend_from_slice(payload).ok();

    // CRC over LEN through end of payload, excluding the sync pair.
    let crc = CRC16.checksum(&out[2..]);
    out.extend_from_slice(&crc.to_le_bytes()).ok();
    Ok(out)
}

/// One decoded frame, borrowing the parser's storage. Valid until the next
/// `feed`.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub msg_type: u8,
    pub seq: u8,
    pub payload: &'a [u8],
}

/// Frame-layer drop counters, readable for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParserStats {
    /// Frames emitted.
    pub frames: u32,
    /// Candidates dropped on CRC mismatch.
    pub crc_errors: u32,
    /// Candidates dropped on LEN out of range.
    pub len_errors: u32,
}

/// Resumable streaming frame parser.
pub struct FrameParser {
    buf: Vec<u8, STREAM_BUF_CAP>,
    /// Bytes of an emitted frame still at the front of `buf`, discarded on
    /// the next `feed` (the emitted view borrows them until then).
    consumed: usize,
    stats: ParserStats,
}

impl FrameParser {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            consumed: 0,
            stats: ParserStats {
                frames: 0,
                crc_errors: 0,
                len_errors: 0,
            },
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Feed one byte; returns a frame view when this byte completes (or a
    /// rescan uncovers) a valid frame.
    pub fn feed(&mut self, byte: u8) -> Option<FrameView<'_>> {
        if self.consumed > 0 {
            drop_front(&mut self.buf, self.consumed);
            self.consumed = 0;
        }

        if self.buf.push(byte).is_err() {
            // Cannot happen while candidates resolve within MAX_FRAME, but
            // stay deterministic if it ever does: restart from this byte.
            self.buf.clear();
            self.buf.push(byte).ok();
        }

        self.scan()
    }

    /// Scan from the front of the stream buffer for one valid frame,
    /// dropping a single octet and rescanning on every structural failure.
    fn scan(&mut self) -> Option<FrameView<'_>> {
        loop {
            // Hunt for SYNC1; everything before it is line noise.
            match self.buf.iter().position(|&b| b == SYNC1) {
                Some(0) => {}
                Some(p) => drop_front(&mut self.buf, p),
                None => {
                    self.buf.clear();
                    return None;
                }
            }

            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != SYNC2 {
                drop_front(&mut self.buf, 1);
                continue;
            }

            if self.buf.len() < 3 {
                return None;
            }
            let len = self.buf[2] as usize;
            if !(MIN_LEN..=MAX_LEN).contains(&len) {
                self.stats.len_errors += 1;
                drop_front(&mut self.buf, 1);
                continue;
            }

            let total = 3 + len;
            if self.buf.len() < total {
                return None;
            }

            let got = u16::from_le_bytes([self.buf[total - 2], self.buf[total - 1]]);
            let computed = CRC16.checksum(&self.buf[2..total - 2]);
            if got != computed {
                self.stats.crc_errors += 1;
                drop_front(&mut self.buf, 1);
                continue;
            }

            self.stats.frames = self.stats.frames.wrapping_add(1);
            self.consumed = total;
            let payload_len = len - 4;
            return Some(FrameView {
                msg_type: self.buf[3],
                seq: self.buf[4],
                payload: &self.buf[5..5 + payload_len],
            });
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn drop_front<const N: usize>(buf: &mut Vec<u8, N>, count: usize) {
    let len = buf.len();
    if count >= len {
        buf.clear();
        return;
    }
    for i in 0..(len - count) {
        buf[i] = buf[i + count];
    }
    buf.truncate(len - count);
}
