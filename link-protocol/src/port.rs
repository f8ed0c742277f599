//! Transport ports the node loops are written against.
//!
//! Concrete transceiver programming is out of scope; the relays only need
//! the logical operations (reinit, transmit one payload, poll one payload,
//! busy discrimination). Everything takes `now_ms`; there is no hidden
//! clock read anywhere in the cores.

use crate::frame::MAX_PAYLOAD;

/// One radio packet carries exactly one framed message, possibly with a
/// short noise prelude.
pub const MAX_PACKET: usize = MAX_PAYLOAD + 7;

/// Three-valued radio TX result.
///
/// BUSY means the local radio deferred and nothing went on the air; FAIL
/// means the attempt ran and died (possibly after an internal TX-done
/// timeout and self-heal). Callers that collapse the two break the
/// reliable-downlink retry accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Ok,
    Busy,
    Fail,
}

/// Half-duplex packet radio.
pub trait RadioPort {
    /// Full reset + reconfigure, used by the RX watchdog self-heal.
    fn reinit(&mut self, now_ms: u32);

    /// Attempt to transmit one packet.
    fn transmit(&mut self, bytes: &[u8], now_ms: u32) -> TxOutcome;

    /// Poll for at most one received packet, copied into `buf`.
    /// Returns the packet length, or `None` when nothing is pending.
    fn poll_receive(&mut self, buf: &mut [u8; MAX_PACKET], now_ms: u32) -> Option<usize>;
}

/// Byte-oriented serial port with a non-blocking write side.
pub trait UartPort {
    /// Pop one received byte, if any.
    fn read_byte(&mut self) -> Option<u8>;

    /// Contiguous room left in the TX buffer. Writers that must not block
    /// check this first and drop whole frames that do not fit.
    fn write_free(&self) -> usize;

    /// Queue bytes for transmission. Callers are expected to have checked
    /// [`Self::write_free`]; excess bytes may be discarded by the
    /// implementation.
    fn write_all(&mut self, bytes: &[u8]);
}
