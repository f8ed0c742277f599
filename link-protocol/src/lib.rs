//! Shared framed-protocol library for the fuel-link nodes.
//!
//! Every link in the system (controller UART, air radio, ground USB) speaks
//! the same self-synchronising binary frame:
//!
//! ```text
//! [ 0x55, 0xAA, LEN, TYPE, SEQ, PAYLOAD..., CRCL, CRCH ]
//! ```
//!
//! - LEN counts TYPE + SEQ + PAYLOAD + CRC (so 4 ..= 224)
//! - CRC is CRC-16/Modbus over LEN through the end of PAYLOAD,
//!   appended little-endian
//! - PAYLOAD is 0..=220 bytes, packed little-endian, no padding
//!
//! The crate provides the frame codec ([`frame`]), the closed message
//! catalogue with payload codecs ([`message`]), and the transport port
//! traits the node loops are written against ([`port`]).

pub mod frame;
pub mod message;
pub mod port;

pub use frame::{encode, EncodeError, FrameParser, FrameView, MAX_FRAME, MAX_PAYLOAD};
pub use message::{
    Ack, AckStatus, DecodeError, ManualCmd, Message, Mode, ModeSwitch, MsgType, Setpoints,
    Telemetry,
};
pub use port::{RadioPort, TxOutcome, UartPort, MAX_PACKET};

/// Render the first bytes of a buffer as space-separated hex for diagnostics.
///
/// Truncates to whatever fits the output capacity; used by the raw-sniff
/// paths on both relays.
pub fn hex_prefix<const N: usize>(bytes: &[u8]) -> heapless::String<N> {
    use core::fmt::Write as _;

    let mut out = heapless::String::new();
    for (i, b) in bytes.iter().enumerate() {
        let sep = if i == 0 { "" } else { " " };
        if write!(out, "{}{:02X}", sep, b).is_err() {
            break;
        }
    }
    out
}
