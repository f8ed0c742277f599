//! Airside relay: bridges the controller UART to the half-duplex radio.
//!
//! Uplink frames from the controller land in one of two last-writer-wins
//! TX slots (high-priority for anything that is not telemetry, rate-gated
//! for telemetry). Downlink packets are parsed, whitelisted and re-framed
//! onto the UART with a non-blocking drop-on-congestion policy. The relay
//! also originates the periodic heartbeat that keeps the controller's link
//! liveness up while the host is quiet.

pub mod relay;
pub mod scheduler;

pub use relay::{AirRelay, AirRelayConfig, AirRelayStats};
pub use scheduler::TxSlots;

/// Telemetry slot rate gate on the air.
pub const LORA_TELEM_PERIOD_MS: u32 = 500;
/// Telemetry TX is suppressed this long after any downlink packet.
pub const DOWNLINK_HOLD_MS: u32 = 80;
/// Heartbeat cadence toward the controller.
pub const HEARTBEAT_PERIOD_MS: u32 = 500;
/// UART bytes accepted per tick.
pub const UART_DRAIN_MAX: usize = 256;
