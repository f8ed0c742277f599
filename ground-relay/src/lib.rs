//! Groundside relay: bridges the radio back to a host over USB serial.
//!
//! The reliable-downlink engine ([`commander`]) tracks one in-flight
//! command until it is ACKed or its retry budget runs out, with BUSY radio
//! outcomes explicitly excluded from the retry count. The relay loop
//! ([`relay`]) decodes uplink traffic into host-parsable `[TELEM]`/`[ACK]`
//! lines, services retries, and runs the RX watchdog that self-heals a
//! deaf radio. [`shell`] is the line-oriented command grammar; [`sim`] is
//! the in-process plant the service binary and the end-to-end tests run
//! against.

pub mod commander;
pub mod relay;
pub mod shell;
pub mod sim;

pub use commander::{CommandEvent, Commander, PendingCommand};
pub use relay::{GroundRelay, GroundRelayConfig, GroundStats};
pub use shell::{parse_line, ShellCommand, ShellError};

/// ACK wait per transmitted attempt.
pub const CMD_ACK_TIMEOUT_MS: u32 = 400;
/// Retries after the first successful transmission.
pub const CMD_MAX_RETRY: u8 = 3;
/// Continuous BUSY longer than this is worth telling the operator about.
pub const BUSY_WARN_AFTER_MS: u32 = 3000;
/// Minimum spacing between repeated busy warnings.
pub const BUSY_WARN_INTERVAL_MS: u32 = 1000;
/// Radio silence (after first contact) that triggers a self-heal.
pub const RX_WATCHDOG_MS: u32 = 5000;
/// Minimum spacing between self-heal attempts.
pub const REINIT_COOLDOWN_MS: u32 = 3000;
/// Radio guard time between back-to-back TX attempts.
pub const LORA_TX_GUARD_MS: u32 = 5;
