//! Air relay dataplane and tick loop.

use link_protocol::frame::MAX_FRAME;
use link_protocol::{
    frame, hex_prefix, FrameParser, MsgType, RadioPort, UartPort, MAX_PACKET,
};
use tracing::{debug, info, warn};

use crate::scheduler::TxSlots;
use crate::{DOWNLINK_HOLD_MS, HEARTBEAT_PERIOD_MS, LORA_TELEM_PERIOD_MS, UART_DRAIN_MAX};

#[derive(Debug, Clone, Copy)]
pub struct AirRelayConfig {
    pub telem_period_ms: u32,
    pub downlink_hold_ms: u32,
    pub heartbeat_period_ms: u32,
    /// Dump raw downlink packets instead of forwarding them.
    pub sniff: bool,
}

impl Default for AirRelayConfig {
    fn default() -> Self {
        Self {
            telem_period_ms: LORA_TELEM_PERIOD_MS,
            downlink_hold_ms: DOWNLINK_HOLD_MS,
            heartbeat_period_ms: HEARTBEAT_PERIOD_MS,
            sniff: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AirRelayStats {
    pub uplink_frames: u32,
    pub downlink_packets: u32,
    pub downlink_forwarded: u32,
    pub downlink_rejected: u32,
    pub uart_drops: u32,
}

/// Frame types the air relay will forward toward the controller.
fn downlink_whitelisted(msg_type: u8, payload_len: usize) -> bool {
    match MsgType::from_u8(msg_type) {
        Some(
            ty @ (MsgType::ModeSwitch | MsgType::ManualCmd | MsgType::Setpoints | MsgType::Heartbeat),
        ) => payload_len == ty.wire_len(),
        _ => false,
    }
}

pub struct AirRelay {
    cfg: AirRelayConfig,
    uart_parser: FrameParser,
    radio_parser: FrameParser,
    slots: TxSlots,
    last_downlink_ms: Option<u32>,
    last_telem_tx_ms: Option<u32>,
    last_heartbeat_ms: Option<u32>,
    heartbeat_seq: u8,
    stats: AirRelayStats,
}

impl AirRelay {
    pub fn new(cfg: AirRelayConfig) -> Self {
        Self {
            cfg,
            uart_parser: FrameParser::new(),
            radio_parser: FrameParser::new(),
            slots: TxSlots::new(),
            last_downlink_ms: None,
            last_telem_tx_ms: None,
            last_heartbeat_ms: None,
            heartbeat_seq: 0,
            stats: AirRelayStats::default(),
        }
    }

    pub fn stats(&self) -> AirRelayStats {
        self.stats
    }

    pub fn slots(&self) -> &TxSlots {
        &self.slots
    }

    /// One loop iteration. UART drain and downlink forwarding run before
    /// the radio TX service, which biases the half-duplex radio toward
    /// listening right after a command came down.
    pub fn tick<U: UartPort, R: RadioPort>(&mut self, uart: &mut U, radio: &mut R, now_ms: u32) {
        self.drain_uplink(uart);
        self.poll_downlink(uart, radio, now_ms);
        self.send_heartbeat(uart, now_ms);

        let allowed = self.telemetry_allowed(now_ms);
        if self.slots.service(radio, allowed, now_ms) {
            self.last_telem_tx_ms = Some(now_ms);
        }
    }

    fn telemetry_allowed(&self, now_ms: u32) -> bool {
        let held = matches!(
            self.last_downlink_ms,
            Some(t) if now_ms.wrapping_sub(t) < self.cfg.downlink_hold_ms
        );
        let due = match self.last_telem_tx_ms {
            None => true,
            Some(t) => now_ms.wrapping_sub(t) >= self.cfg.telem_period_ms,
        };
        !held && due
    }

    /// Route every controller frame into its TX slot.
    fn drain_uplink<U: UartPort>(&mut self, uart: &mut U) {
        let mut drained = 0;
        while drained < UART_DRAIN_MAX {
            let Some(byte) = uart.read_byte() else {
                break;
            };
            drained += 1;

            if let Some(f) = self.uart_parser.feed(byte) {
                self.stats.uplink_frames += 1;
                let Ok(encoded) = frame::encode(f.msg_type, f.seq, f.payload) else {
                    continue;
                };
                if f.msg_type == MsgType::Telemetry as u8 {
                    self.slots.offer_telemetry(encoded);
                } else {
                    self.slots.offer_high(encoded);
                }
            }
        }
    }

    /// Pull at most one packet off the radio and forward whitelisted
    /// frames to the controller.
    fn poll_downlink<U: UartPort, R: RadioPort>(
        &mut self,
        uart: &mut U,
        radio: &mut R,
        now_ms: u32,
    ) {
        let mut buf = [0u8; MAX_PACKET];
        let Some(len) = radio.poll_receive(&mut buf, now_ms) else {
            return;
        };
        self.stats.downlink_packets += 1;
        self.last_downlink_ms = Some(now_ms);

        if self.cfg.sniff {
            info!(len, data = %hex_prefix::<96>(&buf[..len]), "RAW downlink");
            return;
        }

        for &byte in &buf[..len] {
            let forward: Option<heapless::Vec<u8, MAX_FRAME>> =
                match self.radio_parser.feed(byte) {
                    Some(f) if downlink_whitelisted(f.msg_type, f.payload.len()) => {
                        frame::encode(f.msg_type, f.seq, f.payload).ok()
                    }
                    Some(f) => {
                        debug!(msg_type = f.msg_type, "Downlink frame not whitelisted");
                        self.stats.downlink_rejected += 1;
                        None
                    }
                    None => None,
                };

            if let Some(encoded) = forward {
                if uart.write_free() >= encoded.len() {
                    uart.write_all(&encoded);
                    self.stats.downlink_forwarded += 1;
                } else {
                    self.stats.uart_drops += 1;
                    warn!(drops = self.stats.uart_drops, "UART congested, frame dropped");
                }
            }
        }
    }

    fn send_heartbeat<U: UartPort>(&mut self, uart: &mut U, now_ms: u32) {
        let due = match self.last_heartbeat_ms {
            None => true,
            Some(t) => now_ms.wrapping_sub(t) >= self.cfg.heartbeat_period_ms,
        };
        if !due {
            return;
        }
        self.last_heartbeat_ms = Some(now_ms);

        self.heartbeat_seq = self.heartbeat_seq.wrapping_add(1);
        let Ok(encoded) = frame::encode(MsgType::Heartbeat as u8, self.heartbeat_seq, &[]) else {
            return;
        };
        if uart.write_free() >= encoded.len() {
            uart.write_all(&encoded);
        } else {
            self.stats.uart_drops += 1;
        }
    }
}
