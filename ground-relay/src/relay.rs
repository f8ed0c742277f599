//! Ground relay loop: radio RX → host lines, retry service, RX watchdog,
//! and the USB shell command handling.
//!
//! Within a tick, radio RX (including Ack matching) runs before the retry
//! service, so a retry is never issued in the same tick its Ack arrived.

use std::io::{self, Write};

use link_protocol::{
    hex_prefix, FrameParser, ManualCmd, Message, ModeSwitch, RadioPort, Setpoints, Telemetry,
    TxOutcome, MAX_PACKET,
};
use tracing::{debug, info, warn};

use crate::commander::{CommandEvent, Commander};
use crate::shell::{self, ShellCommand};
use crate::{REINIT_COOLDOWN_MS, RX_WATCHDOG_MS};

#[derive(Debug, Clone, Copy)]
pub struct GroundRelayConfig {
    pub rx_watchdog_ms: u32,
    pub reinit_cooldown_ms: u32,
}

impl Default for GroundRelayConfig {
    fn default() -> Self {
        Self {
            rx_watchdog_ms: RX_WATCHDOG_MS,
            reinit_cooldown_ms: REINIT_COOLDOWN_MS,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GroundStats {
    pub rx_packets: u32,
    pub telemetry_rx: u32,
    pub acks_rx: u32,
    pub watchdog_reinits: u32,
}

pub struct GroundRelay {
    cfg: GroundRelayConfig,
    parser: FrameParser,
    commander: Commander,
    /// Raw-sniff mode: dump packets, skip decoding.
    raw: bool,
    /// Mirror each telemetry frame as one JSON record.
    json: bool,
    ever_received: bool,
    last_packet_ms: u32,
    last_reinit_ms: Option<u32>,
    stats: GroundStats,
}

impl GroundRelay {
    pub fn new(cfg: GroundRelayConfig) -> Self {
        Self {
            cfg,
            parser: FrameParser::new(),
            commander: Commander::new(),
            raw: false,
            json: false,
            ever_received: false,
            last_packet_ms: 0,
            last_reinit_ms: None,
            stats: GroundStats::default(),
        }
    }

    pub fn stats(&self) -> GroundStats {
        self.stats
    }

    pub fn commander(&self) -> &Commander {
        &self.commander
    }

    /// One loop iteration: radio RX, then retry service, then watchdog.
    pub fn tick<R: RadioPort, W: Write>(
        &mut self,
        radio: &mut R,
        out: &mut W,
        now_ms: u32,
    ) -> io::Result<()> {
        self.poll_radio(radio, out, now_ms)?;
        self.service_retries(radio, out, now_ms)?;
        self.service_watchdog(radio, now_ms);
        Ok(())
    }

    fn poll_radio<R: RadioPort, W: Write>(
        &mut self,
        radio: &mut R,
        out: &mut W,
        now_ms: u32,
    ) -> io::Result<()> {
        let mut buf = [0u8; MAX_PACKET];
        let Some(len) = radio.poll_receive(&mut buf, now_ms) else {
            return Ok(());
        };
        self.stats.rx_packets += 1;
        self.ever_received = true;
        self.last_packet_ms = now_ms;

        if self.raw {
            writeln!(out, "[RAW] len={} {}", len, hex_prefix::<192>(&buf[..len]))?;
            return Ok(());
        }

        for &byte in &buf[..len] {
            let emitted = match self.parser.feed(byte) {
                Some(f) => Some((f.seq, Message::decode(f.msg_type, f.payload))),
                None => None,
            };
            match emitted {
                Some((_, Ok(Message::Telemetry(t)))) => {
                    self.stats.telemetry_rx += 1;
                    self.print_telemetry(out, &t)?;
                }
                Some((seq, Ok(Message::Ack(ack)))) => {
                    self.stats.acks_rx += 1;
                    writeln!(
                        out,
                        "[ACK] for=0x{:02X} status={}",
                        ack.acked_msg_type, ack.status as u8
                    )?;
                    if let Some(m) = self.commander.handle_ack(&ack, seq) {
                        writeln!(
                            out,
                            "[CMD] ACK received for msg=0x{:02X} seq={} status={}",
                            m.msg_type, m.seq, m.status as u8
                        )?;
                    }
                }
                Some((_, Ok(other))) => {
                    debug!(msg_type = other.msg_type() as u8, "Uplink frame ignored");
                }
                Some((_, Err(e))) => {
                    debug!(error = %e, "Undecodable uplink frame");
                }
                None => {}
            }
        }
        Ok(())
    }

    fn print_telemetry<W: Write>(&mut self, out: &mut W, t: &Telemetry) -> io::Result<()> {
        writeln!(
            out,
            "[TELEM] t={} T0={:.2} T1={:.2} P(Pa)={:.2} heater=%={:.2} valve=%={:.2}",
            t.timestamp_ms, t.temp_c[0], t.temp_c[1], t.pressure_pa, t.heater_pct, t.valve_pct
        )?;
        if self.json {
            match serde_json::to_string(t) {
                Ok(json) => writeln!(out, "[JSON] {}", json)?,
                Err(e) => warn!(error = %e, "Telemetry JSON encode failed"),
            }
        }
        Ok(())
    }

    fn service_retries<R: RadioPort, W: Write>(
        &mut self,
        radio: &mut R,
        out: &mut W,
        now_ms: u32,
    ) -> io::Result<()> {
        match self.commander.service(radio, now_ms) {
            Some(CommandEvent::Retry {
                attempt,
                msg_type,
                seq,
            }) => writeln!(out, "[CMD] RETRY #{} msg=0x{:02X} seq={}", attempt, msg_type, seq),
            Some(CommandEvent::Failed { msg_type, seq }) => {
                writeln!(out, "[CMD] FAIL: no ACK for msg=0x{:02X} seq={}", msg_type, seq)
            }
            Some(CommandEvent::BusyWarning) => {
                writeln!(out, "[CMD] WARNING: LoRa TX busy > 3s (busy does not count retry)")
            }
            None => Ok(()),
        }
    }

    fn service_watchdog<R: RadioPort>(&mut self, radio: &mut R, now_ms: u32) {
        if !self.ever_received {
            return;
        }
        if now_ms.wrapping_sub(self.last_packet_ms) <= self.cfg.rx_watchdog_ms {
            return;
        }
        let cooled = match self.last_reinit_ms {
            None => true,
            Some(t) => now_ms.wrapping_sub(t) >= self.cfg.reinit_cooldown_ms,
        };
        if !cooled {
            return;
        }

        warn!(
            silent_ms = now_ms.wrapping_sub(self.last_packet_ms),
            "RX watchdog: reinitialising radio"
        );
        radio.reinit(now_ms);
        self.stats.watchdog_reinits += 1;
        self.last_reinit_ms = Some(now_ms);
        // Restart the silence clock so a single dead spell does not retrigger
        // every tick.
        self.last_packet_ms = now_ms;
    }

    /// Handle one '\n'-terminated shell line from the host.
    pub fn handle_line<R: RadioPort, W: Write>(
        &mut self,
        line: &str,
        radio: &mut R,
        out: &mut W,
        now_ms: u32,
    ) -> io::Result<()> {
        let cmd = match shell::parse_line(line) {
            Ok(cmd) => cmd,
            Err(e) => return writeln!(out, "ERR: {}", e),
        };

        match cmd {
            ShellCommand::Help => writeln!(out, "{}", shell::HELP),
            ShellCommand::Mode(mode) => {
                self.submit(Message::ModeSwitch(ModeSwitch { mode }), radio, now_ms);
                Ok(())
            }
            ShellCommand::SetHeater(pct) => {
                self.submit(
                    Message::ManualCmd(ManualCmd {
                        flags: ManualCmd::FLAG_HEATER,
                        heater_pct: pct,
                        valve_pct: 0.0,
                        pump_temp_c: 0.0,
                    }),
                    radio,
                    now_ms,
                );
                Ok(())
            }
            ShellCommand::SetValve(pct) => {
                self.submit(
                    Message::ManualCmd(ManualCmd {
                        flags: ManualCmd::FLAG_VALVE,
                        heater_pct: 0.0,
                        valve_pct: pct,
                        pump_temp_c: 0.0,
                    }),
                    radio,
                    now_ms,
                );
                Ok(())
            }
            ShellCommand::SetTemp(v) => {
                self.submit_setpoint(Setpoints {
                    temp_c: v,
                    enable_mask: Setpoints::ENABLE_TEMP,
                    ..Setpoints::default()
                }, radio, now_ms);
                Ok(())
            }
            ShellCommand::SetPressure(v) => {
                self.submit_setpoint(Setpoints {
                    pressure_pa: v,
                    enable_mask: Setpoints::ENABLE_PRESSURE,
                    ..Setpoints::default()
                }, radio, now_ms);
                Ok(())
            }
            ShellCommand::SetValveSp(v) => {
                self.submit_setpoint(Setpoints {
                    valve_pct: v,
                    enable_mask: Setpoints::ENABLE_VALVE,
                    ..Setpoints::default()
                }, radio, now_ms);
                Ok(())
            }
            ShellCommand::LoraStat => self.print_stats(out),
            ShellCommand::LoraRaw(on) => {
                self.raw = on;
                writeln!(out, "raw sniff {}", if on { "on" } else { "off" })
            }
            ShellCommand::LoraTx(text) => {
                // Range testing: raw bytes, unframed, fire-and-forget.
                let outcome = radio.transmit(text.as_bytes(), now_ms);
                info!(len = text.len(), ?outcome, "Raw text TX");
                if outcome != TxOutcome::Ok {
                    writeln!(out, "lora tx: {:?}", outcome)?;
                }
                Ok(())
            }
            ShellCommand::LoraPing => {
                self.submit(Message::Heartbeat, radio, now_ms);
                Ok(())
            }
            ShellCommand::Json(on) => {
                self.json = on;
                writeln!(out, "json mirror {}", if on { "on" } else { "off" })
            }
        }
    }

    fn submit<R: RadioPort>(&mut self, msg: Message, radio: &mut R, now_ms: u32) -> u8 {
        self.commander.submit(&msg, radio, now_ms)
    }

    fn submit_setpoint<R: RadioPort>(&mut self, sp: Setpoints, radio: &mut R, now_ms: u32) {
        self.submit(Message::Setpoints(sp), radio, now_ms);
    }

    fn print_stats<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let p = self.parser.stats();
        let c = self.commander.stats();
        writeln!(
            out,
            "[STAT] rx_packets={} telemetry={} acks={} crc_errors={} len_errors={}",
            self.stats.rx_packets, self.stats.telemetry_rx, self.stats.acks_rx, p.crc_errors,
            p.len_errors
        )?;
        writeln!(
            out,
            "[STAT] submitted={} acked={} failed={} watchdog_reinits={}",
            c.submitted, c.acked, c.failed, self.stats.watchdog_reinits
        )?;
        match self.commander.pending() {
            Some(p) => writeln!(
                out,
                "[STAT] pending msg=0x{:02X} seq={} retries={}",
                p.msg_type, p.seq, p.retries
            ),
            None => writeln!(out, "[STAT] pending none"),
        }
    }
}

impl Default for GroundRelay {
    fn default() -> Self {
        Self::new(GroundRelayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_protocol::{Ack, AckStatus};
    use std::collections::VecDeque;

    struct FakeRadio {
        outcome: TxOutcome,
        sent: Vec<Vec<u8>>,
        rx: VecDeque<Vec<u8>>,
        reinits: u32,
    }

    impl FakeRadio {
        fn new() -> Self {
            Self {
                outcome: TxOutcome::Ok,
                sent: Vec::new(),
                rx: VecDeque::new(),
                reinits: 0,
            }
        }

        fn push_frame(&mut self, msg: Message, seq: u8) {
            self.rx.push_back(msg.encode_frame(seq).unwrap().to_vec());
        }
    }

    impl RadioPort for FakeRadio {
        fn reinit(&mut self, _now_ms: u32) {
            self.reinits += 1;
        }

        fn transmit(&mut self, bytes: &[u8], _now_ms: u32) -> TxOutcome {
            if self.outcome == TxOutcome::Ok {
                self.sent.push(bytes.to_vec());
            }
            self.outcome
        }

        fn poll_receive(&mut self, buf: &mut [u8; MAX_PACKET], _now_ms: u32) -> Option<usize> {
            let pkt = self.rx.pop_front()?;
            buf[..pkt.len()].copy_from_slice(&pkt);
            Some(pkt.len())
        }
    }

    fn output(buf: &[u8]) -> String {
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_telemetry_line_format() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        let mut t = Telemetry::default();
        t.timestamp_ms = 1234;
        t.temp_c[0] = 21.5;
        t.temp_c[1] = 22.0;
        t.temp_count = 2;
        t.pressure_pa = 101_325.0;
        t.heater_pct = 80.0;
        t.valve_pct = 30.0;
        radio.push_frame(Message::Telemetry(t), 1);

        relay.tick(&mut radio, &mut out, 0).unwrap();

        assert_eq!(
            output(&out),
            "[TELEM] t=1234 T0=21.50 T1=22.00 P(Pa)=101325.00 heater=%=80.00 valve=%=30.00\n"
        );
    }

    #[test]
    fn test_ack_lines_on_match() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        relay
            .handle_line("mode auto", &mut radio, &mut out, 0)
            .unwrap();
        let seq = relay.commander().pending().unwrap().seq;

        radio.push_frame(
            Message::Ack(Ack {
                acked_msg_type: 0x10,
                status: AckStatus::Ok,
            }),
            seq,
        );
        relay.tick(&mut radio, &mut out, 150).unwrap();

        let text = output(&out);
        assert!(text.contains("[ACK] for=0x10 status=0"));
        assert!(text.contains(&format!(
            "[CMD] ACK received for msg=0x10 seq={} status=0",
            seq
        )));
        assert!(relay.commander().pending().is_none());
    }

    #[test]
    fn test_unmatched_ack_prints_ack_line_only() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        radio.push_frame(
            Message::Ack(Ack {
                acked_msg_type: 0x12,
                status: AckStatus::Ok,
            }),
            9,
        );
        relay.tick(&mut radio, &mut out, 0).unwrap();

        let text = output(&out);
        assert!(text.contains("[ACK] for=0x12 status=0"));
        assert!(!text.contains("ACK received"));
    }

    #[test]
    fn test_retry_and_fail_lines() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        relay
            .handle_line("mode auto", &mut radio, &mut out, 0)
            .unwrap();
        for now in (0..=2000).step_by(10) {
            relay.tick(&mut radio, &mut out, now).unwrap();
        }

        let text = output(&out);
        let seq = 1; // first allocation
        assert!(text.contains(&format!("[CMD] RETRY #1 msg=0x10 seq={}", seq)));
        assert!(text.contains(&format!("[CMD] RETRY #3 msg=0x10 seq={}", seq)));
        assert!(text.contains(&format!("[CMD] FAIL: no ACK for msg=0x10 seq={}", seq)));
    }

    #[test]
    fn test_busy_warning_line_text() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        radio.outcome = TxOutcome::Busy;
        let mut out = Vec::new();

        relay
            .handle_line("mode auto", &mut radio, &mut out, 0)
            .unwrap();
        for now in (0..=3500).step_by(10) {
            relay.tick(&mut radio, &mut out, now).unwrap();
        }

        assert!(output(&out)
            .contains("[CMD] WARNING: LoRa TX busy > 3s (busy does not count retry)"));
    }

    #[test]
    fn test_watchdog_reinit_with_cooldown() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        // Watchdog is armed only after first contact.
        for now in (0..=12000).step_by(10) {
            relay.tick(&mut radio, &mut out, now).unwrap();
        }
        assert_eq!(radio.reinits, 0);

        radio.push_frame(Message::Heartbeat, 1);
        relay.tick(&mut radio, &mut out, 13000).unwrap();

        let mut reinit_times = Vec::new();
        for now in (13010..=25000).step_by(10) {
            let before = radio.reinits;
            relay.tick(&mut radio, &mut out, now).unwrap();
            if radio.reinits > before {
                reinit_times.push(now);
            }
        }
        // Silence from 13000: first heal just past 18000, the next one a
        // full watchdog period later (the reference is reset on heal).
        assert_eq!(reinit_times, vec![18010, 23020]);
    }

    #[test]
    fn test_raw_mode_dumps_hex() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        relay
            .handle_line("lora raw on", &mut radio, &mut out, 0)
            .unwrap();
        radio.rx.push_back(vec![0xDE, 0xAD]);
        relay.tick(&mut radio, &mut out, 10).unwrap();

        let text = output(&out);
        assert!(text.contains("[RAW] len=2 DE AD"));
        assert_eq!(relay.stats().telemetry_rx, 0);
    }

    #[test]
    fn test_json_mirror() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        relay
            .handle_line("json on", &mut radio, &mut out, 0)
            .unwrap();
        radio.push_frame(Message::Telemetry(Telemetry::default()), 1);
        relay.tick(&mut radio, &mut out, 10).unwrap();

        let text = output(&out);
        let json_line = text
            .lines()
            .find(|l| l.starts_with("[JSON] "))
            .expect("json mirror line");
        let value: serde_json::Value =
            serde_json::from_str(json_line.trim_start_matches("[JSON] ")).unwrap();
        assert_eq!(value["timestamp_ms"], 0);
    }

    #[test]
    fn test_shell_error_reported_not_fatal() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        relay
            .handle_line("warp 9", &mut radio, &mut out, 0)
            .unwrap();
        assert!(output(&out).starts_with("ERR: unknown command"));
    }

    #[test]
    fn test_lora_ping_is_unreliable() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        relay
            .handle_line("lora ping", &mut radio, &mut out, 0)
            .unwrap();
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(radio.sent[0][3], 0x23);
        assert!(relay.commander().pending().is_none());
    }

    #[test]
    fn test_stat_output_mentions_pending() {
        let mut relay = GroundRelay::default();
        let mut radio = FakeRadio::new();
        let mut out = Vec::new();

        relay
            .handle_line("set heater 50", &mut radio, &mut out, 0)
            .unwrap();
        relay
            .handle_line("lora stat", &mut radio, &mut out, 0)
            .unwrap();

        let text = output(&out);
        assert!(text.contains("[STAT] pending msg=0x12 seq=1 retries=0"));
    }
}
