//! The controller's cooperative loop and its collaborator traits.

use link_protocol::{
    Ack, AckStatus, DecodeError, FrameParser, Message, Mode, Telemetry, UartPort,
};
use tracing::{debug, info, warn};

use crate::actuator::{heater_duty, ActuatorPins, ValveDrive};
use crate::config::{ControllerConfig, UART_DRAIN_MAX};
use crate::safety;
use crate::state::{ControlState, Outputs};

/// Opaque sample source (the RTD/ADC drivers live behind this).
///
/// Returns a fresh [`Telemetry`] with timestamp, temp_count, temp_c[] and
/// pressure_pa populated; the actuator fields are filled in by the loop.
/// Non-finite readings pass through untouched.
pub trait SensorSource {
    fn sample(&mut self, now_ms: u32) -> Telemetry;
}

/// AUTO-mode strategy hook: a pure function of state and telemetry.
pub trait AutoController {
    fn compute(&self, state: &ControlState, telemetry: &Telemetry) -> Outputs;
}

/// Placeholder automatic controller: all outputs zero.
#[derive(Debug, Default)]
pub struct NullAutoController;

impl AutoController for NullAutoController {
    fn compute(&self, _state: &ControlState, _telemetry: &Telemetry) -> Outputs {
        Outputs::ZERO
    }
}

pub struct Controller {
    cfg: ControllerConfig,
    state: ControlState,
    parser: FrameParser,
    valve: ValveDrive,
    last_telemetry_tx: Option<u32>,
    telemetry_seq: u8,
    last_applied: Outputs,
}

impl Controller {
    pub fn new(cfg: ControllerConfig) -> Self {
        Self {
            valve: ValveDrive::new(cfg.valve_cycle_ms),
            cfg,
            state: ControlState::new(),
            parser: FrameParser::new(),
            last_telemetry_tx: None,
            telemetry_seq: 0,
            last_applied: Outputs::ZERO,
        }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Post-clamp outputs applied on the most recent tick.
    pub fn last_applied(&self) -> Outputs {
        self.last_applied
    }

    /// One loop iteration: link poll → sample → compute → safety →
    /// actuate → telemetry TX.
    pub fn tick<U, S, A, P>(
        &mut self,
        uart: &mut U,
        sensors: &mut S,
        auto: &A,
        pins: &mut P,
        now_ms: u32,
    ) where
        U: UartPort,
        S: SensorSource,
        A: AutoController + ?Sized,
        P: ActuatorPins,
    {
        self.poll_link(uart, now_ms);

        let sample = sensors.sample(now_ms);
        let mut outputs = self.compute(auto, &sample);
        safety::enforce(&mut self.state, &sample, &mut outputs, now_ms, &self.cfg);

        pins.set_valve(self.valve.level(outputs.valve_pct, now_ms));
        pins.set_heater_duty(heater_duty(outputs.heater_pct));
        pins.set_pump_target(outputs.pump_temp_c);
        self.last_applied = outputs;

        self.maybe_send_telemetry(uart, &sample, &outputs, now_ms);
    }

    fn poll_link<U: UartPort>(&mut self, uart: &mut U, now_ms: u32) {
        let mut drained = 0;
        while drained < UART_DRAIN_MAX {
            let Some(byte) = uart.read_byte() else {
                break;
            };
            drained += 1;

            let emitted = match self.parser.feed(byte) {
                Some(f) => Some((f.msg_type, f.seq, Message::decode(f.msg_type, f.payload))),
                None => None,
            };
            if let Some((raw_type, seq, decoded)) = emitted {
                self.dispatch(uart, raw_type, seq, decoded, now_ms);
            }
        }
    }

    fn dispatch<U: UartPort>(
        &mut self,
        uart: &mut U,
        raw_type: u8,
        seq: u8,
        decoded: Result<Message, DecodeError>,
        now_ms: u32,
    ) {
        self.state.mark_link(now_ms);

        match decoded {
            Ok(Message::ModeSwitch(m)) => {
                if self.state.mode != m.mode {
                    info!(from = ?self.state.mode, to = ?m.mode, "Mode switch");
                }
                self.state.mode = m.mode;
                send_ack(uart, raw_type, AckStatus::Ok, seq);
            }
            Ok(Message::Setpoints(s)) => {
                self.state.setpoints = s;
                self.state.last_setpoint_ms = now_ms;
                send_ack(uart, raw_type, AckStatus::Ok, seq);
            }
            Ok(Message::ManualCmd(m)) => {
                self.state.manual = m;
                self.state.last_manual_ms = now_ms;
                send_ack(uart, raw_type, AckStatus::Ok, seq);
            }
            Ok(Message::Heartbeat) => {
                // Liveness already refreshed; heartbeats are never acked.
            }
            Ok(Message::Telemetry(_)) | Ok(Message::Ack(_)) => {
                // Wrong direction on this link. Never answered, so a relay
                // engine echoing frames cannot start a feedback loop.
            }
            Err(DecodeError::UnknownType(t)) => {
                debug!(msg_type = t, "Ignoring unknown message type");
            }
            Err(e) => {
                warn!(msg_type = raw_type, seq, error = %e, "Rejecting command");
                send_ack(uart, raw_type, AckStatus::Err, seq);
            }
        }
    }

    fn compute<A: AutoController + ?Sized>(&self, auto: &A, sample: &Telemetry) -> Outputs {
        match self.state.mode {
            Mode::Safe => Outputs::ZERO,
            Mode::Manual => {
                let m = &self.state.manual;
                Outputs {
                    heater_pct: if m.has_heater() {
                        m.heater_pct.clamp(0.0, 100.0)
                    } else {
                        0.0
                    },
                    valve_pct: if m.has_valve() {
                        m.valve_pct.clamp(0.0, 100.0)
                    } else {
                        0.0
                    },
                    pump_temp_c: if m.has_pump() { m.pump_temp_c } else { 0.0 },
                }
            }
            Mode::Auto => auto.compute(&self.state, sample),
        }
    }

    fn maybe_send_telemetry<U: UartPort>(
        &mut self,
        uart: &mut U,
        sample: &Telemetry,
        applied: &Outputs,
        now_ms: u32,
    ) {
        let due = match self.last_telemetry_tx {
            None => true,
            Some(t) => now_ms.wrapping_sub(t) >= self.cfg.telemetry_period_ms,
        };
        if !due {
            return;
        }

        let report = Telemetry {
            heater_pct: applied.heater_pct,
            valve_pct: applied.valve_pct,
            ..*sample
        };
        if let Ok(frame) = Message::Telemetry(report).encode_frame(self.telemetry_seq) {
            uart.write_all(&frame);
        }
        self.telemetry_seq = self.telemetry_seq.wrapping_add(1);
        self.last_telemetry_tx = Some(now_ms);
    }
}

fn send_ack<U: UartPort>(uart: &mut U, acked_msg_type: u8, status: AckStatus, seq: u8) {
    let ack = Message::Ack(Ack {
        acked_msg_type,
        status,
    });
    if let Ok(frame) = ack.encode_frame(seq) {
        uart.write_all(&frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_protocol::{ManualCmd, ModeSwitch, MsgType};
    use std::collections::VecDeque;

    struct FakeUart {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl FakeUart {
        fn new() -> Self {
            Self {
                rx: VecDeque::new(),
                tx: Vec::new(),
            }
        }

        fn inject(&mut self, msg: Message, seq: u8) {
            self.rx.extend(msg.encode_frame(seq).unwrap().iter());
        }

        fn inject_raw(&mut self, bytes: &[u8]) {
            self.rx.extend(bytes.iter());
        }

        /// Decode everything the controller wrote.
        fn sent(&self) -> Vec<(u8, Message)> {
            let mut parser = FrameParser::new();
            let mut out = Vec::new();
            for &b in &self.tx {
                if let Some(f) = parser.feed(b) {
                    out.push((f.seq, Message::decode(f.msg_type, f.payload).unwrap()));
                }
            }
            out
        }
    }

    impl UartPort for FakeUart {
        fn read_byte(&mut self) -> Option<u8> {
            self.rx.pop_front()
        }

        fn write_free(&self) -> usize {
            usize::MAX
        }

        fn write_all(&mut self, bytes: &[u8]) {
            self.tx.extend_from_slice(bytes);
        }
    }

    struct FakeSensors {
        temps: [f32; 4],
        count: u8,
        pressure: f32,
    }

    impl FakeSensors {
        fn nominal() -> Self {
            Self {
                temps: [21.0, 22.0, 0.0, 0.0],
                count: 2,
                pressure: 101_325.0,
            }
        }
    }

    impl SensorSource for FakeSensors {
        fn sample(&mut self, now_ms: u32) -> Telemetry {
            let mut t = Telemetry::default();
            t.timestamp_ms = now_ms;
            t.temp_count = self.count;
            t.temp_c = self.temps;
            t.pressure_pa = self.pressure;
            t
        }
    }

    #[derive(Default)]
    struct FakePins {
        valve: bool,
        heater_duty: u8,
        pump_target: f32,
    }

    impl ActuatorPins for FakePins {
        fn set_valve(&mut self, high: bool) {
            self.valve = high;
        }

        fn set_heater_duty(&mut self, duty: u8) {
            self.heater_duty = duty;
        }

        fn set_pump_target(&mut self, temp_c: f32) {
            self.pump_target = temp_c;
        }
    }

    fn rig() -> (Controller, FakeUart, FakeSensors, FakePins) {
        (
            Controller::new(ControllerConfig::default()),
            FakeUart::new(),
            FakeSensors::nominal(),
            FakePins::default(),
        )
    }

    fn acks(sent: &[(u8, Message)]) -> Vec<(u8, Ack)> {
        sent.iter()
            .filter_map(|(seq, m)| match m {
                Message::Ack(a) => Some((*seq, *a)),
                _ => None,
            })
            .collect()
    }

    fn telemetry_frames(sent: &[(u8, Message)]) -> Vec<Telemetry> {
        sent.iter()
            .filter_map(|(_, m)| match m {
                Message::Telemetry(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_mode_switch_acked_and_applied() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        uart.inject(Message::ModeSwitch(ModeSwitch { mode: Mode::Manual }), 7);

        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 0);

        assert_eq!(c.state().mode, Mode::Manual);
        let acks = acks(&uart.sent());
        assert_eq!(acks.len(), 1);
        assert_eq!(
            acks[0],
            (
                7,
                Ack {
                    acked_msg_type: 0x10,
                    status: AckStatus::Ok
                }
            )
        );
    }

    #[test]
    fn test_bad_length_command_gets_ack_err() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        // ModeSwitch with a two-byte payload.
        uart.inject_raw(&link_protocol::encode(0x10, 9, &[1, 0]).unwrap());

        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 0);

        let acks = acks(&uart.sent());
        assert_eq!(acks.len(), 1);
        assert_eq!(
            acks[0],
            (
                9,
                Ack {
                    acked_msg_type: 0x10,
                    status: AckStatus::Err
                }
            )
        );
        assert_eq!(c.state().mode, Mode::Safe);
    }

    #[test]
    fn test_unknown_type_is_silent_but_refreshes_link() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        uart.inject_raw(&link_protocol::encode(0x42, 1, &[0xAB]).unwrap());

        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 50);

        assert!(acks(&uart.sent()).is_empty());
        assert!(c.state().link_alive);
        assert_eq!(c.state().last_link_heartbeat_ms, 50);
    }

    #[test]
    fn test_heartbeat_refreshes_without_ack() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        uart.inject(Message::Heartbeat, 3);

        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 40);

        assert!(acks(&uart.sent()).is_empty());
        assert!(c.state().link_alive);
    }

    #[test]
    fn test_manual_presence_flags_gate_outputs() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        uart.inject(Message::ModeSwitch(ModeSwitch { mode: Mode::Manual }), 1);
        uart.inject(
            Message::ManualCmd(ManualCmd {
                flags: ManualCmd::FLAG_HEATER,
                heater_pct: 80.0,
                valve_pct: 55.0, // present on the wire but not flagged
                pump_temp_c: 0.0,
            }),
            2,
        );

        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 0);

        let out = c.last_applied();
        assert_eq!(out.heater_pct, 80.0);
        assert_eq!(out.valve_pct, 0.0);
        assert_eq!(pins.heater_duty, heater_duty(80.0));
        assert!(!pins.valve);
    }

    #[test]
    fn test_manual_percent_clamped() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        uart.inject(Message::ModeSwitch(ModeSwitch { mode: Mode::Manual }), 1);
        uart.inject(
            Message::ManualCmd(ManualCmd {
                flags: ManualCmd::FLAG_HEATER | ManualCmd::FLAG_VALVE,
                heater_pct: 250.0,
                valve_pct: -20.0,
                pump_temp_c: 0.0,
            }),
            2,
        );

        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 0);

        assert_eq!(c.last_applied().heater_pct, 100.0);
        assert_eq!(c.last_applied().valve_pct, 0.0);
    }

    #[test]
    fn test_overtemperature_scenario() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        uart.inject(Message::ModeSwitch(ModeSwitch { mode: Mode::Manual }), 1);
        uart.inject(
            Message::ManualCmd(ManualCmd {
                flags: ManualCmd::FLAG_HEATER,
                heater_pct: 80.0,
                valve_pct: 0.0,
                pump_temp_c: 0.0,
            }),
            2,
        );
        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 0);
        assert_eq!(c.last_applied().heater_pct, 80.0);

        sensors.temps[0] = 85.0;
        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 10);

        assert_eq!(c.state().mode, Mode::Safe);
        assert_eq!(c.last_applied(), Outputs::ZERO);
        assert_eq!(pins.heater_duty, 0);
        assert!(!pins.valve);

        // Telemetry of the next period reports zero actuators.
        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 210);
        let t = telemetry_frames(&uart.sent());
        let last = t.last().unwrap();
        assert_eq!(last.temp_c[0], 85.0);
        assert_eq!(last.heater_pct, 0.0);
        assert_eq!(last.valve_pct, 0.0);
    }

    #[test]
    fn test_link_loss_scenario() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        uart.inject(Message::ModeSwitch(ModeSwitch { mode: Mode::Manual }), 1);
        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 0);
        assert_eq!(c.state().mode, Mode::Manual);

        // Silence past the link timeout.
        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 1600);
        assert!(!c.state().link_alive);
        assert_eq!(c.state().mode, Mode::Safe);

        // First frame restores liveness but not the mode.
        uart.inject(Message::Heartbeat, 2);
        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 1700);
        assert!(c.state().link_alive);
        assert_eq!(c.state().mode, Mode::Safe);

        // An explicit ModeSwitch is what brings it back.
        uart.inject(Message::ModeSwitch(ModeSwitch { mode: Mode::Manual }), 3);
        c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, 1800);
        assert_eq!(c.state().mode, Mode::Manual);
    }

    #[test]
    fn test_telemetry_period_and_content() {
        let (mut c, mut uart, mut sensors, mut pins) = rig();
        for now in (0..=600).step_by(10) {
            c.tick(&mut uart, &mut sensors, &NullAutoController, &mut pins, now);
        }

        let frames = telemetry_frames(&uart.sent());
        // t=0 (first tick fires immediately), then 200/400/600.
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[1].timestamp_ms, 200);
        assert_eq!(frames[0].temp_count, 2);
        assert_eq!(frames[0].pressure_pa, 101_325.0);
        // SAFE the whole way: zero actuators on the wire.
        assert!(frames.iter().all(|t| t.heater_pct == 0.0 && t.valve_pct == 0.0));
    }

    #[test]
    fn test_auto_mode_delegates() {
        struct FixedAuto;

        impl AutoController for FixedAuto {
            fn compute(&self, _s: &ControlState, _t: &Telemetry) -> Outputs {
                Outputs {
                    heater_pct: 12.5,
                    valve_pct: 0.0,
                    pump_temp_c: 0.0,
                }
            }
        }

        let (mut c, mut uart, mut sensors, mut pins) = rig();
        uart.inject(Message::ModeSwitch(ModeSwitch { mode: Mode::Auto }), 1);
        c.tick(&mut uart, &mut sensors, &FixedAuto, &mut pins, 0);

        assert_eq!(c.state().mode, Mode::Auto);
        assert_eq!(c.last_applied().heater_pct, 12.5);
    }

    #[test]
    fn test_ack_expecting_set_matches_catalogue() {
        assert!(MsgType::ModeSwitch.expects_ack());
        assert!(MsgType::Setpoints.expects_ack());
        assert!(MsgType::ManualCmd.expects_ack());
        assert!(!MsgType::Heartbeat.expects_ack());
        assert!(!MsgType::Telemetry.expects_ack());
        assert!(!MsgType::Ack.expects_ack());
    }
}
