//! In-process plant: all three nodes wired over simulated transports.
//!
//! The service binary runs this rig against a real-time clock; the
//! end-to-end tests drive it with a hand-stepped one. The radio medium
//! models the half-duplex guard time (back-to-back TX attempts return
//! BUSY) and has fault-injection knobs for loss and stuck-busy windows.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;

use air_relay::{AirRelay, AirRelayConfig};
use fuel_controller::{
    ActuatorPins, Controller, ControllerConfig, NullAutoController, SensorSource,
};
use link_protocol::{RadioPort, Telemetry, TxOutcome, UartPort, MAX_PACKET};
use tracing::debug;

use crate::relay::{GroundRelay, GroundRelayConfig};
use crate::LORA_TX_GUARD_MS;

/// UART TX/RX buffer depth per direction (the real parts carry >= 1 KiB).
const UART_BUF: usize = 1024;

#[derive(Default)]
struct UartQueues {
    a_to_b: VecDeque<u8>,
    b_to_a: VecDeque<u8>,
}

/// One end of a bidirectional byte pipe.
pub struct SimUart {
    shared: Rc<RefCell<UartQueues>>,
    is_a: bool,
}

/// Create a connected UART pair (controller side, relay side).
pub fn uart_pair() -> (SimUart, SimUart) {
    let shared = Rc::new(RefCell::new(UartQueues::default()));
    (
        SimUart {
            shared: Rc::clone(&shared),
            is_a: true,
        },
        SimUart {
            shared,
            is_a: false,
        },
    )
}

impl UartPort for SimUart {
    fn read_byte(&mut self) -> Option<u8> {
        let mut q = self.shared.borrow_mut();
        if self.is_a {
            q.b_to_a.pop_front()
        } else {
            q.a_to_b.pop_front()
        }
    }

    fn write_free(&self) -> usize {
        let q = self.shared.borrow();
        let len = if self.is_a {
            q.a_to_b.len()
        } else {
            q.b_to_a.len()
        };
        UART_BUF.saturating_sub(len)
    }

    fn write_all(&mut self, bytes: &[u8]) {
        let mut q = self.shared.borrow_mut();
        let queue = if self.is_a { &mut q.a_to_b } else { &mut q.b_to_a };
        for &b in bytes {
            if queue.len() >= UART_BUF {
                break;
            }
            queue.push_back(b);
        }
    }
}

#[derive(Default)]
struct RadioQueues {
    to_a: VecDeque<Vec<u8>>,
    to_b: VecDeque<Vec<u8>>,
}

/// One endpoint of a simulated point-to-point packet radio.
pub struct SimRadio {
    shared: Rc<RefCell<RadioQueues>>,
    is_a: bool,
    last_tx_ms: Option<u32>,
    /// Fault injection: TX attempts before this instant return BUSY.
    pub busy_until_ms: u32,
    /// Fault injection: TX succeeds locally but the packet is lost.
    pub lossy: bool,
    pub reinits: u32,
}

/// Create a connected radio pair (air side, ground side).
pub fn radio_pair() -> (SimRadio, SimRadio) {
    let shared = Rc::new(RefCell::new(RadioQueues::default()));
    let end = |is_a, shared| SimRadio {
        shared,
        is_a,
        last_tx_ms: None,
        busy_until_ms: 0,
        lossy: false,
        reinits: 0,
    };
    (end(true, Rc::clone(&shared)), end(false, shared))
}

impl RadioPort for SimRadio {
    fn reinit(&mut self, _now_ms: u32) {
        self.reinits += 1;
        self.last_tx_ms = None;
    }

    fn transmit(&mut self, bytes: &[u8], now_ms: u32) -> TxOutcome {
        if now_ms < self.busy_until_ms {
            return TxOutcome::Busy;
        }
        // Minimum guard between back-to-back attempts.
        if let Some(t) = self.last_tx_ms {
            if now_ms.wrapping_sub(t) < LORA_TX_GUARD_MS {
                return TxOutcome::Busy;
            }
        }
        self.last_tx_ms = Some(now_ms);

        if self.lossy {
            debug!(len = bytes.len(), "Simulated packet loss");
            return TxOutcome::Ok;
        }
        let pkt = bytes[..bytes.len().min(MAX_PACKET)].to_vec();
        let mut q = self.shared.borrow_mut();
        if self.is_a {
            q.to_b.push_back(pkt);
        } else {
            q.to_a.push_back(pkt);
        }
        TxOutcome::Ok
    }

    fn poll_receive(&mut self, buf: &mut [u8; MAX_PACKET], _now_ms: u32) -> Option<usize> {
        let mut q = self.shared.borrow_mut();
        let queue = if self.is_a { &mut q.to_a } else { &mut q.to_b };
        let pkt = queue.pop_front()?;
        buf[..pkt.len()].copy_from_slice(&pkt);
        Some(pkt.len())
    }
}

/// Scripted sensor bank: two RTD channels plus the differential pressure
/// tap, settable mid-run.
pub struct SimSensors {
    pub temp_c: [f32; 4],
    pub temp_count: u8,
    pub pressure_pa: f32,
}

impl Default for SimSensors {
    fn default() -> Self {
        Self {
            temp_c: [21.0, 21.4, 0.0, 0.0],
            temp_count: 2,
            pressure_pa: 101_325.0,
        }
    }
}

impl SensorSource for SimSensors {
    fn sample(&mut self, now_ms: u32) -> Telemetry {
        let mut t = Telemetry::default();
        t.timestamp_ms = now_ms;
        t.temp_count = self.temp_count;
        t.temp_c = self.temp_c;
        t.pressure_pa = self.pressure_pa;
        t
    }
}

/// Records the last actuator state the controller drove.
#[derive(Debug, Default)]
pub struct SimPins {
    pub valve_high: bool,
    pub heater_duty: u8,
    pub pump_target_c: f32,
}

impl ActuatorPins for SimPins {
    fn set_valve(&mut self, high: bool) {
        self.valve_high = high;
    }

    fn set_heater_duty(&mut self, duty: u8) {
        self.heater_duty = duty;
    }

    fn set_pump_target(&mut self, temp_c: f32) {
        self.pump_target_c = temp_c;
    }
}

/// The whole three-node system on one thread.
pub struct SimPlant {
    pub controller: Controller,
    pub sensors: SimSensors,
    pub pins: SimPins,
    pub air: AirRelay,
    pub ground: GroundRelay,
    pub radio_ground: SimRadio,
    auto: NullAutoController,
    uart_controller: SimUart,
    uart_air: SimUart,
    radio_air: SimRadio,
}

impl SimPlant {
    pub fn new() -> Self {
        let (uart_controller, uart_air) = uart_pair();
        let (radio_air, radio_ground) = radio_pair();
        Self {
            controller: Controller::new(ControllerConfig::default()),
            sensors: SimSensors::default(),
            pins: SimPins::default(),
            air: AirRelay::new(AirRelayConfig::default()),
            ground: GroundRelay::new(GroundRelayConfig::default()),
            auto: NullAutoController,
            uart_controller,
            uart_air,
            radio_air,
            radio_ground,
        }
    }

    /// Advance every node by one tick. Host-visible lines land in `out`.
    pub fn tick<W: Write>(&mut self, out: &mut W, now_ms: u32) -> io::Result<()> {
        self.controller.tick(
            &mut self.uart_controller,
            &mut self.sensors,
            &self.auto,
            &mut self.pins,
            now_ms,
        );
        self.air.tick(&mut self.uart_air, &mut self.radio_air, now_ms);
        self.ground.tick(&mut self.radio_ground, out, now_ms)
    }

    /// One host shell line.
    pub fn shell_line<W: Write>(&mut self, line: &str, out: &mut W, now_ms: u32) -> io::Result<()> {
        self.ground
            .handle_line(line, &mut self.radio_ground, out, now_ms)
    }
}

impl Default for SimPlant {
    fn default() -> Self {
        Self::new()
    }
}
