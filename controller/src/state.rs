//! Controller-owned state. Constructed once at node start and passed by
//! mutable reference through the loop; no globals.

use link_protocol::{ManualCmd, Mode, Setpoints};

/// Actuator demand for one tick, pre- or post-safety depending on stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outputs {
    pub heater_pct: f32,
    pub valve_pct: f32,
    pub pump_temp_c: f32,
}

impl Outputs {
    pub const ZERO: Self = Self {
        heater_pct: 0.0,
        valve_pct: 0.0,
        pump_temp_c: 0.0,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct ControlState {
    pub mode: Mode,
    /// Last validated setpoints (AUTO-mode input).
    pub setpoints: Setpoints,
    /// Last validated manual command; presence flags gate each output field.
    pub manual: ManualCmd,
    pub last_cmd_ms: u32,
    pub last_setpoint_ms: u32,
    pub last_manual_ms: u32,
    pub last_link_heartbeat_ms: u32,
    pub link_alive: bool,
}

impl ControlState {
    /// Initial state: SAFE, link presumed dead until a frame arrives.
    pub fn new() -> Self {
        Self {
            mode: Mode::Safe,
            setpoints: Setpoints::default(),
            manual: ManualCmd::default(),
            last_cmd_ms: 0,
            last_setpoint_ms: 0,
            last_manual_ms: 0,
            last_link_heartbeat_ms: 0,
            link_alive: false,
        }
    }

    /// Every valid frame (including Heartbeat and bad-length commands)
    /// refreshes link liveness.
    pub fn mark_link(&mut self, now_ms: u32) {
        self.last_cmd_ms = now_ms;
        self.last_link_heartbeat_ms = now_ms;
        self.link_alive = true;
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}
