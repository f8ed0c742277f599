//! Message catalogue and payload codecs.
//!
//! All payloads are packed little-endian with no padding; the codecs below
//! read and write fixed offsets rather than relying on struct layout.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{self, EncodeError, MAX_FRAME};

/// Closed set of message types on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Telemetry = 0x01,
    ModeSwitch = 0x10,
    Setpoints = 0x11,
    ManualCmd = 0x12,
    Ack = 0x20,
    Heartbeat = 0x23,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Telemetry),
            0x10 => Some(Self::ModeSwitch),
            0x11 => Some(Self::Setpoints),
            0x12 => Some(Self::ManualCmd),
            0x20 => Some(Self::Ack),
            0x23 => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// Exact payload byte count for this type.
    pub fn wire_len(self) -> usize {
        match self {
            Self::Telemetry => Telemetry::WIRE_LEN,
            Self::ModeSwitch => ModeSwitch::WIRE_LEN,
            Self::Setpoints => Setpoints::WIRE_LEN,
            Self::ManualCmd => ManualCmd::WIRE_LEN,
            Self::Ack => Ack::WIRE_LEN,
            Self::Heartbeat => 0,
        }
    }

    /// Commands the controller answers with an Ack and the ground relay
    /// tracks as a PendingCommand.
    pub fn expects_ack(self) -> bool {
        matches!(self, Self::ModeSwitch | Self::Setpoints | Self::ManualCmd)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown message type 0x{0:02X}")]
    UnknownType(u8),
    #[error("bad payload length for 0x{msg_type:02X}: expected {expected}, got {got}")]
    Length {
        msg_type: u8,
        expected: usize,
        got: usize,
    },
    #[error("invalid field value in 0x{msg_type:02X}")]
    Value { msg_type: u8 },
}

fn check_len(msg_type: MsgType, got: usize) -> Result<(), DecodeError> {
    let expected = msg_type.wire_len();
    if got != expected {
        return Err(DecodeError::Length {
            msg_type: msg_type as u8,
            expected,
            got,
        });
    }
    Ok(())
}

fn f32_at(b: &[u8], off: usize) -> f32 {
    f32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn put_f32(out: &mut [u8], off: usize, v: f32) {
    out[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Controller operating mode, as carried by [`ModeSwitch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    Safe = 0,
    Manual = 1,
    Auto = 2,
}

impl Mode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Safe),
            1 => Some(Self::Manual),
            2 => Some(Self::Auto),
            _ => None,
        }
    }
}

/// 0x01: periodic controller state report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub timestamp_ms: u32,
    pub temp_count: u8,
    pub temp_c: [f32; 4],
    pub pressure_pa: f32,
    pub heater_pct: f32,
    pub valve_pct: f32,
}

impl Telemetry {
    pub const WIRE_LEN: usize = 33;

    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        out[4] = self.temp_count;
        for (i, t) in self.temp_c.iter().enumerate() {
            put_f32(&mut out, 5 + 4 * i, *t);
        }
        put_f32(&mut out, 21, self.pressure_pa);
        put_f32(&mut out, 25, self.heater_pct);
        put_f32(&mut out, 29, self.valve_pct);
        out
    }

    pub fn from_wire(b: &[u8]) -> Result<Self, DecodeError> {
        check_len(MsgType::Telemetry, b.len())?;
        if b[4] > 4 {
            return Err(DecodeError::Value {
                msg_type: MsgType::Telemetry as u8,
            });
        }
        let mut temp_c = [0.0f32; 4];
        for (i, t) in temp_c.iter_mut().enumerate() {
            *t = f32_at(b, 5 + 4 * i);
        }
        Ok(Self {
            timestamp_ms: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            temp_count: b[4],
            temp_c,
            pressure_pa: f32_at(b, 21),
            heater_pct: f32_at(b, 25),
            valve_pct: f32_at(b, 29),
        })
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            timestamp_ms: 0,
            temp_count: 0,
            temp_c: [0.0; 4],
            pressure_pa: 0.0,
            heater_pct: 0.0,
            valve_pct: 0.0,
        }
    }
}

/// 0x10: host-commanded mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSwitch {
    pub mode: Mode,
}

impl ModeSwitch {
    pub const WIRE_LEN: usize = 1;

    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        [self.mode as u8]
    }

    pub fn from_wire(b: &[u8]) -> Result<Self, DecodeError> {
        check_len(MsgType::ModeSwitch, b.len())?;
        let mode = Mode::from_u8(b[0]).ok_or(DecodeError::Value {
            msg_type: MsgType::ModeSwitch as u8,
        })?;
        Ok(Self { mode })
    }
}

/// 0x11: automatic-mode setpoints with per-field enable bits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoints {
    pub temp_c: f32,
    pub pressure_pa: f32,
    pub valve_pct: f32,
    pub pump_temp_c: f32,
    pub enable_mask: u8,
}

impl Setpoints {
    pub const WIRE_LEN: usize = 17;

    pub const ENABLE_TEMP: u8 = 1 << 0;
    pub const ENABLE_PRESSURE: u8 = 1 << 1;
    pub const ENABLE_VALVE: u8 = 1 << 2;
    pub const ENABLE_PUMP: u8 = 1 << 3;

    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        put_f32(&mut out, 0, self.temp_c);
        put_f32(&mut out, 4, self.pressure_pa);
        put_f32(&mut out, 8, self.valve_pct);
        put_f32(&mut out, 12, self.pump_temp_c);
        out[16] = self.enable_mask;
        out
    }

    pub fn from_wire(b: &[u8]) -> Result<Self, DecodeError> {
        check_len(MsgType::Setpoints, b.len())?;
        Ok(Self {
            temp_c: f32_at(b, 0),
            pressure_pa: f32_at(b, 4),
            valve_pct: f32_at(b, 8),
            pump_temp_c: f32_at(b, 12),
            enable_mask: b[16],
        })
    }
}

impl Default for Setpoints {
    fn default() -> Self {
        Self {
            temp_c: 0.0,
            pressure_pa: 0.0,
            valve_pct: 0.0,
            pump_temp_c: 0.0,
            enable_mask: 0,
        }
    }
}

/// 0x12: manual actuator command with per-field presence flags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualCmd {
    pub flags: u8,
    pub heater_pct: f32,
    pub valve_pct: f32,
    pub pump_temp_c: f32,
}

impl ManualCmd {
    pub const WIRE_LEN: usize = 13;

    pub const FLAG_HEATER: u8 = 1 << 0;
    pub const FLAG_VALVE: u8 = 1 << 1;
    pub const FLAG_PUMP: u8 = 1 << 2;

    pub fn has_heater(&self) -> bool {
        self.flags & Self::FLAG_HEATER != 0
    }

    pub fn has_valve(&self) -> bool {
        self.flags & Self::FLAG_VALVE != 0
    }

    pub fn has_pump(&self) -> bool {
        self.flags & Self::FLAG_PUMP != 0
    }

    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0] = self.flags;
        put_f32(&mut out, 1, self.heater_pct);
        put_f32(&mut out, 5, self.valve_pct);
        put_f32(&mut out, 9, self.pump_temp_c);
        out
    }

    pub fn from_wire(b: &[u8]) -> Result<Self, DecodeError> {
        check_len(MsgType::ManualCmd, b.len())?;
        Ok(Self {
            flags: b[0],
            heater_pct: f32_at(b, 1),
            valve_pct: f32_at(b, 5),
            pump_temp_c: f32_at(b, 9),
        })
    }
}

impl Default for ManualCmd {
    fn default() -> Self {
        Self {
            flags: 0,
            heater_pct: 0.0,
            valve_pct: 0.0,
            pump_temp_c: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AckStatus {
    Ok = 0,
    Err = 1,
}

/// 0x20: controller response to an ack-expecting command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub acked_msg_type: u8,
    pub status: AckStatus,
}

impl Ack {
    pub const WIRE_LEN: usize = 2;

    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        [self.acked_msg_type, self.status as u8]
    }

    pub fn from_wire(b: &[u8]) -> Result<Self, DecodeError> {
        check_len(MsgType::Ack, b.len())?;
        let status = match b[1] {
            0 => AckStatus::Ok,
            1 => AckStatus::Err,
            _ => {
                return Err(DecodeError::Value {
                    msg_type: MsgType::Ack as u8,
                })
            }
        };
        Ok(Self {
            acked_msg_type: b[0],
            status,
        })
    }
}

/// One decoded message of any catalogued type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    Telemetry(Telemetry),
    ModeSwitch(ModeSwitch),
    Setpoints(Setpoints),
    ManualCmd(ManualCmd),
    Ack(Ack),
    Heartbeat,
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Telemetry(_) => MsgType::Telemetry,
            Self::ModeSwitch(_) => MsgType::ModeSwitch,
            Self::Setpoints(_) => MsgType::Setpoints,
            Self::ManualCmd(_) => MsgType::ManualCmd,
            Self::Ack(_) => MsgType::Ack,
            Self::Heartbeat => MsgType::Heartbeat,
        }
    }

    /// Decode a frame's type byte and payload.
    ///
    /// `UnknownType` and the wrong-length/value errors are distinct because
    /// receivers treat them differently (silent ignore vs. Ack(ERR)).
    pub fn decode(msg_type: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let ty = MsgType::from_u8(msg_type).ok_or(DecodeError::UnknownType(msg_type))?;
        match ty {
            MsgType::Telemetry => Telemetry::from_wire(payload).map(Self::Telemetry),
            MsgType::ModeSwitch => ModeSwitch::from_wire(payload).map(Self::ModeSwitch),
            MsgType::Setpoints => Setpoints::from_wire(payload).map(Self::Setpoints),
            MsgType::ManualCmd => ManualCmd::from_wire(payload).map(Self::ManualCmd),
            MsgType::Ack => Ack::from_wire(payload).map(Self::Ack),
            MsgType::Heartbeat => {
                check_len(MsgType::Heartbeat, payload.len())?;
                Ok(Self::Heartbeat)
            }
        }
    }

    /// Encode this message as a complete frame with the given sequence
    /// number.
    pub fn encode_frame(&self, seq: u8) -> Result<Vec<u8, MAX_FRAME>, EncodeError> {
        let ty = self.msg_type() as u8;
        match self {
            Self::Telemetry(m) => frame::encode(ty, seq, &m.to_wire()),
            Self::ModeSwitch(m) => frame::encode(ty, seq, &m.to_wire()),
            Self::Setpoints(m) => frame::encode(ty, seq, &m.to_wire()),
            Self::ManualCmd(m) => frame::encode(ty, seq, &m.to_wire()),
            Self::Ack(m) => frame::encode(ty, seq, &m.to_wire()),
            Self::Heartbeat => frame::encode(ty, seq, &[]),
        }
    }
}
