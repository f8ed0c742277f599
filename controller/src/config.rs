//! Compile-time defaults, all tunable per instance.

/// Telemetry emission period on the controller UART.
pub const TELEMETRY_PERIOD_MS: u32 = 200;
/// No valid frame for this long flips `link_alive` off (which forces SAFE).
pub const LINK_TIMEOUT_MS: u32 = 1500;
/// Any sensed temperature above this forces SAFE.
pub const MAX_TEMP_C: f32 = 80.0;
/// Time-proportional valve cycle period.
pub const VALVE_CYCLE_MS: u32 = 500;
/// UART bytes accepted per tick (bounds per-tick work).
pub const UART_DRAIN_MAX: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub telemetry_period_ms: u32,
    pub link_timeout_ms: u32,
    pub max_temp_c: f32,
    pub valve_cycle_ms: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            telemetry_period_ms: TELEMETRY_PERIOD_MS,
            link_timeout_ms: LINK_TIMEOUT_MS,
            max_temp_c: MAX_TEMP_C,
            valve_cycle_ms: VALVE_CYCLE_MS,
        }
    }
}
