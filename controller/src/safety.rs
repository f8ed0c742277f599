//! Safety interlock. Runs after mode compute on every tick so no command
//! path can evade it; each rule may force SAFE, and SAFE zeroes outputs.

use link_protocol::{Mode, Telemetry};
use tracing::warn;

use crate::config::ControllerConfig;
use crate::state::{ControlState, Outputs};

/// Apply the interlock rules in order: link timeout, overtemperature,
/// SAFE output clamp.
pub fn enforce(
    state: &mut ControlState,
    telemetry: &Telemetry,
    outputs: &mut Outputs,
    now_ms: u32,
    cfg: &ControllerConfig,
) {
    if state.link_alive
        && now_ms.wrapping_sub(state.last_link_heartbeat_ms) > cfg.link_timeout_ms
    {
        state.link_alive = false;
        warn!(
            silent_ms = now_ms.wrapping_sub(state.last_link_heartbeat_ms),
            "Link timeout, forcing SAFE"
        );
    }
    if !state.link_alive && state.mode != Mode::Safe {
        state.mode = Mode::Safe;
    }

    let count = (telemetry.temp_count as usize).min(telemetry.temp_c.len());
    for (i, t) in telemetry.temp_c[..count].iter().enumerate() {
        // NaN readings are ignored here; anything else above the limit
        // (including +inf, the fail-safe reading of a railed sensor)
        // trips the interlock.
        if !t.is_nan() && *t > cfg.max_temp_c {
            if state.mode != Mode::Safe {
                warn!(channel = i, temp_c = *t, "Overtemperature, forcing SAFE");
            }
            state.mode = Mode::Safe;
        }
    }

    if state.mode == Mode::Safe {
        *outputs = Outputs::ZERO;
    }
}
