//! Field controller: mode state machine, safety interlock, actuator drives
//! and the cooperative control loop.
//!
//! The loop is sans-io: the UART, sensors, actuator pins and the AUTO
//! strategy are all passed in as traits, and every entry point takes
//! `now_ms`. Each tick runs link-poll → sample → compute → safety →
//! actuate → telemetry-tx in that order, so telemetry emitted in a tick
//! reflects commands received in the same tick and the safety stage always
//! has the last word on outputs.

pub mod actuator;
pub mod config;
pub mod node;
pub mod safety;
pub mod state;

pub use actuator::{heater_duty, ActuatorPins, ValveDrive};
pub use config::ControllerConfig;
pub use node::{AutoController, Controller, NullAutoController, SensorSource};
pub use state::{ControlState, Outputs};
