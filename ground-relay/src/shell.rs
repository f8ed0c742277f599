//! USB shell grammar: line-oriented, '\n'-terminated, whitespace-split.

use link_protocol::Mode;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  help
  mode safe|manual|auto
  set heater <pct>   set valve <pct>
  set T <degC>       set P <pa>       set valve_sp <pct>
  lora stat          lora raw on|off
  lora tx <text>     lora ping
  json on|off";

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Help,
    Mode(Mode),
    SetHeater(f32),
    SetValve(f32),
    SetTemp(f32),
    SetPressure(f32),
    SetValveSp(f32),
    LoraStat,
    LoraRaw(bool),
    LoraTx(String),
    LoraPing,
    Json(bool),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShellError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad number '{0}'")]
    BadNumber(String),
}

fn number(tok: &str) -> Result<f32, ShellError> {
    tok.parse::<f32>()
        .map_err(|_| ShellError::BadNumber(tok.to_string()))
}

fn on_off(tok: &str, usage: &'static str) -> Result<bool, ShellError> {
    match tok {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(ShellError::Usage(usage)),
    }
}

pub fn parse_line(line: &str) -> Result<ShellCommand, ShellError> {
    let mut tokens = line.split_whitespace();
    let head = tokens.next().ok_or(ShellError::Empty)?;

    match head {
        "help" => Ok(ShellCommand::Help),
        "mode" => match tokens.next() {
            Some("safe") => Ok(ShellCommand::Mode(Mode::Safe)),
            Some("manual") => Ok(ShellCommand::Mode(Mode::Manual)),
            Some("auto") => Ok(ShellCommand::Mode(Mode::Auto)),
            _ => Err(ShellError::Usage("mode safe|manual|auto")),
        },
        "set" => {
            let field = tokens
                .next()
                .ok_or(ShellError::Usage("set heater|valve|T|P|valve_sp <value>"))?;
            let value = tokens
                .next()
                .ok_or(ShellError::Usage("set heater|valve|T|P|valve_sp <value>"))?;
            match field {
                "heater" => Ok(ShellCommand::SetHeater(number(value)?)),
                "valve" => Ok(ShellCommand::SetValve(number(value)?)),
                "T" => Ok(ShellCommand::SetTemp(number(value)?)),
                "P" => Ok(ShellCommand::SetPressure(number(value)?)),
                "valve_sp" => Ok(ShellCommand::SetValveSp(number(value)?)),
                other => Err(ShellError::Unknown(format!("set {}", other))),
            }
        }
        "lora" => match tokens.next() {
            Some("stat") => Ok(ShellCommand::LoraStat),
            Some("raw") => {
                let arg = tokens.next().ok_or(ShellError::Usage("lora raw on|off"))?;
                Ok(ShellCommand::LoraRaw(on_off(arg, "lora raw on|off")?))
            }
            Some("tx") => {
                // Everything after the subcommand, interior spacing kept.
                let rest = line
                    .trim_start()
                    .strip_prefix("lora")
                    .unwrap_or("")
                    .trim_start()
                    .strip_prefix("tx")
                    .map(str::trim)
                    .unwrap_or("");
                if rest.is_empty() {
                    return Err(ShellError::Usage("lora tx <text>"));
                }
                Ok(ShellCommand::LoraTx(rest.to_string()))
            }
            Some("ping") => Ok(ShellCommand::LoraPing),
            _ => Err(ShellError::Usage("lora stat|raw|tx|ping")),
        },
        "json" => {
            let arg = tokens.next().ok_or(ShellError::Usage("json on|off"))?;
            Ok(ShellCommand::Json(on_off(arg, "json on|off")?))
        }
        other => Err(ShellError::Unknown(other.to_string())),
    }
}
