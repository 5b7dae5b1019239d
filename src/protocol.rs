use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::BeamResult;
use crate::network::{PlatformId, ReceiverId, RouteResolver};
use crate::simulation::Simulation;
use crate::telemetry::TelemetryFrame;

pub const MAX_COMMAND_SIZE: usize = 512;

/// One JSON control line, e.g. `{"command":"enable","receiver":0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Enable { receiver: ReceiverId },
    Disable { receiver: ReceiverId },
    SetBand { receiver: ReceiverId, index: usize },
    SetBandByWavelength { receiver: ReceiverId, wavelength: f64 },
    SetThermalMode { receiver: ReceiverId, enabled: bool },
    SetSolarOnly { receiver: ReceiverId, enabled: bool },
    SetRadiatorMode { receiver: ReceiverId, enabled: bool },
    SetConsumption { receiver: ReceiverId, minimum: f64, maximum: f64 },
    SetSolarConditions { platform: PlatformId, flux: f64, facing: f64 },
    Reset,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    InvalidCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<TelemetryFrame>,
}

impl ControlResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: Some(message.into()),
            frame: None,
        }
    }

    pub fn error(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            frame: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn to_json(&self) -> BeamResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid command JSON: {0}")]
    InvalidJson(String),
    #[error("command of {0} bytes exceeds {MAX_COMMAND_SIZE}")]
    MessageTooLarge(usize),
}

impl From<ProtocolError> for ControlResponse {
    fn from(error: ProtocolError) -> Self {
        ControlResponse::error(ResponseStatus::InvalidCommand, error.to_string())
    }
}

pub fn parse_command(line: &str) -> Result<ControlCommand, ProtocolError> {
    let line = line.trim();
    if line.len() > MAX_COMMAND_SIZE {
        return Err(ProtocolError::MessageTooLarge(line.len()));
    }
    serde_json::from_str(line).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

impl<R: RouteResolver> Simulation<R> {
    /// Applies one control command. Failures come back as an error response.
    pub fn apply_command(&mut self, command: &ControlCommand) -> ControlResponse {
        debug!(?command, "control command");
        match self.execute(command) {
            Ok(response) => response,
            Err(e) => {
                warn!(?command, error = %e, "control command rejected");
                ControlResponse::error(ResponseStatus::Error, e.to_string())
            }
        }
    }

    fn execute(&mut self, command: &ControlCommand) -> BeamResult<ControlResponse> {
        let response = match *command {
            ControlCommand::Enable { receiver } => {
                self.enable_receiver(receiver)?;
                ControlResponse::success(format!("{receiver} enabled"))
            }
            ControlCommand::Disable { receiver } => {
                self.disable_receiver(receiver)?;
                ControlResponse::success(format!("{receiver} disabled, ramping down"))
            }
            ControlCommand::SetBand { receiver, index } => {
                let rx = self.receiver_mut(receiver)?;
                if rx.is_enabled() && !rx.bands().can_switch_in_place() {
                    return Ok(ControlResponse::error(
                        ResponseStatus::Error,
                        format!("{receiver} cannot switch bands while enabled"),
                    ));
                }
                rx.bands_mut().set_active_index(index);
                ControlResponse::success(format!("{receiver} band {}", rx.bands().active_band().name))
            }
            ControlCommand::SetBandByWavelength { receiver, wavelength } => {
                let rx = self.receiver_mut(receiver)?;
                if rx.bands_mut().set_active_by_wavelength(wavelength) {
                    ControlResponse::success(format!("{receiver} band {}", rx.bands().active_band().name))
                } else {
                    ControlResponse::error(ResponseStatus::Error, format!("no band of {receiver} contains {wavelength} m"))
                }
            }
            ControlCommand::SetThermalMode { receiver, enabled } => {
                self.receiver_mut(receiver)?.set_thermal_mode(enabled)?;
                ControlResponse::success(format!("{receiver} thermal mode {enabled}"))
            }
            ControlCommand::SetSolarOnly { receiver, enabled } => {
                self.receiver_mut(receiver)?.set_solar_only(enabled);
                ControlResponse::success(format!("{receiver} solar only {enabled}"))
            }
            ControlCommand::SetRadiatorMode { receiver, enabled } => {
                self.receiver_mut(receiver)?.set_radiator_mode(enabled);
                ControlResponse::success(format!("{receiver} radiator mode {enabled}"))
            }
            ControlCommand::SetConsumption { receiver, minimum, maximum } => {
                self.receiver_mut(receiver)?.set_consumption_bounds(minimum, maximum)?;
                ControlResponse::success(format!("{receiver} consumption {minimum}..{maximum}%"))
            }
            ControlCommand::SetSolarConditions { platform, flux, facing } => {
                self.set_solar_conditions(platform, flux, facing)?;
                ControlResponse::success(format!("{platform} solar flux {flux} W/m²"))
            }
            ControlCommand::Reset => {
                self.reset();
                ControlResponse::success("ledgers reset")
            }
            ControlCommand::Snapshot => ControlResponse {
                status: ResponseStatus::Success,
                message: None,
                frame: Some(TelemetryFrame::collect(self)),
            },
        };
        Ok(response)
    }
}
