//! Command boundary between the flight manager and the autopilot.

use crate::error::CommandError;
use crate::models::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Autopilot flight mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    /// Accepts external position/velocity targets
    Guided,
    /// Flies the uploaded mission
    Auto,
}

/// Commands the flight manager issues to the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleCommand {
    Arm,
    SetMode { mode: FlightMode },
    Takeoff { altitude_m: f64 },
    Land { position: Position },
    /// North/east/up velocity (m/s)
    SetVelocity { vn: f64, ve: f64, vu: f64 },
    SetHeading { heading_deg: f64 },
    SetPositionTarget { position: Position },
    SetMissionCurrent { index: usize },
}

/// Autopilot verdict on a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Accepted,
    Failed,
    Denied,
}

/// Acknowledgement for an issued command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command: VehicleCommand,
    pub status: AckStatus,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl CommandAck {
    pub fn new(command: VehicleCommand, status: AckStatus) -> Self {
        Self {
            command,
            status,
            received_at: Utc::now(),
        }
    }

    /// Convert the ack into the link result.
    pub fn into_result(self) -> Result<(), CommandError> {
        match self.status {
            AckStatus::Accepted => Ok(()),
            AckStatus::Failed => Err(CommandError::Rejected(self.command)),
            AckStatus::Denied => Err(CommandError::AccessDenied(self.command)),
        }
    }
}

/// Outbound command channel with acknowledgement.
///
/// Implementations block for at most their configured ack timeout.
pub trait CommandLink {
    fn send(&mut self, command: VehicleCommand) -> Result<(), CommandError>;
}

impl<L: CommandLink + ?Sized> CommandLink for Box<L> {
    fn send(&mut self, command: VehicleCommand) -> Result<(), CommandError> {
        (**self).send(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serializes_tagged() {
        let cmd = VehicleCommand::SetMode {
            mode: FlightMode::Guided,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"type":"SET_MODE","mode":"GUIDED"}"#);
    }

    #[test]
    fn test_ack_maps_to_result() {
        assert!(CommandAck::new(VehicleCommand::Arm, AckStatus::Accepted)
            .into_result()
            .is_ok());
        assert!(matches!(
            CommandAck::new(VehicleCommand::Arm, AckStatus::Denied).into_result(),
            Err(CommandError::AccessDenied(VehicleCommand::Arm))
        ));
    }
}
