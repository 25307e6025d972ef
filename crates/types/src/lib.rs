use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod status;

pub use status::{Status, StatusTable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown phase '{0}', expected L1, L2 or L3")]
    Phase(String),
    #[error("unknown position {0}, expected 0 (AC input 1), 1 (AC output) or 2 (AC input 2)")]
    Position(u8),
}

/// One leg of the AC output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::L1 => "L1",
            Phase::L2 => "L2",
            Phase::L3 => "L3",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "L1" => Ok(Phase::L1),
            "L2" => Ok(Phase::L2),
            "L3" => Ok(Phase::L3),
            _ => Err(ParseError::Phase(value.to_string())),
        }
    }
}

/// Where the inverter is wired into the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    AcInput1,
    AcOutput,
    AcInput2,
}

impl Position {
    pub fn code(self) -> u8 {
        match self {
            Position::AcInput1 => 0,
            Position::AcOutput => 1,
            Position::AcInput2 => 2,
        }
    }
}

impl TryFrom<u8> for Position {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Position::AcInput1),
            1 => Ok(Position::AcOutput),
            2 => Ok(Position::AcInput2),
            other => Err(ParseError::Position(other)),
        }
    }
}

/// Measurements for a single phase. `None` means no reading yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseReading {
    /// Volts.
    pub ac_voltage: Option<f64>,
    /// Amps.
    pub ac_current: Option<f64>,
    /// Watts.
    pub ac_power: Option<f64>,
    /// kWh.
    pub energy_forwarded: Option<f64>,
}

impl PhaseReading {
    pub fn zeroed() -> Self {
        Self {
            ac_voltage: Some(0.0),
            ac_current: Some(0.0),
            ac_power: Some(0.0),
            energy_forwarded: Some(0.0),
        }
    }
}

/// Aggregate measurements plus the power-limit pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallReading {
    pub ac_voltage: Option<f64>,
    pub ac_current: Option<f64>,
    pub ac_power: Option<f64>,
    pub energy_forwarded: Option<f64>,
    /// Target setpoint in watts; the power-limit loop drives the device towards it.
    pub power_limit: Option<f64>,
    /// Last limit read back from the device, in watts.
    pub active_power_limit: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyModel {
    pub l1: PhaseReading,
    pub l2: PhaseReading,
    pub l3: PhaseReading,
    pub overall: OverallReading,
}

impl EnergyModel {
    pub fn phase(&self, phase: Phase) -> &PhaseReading {
        match phase {
            Phase::L1 => &self.l1,
            Phase::L2 => &self.l2,
            Phase::L3 => &self.l3,
        }
    }

    pub fn phase_mut(&mut self, phase: Phase) -> &mut PhaseReading {
        match phase {
            Phase::L1 => &mut self.l1,
            Phase::L2 => &mut self.l2,
            Phase::L3 => &mut self.l3,
        }
    }

    pub fn zero_phases(&mut self) {
        for phase in Phase::ALL {
            *self.phase_mut(phase) = PhaseReading::zeroed();
        }
    }
}

/// Immutable installation settings handed to an adapter at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverterSettings {
    /// Rated ceiling in watts; converts the device's percentage limit to watts.
    pub max_ac_power: u32,
    /// Active phase on single-phase installations.
    pub phase: Phase,
    pub poll_interval: Duration,
    pub position: Position,
}

impl Default for InverterSettings {
    fn default() -> Self {
        Self {
            max_ac_power: 0,
            phase: Phase::L1,
            poll_interval: Duration::from_millis(1_000),
            position: Position::AcOutput,
        }
    }
}

/// Static description of a connected inverter, known once settings are loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub hardware_version: String,
    pub software_version: Option<String>,
    pub serial_number: String,
    pub max_ac_power: u32,
    pub phase: Phase,
    pub poll_interval: Duration,
    pub position: Position,
}

impl DeviceIdentity {
    pub fn new(
        settings: &InverterSettings,
        hardware_version: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            hardware_version: hardware_version.into(),
            software_version: None,
            serial_number: serial_number.into(),
            max_ac_power: settings.max_ac_power,
            phase: settings.phase,
            poll_interval: settings.poll_interval,
            position: settings.position,
        }
    }
}
