//! Actuator identity, operating modes and runtime state.
//!
//! Notes
//! - Mode codes are the integers persisted in `actuator_states.mode`.
//! - The behavior kind is persisted as a snake_case string and validated here;
//!   it selects a controller variant, never code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// =====================
// Identity
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActuatorId(pub String);

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActuatorId {
    fn from(value: &str) -> Self {
        ActuatorId(value.to_string())
    }
}

/// Number of a digital output line on the line provider.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineNumber(pub u32);

impl fmt::Display for LineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.0)
    }
}

// =====================
// Operating mode
// =====================

pub mod mode_codes {
    pub const MANUAL: i32 = 0;
    pub const AUTO: i32 = 1;
    pub const STOPPED: i32 = 9;
    pub const FORCED_OPEN: i32 = 11;
    pub const FORCED_CLOSE: i32 = 19;
}

/// Sole external control input of a controller. Written by the admin layer,
/// read by the controller on every iteration and every unit step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    Stopped,
    Manual,
    Auto,
    ForcedOpen,
    ForcedClose,
    /// A code the controller does not know; treated like `Manual`.
    Unrecognized(i32),
}

impl OperatingMode {
    pub fn from_code(code: i32) -> Self {
        match code {
            mode_codes::MANUAL => OperatingMode::Manual,
            mode_codes::AUTO => OperatingMode::Auto,
            mode_codes::STOPPED => OperatingMode::Stopped,
            mode_codes::FORCED_OPEN => OperatingMode::ForcedOpen,
            mode_codes::FORCED_CLOSE => OperatingMode::ForcedClose,
            other => OperatingMode::Unrecognized(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            OperatingMode::Manual => mode_codes::MANUAL,
            OperatingMode::Auto => mode_codes::AUTO,
            OperatingMode::Stopped => mode_codes::STOPPED,
            OperatingMode::ForcedOpen => mode_codes::FORCED_OPEN,
            OperatingMode::ForcedClose => mode_codes::FORCED_CLOSE,
            OperatingMode::Unrecognized(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OperatingMode::Stopped => "STOPPED",
            OperatingMode::Manual => "MANUAL",
            OperatingMode::Auto => "AUTO",
            OperatingMode::ForcedOpen => "FORCED_OPEN",
            OperatingMode::ForcedClose => "FORCED_CLOSE",
            OperatingMode::Unrecognized(_) => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Unrecognized(code) => write!(f, "UNRECOGNIZED({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Accepts either a mode name (`auto`, `FORCED_OPEN`, `forced-open`) or its numeric code.
impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<i32>() {
            return match OperatingMode::from_code(code) {
                OperatingMode::Unrecognized(c) => Err(format!("unknown mode code {c}")),
                known => Ok(known),
            };
        }
        match trimmed.to_ascii_uppercase().replace('-', "_").as_str() {
            "STOPPED" => Ok(OperatingMode::Stopped),
            "MANUAL" => Ok(OperatingMode::Manual),
            "AUTO" => Ok(OperatingMode::Auto),
            "FORCED_OPEN" => Ok(OperatingMode::ForcedOpen),
            "FORCED_CLOSE" => Ok(OperatingMode::ForcedClose),
            _ => Err(format!("unknown mode: {trimmed}")),
        }
    }
}

impl Serialize for OperatingMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for OperatingMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = i32::deserialize(deserializer)?;
        Ok(OperatingMode::from_code(code))
    }
}

// =====================
// Behavior kind
// =====================

/// Closed set of controller variants an actuator can be bound to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    /// Curtain or side window: 0..=100 aperture driven by an H-bridge motor.
    ContinuousMotor,
    /// Circulation fan: single relay, on or off.
    BinaryRelay,
    /// Irrigation line: valve pulsed on a timetable.
    IrrigationValve,
}

impl ActuatorKind {
    pub const ALL: [ActuatorKind; 3] = [
        ActuatorKind::ContinuousMotor,
        ActuatorKind::BinaryRelay,
        ActuatorKind::IrrigationValve,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActuatorKind::ContinuousMotor => "continuous_motor",
            ActuatorKind::BinaryRelay => "binary_relay",
            ActuatorKind::IrrigationValve => "irrigation_valve",
        }
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActuatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ActuatorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == trimmed)
            .ok_or_else(|| format!("unknown actuator behavior '{trimmed}'"))
    }
}

// =====================
// Runtime state
// =====================

/// One `actuator_states` row as the controller sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorRuntimeState {
    pub actuator_id: ActuatorId,
    pub mode: OperatingMode,
    /// 0..=100 for continuous devices, 0/1 for binary ones.
    pub aperture: u8,
    /// Seconds to travel from 0 to 100 aperture.
    pub full_travel_secs: Option<f64>,
    /// Optimistic concurrency token, bumped by every write to the row.
    pub version: i64,
}

impl ActuatorRuntimeState {
    /// Delay of one unit step: a hundredth of the full travel time.
    /// `None` when the travel time is missing, negative or not finite.
    pub fn step_period(&self) -> Option<Duration> {
        step_period(self.full_travel_secs)
    }
}

pub fn step_period(full_travel_secs: Option<f64>) -> Option<Duration> {
    let secs = full_travel_secs?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs / 100.0).ok()
}

/// Startup binding of an actuator to a controller variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorBinding {
    pub actuator_id: ActuatorId,
    /// Raw persisted behavior; validated when the controller is built.
    pub behavior: String,
    pub aperture: u8,
    pub full_travel_secs: Option<f64>,
}

/// Row of the admin actuator listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorSummary {
    pub actuator_id: ActuatorId,
    pub mode: OperatingMode,
    pub aperture: u8,
    pub name: Option<String>,
    pub full_travel_secs: Option<f64>,
    pub group_no: Option<i32>,
}

// =====================
// Line assignment
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineRole {
    /// Motor winding that opens (increases aperture).
    Forward,
    /// Motor winding that closes.
    Reverse,
    Relay,
    Valve,
}

impl LineRole {
    pub fn as_str(self) -> &'static str {
        match self {
            LineRole::Forward => "forward",
            LineRole::Reverse => "reverse",
            LineRole::Relay => "relay",
            LineRole::Valve => "valve",
        }
    }
}

impl FromStr for LineRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "forward" => Ok(LineRole::Forward),
            "reverse" => Ok(LineRole::Reverse),
            "relay" => Ok(LineRole::Relay),
            "valve" => Ok(LineRole::Valve),
            other => Err(format!("unknown line role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineAssignment {
    pub role: LineRole,
    pub line: LineNumber,
}

/// Clamp a persisted aperture into the 0..=100 range.
pub fn clamp_aperture(raw: i32) -> u8 {
    raw.clamp(0, 100) as u8
}
