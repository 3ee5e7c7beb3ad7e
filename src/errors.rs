use crate::models::actuator::{ActuatorId, LineNumber};
use crate::models::calibration::CurveError;
use crate::models::environment::SensorKind;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

// =====================
// Store
// =====================

#[derive(Debug)]
pub enum StoreError {
    /// The row the operation targets does not exist.
    NotFound(String),
    /// A versioned write targeted a stale version of the actuator row.
    /// Retriable after re-reading the row.
    StaleVersion { actuator_id: ActuatorId, expected: i64 },
    /// Pool checkout, connectivity or worker failure.
    Connection(String),
    Query(String),
    /// A row exists but cannot be turned into a domain value.
    Corrupt { table: &'static str, detail: String },
}

impl StoreError {
    pub fn is_stale_version(&self) -> bool {
        matches!(self, StoreError::StaleVersion { .. })
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "not found: {}", what),
            StoreError::StaleVersion { actuator_id, expected } => {
                write!(f, "stale version {} for actuator {}", expected, actuator_id)
            }
            StoreError::Connection(e) => write!(f, "store connection error: {}", e),
            StoreError::Query(e) => write!(f, "store query error: {}", e),
            StoreError::Corrupt { table, detail } => write!(f, "corrupt {} row: {}", table, detail),
        }
    }
}

impl Error for StoreError {}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

// =====================
// Output lines
// =====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// The line is already held by another request.
    Busy(LineNumber),
    /// The line does not exist on this provider.
    Unavailable(LineNumber),
    Io { line: LineNumber, message: String },
}

impl Display for LineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LineError::Busy(line) => write!(f, "{} is already requested", line),
            LineError::Unavailable(line) => write!(f, "{} is not available", line),
            LineError::Io { line, message } => write!(f, "{} i/o error: {}", line, message),
        }
    }
}

impl Error for LineError {}

// =====================
// Configuration
// =====================

/// Binding problem found while building one actuator's controller.
/// Fatal to that actuator only.
#[derive(Debug)]
pub enum ConfigurationError {
    UnknownBehavior { actuator_id: ActuatorId, behavior: String },
    MissingLine { actuator_id: ActuatorId, role: &'static str },
    InvalidLine { actuator_id: ActuatorId, detail: String },
    MalformedCurve { actuator_id: ActuatorId, source: CurveError },
    MissingCurve(ActuatorId),
    InvalidTravelTime { actuator_id: ActuatorId, value: Option<f64> },
    Store(StoreError),
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::UnknownBehavior { actuator_id, behavior } => {
                write!(f, "actuator {}: unknown behavior '{}'", actuator_id, behavior)
            }
            ConfigurationError::MissingLine { actuator_id, role } => {
                write!(f, "actuator {}: no '{}' line assigned", actuator_id, role)
            }
            ConfigurationError::InvalidLine { actuator_id, detail } => {
                write!(f, "actuator {}: invalid line assignment: {}", actuator_id, detail)
            }
            ConfigurationError::MalformedCurve { actuator_id, source } => {
                write!(f, "actuator {}: malformed calibration: {}", actuator_id, source)
            }
            ConfigurationError::MissingCurve(actuator_id) => {
                write!(f, "actuator {}: no calibration table configured", actuator_id)
            }
            ConfigurationError::InvalidTravelTime { actuator_id, value } => match value {
                Some(v) => write!(f, "actuator {}: invalid full travel time {}", actuator_id, v),
                None => write!(f, "actuator {}: full travel time is not set", actuator_id),
            },
            ConfigurationError::Store(e) => write!(f, "store error while binding: {}", e),
        }
    }
}

impl Error for ConfigurationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigurationError::MalformedCurve { source, .. } => Some(source),
            ConfigurationError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ConfigurationError {
    fn from(value: StoreError) -> Self {
        ConfigurationError::Store(value)
    }
}

// =====================
// Control loop
// =====================

/// Anything that ends one controller iteration early.
#[derive(Debug)]
pub enum ControlError {
    Store(StoreError),
    Line(LineError),
    Configuration(ConfigurationError),
    MissingReading(SensorKind),
}

impl Display for ControlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Store(e) => write!(f, "{}", e),
            ControlError::Line(e) => write!(f, "line error: {}", e),
            ControlError::Configuration(e) => write!(f, "configuration error: {}", e),
            ControlError::MissingReading(kind) => write!(f, "latest sample has no {} reading", kind),
        }
    }
}

impl Error for ControlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ControlError::Store(e) => Some(e),
            ControlError::Line(e) => Some(e),
            ControlError::Configuration(e) => Some(e),
            ControlError::MissingReading(_) => None,
        }
    }
}

impl From<StoreError> for ControlError {
    fn from(value: StoreError) -> Self {
        ControlError::Store(value)
    }
}

impl From<LineError> for ControlError {
    fn from(value: LineError) -> Self {
        ControlError::Line(value)
    }
}

impl From<ConfigurationError> for ControlError {
    fn from(value: ConfigurationError) -> Self {
        ControlError::Configuration(value)
    }
}
