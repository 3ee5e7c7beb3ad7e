//! Calibration tables (stage tables and day/night windows) and irrigation
//! timetable entries.
//!
//! Time-of-day values are `chrono::NaiveTime` at minute resolution; the
//! persisted form is `"HH:MM"`.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const MAX_STAGES: usize = 5;

/// Reserved `start_time` key holding the manual pulse duration of a line.
pub const MANUAL_SLOT_KEY: &str = "99:99";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternKind {
    Temperature,
    Light,
    TimeOfDay,
}

impl PatternKind {
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(PatternKind::Temperature),
            1 => Some(PatternKind::Light),
            2 => Some(PatternKind::TimeOfDay),
            _ => None,
        }
    }

    pub fn id(self) -> i32 {
        match self {
            PatternKind::Temperature => 0,
            PatternKind::Light => 1,
            PatternKind::TimeOfDay => 2,
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatternKind::Temperature => "temperature",
            PatternKind::Light => "light",
            PatternKind::TimeOfDay => "time_of_day",
        };
        f.write_str(s)
    }
}

/// Why a persisted calibration row cannot be used.
#[derive(Debug, Clone, PartialEq)]
pub enum CurveError {
    /// Only one half of a (threshold, setpoint) pair is present.
    HalfStage { stage: usize },
    UnknownPattern(i32),
    InvalidTime { field: &'static str, value: String },
    /// Window has a start and end but no setpoint, or vice versa.
    IncompleteWindow(&'static str),
    NonFinite { stage: usize },
}

impl fmt::Display for CurveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveError::HalfStage { stage } => write!(f, "stage {} has only one of threshold/setpoint", stage + 1),
            CurveError::UnknownPattern(id) => write!(f, "unknown pattern id {}", id),
            CurveError::InvalidTime { field, value } => write!(f, "{} is not HH:MM: '{}'", field, value),
            CurveError::IncompleteWindow(which) => write!(f, "{} window is incomplete", which),
            CurveError::NonFinite { stage } => write!(f, "stage {} is not a finite number", stage + 1),
        }
    }
}

impl std::error::Error for CurveError {}

// =====================
// Stage tables
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f64,
    pub setpoint: f64,
}

/// Ordered stages with absent slots stripped. Never empty.
/// Thresholds are expected to be non-decreasing; nothing sorts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTable {
    stages: Vec<Stage>,
}

impl StageTable {
    /// Build from the five persisted slots. `Ok(None)` when every slot is empty.
    pub fn from_slots(slots: [(Option<f64>, Option<f64>); MAX_STAGES]) -> Result<Option<Self>, CurveError> {
        let mut stages = Vec::with_capacity(MAX_STAGES);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                (Some(threshold), Some(setpoint)) => {
                    if !threshold.is_finite() || !setpoint.is_finite() {
                        return Err(CurveError::NonFinite { stage: index });
                    }
                    stages.push(Stage { threshold, setpoint });
                }
                (None, None) => {}
                _ => return Err(CurveError::HalfStage { stage: index }),
            }
        }
        Ok(Self::new(stages))
    }

    pub fn new(stages: Vec<Stage>) -> Option<Self> {
        if stages.is_empty() { None } else { Some(StageTable { stages }) }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

// =====================
// Time windows
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub setpoint: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DayNightWindows {
    pub day: Option<TimeWindow>,
    /// May wrap past midnight.
    pub night: Option<TimeWindow>,
}

impl DayNightWindows {
    pub fn from_parts(
        day: (Option<&str>, Option<&str>, Option<f64>),
        night: (Option<&str>, Option<&str>, Option<f64>),
    ) -> Result<Option<Self>, CurveError> {
        let windows = DayNightWindows {
            day: window_from_parts("daytime", day)?,
            night: window_from_parts("night", night)?,
        };
        if windows.day.is_none() && windows.night.is_none() {
            Ok(None)
        } else {
            Ok(Some(windows))
        }
    }
}

fn window_from_parts(
    which: &'static str,
    (start, end, setpoint): (Option<&str>, Option<&str>, Option<f64>),
) -> Result<Option<TimeWindow>, CurveError> {
    let start = start.map(str::trim).filter(|s| !s.is_empty());
    let end = end.map(str::trim).filter(|s| !s.is_empty());
    match (start, end, setpoint) {
        (None, None, _) => Ok(None),
        (Some(start), Some(end), Some(setpoint)) => Ok(Some(TimeWindow {
            start: parse_clock(which, start)?,
            end: parse_clock(which, end)?,
            setpoint,
        })),
        _ => Err(CurveError::IncompleteWindow(which)),
    }
}

fn parse_clock(field: &'static str, value: &str) -> Result<NaiveTime, CurveError> {
    parse_hhmm(value).ok_or_else(|| CurveError::InvalidTime {
        field,
        value: value.to_string(),
    })
}

/// Parse `"H:MM"` or `"HH:MM"`.
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

pub fn format_hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Drop seconds and sub-seconds so comparisons happen at minute resolution.
pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// Every calibration table configured for one actuator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurveSet {
    pub temperature: Option<StageTable>,
    pub light: Option<StageTable>,
    pub time_of_day: Option<DayNightWindows>,
}

impl CurveSet {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.light.is_none() && self.time_of_day.is_none()
    }
}

/// One persisted calibration row before validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CurveRecord {
    pub pattern_id: i32,
    pub stages: [(Option<f64>, Option<f64>); MAX_STAGES],
    pub day: (Option<String>, Option<String>, Option<f64>),
    pub night: (Option<String>, Option<String>, Option<f64>),
}

impl CurveSet {
    /// Validate persisted rows into a curve set. A row whose tables are all
    /// empty leaves its pattern unconfigured.
    pub fn from_records(records: &[CurveRecord]) -> Result<Self, CurveError> {
        let mut set = CurveSet::default();
        for record in records {
            let kind = PatternKind::from_id(record.pattern_id).ok_or(CurveError::UnknownPattern(record.pattern_id))?;
            match kind {
                PatternKind::Temperature => set.temperature = StageTable::from_slots(record.stages)?,
                PatternKind::Light => set.light = StageTable::from_slots(record.stages)?,
                PatternKind::TimeOfDay => {
                    set.time_of_day = DayNightWindows::from_parts(
                        (record.day.0.as_deref(), record.day.1.as_deref(), record.day.2),
                        (record.night.0.as_deref(), record.night.1.as_deref(), record.night.2),
                    )?
                }
            }
        }
        Ok(set)
    }
}

// =====================
// Irrigation timetable
// =====================

/// Key of an irrigation schedule row: a clock minute or the manual slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScheduleSlot {
    At(NaiveTime),
    Manual,
}

impl ScheduleSlot {
    pub fn at(time: NaiveTime) -> Self {
        ScheduleSlot::At(truncate_to_minute(time))
    }

    pub fn key(&self) -> String {
        match self {
            ScheduleSlot::At(t) => format_hhmm(*t),
            ScheduleSlot::Manual => MANUAL_SLOT_KEY.to_string(),
        }
    }
}

impl fmt::Display for ScheduleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for ScheduleSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == MANUAL_SLOT_KEY {
            return Ok(ScheduleSlot::Manual);
        }
        parse_hhmm(s)
            .map(ScheduleSlot::at)
            .ok_or_else(|| format!("schedule slot is not HH:MM: '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrrigationScheduleEntry {
    pub slot: ScheduleSlot,
    pub permitted: bool,
    pub duration_secs: f64,
    pub line_no: Option<i32>,
}

impl IrrigationScheduleEntry {
    /// Pulse length; non-positive, non-finite or unrepresentable durations
    /// yield `None`.
    pub fn duration(&self) -> Option<Duration> {
        if self.duration_secs > 0.0 {
            Duration::try_from_secs_f64(self.duration_secs).ok()
        } else {
            None
        }
    }
}
