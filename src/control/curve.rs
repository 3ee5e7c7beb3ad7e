//! Control-law evaluation: maps a sensor reading or the time of day onto a
//! setpoint through the actuator's calibration tables.
//!
//! Pattern priority, highest first:
//! 1. time-of-day windows (day checked before night)
//! 2. light stage table
//! 3. temperature stage table
//!
//! A time-of-day table whose windows do not contain "now" falls through to
//! the stage tables. With nothing configured the setpoint is `0`.

use crate::errors::ControlError;
use crate::models::calibration::{CurveSet, StageTable, TimeWindow, truncate_to_minute};
use crate::models::environment::{EnvironmentSample, SensorKind};
use chrono::NaiveTime;

/// Setpoint returned when the reading is below the lowest threshold of a
/// continuous actuator's table (fully open).
pub const CONTINUOUS_BELOW_MIN: f64 = 100.0;

/// Below-minimum default of the scan that feeds the binary decision.
pub const BINARY_BELOW_MIN: f64 = 1.0;

// =====================
// Threshold scan
// =====================

/// Resolve `value` against the stages of `table`.
///
/// - below the lowest threshold: `below_min`
/// - above the highest threshold: the lowest setpoint
/// - exactly on a threshold: that stage's setpoint
/// - strictly between two consecutive thresholds: the upper stage's setpoint
///
/// `current` seeds the "previous setpoint" and is only returned when the
/// stages are out of order. Thresholds are not sorted.
pub fn scan(value: f64, table: &StageTable, current: f64, below_min: f64) -> f64 {
    let stages = table.stages();
    let min_threshold = stages.iter().map(|s| s.threshold).fold(f64::INFINITY, f64::min);
    let max_threshold = stages.iter().map(|s| s.threshold).fold(f64::NEG_INFINITY, f64::max);

    if value < min_threshold {
        return below_min;
    }
    if value > max_threshold {
        return stages.iter().map(|s| s.setpoint).fold(f64::INFINITY, f64::min);
    }

    let mut prev_threshold = value;
    let mut prev_setpoint = current;
    for stage in stages {
        if value < prev_threshold {
            return prev_setpoint;
        } else if value == stage.threshold {
            return stage.setpoint;
        } else if prev_threshold < value && value <= stage.threshold {
            // Checked before the half-open range below so a reading strictly
            // between two thresholds takes the upper stage's setpoint.
            return stage.setpoint;
        } else if prev_threshold <= value && value < stage.threshold {
            // only reachable with value == prev_threshold
            return prev_setpoint;
        } else if value > stage.threshold {
            prev_threshold = stage.threshold;
            prev_setpoint = stage.setpoint;
        } else {
            break;
        }
    }
    0.0
}

/// "Should run" decision for on/off devices: the negation of a scan with a
/// below-minimum default of `1`.
pub fn scan_binary(value: f64, table: &StageTable, current: bool) -> bool {
    let current = if current { 1.0 } else { 0.0 };
    scan(value, table, current, BINARY_BELOW_MIN) == 0.0
}

// =====================
// Time windows
// =====================

/// Inclusive on both ends; a window with `start >= end` never matches.
pub fn day_window_contains(window: &TimeWindow, now: NaiveTime) -> bool {
    window.start < window.end && window.start <= now && now <= window.end
}

/// Inclusive on both ends and wraps past midnight.
pub fn night_window_contains(window: &TimeWindow, now: NaiveTime) -> bool {
    let (last_minute, midnight) = (end_of_day(), NaiveTime::MIN);
    (window.start <= now && now <= last_minute) || (midnight <= now && now <= window.end)
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)
}

// =====================
// Pattern selection
// =====================

enum Selection<'a> {
    Window(f64),
    Stages(SensorKind, &'a StageTable),
    Unconfigured,
}

fn select(curves: &CurveSet, now: NaiveTime) -> Selection<'_> {
    let now = truncate_to_minute(now);
    if let Some(windows) = &curves.time_of_day {
        if let Some(day) = windows.day.as_ref().filter(|w| day_window_contains(w, now)) {
            return Selection::Window(day.setpoint);
        }
        if let Some(night) = windows.night.as_ref().filter(|w| night_window_contains(w, now)) {
            return Selection::Window(night.setpoint);
        }
    }
    if let Some(light) = &curves.light {
        return Selection::Stages(SensorKind::Light, light);
    }
    if let Some(temperature) = &curves.temperature {
        return Selection::Stages(SensorKind::Temperature, temperature);
    }
    Selection::Unconfigured
}

fn reading(sample: &EnvironmentSample, kind: SensorKind) -> Result<f64, ControlError> {
    sample
        .reading(kind)
        .filter(|v| v.is_finite())
        .ok_or(ControlError::MissingReading(kind))
}

/// Setpoint of a continuous actuator currently at `current`.
pub fn evaluate(
    curves: &CurveSet,
    sample: &EnvironmentSample,
    now: NaiveTime,
    current: f64,
) -> Result<f64, ControlError> {
    match select(curves, now) {
        Selection::Window(setpoint) => Ok(setpoint),
        Selection::Stages(kind, table) => Ok(scan(reading(sample, kind)?, table, current, CONTINUOUS_BELOW_MIN)),
        Selection::Unconfigured => Ok(0.0),
    }
}

/// On/off decision of a binary actuator currently `current`.
/// A matching time window means "on" unless its setpoint is zero.
pub fn evaluate_binary(
    curves: &CurveSet,
    sample: &EnvironmentSample,
    now: NaiveTime,
    current: bool,
) -> Result<bool, ControlError> {
    match select(curves, now) {
        Selection::Window(setpoint) => Ok(setpoint != 0.0),
        Selection::Stages(kind, table) => Ok(scan_binary(reading(sample, kind)?, table, current)),
        Selection::Unconfigured => Ok(false),
    }
}

/// Round a setpoint onto the 0..=100 aperture scale.
pub fn target_aperture(setpoint: f64) -> u8 {
    if setpoint.is_nan() {
        return 0;
    }
    setpoint.round().clamp(0.0, 100.0) as u8
}
