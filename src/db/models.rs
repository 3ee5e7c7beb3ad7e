//! Diesel row structs and their conversions into domain values.
//!
//! Rows mirror `migrations/` one to one; anything a row can hold that the
//! domain cannot (unknown roles, bad time keys) surfaces as
//! `StoreError::Corrupt` at conversion time.

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::errors::StoreError;
use crate::models::actuator::{
    ActuatorBinding, ActuatorId, ActuatorRuntimeState, ActuatorSummary, LineAssignment, LineNumber, LineRole,
    OperatingMode, clamp_aperture,
};
use crate::models::calibration::{CurveRecord, IrrigationScheduleEntry, MAX_STAGES, ScheduleSlot};
use crate::models::environment::EnvironmentSample;
use crate::schema;

// =====================
// actuator_states
// =====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::actuator_states)]
pub struct ActuatorStateRow {
    pub actuator_id: String,
    pub actuator_name: Option<String>,
    pub mode: i32,
    pub aperture: i32,
    pub behavior: Option<String>,
    pub full_travel_secs: Option<f64>,
    pub group_no: Option<i32>,
    pub memo: Option<String>,
    pub created: DateTime<Utc>,
    pub version: i64,
}

impl ActuatorStateRow {
    pub fn runtime_state(&self) -> ActuatorRuntimeState {
        ActuatorRuntimeState {
            actuator_id: ActuatorId(self.actuator_id.clone()),
            mode: OperatingMode::from_code(self.mode),
            aperture: clamp_aperture(self.aperture),
            full_travel_secs: self.full_travel_secs,
            version: self.version,
        }
    }

    /// `None` when no behavior is bound.
    pub fn binding(&self) -> Option<ActuatorBinding> {
        let behavior = self.behavior.as_deref().map(str::trim).filter(|b| !b.is_empty())?;
        Some(ActuatorBinding {
            actuator_id: ActuatorId(self.actuator_id.clone()),
            behavior: behavior.to_string(),
            aperture: clamp_aperture(self.aperture),
            full_travel_secs: self.full_travel_secs,
        })
    }

    pub fn summary(&self) -> ActuatorSummary {
        ActuatorSummary {
            actuator_id: ActuatorId(self.actuator_id.clone()),
            mode: OperatingMode::from_code(self.mode),
            aperture: clamp_aperture(self.aperture),
            name: self.actuator_name.clone(),
            full_travel_secs: self.full_travel_secs,
            group_no: self.group_no,
        }
    }
}

// =====================
// actuator_lines
// =====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::actuator_lines)]
pub struct LineRow {
    pub actuator_id: String,
    pub role: String,
    pub line_no: i32,
}

impl TryFrom<LineRow> for LineAssignment {
    type Error = StoreError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let role: LineRole = row.role.parse().map_err(|detail| StoreError::Corrupt {
            table: "actuator_lines",
            detail,
        })?;
        let line = u32::try_from(row.line_no).map_err(|_| StoreError::Corrupt {
            table: "actuator_lines",
            detail: format!("negative line number {} for {}", row.line_no, row.actuator_id),
        })?;
        Ok(LineAssignment {
            role,
            line: LineNumber(line),
        })
    }
}

// =====================
// control_curves
// =====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::control_curves)]
pub struct CurveRow {
    pub actuator_id: String,
    pub pattern_id: i32,
    pub priority: Option<i32>,
    pub first_stage: Option<f64>,
    pub first_value: Option<f64>,
    pub second_stage: Option<f64>,
    pub second_value: Option<f64>,
    pub third_stage: Option<f64>,
    pub third_value: Option<f64>,
    pub fourth_stage: Option<f64>,
    pub fourth_value: Option<f64>,
    pub fifth_stage: Option<f64>,
    pub fifth_value: Option<f64>,
    pub daytime_start: Option<String>,
    pub daytime_end: Option<String>,
    pub daytime_value: Option<f64>,
    pub night_start: Option<String>,
    pub night_end: Option<String>,
    pub night_value: Option<f64>,
    pub modified: DateTime<Utc>,
}

impl From<CurveRow> for CurveRecord {
    fn from(row: CurveRow) -> Self {
        CurveRecord {
            pattern_id: row.pattern_id,
            stages: [
                (row.first_stage, row.first_value),
                (row.second_stage, row.second_value),
                (row.third_stage, row.third_value),
                (row.fourth_stage, row.fourth_value),
                (row.fifth_stage, row.fifth_value),
            ],
            day: (row.daytime_start, row.daytime_end, row.daytime_value),
            night: (row.night_start, row.night_end, row.night_value),
        }
    }
}

/// Stage columns of one calibration row, for upserts.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = schema::control_curves, treat_none_as_null = true)]
pub struct CurveStages {
    pub actuator_id: String,
    pub pattern_id: i32,
    pub first_stage: Option<f64>,
    pub first_value: Option<f64>,
    pub second_stage: Option<f64>,
    pub second_value: Option<f64>,
    pub third_stage: Option<f64>,
    pub third_value: Option<f64>,
    pub fourth_stage: Option<f64>,
    pub fourth_value: Option<f64>,
    pub fifth_stage: Option<f64>,
    pub fifth_value: Option<f64>,
    pub modified: DateTime<Utc>,
}

impl CurveStages {
    pub fn new(actuator_id: &ActuatorId, pattern_id: i32, stages: [(Option<f64>, Option<f64>); MAX_STAGES]) -> Self {
        let [first, second, third, fourth, fifth] = stages;
        CurveStages {
            actuator_id: actuator_id.0.clone(),
            pattern_id,
            first_stage: first.0,
            first_value: first.1,
            second_stage: second.0,
            second_value: second.1,
            third_stage: third.0,
            third_value: third.1,
            fourth_stage: fourth.0,
            fourth_value: fourth.1,
            fifth_stage: fifth.0,
            fifth_value: fifth.1,
            modified: Utc::now(),
        }
    }
}

// =====================
// environment_values
// =====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::environment_values)]
pub struct EnvironmentRow {
    pub id: i64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub moisture: Option<f64>,
    pub lux: Option<f64>,
    pub updated: Option<NaiveDateTime>,
}

impl From<EnvironmentRow> for EnvironmentSample {
    fn from(row: EnvironmentRow) -> Self {
        EnvironmentSample {
            temperature: row.temperature,
            humidity: row.humidity,
            moisture: row.moisture,
            light: row.lux,
            updated: row.updated,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::environment_values)]
pub struct NewEnvironmentRow {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub moisture: Option<f64>,
    pub lux: Option<f64>,
    pub updated: Option<NaiveDateTime>,
}

impl From<&EnvironmentSample> for NewEnvironmentRow {
    fn from(sample: &EnvironmentSample) -> Self {
        NewEnvironmentRow {
            temperature: sample.temperature,
            humidity: sample.humidity,
            moisture: sample.moisture,
            lux: sample.light,
            updated: sample.updated,
        }
    }
}

// =====================
// irrigation_schedule
// =====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::irrigation_schedule)]
pub struct ScheduleRow {
    pub actuator_id: String,
    pub start_time: String,
    pub permission: bool,
    pub line_no: Option<i32>,
    pub irrigation_time: f64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl TryFrom<ScheduleRow> for IrrigationScheduleEntry {
    type Error = StoreError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        let slot: ScheduleSlot = row.start_time.parse().map_err(|detail| StoreError::Corrupt {
            table: "irrigation_schedule",
            detail,
        })?;
        Ok(IrrigationScheduleEntry {
            slot,
            permitted: row.permission,
            duration_secs: row.irrigation_time,
            line_no: row.line_no,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::irrigation_schedule)]
pub struct NewScheduleRow {
    pub actuator_id: String,
    pub start_time: String,
    pub permission: bool,
    pub irrigation_time: f64,
}
