//! Capabilities the controllers consume: persisted state, calibration data,
//! the latest environment sample, digital output lines and the wall clock.
//!
//! Store methods return `Send` futures so controllers generic over a store
//! can be spawned onto the multi-threaded runtime.

use crate::errors::{LineError, StoreError};
use crate::models::actuator::{
    ActuatorBinding, ActuatorId, ActuatorRuntimeState, ActuatorSummary, LineAssignment, LineNumber, OperatingMode,
};
use crate::models::calibration::{CurveRecord, IrrigationScheduleEntry, MAX_STAGES, PatternKind, ScheduleSlot};
use crate::models::environment::EnvironmentSample;
use chrono::NaiveTime;
use std::future::Future;

// =====================
// Stores
// =====================

pub trait StateStore: Send + Sync {
    fn runtime_state(
        &self,
        id: &ActuatorId,
    ) -> impl Future<Output = Result<ActuatorRuntimeState, StoreError>> + Send;

    /// Conditional write: succeeds only when the row is still at
    /// `expected_version`, and returns the bumped version.
    /// Fails with `StoreError::StaleVersion` otherwise.
    fn write_aperture(
        &self,
        id: &ActuatorId,
        aperture: u8,
        expected_version: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    fn set_mode(&self, id: &ActuatorId, mode: OperatingMode) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Every actuator with a non-empty behavior binding.
    fn bindings(&self) -> impl Future<Output = Result<Vec<ActuatorBinding>, StoreError>> + Send;

    fn summaries(&self) -> impl Future<Output = Result<Vec<ActuatorSummary>, StoreError>> + Send;

    fn line_assignments(
        &self,
        id: &ActuatorId,
    ) -> impl Future<Output = Result<Vec<LineAssignment>, StoreError>> + Send;
}

/// Replacement values for one irrigation timetable row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleChange {
    pub slot: ScheduleSlot,
    pub permitted: bool,
    pub duration_secs: f64,
}

pub trait CalibrationStore: Send + Sync {
    /// Raw calibration rows; validation happens when they become a `CurveSet`.
    fn curve_records(&self, id: &ActuatorId) -> impl Future<Output = Result<Vec<CurveRecord>, StoreError>> + Send;

    /// Upsert the stage table of one pattern.
    fn update_stages(
        &self,
        id: &ActuatorId,
        pattern: PatternKind,
        stages: [(Option<f64>, Option<f64>); MAX_STAGES],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn schedule_entry(
        &self,
        id: &ActuatorId,
        slot: ScheduleSlot,
    ) -> impl Future<Output = Result<Option<IrrigationScheduleEntry>, StoreError>> + Send;

    /// Every row of the line, the manual slot included, ordered by slot.
    fn schedule(&self, id: &ActuatorId) -> impl Future<Output = Result<Vec<IrrigationScheduleEntry>, StoreError>> + Send;

    /// Apply all changes or none. An unknown slot is `StoreError::NotFound`.
    fn update_schedule(
        &self,
        id: &ActuatorId,
        changes: Vec<ScheduleChange>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Upsert the manual slot of the line.
    fn set_manual_duration(&self, id: &ActuatorId, secs: f64) -> impl Future<Output = Result<(), StoreError>> + Send;
}

pub trait EnvironmentStore: Send + Sync {
    /// The single latest sample. `StoreError::NotFound` before the first ingest.
    fn latest_sample(&self) -> impl Future<Output = Result<EnvironmentSample, StoreError>> + Send;

    /// Replace the single row wholesale.
    fn replace_sample(&self, sample: EnvironmentSample) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Everything a controller needs from persistence.
pub trait Store: StateStore + CalibrationStore + EnvironmentStore + 'static {}

impl<T> Store for T where T: StateStore + CalibrationStore + EnvironmentStore + 'static {}

// =====================
// Output lines
// =====================

/// An exclusively held digital output. Dropping it releases the line and
/// leaves it inactive. Controllers hold lines across awaits, so a line must
/// be shareable between threads.
pub trait OutputLine: Send + Sync {
    fn number(&self) -> LineNumber;
    fn set(&mut self, active: bool) -> Result<(), LineError>;
}

pub trait LineProvider: Send + Sync {
    /// Request `line` for exclusive output on behalf of `consumer`.
    /// A line already held elsewhere is `LineError::Busy`.
    fn acquire(&self, line: LineNumber, consumer: &str) -> Result<Box<dyn OutputLine>, LineError>;
}

// =====================
// Clock
// =====================

pub trait Clock: Send + Sync {
    /// Local wall-clock time of day.
    fn now(&self) -> NaiveTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}
