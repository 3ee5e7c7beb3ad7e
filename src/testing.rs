//! In-memory collaborators for controller and service tests.

use crate::control::controller::{ControllerContext, ControllerSettings};
use crate::errors::{LineError, StoreError};
use crate::models::actuator::{
    ActuatorBinding, ActuatorId, ActuatorRuntimeState, ActuatorSummary, LineAssignment, LineNumber, LineRole,
    OperatingMode,
};
use crate::models::calibration::{
    CurveRecord, IrrigationScheduleEntry, MAX_STAGES, PatternKind, ScheduleSlot, parse_hhmm,
};
use crate::models::environment::EnvironmentSample;
use crate::ports::{CalibrationStore, Clock, EnvironmentStore, LineProvider, OutputLine, ScheduleChange, StateStore};
use chrono::NaiveTime;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

pub fn context(
    store: &Arc<MemoryStore>,
    lines: Arc<dyn LineProvider>,
    clock: Arc<dyn Clock>,
    id: &str,
) -> ControllerContext<MemoryStore> {
    ControllerContext {
        actuator_id: ActuatorId::from(id),
        store: Arc::clone(store),
        lines,
        clock,
        settings: ControllerSettings::default(),
    }
}

// =====================
// Clock
// =====================

pub struct FixedClock(Mutex<NaiveTime>);

impl FixedClock {
    pub fn at(hhmm: &str) -> Self {
        FixedClock(Mutex::new(parse_hhmm(hhmm).unwrap()))
    }

    pub fn set(&self, hhmm: &str) {
        *self.0.lock().unwrap() = parse_hhmm(hhmm).unwrap();
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveTime {
        *self.0.lock().unwrap()
    }
}

// =====================
// Store
// =====================

#[derive(Debug, Clone)]
struct ActuatorRow {
    name: Option<String>,
    mode: i32,
    aperture: u8,
    behavior: String,
    full_travel_secs: Option<f64>,
    group_no: Option<i32>,
    version: i64,
}

#[derive(Default)]
struct Tables {
    actuators: BTreeMap<ActuatorId, ActuatorRow>,
    lines: Vec<(ActuatorId, LineAssignment)>,
    curves: BTreeMap<ActuatorId, Vec<CurveRecord>>,
    schedule: BTreeMap<(ActuatorId, ScheduleSlot), IrrigationScheduleEntry>,
    sample: Option<EnvironmentSample>,
    write_attempts: HashMap<ActuatorId, usize>,
    schedule_reads: HashMap<ActuatorId, usize>,
    read_budget: HashMap<ActuatorId, usize>,
    stale_writes: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        f(&mut self.tables.lock().unwrap())
    }

    pub fn add_actuator(&self, id: &str, behavior: &str, aperture: u8, full_travel_secs: Option<f64>) {
        self.with(|t| {
            t.actuators.insert(
                ActuatorId::from(id),
                ActuatorRow {
                    name: Some(format!("{id} name")),
                    mode: OperatingMode::Manual.code(),
                    aperture,
                    behavior: behavior.to_string(),
                    full_travel_secs,
                    group_no: Some(1),
                    version: 1,
                },
            );
        });
    }

    /// Overwrite the mode without bumping the version.
    pub fn force_mode(&self, id: &str, mode: OperatingMode) {
        self.with(|t| t.actuators.get_mut(&ActuatorId::from(id)).unwrap().mode = mode.code());
    }

    pub fn force_aperture(&self, id: &str, aperture: u8) {
        self.with(|t| t.actuators.get_mut(&ActuatorId::from(id)).unwrap().aperture = aperture);
    }

    pub fn assign_line(&self, id: &str, role: LineRole, line: u32) {
        self.with(|t| {
            t.lines.push((
                ActuatorId::from(id),
                LineAssignment {
                    role,
                    line: LineNumber(line),
                },
            ))
        });
    }

    pub fn add_curve(&self, id: &str, record: CurveRecord) {
        self.with(|t| t.curves.entry(ActuatorId::from(id)).or_default().push(record));
    }

    pub fn add_schedule(&self, id: &str, key: &str, permitted: bool, duration_secs: f64) {
        let slot: ScheduleSlot = key.parse().unwrap();
        self.with(|t| {
            t.schedule.insert(
                (ActuatorId::from(id), slot),
                IrrigationScheduleEntry {
                    slot,
                    permitted,
                    duration_secs,
                    line_no: None,
                },
            )
        });
    }

    pub fn put_sample(&self, sample: EnvironmentSample) {
        self.with(|t| t.sample = Some(sample));
    }

    pub fn version(&self, id: &str) -> i64 {
        self.with(|t| t.actuators[&ActuatorId::from(id)].version)
    }

    pub fn aperture(&self, id: &str) -> u8 {
        self.with(|t| t.actuators[&ActuatorId::from(id)].aperture)
    }

    pub fn mode(&self, id: &str) -> OperatingMode {
        self.with(|t| OperatingMode::from_code(t.actuators[&ActuatorId::from(id)].mode))
    }

    pub fn write_attempts(&self, id: &str) -> usize {
        self.with(|t| t.write_attempts.get(&ActuatorId::from(id)).copied().unwrap_or(0))
    }

    pub fn schedule_reads(&self, id: &str) -> usize {
        self.with(|t| t.schedule_reads.get(&ActuatorId::from(id)).copied().unwrap_or(0))
    }

    pub fn sample(&self) -> Option<EnvironmentSample> {
        self.with(|t| t.sample.clone())
    }

    /// Let `reads` more runtime-state reads succeed, then fail every one.
    pub fn fail_reads_after(&self, id: &str, reads: usize) {
        self.with(|t| t.read_budget.insert(ActuatorId::from(id), reads));
    }

    pub fn fail_writes_as_stale(&self, stale: bool) {
        self.with(|t| t.stale_writes = stale);
    }
}

impl StateStore for MemoryStore {
    async fn runtime_state(&self, id: &ActuatorId) -> Result<ActuatorRuntimeState, StoreError> {
        self.with(|t| {
            if let Some(budget) = t.read_budget.get_mut(id) {
                if *budget == 0 {
                    return Err(StoreError::Connection("injected read failure".to_string()));
                }
                *budget -= 1;
            }
            let row = t.actuators.get(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            Ok(ActuatorRuntimeState {
                actuator_id: id.clone(),
                mode: OperatingMode::from_code(row.mode),
                aperture: row.aperture,
                full_travel_secs: row.full_travel_secs,
                version: row.version,
            })
        })
    }

    async fn write_aperture(&self, id: &ActuatorId, aperture: u8, expected_version: i64) -> Result<i64, StoreError> {
        self.with(|t| {
            *t.write_attempts.entry(id.clone()).or_default() += 1;
            let stale_writes = t.stale_writes;
            let row = t.actuators.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if stale_writes || row.version != expected_version {
                return Err(StoreError::StaleVersion {
                    actuator_id: id.clone(),
                    expected: expected_version,
                });
            }
            row.aperture = aperture;
            row.version += 1;
            Ok(row.version)
        })
    }

    async fn set_mode(&self, id: &ActuatorId, mode: OperatingMode) -> Result<(), StoreError> {
        self.with(|t| {
            let row = t.actuators.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            row.mode = mode.code();
            row.version += 1;
            Ok(())
        })
    }

    async fn bindings(&self) -> Result<Vec<ActuatorBinding>, StoreError> {
        Ok(self.with(|t| {
            t.actuators
                .iter()
                .filter(|(_, row)| !row.behavior.trim().is_empty())
                .map(|(id, row)| ActuatorBinding {
                    actuator_id: id.clone(),
                    behavior: row.behavior.clone(),
                    aperture: row.aperture,
                    full_travel_secs: row.full_travel_secs,
                })
                .collect()
        }))
    }

    async fn summaries(&self) -> Result<Vec<ActuatorSummary>, StoreError> {
        Ok(self.with(|t| {
            t.actuators
                .iter()
                .map(|(id, row)| ActuatorSummary {
                    actuator_id: id.clone(),
                    mode: OperatingMode::from_code(row.mode),
                    aperture: row.aperture,
                    name: row.name.clone(),
                    full_travel_secs: row.full_travel_secs,
                    group_no: row.group_no,
                })
                .collect()
        }))
    }

    async fn line_assignments(&self, id: &ActuatorId) -> Result<Vec<LineAssignment>, StoreError> {
        Ok(self.with(|t| {
            t.lines
                .iter()
                .filter(|(owner, _)| owner == id)
                .map(|(_, assignment)| assignment.clone())
                .collect()
        }))
    }
}

impl CalibrationStore for MemoryStore {
    async fn curve_records(&self, id: &ActuatorId) -> Result<Vec<CurveRecord>, StoreError> {
        Ok(self.with(|t| t.curves.get(id).cloned().unwrap_or_default()))
    }

    async fn update_stages(
        &self,
        id: &ActuatorId,
        pattern: PatternKind,
        stages: [(Option<f64>, Option<f64>); MAX_STAGES],
    ) -> Result<(), StoreError> {
        self.with(|t| {
            let records = t.curves.entry(id.clone()).or_default();
            match records.iter_mut().find(|r| r.pattern_id == pattern.id()) {
                Some(record) => record.stages = stages,
                None => records.push(CurveRecord {
                    pattern_id: pattern.id(),
                    stages,
                    ..CurveRecord::default()
                }),
            }
        });
        Ok(())
    }

    async fn schedule_entry(
        &self,
        id: &ActuatorId,
        slot: ScheduleSlot,
    ) -> Result<Option<IrrigationScheduleEntry>, StoreError> {
        Ok(self.with(|t| {
            *t.schedule_reads.entry(id.clone()).or_default() += 1;
            t.schedule.get(&(id.clone(), slot)).cloned()
        }))
    }

    async fn schedule(&self, id: &ActuatorId) -> Result<Vec<IrrigationScheduleEntry>, StoreError> {
        Ok(self.with(|t| {
            t.schedule
                .iter()
                .filter(|((owner, _), _)| owner == id)
                .map(|(_, entry)| entry.clone())
                .collect()
        }))
    }

    async fn update_schedule(&self, id: &ActuatorId, changes: Vec<ScheduleChange>) -> Result<(), StoreError> {
        self.with(|t| {
            if let Some(missing) = changes.iter().find(|c| !t.schedule.contains_key(&(id.clone(), c.slot))) {
                return Err(StoreError::NotFound(format!("schedule {} {}", id, missing.slot)));
            }
            for change in changes {
                if let Some(entry) = t.schedule.get_mut(&(id.clone(), change.slot)) {
                    entry.permitted = change.permitted;
                    entry.duration_secs = change.duration_secs;
                }
            }
            Ok(())
        })
    }

    async fn set_manual_duration(&self, id: &ActuatorId, secs: f64) -> Result<(), StoreError> {
        self.with(|t| {
            t.schedule
                .entry((id.clone(), ScheduleSlot::Manual))
                .and_modify(|e| e.duration_secs = secs)
                .or_insert(IrrigationScheduleEntry {
                    slot: ScheduleSlot::Manual,
                    permitted: true,
                    duration_secs: secs,
                    line_no: None,
                });
        });
        Ok(())
    }
}

impl EnvironmentStore for MemoryStore {
    async fn latest_sample(&self) -> Result<EnvironmentSample, StoreError> {
        self.with(|t| t.sample.clone())
            .ok_or_else(|| StoreError::NotFound("environment sample".to_string()))
    }

    async fn replace_sample(&self, sample: EnvironmentSample) -> Result<(), StoreError> {
        self.put_sample(sample);
        Ok(())
    }
}

// =====================
// Lines
// =====================

#[derive(Debug, Clone, PartialEq)]
pub struct LineEvent {
    pub line: LineNumber,
    pub active: bool,
    pub at: Instant,
}

#[derive(Default)]
struct LineBook {
    held: HashSet<LineNumber>,
    acquired: HashSet<LineNumber>,
    active: HashSet<LineNumber>,
    events: Vec<LineEvent>,
    /// Remaining successful `set` calls per line.
    failures: HashMap<LineNumber, usize>,
}

/// Records every level change and rejects double acquisition.
#[derive(Default)]
pub struct RecordingLineProvider {
    book: Arc<Mutex<LineBook>>,
}

impl RecordingLineProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LineEvent> {
        self.book.lock().unwrap().events.clone()
    }

    pub fn is_active(&self, line: LineNumber) -> bool {
        self.book.lock().unwrap().active.contains(&line)
    }

    /// Acquired at least once and not held right now.
    pub fn is_released(&self, line: LineNumber) -> bool {
        let book = self.book.lock().unwrap();
        book.acquired.contains(&line) && !book.held.contains(&line)
    }

    /// Let `ok_sets` more `set` calls on `line` succeed, then fail.
    pub fn fail_after(&self, line: LineNumber, ok_sets: usize) {
        self.book.lock().unwrap().failures.insert(line, ok_sets);
    }

    pub fn ever_overlapped(&self, a: LineNumber, b: LineNumber) -> bool {
        let mut active = HashSet::new();
        for event in self.events() {
            if event.active {
                active.insert(event.line);
            } else {
                active.remove(&event.line);
            }
            if active.contains(&a) && active.contains(&b) {
                return true;
            }
        }
        false
    }
}

impl LineProvider for RecordingLineProvider {
    fn acquire(&self, line: LineNumber, _consumer: &str) -> Result<Box<dyn OutputLine>, LineError> {
        let mut book = self.book.lock().unwrap();
        if !book.held.insert(line) {
            return Err(LineError::Busy(line));
        }
        book.acquired.insert(line);
        Ok(Box::new(RecordingLine {
            number: line,
            book: Arc::clone(&self.book),
        }))
    }
}

struct RecordingLine {
    number: LineNumber,
    book: Arc<Mutex<LineBook>>,
}

impl OutputLine for RecordingLine {
    fn number(&self) -> LineNumber {
        self.number
    }

    fn set(&mut self, active: bool) -> Result<(), LineError> {
        let mut book = self.book.lock().unwrap();
        if let Some(remaining) = book.failures.get_mut(&self.number) {
            if *remaining == 0 {
                return Err(LineError::Io {
                    line: self.number,
                    message: "injected failure".to_string(),
                });
            }
            *remaining -= 1;
        }
        if active {
            book.active.insert(self.number);
        } else {
            book.active.remove(&self.number);
        }
        book.events.push(LineEvent {
            line: self.number,
            active,
            at: Instant::now(),
        });
        Ok(())
    }
}

impl Drop for RecordingLine {
    fn drop(&mut self) {
        if let Ok(mut book) = self.book.lock() {
            if book.active.remove(&self.number) {
                book.events.push(LineEvent {
                    line: self.number,
                    active: false,
                    at: Instant::now(),
                });
            }
            book.held.remove(&self.number);
        }
    }
}
