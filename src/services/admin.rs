//! Pass-through operations for the operator surface: listing actuators,
//! switching modes and editing calibration and irrigation tables.
//! Input is validated here; nothing in this module drives hardware.

use crate::errors::StoreError;
use crate::models::actuator::{ActuatorId, ActuatorSummary, OperatingMode};
use crate::models::calibration::{IrrigationScheduleEntry, MAX_STAGES, PatternKind, ScheduleSlot, StageTable};
use crate::ports::{CalibrationStore, ScheduleChange, StateStore};
use log::info;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

#[derive(Debug)]
pub enum AdminError {
    Store(StoreError),
    Invalid(String),
}

impl Display for AdminError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::Store(e) => write!(f, "{}", e),
            AdminError::Invalid(msg) => write!(f, "invalid request: {}", msg),
        }
    }
}

impl Error for AdminError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AdminError::Store(e) => Some(e),
            AdminError::Invalid(_) => None,
        }
    }
}

impl From<StoreError> for AdminError {
    fn from(value: StoreError) -> Self {
        AdminError::Store(value)
    }
}

pub struct AdminService<S> {
    store: Arc<S>,
}

impl<S: StateStore + CalibrationStore> AdminService<S> {
    pub fn new(store: Arc<S>) -> Self {
        AdminService { store }
    }

    pub async fn list_actuators(&self) -> Result<Vec<ActuatorSummary>, AdminError> {
        Ok(self.store.summaries().await?)
    }

    pub async fn set_mode(&self, id: &ActuatorId, mode: OperatingMode) -> Result<(), AdminError> {
        if let OperatingMode::Unrecognized(code) = mode {
            return Err(AdminError::Invalid(format!("unknown mode code {}", code)));
        }
        self.store.set_mode(id, mode).await?;
        info!("Admin: actuator {} set to {}", id, mode);
        Ok(())
    }

    /// Replace the five stage slots of a temperature or light table.
    /// A slot is either fully set or fully empty.
    pub async fn update_stages(
        &self,
        id: &ActuatorId,
        pattern: PatternKind,
        stages: [(Option<f64>, Option<f64>); MAX_STAGES],
    ) -> Result<(), AdminError> {
        if pattern == PatternKind::TimeOfDay {
            return Err(AdminError::Invalid("time-of-day tables have no stages".to_string()));
        }
        StageTable::from_slots(stages).map_err(|e| AdminError::Invalid(e.to_string()))?;
        self.store.update_stages(id, pattern, stages).await?;
        info!("Admin: {} stages of actuator {} updated", pattern, id);
        Ok(())
    }

    /// Timetable rows of an irrigation line, without the manual slot.
    pub async fn irrigation_schedule(&self, id: &ActuatorId) -> Result<Vec<IrrigationScheduleEntry>, AdminError> {
        let mut entries = self.store.schedule(id).await?;
        entries.retain(|e| e.slot != ScheduleSlot::Manual);
        Ok(entries)
    }

    /// Apply every change or none of them.
    pub async fn update_irrigation_schedule(
        &self,
        id: &ActuatorId,
        changes: Vec<ScheduleChange>,
    ) -> Result<(), AdminError> {
        for change in &changes {
            if change.slot == ScheduleSlot::Manual {
                return Err(AdminError::Invalid(
                    "the manual slot is set through the manual duration".to_string(),
                ));
            }
            validate_duration(change.duration_secs)?;
        }
        let count = changes.len();
        self.store.update_schedule(id, changes).await?;
        info!("Admin: {} schedule row(s) of actuator {} updated", count, id);
        Ok(())
    }

    pub async fn set_manual_irrigation_duration(&self, id: &ActuatorId, secs: f64) -> Result<(), AdminError> {
        validate_duration(secs)?;
        self.store.set_manual_duration(id, secs).await?;
        info!("Admin: manual irrigation of actuator {} set to {}s", id, secs);
        Ok(())
    }
}

/// Longest pulse an irrigation row may hold: one day.
pub const MAX_PULSE_SECS: f64 = 86_400.0;

fn validate_duration(secs: f64) -> Result<(), AdminError> {
    if (0.0..=MAX_PULSE_SECS).contains(&secs) {
        Ok(())
    } else {
        Err(AdminError::Invalid(format!(
            "duration must be between 0 and {} seconds, got {}",
            MAX_PULSE_SECS, secs
        )))
    }
}

/// Plain-text actuator table for the `status` command.
pub fn format_status_table(rows: &[ActuatorSummary]) -> String {
    let mut out = format!(
        "{:<16} {:<14} {:>8} {:>10} {:>6}  {}\n",
        "ID", "MODE", "APERTURE", "TRAVEL(s)", "GROUP", "NAME"
    );
    for row in rows {
        out.push_str(&format!(
            "{:<16} {:<14} {:>8} {:>10} {:>6}  {}\n",
            row.actuator_id.0,
            row.mode.to_string(),
            row.aperture,
            row.full_travel_secs
                .map(|v| format!("{:.1}", v))
                .unwrap_or_else(|| "-".to_string()),
            row.group_no.map(|g| g.to_string()).unwrap_or_else(|| "-".to_string()),
            row.name.as_deref().unwrap_or("-"),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::calibration::parse_hhmm;
    use crate::testing::MemoryStore;

    fn service() -> (Arc<MemoryStore>, AdminService<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.add_actuator("curtain-1", "continuous_motor", 40, Some(180.0));
        store.add_actuator("line-1", "irrigation_valve", 0, None);
        store.add_schedule("line-1", "06:00", true, 30.0);
        store.add_schedule("line-1", "18:00", false, 60.0);
        store.add_schedule("line-1", "99:99", true, 45.0);
        (store.clone(), AdminService::new(store))
    }

    fn slot(hhmm: &str) -> ScheduleSlot {
        ScheduleSlot::at(parse_hhmm(hhmm).unwrap())
    }

    #[tokio::test]
    async fn set_mode_bumps_the_row_version() {
        let (store, admin) = service();
        let before = store.version("curtain-1");
        admin.set_mode(&ActuatorId::from("curtain-1"), OperatingMode::ForcedOpen).await.unwrap();
        assert_eq!(store.mode("curtain-1"), OperatingMode::ForcedOpen);
        assert_eq!(store.version("curtain-1"), before + 1);

        let err = admin.set_mode(&ActuatorId::from("ghost"), OperatingMode::Auto).await.unwrap_err();
        assert!(matches!(err, AdminError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn half_filled_stage_is_rejected_before_storing() {
        let (_, admin) = service();
        let stages = [(Some(30.0), None), (None, None), (None, None), (None, None), (None, None)];
        let err = admin
            .update_stages(&ActuatorId::from("curtain-1"), PatternKind::Temperature, stages)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Invalid(_)));
    }

    #[tokio::test]
    async fn schedule_listing_hides_the_manual_slot() {
        let (_, admin) = service();
        let entries = admin.irrigation_schedule(&ActuatorId::from("line-1")).await.unwrap();
        let slots: Vec<_> = entries.iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![slot("06:00"), slot("18:00")]);
    }

    #[tokio::test]
    async fn schedule_update_is_all_or_nothing() {
        let (_, admin) = service();
        let id = ActuatorId::from("line-1");
        let changes = vec![
            ScheduleChange { slot: slot("18:00"), permitted: true, duration_secs: 90.0 },
            ScheduleChange { slot: slot("19:00"), permitted: true, duration_secs: 90.0 },
        ];
        let err = admin.update_irrigation_schedule(&id, changes).await.unwrap_err();
        assert!(matches!(err, AdminError::Store(StoreError::NotFound(_))));
        let evening = admin.irrigation_schedule(&id).await.unwrap().into_iter().find(|e| e.slot == slot("18:00")).unwrap();
        assert!(!evening.permitted);

        let changes = vec![ScheduleChange { slot: slot("18:00"), permitted: true, duration_secs: 90.0 }];
        admin.update_irrigation_schedule(&id, changes).await.unwrap();
        let evening = admin.irrigation_schedule(&id).await.unwrap().into_iter().find(|e| e.slot == slot("18:00")).unwrap();
        assert!(evening.permitted);
        assert_eq!(evening.duration_secs, 90.0);
    }

    #[tokio::test]
    async fn manual_duration_is_validated_and_stored() {
        let (store, admin) = service();
        let id = ActuatorId::from("line-1");
        assert!(admin.set_manual_irrigation_duration(&id, f64::NAN).await.is_err());
        let err = admin.set_manual_irrigation_duration(&id, 1e30).await.unwrap_err();
        assert!(matches!(err, AdminError::Invalid(_)));
        let manual = store.schedule_entry(&id, ScheduleSlot::Manual).await.unwrap().unwrap();
        assert_eq!(manual.duration_secs, 45.0);

        let too_long = vec![ScheduleChange { slot: slot("06:00"), permitted: true, duration_secs: MAX_PULSE_SECS + 1.0 }];
        assert!(admin.update_irrigation_schedule(&id, too_long).await.is_err());
        admin.set_manual_irrigation_duration(&id, 120.0).await.unwrap();
        let manual = store.schedule_entry(&id, ScheduleSlot::Manual).await.unwrap().unwrap();
        assert_eq!(manual.duration_secs, 120.0);
    }

    #[test]
    fn status_table_lists_every_actuator() {
        let rows = vec![ActuatorSummary {
            actuator_id: ActuatorId::from("fan-1"),
            mode: OperatingMode::Auto,
            aperture: 1,
            name: None,
            full_travel_secs: None,
            group_no: Some(3),
        }];
        let table = format_status_table(&rows);
        assert!(table.lines().next().unwrap().starts_with("ID"));
        assert!(table.contains("fan-1"));
        assert!(table.contains("AUTO"));
    }
}
