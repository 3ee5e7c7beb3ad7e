//! Postgres-backed store.
//!
//! Diesel is synchronous: every call checks a connection out of the r2d2
//! pool on a blocking worker so one slow query never stalls other
//! actuators' tasks. Multi-statement writes run in a transaction.

use crate::db::models::{
    ActuatorStateRow, CurveRow, CurveStages, EnvironmentRow, LineRow, NewEnvironmentRow, NewScheduleRow, ScheduleRow,
};
use crate::errors::StoreError;
use crate::models::actuator::{
    ActuatorBinding, ActuatorId, ActuatorRuntimeState, ActuatorSummary, LineAssignment, OperatingMode,
};
use crate::models::calibration::{
    CurveRecord, IrrigationScheduleEntry, MANUAL_SLOT_KEY, MAX_STAGES, PatternKind, ScheduleSlot,
};
use crate::models::environment::EnvironmentSample;
use crate::ports::{CalibrationStore, EnvironmentStore, ScheduleChange, StateStore};
use crate::schema;
use chrono::Utc;
use diesel::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn connect(database_url: &str, pool_size: u32) -> Result<Self, String> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| format!("DB connection failed: {}", e))?;
        Ok(PgStore { pool })
    }

    /// A pooled connection for synchronous startup work (migrations).
    pub fn connection(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, String> {
        self.pool.get().map_err(|e| format!("DB connection checkout failed: {}", e))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Connection(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Connection(format!("store worker failed: {}", e)))?
    }
}

fn actuator_exists(conn: &mut PgConnection, id: &str) -> Result<bool, StoreError> {
    use schema::actuator_states::dsl as A;

    diesel::select(diesel::dsl::exists(A::actuator_states.filter(A::actuator_id.eq(id))))
        .get_result(conn)
        .map_err(StoreError::from)
}

fn not_found(id: &ActuatorId) -> StoreError {
    StoreError::NotFound(format!("actuator {}", id))
}

impl StateStore for PgStore {
    async fn runtime_state(&self, id: &ActuatorId) -> Result<ActuatorRuntimeState, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::actuator_states::dsl as A;

            A::actuator_states
                .find(id.0.as_str())
                .select(ActuatorStateRow::as_select())
                .first(conn)
                .optional()?
                .map(|row| row.runtime_state())
                .ok_or_else(|| not_found(&id))
        })
        .await
    }

    async fn write_aperture(&self, id: &ActuatorId, aperture: u8, expected_version: i64) -> Result<i64, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::actuator_states::dsl as A;

            conn.transaction::<_, StoreError, _>(|conn| {
                let bumped = diesel::update(
                    A::actuator_states
                        .filter(A::actuator_id.eq(id.0.as_str()))
                        .filter(A::version.eq(expected_version)),
                )
                .set((A::aperture.eq(i32::from(aperture)), A::version.eq(A::version + 1)))
                .returning(A::version)
                .get_result::<i64>(conn)
                .optional()?;

                match bumped {
                    Some(version) => Ok(version),
                    None if actuator_exists(conn, &id.0)? => Err(StoreError::StaleVersion {
                        actuator_id: id.clone(),
                        expected: expected_version,
                    }),
                    None => Err(not_found(&id)),
                }
            })
        })
        .await
    }

    async fn set_mode(&self, id: &ActuatorId, mode: OperatingMode) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::actuator_states::dsl as A;

            let updated = diesel::update(A::actuator_states.filter(A::actuator_id.eq(id.0.as_str())))
                .set((A::mode.eq(mode.code()), A::version.eq(A::version + 1)))
                .execute(conn)?;
            if updated == 0 { Err(not_found(&id)) } else { Ok(()) }
        })
        .await
    }

    async fn bindings(&self) -> Result<Vec<ActuatorBinding>, StoreError> {
        self.with_conn(|conn| {
            use schema::actuator_states::dsl as A;

            let rows: Vec<ActuatorStateRow> = A::actuator_states
                .filter(A::behavior.is_not_null())
                .order(A::actuator_id.asc())
                .select(ActuatorStateRow::as_select())
                .load(conn)?;
            Ok(rows.iter().filter_map(ActuatorStateRow::binding).collect())
        })
        .await
    }

    async fn summaries(&self) -> Result<Vec<ActuatorSummary>, StoreError> {
        self.with_conn(|conn| {
            use schema::actuator_states::dsl as A;

            let rows: Vec<ActuatorStateRow> = A::actuator_states
                .order((A::group_no.asc(), A::actuator_id.asc()))
                .select(ActuatorStateRow::as_select())
                .load(conn)?;
            Ok(rows.iter().map(ActuatorStateRow::summary).collect())
        })
        .await
    }

    async fn line_assignments(&self, id: &ActuatorId) -> Result<Vec<LineAssignment>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::actuator_lines::dsl as L;

            let rows: Vec<LineRow> = L::actuator_lines
                .filter(L::actuator_id.eq(id.0.as_str()))
                .select(LineRow::as_select())
                .load(conn)?;
            rows.into_iter().map(LineAssignment::try_from).collect()
        })
        .await
    }
}

impl CalibrationStore for PgStore {
    async fn curve_records(&self, id: &ActuatorId) -> Result<Vec<CurveRecord>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::control_curves::dsl as C;

            let rows: Vec<CurveRow> = C::control_curves
                .filter(C::actuator_id.eq(id.0.as_str()))
                .order(C::pattern_id.asc())
                .select(CurveRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(CurveRecord::from).collect())
        })
        .await
    }

    async fn update_stages(
        &self,
        id: &ActuatorId,
        pattern: PatternKind,
        stages: [(Option<f64>, Option<f64>); MAX_STAGES],
    ) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::control_curves::dsl as C;

            conn.transaction::<_, StoreError, _>(|conn| {
                if !actuator_exists(conn, &id.0)? {
                    return Err(not_found(&id));
                }
                let row = CurveStages::new(&id, pattern.id(), stages);
                diesel::insert_into(C::control_curves)
                    .values(&row)
                    .on_conflict((C::actuator_id, C::pattern_id))
                    .do_update()
                    .set(&row)
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    async fn schedule_entry(
        &self,
        id: &ActuatorId,
        slot: ScheduleSlot,
    ) -> Result<Option<IrrigationScheduleEntry>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::irrigation_schedule::dsl as I;

            I::irrigation_schedule
                .filter(I::actuator_id.eq(id.0.as_str()))
                .filter(I::start_time.eq(slot.key()))
                .select(ScheduleRow::as_select())
                .first(conn)
                .optional()?
                .map(IrrigationScheduleEntry::try_from)
                .transpose()
        })
        .await
    }

    async fn schedule(&self, id: &ActuatorId) -> Result<Vec<IrrigationScheduleEntry>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::irrigation_schedule::dsl as I;

            let rows: Vec<ScheduleRow> = I::irrigation_schedule
                .filter(I::actuator_id.eq(id.0.as_str()))
                .order(I::start_time.asc())
                .select(ScheduleRow::as_select())
                .load(conn)?;
            rows.into_iter().map(IrrigationScheduleEntry::try_from).collect()
        })
        .await
    }

    async fn update_schedule(&self, id: &ActuatorId, changes: Vec<ScheduleChange>) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::irrigation_schedule::dsl as I;

            conn.transaction::<_, StoreError, _>(|conn| {
                let now = Utc::now();
                for change in &changes {
                    let key = change.slot.key();
                    let updated = diesel::update(
                        I::irrigation_schedule
                            .filter(I::actuator_id.eq(id.0.as_str()))
                            .filter(I::start_time.eq(key.as_str())),
                    )
                    .set((
                        I::permission.eq(change.permitted),
                        I::irrigation_time.eq(change.duration_secs),
                        I::modified.eq(now),
                    ))
                    .execute(conn)?;
                    if updated == 0 {
                        return Err(StoreError::NotFound(format!("schedule {} of actuator {}", key, id)));
                    }
                }
                Ok(())
            })
        })
        .await
    }

    async fn set_manual_duration(&self, id: &ActuatorId, secs: f64) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            use schema::irrigation_schedule::dsl as I;

            conn.transaction::<_, StoreError, _>(|conn| {
                if !actuator_exists(conn, &id.0)? {
                    return Err(not_found(&id));
                }
                let row = NewScheduleRow {
                    actuator_id: id.0.clone(),
                    start_time: MANUAL_SLOT_KEY.to_string(),
                    permission: true,
                    irrigation_time: secs,
                };
                diesel::insert_into(I::irrigation_schedule)
                    .values(&row)
                    .on_conflict((I::actuator_id, I::start_time))
                    .do_update()
                    .set((I::irrigation_time.eq(secs), I::modified.eq(Utc::now())))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }
}

impl EnvironmentStore for PgStore {
    async fn latest_sample(&self) -> Result<EnvironmentSample, StoreError> {
        self.with_conn(|conn| {
            use schema::environment_values::dsl as E;

            E::environment_values
                .order(E::id.desc())
                .select(EnvironmentRow::as_select())
                .first(conn)
                .optional()?
                .map(EnvironmentSample::from)
                .ok_or_else(|| StoreError::NotFound("environment sample".to_string()))
        })
        .await
    }

    async fn replace_sample(&self, sample: EnvironmentSample) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::environment_values::dsl as E;

            conn.transaction::<_, StoreError, _>(|conn| {
                diesel::delete(E::environment_values).execute(conn)?;
                diesel::insert_into(E::environment_values)
                    .values(&NewEnvironmentRow::from(&sample))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }
}
