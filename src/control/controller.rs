//! Shared controller plumbing: construction from a binding, the busy flag,
//! versioned aperture writes and the never-ending control loop.

use crate::control::drive::MotorLines;
use crate::control::incremental::IncrementalController;
use crate::control::irrigation::IrrigationController;
use crate::control::relay::RelayController;
use crate::errors::{ConfigurationError, ControlError, StoreError};
use crate::models::actuator::{
    ActuatorBinding, ActuatorId, ActuatorKind, ActuatorRuntimeState, LineAssignment, LineNumber, LineRole, step_period,
};
use crate::models::calibration::CurveSet;
use crate::models::environment::EnvironmentSample;
use crate::ports::{Clock, LineProvider, Store};
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const DEFAULT_IDLE_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_STALE_WRITE_RETRIES: u32 = 3;

/// Fixed per-controller settings, handed over at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Delay between loop iterations and after a failed iteration.
    pub idle_tick: Duration,
    /// How often a stale-version aperture write is re-read and retried.
    pub stale_write_retries: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            idle_tick: DEFAULT_IDLE_TICK,
            stale_write_retries: DEFAULT_STALE_WRITE_RETRIES,
        }
    }
}

// =====================
// Busy flag
// =====================

/// At most one physical transition in flight per actuator.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Mark a transition as started. `None` while one is already running.
    pub fn begin(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard(Arc::clone(&self.0)))
    }
}

/// Clears the busy flag when the transition ends, on every exit path.
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// =====================
// Iteration errors
// =====================

/// A failed iteration together with the operation that failed.
#[derive(Debug)]
pub struct IterationError {
    pub operation: &'static str,
    pub error: ControlError,
}

impl fmt::Display for IterationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.error)
    }
}

impl std::error::Error for IterationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub trait During<T> {
    fn during(self, operation: &'static str) -> Result<T, IterationError>;
}

impl<T, E: Into<ControlError>> During<T> for Result<T, E> {
    fn during(self, operation: &'static str) -> Result<T, IterationError> {
        self.map_err(|e| IterationError {
            operation,
            error: e.into(),
        })
    }
}

// =====================
// Context
// =====================

/// What every controller variant holds: its identity and collaborators.
pub struct ControllerContext<S> {
    pub actuator_id: ActuatorId,
    pub store: Arc<S>,
    pub lines: Arc<dyn LineProvider>,
    pub clock: Arc<dyn Clock>,
    pub settings: ControllerSettings,
}

impl<S> Clone for ControllerContext<S> {
    fn clone(&self) -> Self {
        ControllerContext {
            actuator_id: self.actuator_id.clone(),
            store: Arc::clone(&self.store),
            lines: Arc::clone(&self.lines),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
        }
    }
}

impl<S: Store> ControllerContext<S> {
    pub async fn runtime_state(&self) -> Result<ActuatorRuntimeState, StoreError> {
        self.store.runtime_state(&self.actuator_id).await
    }

    pub async fn latest_sample(&self) -> Result<EnvironmentSample, StoreError> {
        self.store.latest_sample().await
    }

    /// Calibration tables as currently persisted.
    pub async fn curves(&self) -> Result<CurveSet, ControlError> {
        let records = self.store.curve_records(&self.actuator_id).await?;
        CurveSet::from_records(&records).map_err(|source| {
            ControlError::Configuration(ConfigurationError::MalformedCurve {
                actuator_id: self.actuator_id.clone(),
                source,
            })
        })
    }

    /// Write the aperture at `version`. A stale version is re-read and the
    /// write retried up to the configured number of times, since the
    /// physical movement has already happened. Returns the new version.
    pub async fn persist_aperture(&self, aperture: u8, version: i64) -> Result<i64, StoreError> {
        let mut version = version;
        let mut retries = 0;
        loop {
            match self.store.write_aperture(&self.actuator_id, aperture, version).await {
                Ok(next) => return Ok(next),
                Err(e) if e.is_stale_version() && retries < self.settings.stale_write_retries => {
                    retries += 1;
                    warn!(
                        "Actuator {}: {} (retry {}/{})",
                        self.actuator_id, e, retries, self.settings.stale_write_retries
                    );
                    version = self.runtime_state().await?.version;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// =====================
// Controller variants
// =====================

pub enum ActuatorController<S> {
    Continuous(IncrementalController<S>),
    Relay(RelayController<S>),
    Irrigation(IrrigationController<S>),
}

impl<S: Store> ActuatorController<S> {
    pub fn kind(&self) -> ActuatorKind {
        match self {
            ActuatorController::Continuous(_) => ActuatorKind::ContinuousMotor,
            ActuatorController::Relay(_) => ActuatorKind::BinaryRelay,
            ActuatorController::Irrigation(_) => ActuatorKind::IrrigationValve,
        }
    }

    pub fn context(&self) -> &ControllerContext<S> {
        match self {
            ActuatorController::Continuous(c) => c.context(),
            ActuatorController::Relay(c) => c.context(),
            ActuatorController::Irrigation(c) => c.context(),
        }
    }

    pub fn busy_flag(&self) -> BusyFlag {
        match self {
            ActuatorController::Continuous(c) => c.busy_flag(),
            ActuatorController::Relay(c) => c.busy_flag(),
            ActuatorController::Irrigation(c) => c.busy_flag(),
        }
    }

    /// One pass of the mode state machine.
    pub async fn iterate(&mut self) -> Result<(), IterationError> {
        match self {
            ActuatorController::Continuous(c) => c.iterate().await,
            ActuatorController::Relay(c) => c.iterate().await,
            ActuatorController::Irrigation(c) => c.iterate().await,
        }
    }

    /// Run for the lifetime of the process. Failed iterations are logged and
    /// the loop resumes after one idle tick.
    pub async fn run(mut self) {
        let (id, tick) = (self.context().actuator_id.clone(), self.context().settings.idle_tick);
        info!("Actuator {}: {} controller started", id, self.kind());
        loop {
            if let Err(e) = self.iterate().await {
                error!("Actuator {}: {}", id, e);
            }
            tokio::time::sleep(tick).await;
        }
    }
}

// =====================
// Construction
// =====================

/// Build the controller variant named by the binding's behavior.
pub async fn build_controller<S: Store>(
    binding: &ActuatorBinding,
    ctx: ControllerContext<S>,
) -> Result<ActuatorController<S>, ConfigurationError> {
    let id = &binding.actuator_id;
    let kind: ActuatorKind = binding.behavior.parse().map_err(|_| ConfigurationError::UnknownBehavior {
        actuator_id: id.clone(),
        behavior: binding.behavior.clone(),
    })?;

    let assignments = ctx.store.line_assignments(id).await?;
    let records = ctx.store.curve_records(id).await?;
    let curves = CurveSet::from_records(&records).map_err(|source| ConfigurationError::MalformedCurve {
        actuator_id: id.clone(),
        source,
    })?;

    let controller = match kind {
        ActuatorKind::ContinuousMotor => {
            if step_period(binding.full_travel_secs).is_none() {
                return Err(ConfigurationError::InvalidTravelTime {
                    actuator_id: id.clone(),
                    value: binding.full_travel_secs,
                });
            }
            let lines = MotorLines {
                forward: require_line(id, &assignments, LineRole::Forward)?,
                reverse: require_line(id, &assignments, LineRole::Reverse)?,
            };
            if lines.forward == lines.reverse {
                return Err(ConfigurationError::InvalidLine {
                    actuator_id: id.clone(),
                    detail: format!("forward and reverse share {}", lines.forward),
                });
            }
            ActuatorController::Continuous(IncrementalController::new(ctx, lines, binding.aperture))
        }
        ActuatorKind::BinaryRelay => {
            let line = require_line(id, &assignments, LineRole::Relay)?;
            if curves.is_empty() {
                return Err(ConfigurationError::MissingCurve(id.clone()));
            }
            ActuatorController::Relay(RelayController::new(ctx, line))
        }
        ActuatorKind::IrrigationValve => {
            let line = require_line(id, &assignments, LineRole::Valve)?;
            ActuatorController::Irrigation(IrrigationController::new(ctx, line))
        }
    };
    Ok(controller)
}

fn require_line(
    id: &ActuatorId,
    assignments: &[LineAssignment],
    role: LineRole,
) -> Result<LineNumber, ConfigurationError> {
    let mut matching = assignments.iter().filter(|a| a.role == role);
    let first = matching.next().ok_or(ConfigurationError::MissingLine {
        actuator_id: id.clone(),
        role: role.as_str(),
    })?;
    if matching.next().is_some() {
        return Err(ConfigurationError::InvalidLine {
            actuator_id: id.clone(),
            detail: format!("more than one '{}' line", role.as_str()),
        });
    }
    Ok(first.line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::actuator::OperatingMode;
    use crate::models::calibration::CurveRecord;
    use crate::ports::StateStore;
    use crate::testing::{FixedClock, MemoryStore, RecordingLineProvider, context};

    fn binding(id: &str, behavior: &str, travel: Option<f64>) -> ActuatorBinding {
        ActuatorBinding {
            actuator_id: ActuatorId::from(id),
            behavior: behavior.to_string(),
            aperture: 0,
            full_travel_secs: travel,
        }
    }

    fn ctx(store: &Arc<MemoryStore>, id: &str) -> ControllerContext<MemoryStore> {
        context(store, Arc::new(RecordingLineProvider::new()), Arc::new(FixedClock::at("08:00")), id)
    }

    #[test]
    fn busy_guard_clears_on_drop() {
        let flag = BusyFlag::default();
        let guard = flag.begin().unwrap();
        assert!(flag.is_busy());
        assert!(flag.begin().is_none());
        drop(guard);
        assert!(!flag.is_busy());
    }

    #[tokio::test]
    async fn unknown_behavior_is_a_configuration_error() {
        let store = Arc::new(MemoryStore::new());
        store.add_actuator("curtain-1", "BlackoutCurtain", 0, Some(100.0));
        let err = build_controller(&binding("curtain-1", "BlackoutCurtain", Some(100.0)), ctx(&store, "curtain-1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::UnknownBehavior { .. }));
    }

    #[tokio::test]
    async fn motor_requires_both_windings_and_travel_time() {
        let store = Arc::new(MemoryStore::new());
        store.add_actuator("window-1", "continuous_motor", 0, Some(100.0));
        store.assign_line("window-1", LineRole::Forward, 3);

        let err = build_controller(&binding("window-1", "continuous_motor", Some(100.0)), ctx(&store, "window-1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::MissingLine { role: "reverse", .. }));

        store.assign_line("window-1", LineRole::Reverse, 4);
        let err = build_controller(&binding("window-1", "continuous_motor", Some(-5.0)), ctx(&store, "window-1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::InvalidTravelTime { value: Some(_), .. }));

        // Too large to size a unit step: rejected for this actuator, no panic.
        let err = build_controller(&binding("window-1", "continuous_motor", Some(1e30)), ctx(&store, "window-1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::InvalidTravelTime { value: Some(_), .. }));

        let built = build_controller(&binding("window-1", "continuous_motor", Some(100.0)), ctx(&store, "window-1"))
            .await
            .ok()
            .unwrap();
        assert_eq!(built.kind(), ActuatorKind::ContinuousMotor);
    }

    #[tokio::test]
    async fn relay_requires_a_calibration_table() {
        let store = Arc::new(MemoryStore::new());
        store.add_actuator("fan-1", "binary_relay", 0, None);
        store.assign_line("fan-1", LineRole::Relay, 9);
        let err = build_controller(&binding("fan-1", "binary_relay", None), ctx(&store, "fan-1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::MissingCurve(_)));
    }

    #[tokio::test]
    async fn malformed_calibration_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.add_actuator("valve-1", "irrigation_valve", 0, None);
        store.assign_line("valve-1", LineRole::Valve, 12);
        store.add_curve(
            "valve-1",
            CurveRecord {
                pattern_id: 0,
                stages: [(Some(30.0), None), (None, None), (None, None), (None, None), (None, None)],
                ..CurveRecord::default()
            },
        );
        let err = build_controller(&binding("valve-1", "irrigation_valve", None), ctx(&store, "valve-1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::MalformedCurve { .. }));
    }

    #[tokio::test]
    async fn stale_write_is_retried_against_the_fresh_version() {
        let store = Arc::new(MemoryStore::new());
        store.add_actuator("curtain-1", "continuous_motor", 10, Some(100.0));
        let context = ctx(&store, "curtain-1");
        let stale = store.version("curtain-1");
        store.set_mode(&ActuatorId::from("curtain-1"), OperatingMode::Auto).await.unwrap();

        let next = context.persist_aperture(11, stale).await.unwrap();
        assert_eq!(next, stale + 2);
        assert_eq!(store.aperture("curtain-1"), 11);
    }

    #[tokio::test]
    async fn stale_write_gives_up_after_configured_retries() {
        let store = Arc::new(MemoryStore::new());
        store.add_actuator("curtain-1", "continuous_motor", 10, Some(100.0));
        store.fail_writes_as_stale(true);
        let context = ctx(&store, "curtain-1");
        let err = context.persist_aperture(11, store.version("curtain-1")).await.unwrap_err();
        assert!(err.is_stale_version());
        assert_eq!(store.write_attempts("curtain-1"), 1 + DEFAULT_STALE_WRITE_RETRIES as usize);
    }
}
