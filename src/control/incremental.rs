//! Continuous-aperture actuators (curtains, side windows) driven one
//! percentage point at a time through an H-bridge motor.
//!
//! Each unit step re-reads the runtime row and aborts as soon as the mode is
//! no longer the one that started the transition. Under AUTO the target is
//! recomputed from the latest sample before every step.

use crate::control::controller::{BusyFlag, ControllerContext, During, IterationError};
use crate::control::curve::{evaluate, target_aperture};
use crate::control::drive::{Direction, HBridge, MotorLines};
use crate::errors::ConfigurationError;
use crate::models::actuator::{ActuatorRuntimeState, OperatingMode};
use crate::ports::Store;
use log::{debug, info};
use std::time::Duration;

pub struct IncrementalController<S> {
    ctx: ControllerContext<S>,
    lines: MotorLines,
    busy: BusyFlag,
    aperture: u8,
}

impl<S: Store> IncrementalController<S> {
    pub fn new(ctx: ControllerContext<S>, lines: MotorLines, aperture: u8) -> Self {
        IncrementalController {
            ctx,
            lines,
            busy: BusyFlag::default(),
            aperture: aperture.min(100),
        }
    }

    pub fn context(&self) -> &ControllerContext<S> {
        &self.ctx
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn aperture(&self) -> u8 {
        self.aperture
    }

    pub async fn iterate(&mut self) -> Result<(), IterationError> {
        let state = self.ctx.runtime_state().await.during("read runtime state")?;
        let target = match state.mode {
            OperatingMode::Auto => self.auto_target().await?,
            OperatingMode::ForcedOpen => 100,
            OperatingMode::ForcedClose => 0,
            // STOPPED halts transitions from inside the step loop; outside a
            // transition the motor is already de-energised.
            OperatingMode::Stopped | OperatingMode::Manual | OperatingMode::Unrecognized(_) => return Ok(()),
        };
        match Direction::toward(self.aperture, target) {
            Some(direction) => self.transition(state, direction).await,
            None => Ok(()),
        }
    }

    async fn auto_target(&self) -> Result<u8, IterationError> {
        let curves = self.ctx.curves().await.during("load calibration")?;
        let sample = self.ctx.latest_sample().await.during("read environment")?;
        let setpoint = evaluate(&curves, &sample, self.ctx.clock.now(), f64::from(self.aperture))
            .during("evaluate control curve")?;
        Ok(target_aperture(setpoint))
    }

    /// Drive toward the mode's target until it is reached, the target stops
    /// lying ahead, or the mode changes.
    async fn transition(&mut self, started: ActuatorRuntimeState, direction: Direction) -> Result<(), IterationError> {
        let Some(_busy) = self.busy.begin() else {
            debug!("Actuator {}: transition already in flight", self.ctx.actuator_id);
            return Ok(());
        };
        let mode = started.mode;
        let step = self.step_period(&started)?;

        let mut bridge = HBridge::acquire(self.ctx.lines.as_ref(), self.lines, &self.ctx.actuator_id.0)
            .during("acquire motor lines")?;
        bridge.engage(direction).during("engage motor")?;
        info!(
            "Actuator {}: {} from {} ({}, step {:?})",
            self.ctx.actuator_id,
            if direction == Direction::Open { "opening" } else { "closing" },
            self.aperture,
            mode,
            step
        );

        let start_aperture = self.aperture;
        loop {
            let state = self.ctx.runtime_state().await.during("read runtime state")?;
            if state.mode != mode {
                info!(
                    "Actuator {}: mode changed to {}, halting at {}",
                    self.ctx.actuator_id, state.mode, self.aperture
                );
                break;
            }
            let target = match mode {
                OperatingMode::Auto => self.auto_target().await?,
                OperatingMode::ForcedOpen => 100,
                _ => 0,
            };
            if !direction.is_ahead(self.aperture, target) {
                break;
            }
            self.aperture = direction.step(self.aperture);
            self.ctx
                .persist_aperture(self.aperture, state.version)
                .await
                .during("persist aperture")?;
            tokio::time::sleep(step).await;
        }

        bridge.stop().during("stop motor")?;
        info!(
            "Actuator {}: moved {} -> {}",
            self.ctx.actuator_id, start_aperture, self.aperture
        );
        Ok(())
    }

    fn step_period(&self, state: &ActuatorRuntimeState) -> Result<Duration, IterationError> {
        state
            .step_period()
            .ok_or_else(|| ConfigurationError::InvalidTravelTime {
                actuator_id: self.ctx.actuator_id.clone(),
                value: state.full_travel_secs,
            })
            .during("size unit step")
    }
}
