//! On/off actuators (circulation fans) behind a single relay line.
//!
//! The relay line is held for as long as the device is on and released when
//! it is switched off. One toggle is one unit step.

use crate::control::controller::{BusyFlag, ControllerContext, During, IterationError};
use crate::control::curve::evaluate_binary;
use crate::models::actuator::{ActuatorRuntimeState, LineNumber, OperatingMode};
use crate::ports::{OutputLine, Store};
use log::{debug, info};
use std::time::Duration;

pub struct RelayController<S> {
    ctx: ControllerContext<S>,
    line: LineNumber,
    busy: BusyFlag,
    output: Option<Box<dyn OutputLine>>,
}

impl<S: Store> RelayController<S> {
    pub fn new(ctx: ControllerContext<S>, line: LineNumber) -> Self {
        RelayController {
            ctx,
            line,
            busy: BusyFlag::default(),
            output: None,
        }
    }

    pub fn context(&self) -> &ControllerContext<S> {
        &self.ctx
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn is_on(&self) -> bool {
        self.output.is_some()
    }

    pub async fn iterate(&mut self) -> Result<(), IterationError> {
        let state = self.ctx.runtime_state().await.during("read runtime state")?;
        let desired = match state.mode {
            OperatingMode::Auto => self.auto_decision().await?,
            OperatingMode::ForcedOpen => true,
            OperatingMode::ForcedClose | OperatingMode::Stopped => false,
            OperatingMode::Manual | OperatingMode::Unrecognized(_) => return Ok(()),
        };

        if desired != self.is_on() {
            self.toggle(desired, &state).await
        } else if state.aperture != u8::from(desired) {
            // Row still carries the state from before a restart.
            self.ctx
                .persist_aperture(u8::from(desired), state.version)
                .await
                .during("persist aperture")?;
            Ok(())
        } else {
            Ok(())
        }
    }

    async fn auto_decision(&self) -> Result<bool, IterationError> {
        let current = self.is_on();
        let curves = self.ctx.curves().await.during("load calibration")?;
        let sample = self.ctx.latest_sample().await.during("read environment")?;
        evaluate_binary(&curves, &sample, self.ctx.clock.now(), current).during("evaluate control curve")
    }

    async fn toggle(&mut self, on: bool, state: &ActuatorRuntimeState) -> Result<(), IterationError> {
        let Some(_busy) = self.busy.begin() else {
            debug!("Actuator {}: toggle already in flight", self.ctx.actuator_id);
            return Ok(());
        };

        if on {
            let mut output = self
                .ctx
                .lines
                .acquire(self.line, &self.ctx.actuator_id.0)
                .during("acquire relay line")?;
            output.set(true).during("switch relay on")?;
            self.output = Some(output);
        } else if let Some(mut output) = self.output.take() {
            // Dropping the line releases it inactive even if this fails.
            output.set(false).during("switch relay off")?;
        }
        info!(
            "Actuator {}: relay {} ({})",
            self.ctx.actuator_id,
            if on { "on" } else { "off" },
            state.mode
        );

        self.ctx
            .persist_aperture(u8::from(on), state.version)
            .await
            .during("persist aperture")?;
        tokio::time::sleep(state.step_period().unwrap_or(Duration::ZERO)).await;
        Ok(())
    }
}
