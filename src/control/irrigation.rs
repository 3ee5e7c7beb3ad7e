//! Irrigation valves: timed pulses driven by a per-line timetable.
//!
//! Under AUTO a timetable entry fires when the current minute equals its
//! start time, it is permitted, and it was not the last entry fired by this
//! line. The last-fired token lives only as long as the process.
//!
//! FORCED_OPEN fires the manual pulse once per episode; the latch clears when
//! any other mode is observed. A pulse ends early when the mode moves away
//! from the one that started it, and the valve is always closed afterwards.

use crate::control::controller::{BusyFlag, ControllerContext, During, IterationError};
use crate::models::actuator::{LineNumber, OperatingMode};
use crate::models::calibration::{IrrigationScheduleEntry, ScheduleSlot};
use crate::ports::Store;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::Instant;

/// Runtime state of one valve line. Never persisted.
#[derive(Debug, Clone)]
pub struct IrrigationLine {
    pub number: LineNumber,
    pub busy: BusyFlag,
    /// Timetable slot fired most recently.
    pub last_fired: Option<ScheduleSlot>,
}

pub struct IrrigationController<S> {
    ctx: ControllerContext<S>,
    line: IrrigationLine,
    manual_latched: bool,
}

impl<S: Store> IrrigationController<S> {
    pub fn new(ctx: ControllerContext<S>, number: LineNumber) -> Self {
        IrrigationController {
            ctx,
            line: IrrigationLine {
                number,
                busy: BusyFlag::default(),
                last_fired: None,
            },
            manual_latched: false,
        }
    }

    pub fn context(&self) -> &ControllerContext<S> {
        &self.ctx
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.line.busy.clone()
    }

    pub fn line(&self) -> &IrrigationLine {
        &self.line
    }

    pub async fn iterate(&mut self) -> Result<(), IterationError> {
        let state = self.ctx.runtime_state().await.during("read runtime state")?;
        if state.mode != OperatingMode::ForcedOpen {
            self.manual_latched = false;
        }
        match state.mode {
            OperatingMode::Auto => self.run_timetable(state.version).await,
            OperatingMode::ForcedOpen if !self.manual_latched => self.run_manual(state.version).await,
            // The valve is only ever open inside a pulse, which closes it
            // itself once FORCED_CLOSE or STOPPED is observed.
            _ => Ok(()),
        }
    }

    async fn run_timetable(&mut self, version: i64) -> Result<(), IterationError> {
        let slot = ScheduleSlot::at(self.ctx.clock.now());
        if self.line.last_fired == Some(slot) {
            return Ok(());
        }
        let Some(entry) = self.entry(slot).await? else {
            return Ok(());
        };
        if !entry.permitted {
            debug!("Actuator {}: {} is not permitted", self.ctx.actuator_id, slot);
            return Ok(());
        }
        let Some(duration) = entry.duration() else {
            warn!(
                "Actuator {}: {} has no usable duration ({})",
                self.ctx.actuator_id, slot, entry.duration_secs
            );
            return Ok(());
        };
        self.line.last_fired = Some(slot);
        info!("Actuator {}: timetable slot {} fires for {:?}", self.ctx.actuator_id, slot, duration);
        self.pulse(OperatingMode::Auto, duration, version).await
    }

    async fn run_manual(&mut self, version: i64) -> Result<(), IterationError> {
        self.manual_latched = true;
        let duration = self
            .entry(ScheduleSlot::Manual)
            .await?
            .and_then(|entry| entry.duration());
        let Some(duration) = duration else {
            warn!("Actuator {}: no manual irrigation duration configured", self.ctx.actuator_id);
            return Ok(());
        };
        info!("Actuator {}: manual pulse for {:?}", self.ctx.actuator_id, duration);
        self.pulse(OperatingMode::ForcedOpen, duration, version).await
    }

    async fn entry(&self, slot: ScheduleSlot) -> Result<Option<IrrigationScheduleEntry>, IterationError> {
        self.ctx
            .store
            .schedule_entry(&self.ctx.actuator_id, slot)
            .await
            .during("read irrigation schedule")
    }

    /// Open the valve for `duration`, polling the mode once per idle tick.
    async fn pulse(&mut self, mode: OperatingMode, duration: Duration, version: i64) -> Result<(), IterationError> {
        let Some(_busy) = self.line.busy.begin() else {
            debug!("Actuator {}: pulse already in flight", self.ctx.actuator_id);
            return Ok(());
        };
        let mut valve = self
            .ctx
            .lines
            .acquire(self.line.number, &self.ctx.actuator_id.0)
            .during("acquire valve line")?;
        valve.set(true).during("open valve")?;
        let opened_at = Instant::now();
        let mut version = self.ctx.persist_aperture(1, version).await.during("persist aperture")?;

        let deadline = opened_at + duration;
        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Ok(());
            }
            tokio::time::sleep(remaining.min(self.ctx.settings.idle_tick)).await;
            if Instant::now() >= deadline {
                break Ok(());
            }
            match self.ctx.runtime_state().await {
                Ok(state) if state.mode != mode => {
                    info!(
                        "Actuator {}: mode changed to {}, closing valve early",
                        self.ctx.actuator_id, state.mode
                    );
                    break Ok(());
                }
                Ok(state) => version = state.version,
                Err(e) => break Err(e),
            }
        };

        let closed = valve.set(false);
        drop(valve);
        info!(
            "Actuator {}: valve closed after {:?}",
            self.ctx.actuator_id,
            opened_at.elapsed()
        );
        if let Err(e) = self.ctx.persist_aperture(0, version).await {
            warn!("Actuator {}: failed to record closed valve: {}", self.ctx.actuator_id, e);
        }
        outcome.during("poll mode during pulse")?;
        closed.during("close valve")
    }
}
