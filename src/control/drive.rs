//! Two-winding motor drive for continuous actuators.
//!
//! Opening energises the forward winding, closing the reverse one. The
//! opposite winding is always de-energised before a winding is energised,
//! so both are never active together.

use crate::errors::LineError;
use crate::models::actuator::LineNumber;
use crate::ports::{LineProvider, OutputLine};
use log::warn;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Open,
    Close,
}

impl Direction {
    /// Direction that moves `from` toward `to`, `None` when already there.
    pub fn toward(from: u8, to: u8) -> Option<Direction> {
        match from.cmp(&to) {
            std::cmp::Ordering::Less => Some(Direction::Open),
            std::cmp::Ordering::Greater => Some(Direction::Close),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Whether `target` still lies ahead of `aperture` in this direction.
    pub fn is_ahead(self, aperture: u8, target: u8) -> bool {
        match self {
            Direction::Open => target > aperture,
            Direction::Close => target < aperture,
        }
    }

    /// Aperture after one unit step.
    pub fn step(self, aperture: u8) -> u8 {
        match self {
            Direction::Open => aperture.saturating_add(1).min(100),
            Direction::Close => aperture.saturating_sub(1),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MotorLines {
    pub forward: LineNumber,
    pub reverse: LineNumber,
}

/// Both windings of one motor, held for the duration of a transition.
/// Dropping the bridge de-energises both windings and releases the lines.
pub struct HBridge {
    forward: Box<dyn OutputLine>,
    reverse: Box<dyn OutputLine>,
    engaged: Option<Direction>,
}

impl HBridge {
    pub fn acquire(provider: &dyn LineProvider, lines: MotorLines, consumer: &str) -> Result<Self, LineError> {
        let forward = provider.acquire(lines.forward, consumer)?;
        let reverse = provider.acquire(lines.reverse, consumer)?;
        Ok(HBridge {
            forward,
            reverse,
            engaged: None,
        })
    }

    pub fn engage(&mut self, direction: Direction) -> Result<(), LineError> {
        if self.engaged == Some(direction) {
            return Ok(());
        }
        match direction {
            Direction::Open => {
                self.reverse.set(false)?;
                self.forward.set(true)?;
            }
            Direction::Close => {
                self.forward.set(false)?;
                self.reverse.set(true)?;
            }
        }
        self.engaged = Some(direction);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), LineError> {
        self.engaged = None;
        let forward = self.forward.set(false);
        let reverse = self.reverse.set(false);
        forward.and(reverse)
    }

    pub fn engaged(&self) -> Option<Direction> {
        self.engaged
    }
}

impl Drop for HBridge {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Motor: failed to de-energise {} / {}: {}", self.forward.number(), self.reverse.number(), e);
        }
    }
}
