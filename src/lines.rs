//! In-process output lines. Every level change is logged; real hardware
//! plugs in behind the same `LineProvider` trait.

use crate::errors::LineError;
use crate::models::actuator::LineNumber;
use crate::ports::{LineProvider, OutputLine};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct LineTable {
    /// Held line -> consumer name.
    held: HashMap<LineNumber, String>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedLineProvider {
    /// Highest line number on the simulated chip, `None` for unbounded.
    max_line: Option<u32>,
    table: Arc<Mutex<LineTable>>,
}

impl SimulatedLineProvider {
    pub fn new(max_line: Option<u32>) -> Self {
        SimulatedLineProvider {
            max_line,
            table: Arc::default(),
        }
    }

    pub fn held_lines(&self) -> usize {
        self.table.lock().map(|t| t.held.len()).unwrap_or(0)
    }
}

impl LineProvider for SimulatedLineProvider {
    fn acquire(&self, line: LineNumber, consumer: &str) -> Result<Box<dyn OutputLine>, LineError> {
        if self.max_line.is_some_and(|max| line.0 > max) {
            return Err(LineError::Unavailable(line));
        }
        let mut table = self.table.lock().map_err(|e| LineError::Io {
            line,
            message: e.to_string(),
        })?;
        if let Some(owner) = table.held.get(&line) {
            warn!("Lines: {} requested by {} is held by {}", line, consumer, owner);
            return Err(LineError::Busy(line));
        }
        table.held.insert(line, consumer.to_string());
        debug!("Lines: {} acquired by {}", line, consumer);
        Ok(Box::new(SimulatedLine {
            number: line,
            consumer: consumer.to_string(),
            active: false,
            table: Arc::clone(&self.table),
        }))
    }
}

struct SimulatedLine {
    number: LineNumber,
    consumer: String,
    active: bool,
    table: Arc<Mutex<LineTable>>,
}

impl OutputLine for SimulatedLine {
    fn number(&self) -> LineNumber {
        self.number
    }

    fn set(&mut self, active: bool) -> Result<(), LineError> {
        if self.active != active {
            info!(
                "Lines: {} -> {} ({})",
                self.number,
                if active { "active" } else { "inactive" },
                self.consumer
            );
        }
        self.active = active;
        Ok(())
    }
}

impl Drop for SimulatedLine {
    fn drop(&mut self) {
        if self.active {
            info!("Lines: {} -> inactive on release ({})", self.number, self.consumer);
        }
        if let Ok(mut table) = self.table.lock() {
            table.held.remove(&self.number);
        }
        debug!("Lines: {} released by {}", self.number, self.consumer);
    }
}
