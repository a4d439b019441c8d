// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Per-cycle status reports.
//!
//! The daemon prints one report per control cycle, either as a
//! human-readable line or as newline-delimited JSON.

use crate::curve::{Regime, Rejection, Zone};
use serde::Serialize;
use std::fmt;

/// What happened to one zone during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ZoneOutcome {
    /// A duty value was computed and written.
    Applied { duty: u8, regime: Regime },
    /// The raw reading was outside the sensor's plausible range; the fan
    /// keeps its last duty.
    OutOfRange,
    /// The jump from `previous_c` was outside the filter band; the fan
    /// keeps its last duty.
    Filtered { previous_c: u32 },
    /// A duty value was computed but the actuator write failed.
    WriteFailed { duty: u8, error: String },
    /// No sample could be obtained this cycle.
    Unavailable { error: String },
}

/// One zone's line in a cycle report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneReport {
    pub zone: Zone,
    /// Raw reading, if one was obtained.
    pub temp_c: Option<u32>,
    #[serde(flatten)]
    pub outcome: ZoneOutcome,
}

/// Everything observed in one control cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub cpu: ZoneReport,
    pub gpu: ZoneReport,
}

impl From<Rejection> for ZoneOutcome {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::OutOfRange { .. } => ZoneOutcome::OutOfRange,
            Rejection::Delta { previous_c, .. } => ZoneOutcome::Filtered { previous_c },
        }
    }
}

impl ZoneReport {
    pub fn applied(&self) -> Option<u8> {
        match self.outcome {
            ZoneOutcome::Applied { duty, .. } => Some(duty),
            _ => None,
        }
    }
}

impl fmt::Display for ZoneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.temp_c {
            Some(t) => write!(f, "{} {t:>3} C", self.zone)?,
            None => write!(f, "{}   - C", self.zone)?,
        }
        match &self.outcome {
            ZoneOutcome::Applied { duty, regime } => write!(f, " fan {duty:>3} [{regime}]"),
            ZoneOutcome::OutOfRange => write!(f, " skipped (implausible reading)"),
            ZoneOutcome::Filtered { previous_c } => {
                write!(f, " skipped (jump from {previous_c} C outside filter band)")
            }
            ZoneOutcome::WriteFailed { duty, error } => {
                write!(f, " fan {duty:>3} NOT written ({error})")
            }
            ZoneOutcome::Unavailable { error } => write!(f, " unavailable ({error})"),
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:<5} {} | {}", self.cycle, self.cpu, self.gpu)
    }
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Encode a message as a newline-delimited JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string(msg)?;
    s.push('\n');
    Ok(s)
}
