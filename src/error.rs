use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use crate::data::model::RowId;

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

/// Errors that stop an analysis run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Reference and measurement do not share a channel schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(SchemaMismatch),

    #[error("invalid matrix: {0}")]
    InvalidMatrix(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("waveform matching needs at least one reference spectrum")]
    MissingReference,

    /// A timestamp whose interval would leave the representable date range.
    #[error("timestamp {timestamp} of row {row} cannot be placed in a {minutes}-minute interval")]
    TimestampOutOfRange {
        row: RowId,
        timestamp: NaiveDateTime,
        minutes: i64,
    },
}

/// Where two channel schemas disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaMismatch {
    pub expected_channels: usize,
    pub found_channels: usize,
    /// First channel whose wavenumber differs, if the lengths agree.
    pub first_differing_channel: Option<usize>,
    /// Reference row that failed the check.
    pub reference_row: Option<RowId>,
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expected_channels != self.found_channels {
            write!(
                f,
                "expected {} channels, found {}",
                self.expected_channels, self.found_channels
            )?;
        } else if let Some(c) = self.first_differing_channel {
            write!(f, "wavenumber axes differ at channel {c}")?;
        } else {
            write!(f, "channel schemas differ")?;
        }
        if let Some(row) = self.reference_row {
            write!(f, " (reference row {row})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Non-fatal conditions
// ---------------------------------------------------------------------------

/// Conditions that are reported alongside a result instead of failing it.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// The peak-intensity distribution cannot be split; all rows were labelled weak.
    #[error("degenerate input ({reason}); all {rows} spectra classified weak")]
    DegenerateInput { reason: String, rows: usize },

    /// Rows that could not be placed on the time axis.
    #[error(
        "{} classified rows have no timestamp, {ignored_timestamps} timestamps reference unknown rows",
        .rows.len()
    )]
    UnmatchedTemporalRows {
        rows: Vec<RowId>,
        ignored_timestamps: usize,
    },
}
