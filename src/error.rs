//! Custom error types for the ingest and derivation pipeline.
//!
//! This module defines `MimsError`, the single error type used across the
//! crate. It is built with `thiserror` and grouped into four kinds that the
//! session layer reacts to differently:
//!
//! - **Configuration**: the factor file or header cannot produce a valid
//!   column layout (unknown channel, missing companion row, bad denoising
//!   mass). Fatal to the session, surfaced once, never retried.
//! - **Parse**: a data row carries a malformed timestamp or numeric field.
//!   Ingest stops; rows already published stay readable.
//! - **Computation**: a request cannot be satisfied from the data at hand,
//!   e.g. a smoothing window wider than the series. The request is rejected,
//!   the session keeps running.
//! - **Io**: file system, CSV and task failures.
//!
//! Division by zero inside the numeric pipeline is *not* an error; those
//! values propagate as NaN or infinity.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, MimsError>;

/// Coarse classification of a [`MimsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Factor table or layout problem; aborts the session.
    Configuration,
    /// Malformed data row; aborts the session after the rows already read.
    Parse,
    /// Rejected request (window too large, absent series).
    Computation,
    /// File system or serialization failure.
    Io,
}

/// Every failure the crate reports; see [`MimsError::kind`].
#[derive(Error, Debug)]
pub enum MimsError {
    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Malformed factor file line.
    #[error("Factor file line {line}: {reason}")]
    FactorFormat {
        /// 1-based line in the factor file.
        line: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// Header channel with no factor row.
    #[error("Channel '{0}' has no entry in the factor table")]
    UnknownChannel(String),

    /// Factor row required by a companion or isotope is absent.
    #[error("Factor table has no row for mass {0}")]
    MissingFactor(i32),

    /// No settings row to read the pH and denoising mass from.
    #[error("Factor table has no row for mass 2, which holds the pH and denoising mass")]
    MissingDenoisingMass,

    /// Factor cell that should be numeric is not.
    #[error("Factor field '{field}' of mass {key} is not a number: '{value}'")]
    InvalidFactorField {
        /// Mass of the row.
        key: i32,
        /// Field name.
        field: &'static str,
        /// Cell text as read.
        value: String,
    },

    /// Session option out of range.
    #[error("Invalid session option: {0}")]
    InvalidOption(String),

    /// Malformed data row or header.
    #[error("Data file line {line}: {reason}")]
    Parse {
        /// 1-based line in the data file; the header is line 1.
        line: usize,
        /// What could not be decoded.
        reason: String,
    },

    /// No complete header row yet.
    #[error("Data file has no header row")]
    EmptyDataFile,

    /// Smoothing window wider than the series allows.
    #[error("Step {half_width} too big for sliding average over {len} rows (max: {})", .len / 2)]
    WindowTooLarge {
        /// Requested rows on each side of the centre.
        half_width: usize,
        /// Rows in the series.
        len: usize,
    },

    /// Series the layout does not produce.
    #[error("Series '{0}' is not available for this session")]
    SeriesUnavailable(String),

    /// Column label not in the layout.
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    /// Value outside a curve's bounds.
    #[error("Value {value} is outside the curve range [{lower}, {upper}]")]
    OutOfRange {
        /// Value looked up.
        value: f64,
        /// Lowest value of the curve.
        lower: f64,
        /// Highest value of the curve.
        upper: f64,
    },

    /// Bounds given in the wrong order.
    #[error("Lower bound {lower} is greater than upper bound {upper}")]
    InvalidBounds {
        /// Requested lower bound.
        lower: f64,
        /// Requested upper bound.
        upper: f64,
    },

    /// Operation on a session that was closed.
    #[error("Session is closed")]
    SessionClosed,

    /// Background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV export failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl MimsError {
    /// Classify this error for session-level handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MimsError::Config(_)
            | MimsError::FactorFormat { .. }
            | MimsError::UnknownChannel(_)
            | MimsError::MissingFactor(_)
            | MimsError::MissingDenoisingMass
            | MimsError::InvalidFactorField { .. }
            | MimsError::InvalidOption(_) => ErrorKind::Configuration,
            MimsError::Parse { .. } | MimsError::EmptyDataFile => ErrorKind::Parse,
            MimsError::WindowTooLarge { .. }
            | MimsError::SeriesUnavailable(_)
            | MimsError::UnknownColumn(_)
            | MimsError::OutOfRange { .. }
            | MimsError::InvalidBounds { .. } => ErrorKind::Computation,
            MimsError::SessionClosed
            | MimsError::TaskJoin(_)
            | MimsError::Io(_)
            | MimsError::Csv(_) => ErrorKind::Io,
        }
    }

    /// Whether this error ends the ingest session it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Parse)
    }
}
