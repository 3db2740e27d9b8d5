//! # MIMS DAQ Core Library
//!
//! Live ingest and derivation for membrane-inlet mass spectrometer logs. The
//! instrument appends one row of ion currents per mass channel to a text
//! log; this crate follows that file and derives, row by row, the gas
//! concentrations, exchange rates and their integrals, the denoised family,
//! oxygen isotope exchange and hydrogenase activity. Curve displays read the
//! results through independent polling consumers.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-based [`config::Settings`] (TOML file plus `MIMS_`
//!   environment overrides).
//! - **`error`**: the crate-wide [`error::MimsError`] and its classification.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`factor`**: calibration factor table keyed by mass.
//! - **`layout`**: resolution of header channels into concentration columns.
//! - **`ingest`**: line codec and the file-tailing producer task.
//! - **`data`**: per-row pipeline, series storage, smoothing, projections,
//!   summaries and CSV export.
//! - **`curve`**: per-display consumer tasks.
//! - **`session`**: session lifecycle and wholesale replacement.
//!
//! ## Flow
//!
//! ```text
//! data file ─▶ Tailer ─▶ DerivationPipeline ─▶ SeriesStore ─▶ curve consumers
//!                ▲                                 │
//!        ColumnLayout (header, once)        row counter + dirty flags
//! ```

pub mod config;
pub mod curve;
pub mod data;
pub mod error;
pub mod factor;
pub mod ingest;
pub mod layout;
pub mod logging;
pub mod session;

pub use error::{AppResult, ErrorKind, MimsError};
pub use session::{Session, SessionManager, SessionOptions, SessionReport};
