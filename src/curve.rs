//! Curve consumers: one polling task per open curve display.
//!
//! Each consumer owns a [`CurveEngine`] with its own read cursor into the
//! [`SeriesStore`]. On every tick it copies the rows published since its
//! last pass, transforms them (smoothing, projection) and sends them to the
//! display over a bounded channel. A slow display only delays its own
//! consumer; the producer never waits on a consumer.

use crate::data::moving_average::MovingAverageWindow;
use crate::data::projection::{Projection, RateSelection};
use crate::data::series::{SeriesId, SeriesStore};
use crate::error::{AppResult, MimsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a curve display shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveKind {
    /// A series as stored.
    Raw(SeriesId),
    /// A series through a centered sliding average.
    Smoothed {
        /// Series averaged.
        series: SeriesId,
        /// Rows on each side of the centre.
        half_width: usize,
    },
    /// A denoised rate (or the oxygen triple) against a concentration column.
    RateVsConcentration {
        /// Molecule whose concentration is on the x axis.
        concentration: String,
        /// Rates plotted against it.
        rate: RateSelection,
    },
}

/// Message sent to a curve display.
#[derive(Debug, Clone, PartialEq)]
pub enum CurveUpdate {
    /// Discard everything shown so far and show these rows.
    Reset {
        /// Column labels, time first.
        columns: Vec<String>,
        /// Every row available so far.
        rows: Vec<Vec<f64>>,
    },
    /// Append these rows.
    Rows(Vec<Vec<f64>>),
}

/// Identifier of an open curve within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurveId(pub u64);

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "curve-{}", self.0)
    }
}

/// Receiving end handed to the display that opened a curve.
#[derive(Debug)]
pub struct CurveSubscription {
    /// Identifier passed back to close or re-smooth the curve.
    pub id: CurveId,
    /// Initial reset followed by appended rows.
    pub updates: mpsc::Receiver<CurveUpdate>,
}

#[derive(Debug)]
enum CurveState {
    Raw {
        series: SeriesId,
        cursor: usize,
    },
    Smoothed {
        series: SeriesId,
        window: MovingAverageWindow,
    },
    Projection {
        projection: Projection,
        cursor: usize,
    },
}

/// Synchronous read side of one curve.
#[derive(Debug)]
pub struct CurveEngine {
    store: Arc<SeriesStore>,
    columns: Vec<String>,
    state: CurveState,
}

impl CurveEngine {
    /// Resolve `kind` against the store and read everything published so far.
    ///
    /// Rejects smoothing windows that do not fit the current series length.
    pub fn open(store: Arc<SeriesStore>, kind: &CurveKind) -> AppResult<(Self, CurveUpdate)> {
        let (state, columns, rows) = match kind {
            CurveKind::Raw(series) => {
                let rows = store.snapshot(*series)?;
                let state = CurveState::Raw {
                    series: *series,
                    cursor: rows.len(),
                };
                (state, store.column_labels(*series)?, rows)
            }
            CurveKind::Smoothed { series, half_width } => {
                let source = store.snapshot(*series)?;
                let mut window = MovingAverageWindow::new(*half_width);
                let rows = window.build(&source)?;
                let state = CurveState::Smoothed {
                    series: *series,
                    window,
                };
                (state, store.column_labels(*series)?, rows)
            }
            CurveKind::RateVsConcentration {
                concentration,
                rate,
            } => {
                let projection = Projection::new(store.layout(), concentration, rate)?;
                let conc = store.snapshot(SeriesId::Concentration)?;
                let rates = store.snapshot(projection.source_series())?;
                let rows = projection.project(&conc, &rates);
                let columns = projection.columns().to_vec();
                let state = CurveState::Projection {
                    cursor: rows.len(),
                    projection,
                };
                (state, columns, rows)
            }
        };

        let update = CurveUpdate::Reset {
            columns: columns.clone(),
            rows,
        };
        Ok((
            Self {
                store,
                columns,
                state,
            },
            update,
        ))
    }

    /// Column labels of the emitted rows, time first.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows made available since the previous call; empty when caught up.
    pub fn poll(&mut self) -> AppResult<Vec<Vec<f64>>> {
        match &mut self.state {
            CurveState::Raw { series, cursor } => {
                if self.store.visible_rows(*series) <= *cursor {
                    return Ok(Vec::new());
                }
                let rows = self.store.rows_from(*series, *cursor)?;
                *cursor += rows.len();
                Ok(rows)
            }
            CurveState::Smoothed { series, window } => {
                if self.store.visible_rows(*series) <= window.consumed() {
                    return Ok(Vec::new());
                }
                let source = self.store.rows_from(*series, window.consumed())?;
                Ok(window.advance(source))
            }
            CurveState::Projection { projection, cursor } => {
                let rate_series = projection.source_series();
                if self.store.visible_rows(rate_series) <= *cursor {
                    return Ok(Vec::new());
                }
                let rates = self.store.rows_from(rate_series, *cursor)?;
                let conc = self.store.rows_from(SeriesId::Concentration, *cursor)?;
                let rows = projection.project(&conc, &rates);
                *cursor += rows.len();
                Ok(rows)
            }
        }
    }
}

/// Time a consumer gets to exit after its stop signal.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running consumer task.
#[derive(Debug)]
pub struct CurveTask {
    kind: CurveKind,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CurveTask {
    /// Spawn a consumer that first sends `initial`, then polls every `interval`.
    pub fn spawn(
        id: CurveId,
        kind: CurveKind,
        mut engine: CurveEngine,
        initial: CurveUpdate,
        updates: mpsc::Sender<CurveUpdate>,
        interval: Duration,
    ) -> Self {
        let (stop, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            tokio::select! {
                sent = updates.send(initial) => {
                    if sent.is_err() {
                        debug!(%id, "Display gone before first update");
                        return;
                    }
                }
                _ = &mut stop_rx => {
                    return;
                }
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let rows = match engine.poll() {
                            Ok(rows) => rows,
                            Err(e) => {
                                warn!(%id, error = %e, "Curve consumer stopped");
                                break;
                            }
                        };
                        if rows.is_empty() {
                            continue;
                        }
                        debug!(%id, rows = rows.len(), "Curve rows");
                        // A display that stops reading must not keep the
                        // consumer from seeing its stop signal.
                        tokio::select! {
                            sent = updates.send(CurveUpdate::Rows(rows)) => {
                                if sent.is_err() {
                                    debug!(%id, "Display closed");
                                    break;
                                }
                            }
                            _ = &mut stop_rx => {
                                break;
                            }
                        }
                    }
                    _ = &mut stop_rx => {
                        break;
                    }
                }
            }
        });

        Self {
            kind,
            stop: Some(stop),
            handle,
        }
    }

    /// What this consumer emits.
    pub fn kind(&self) -> &CurveKind {
        &self.kind
    }

    /// Signal the task to stop without waiting for it.
    pub fn signal_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Stop the task and wait for it to exit.
    ///
    /// A task still running after [`STOP_TIMEOUT`] is aborted.
    pub async fn stop(mut self) -> AppResult<()> {
        self.signal_stop();
        match tokio::time::timeout(STOP_TIMEOUT, &mut self.handle).await {
            Ok(joined) => joined.map_err(MimsError::from),
            Err(_) => {
                warn!(kind = ?self.kind, "Curve consumer did not stop in time, aborting");
                self.handle.abort();
                match self.handle.await {
                    Err(e) if e.is_cancelled() => Ok(()),
                    joined => joined.map_err(MimsError::from),
                }
            }
        }
    }
}
