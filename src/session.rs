//! Ingest sessions.
//!
//! A [`Session`] pairs one factor file with one data file. Opening it loads
//! the factors, reads the header, resolves the column layout and spawns the
//! producer task; every open curve adds one consumer task. All of them are
//! supervised by the session and joined on [`Session::close`].
//!
//! [`SessionManager`] replaces sessions wholesale: a new data file, a new
//! factor file or new options close and join the running session before the
//! next one starts, so two producers never write the same series.

use crate::config::Settings;
use crate::curve::{CurveEngine, CurveId, CurveKind, CurveSubscription, CurveTask, CurveUpdate};
use crate::data::pipeline::DerivationPipeline;
use crate::data::series::SeriesStore;
use crate::error::{AppResult, MimsError};
use crate::factor::FactorTable;
use crate::ingest::tailer::{FollowMode, LineReader, Tailer, TailerState};
use crate::layout::{ColumnLayout, LayoutOptions};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Options fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Divisor applied to every exchange rate.
    pub normalization_factor: f64,
    /// Column layout switches.
    pub layout: LayoutOptions,
    /// Sleep between reads at end of file, also the curve polling period.
    pub poll_interval: Duration,
    /// Bound of each curve's update channel.
    pub curve_capacity: usize,
    /// Follow the file or stop at its end.
    pub mode: FollowMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl SessionOptions {
    /// Options from loaded settings, in follow mode.
    pub fn from_settings(settings: &Settings) -> Self {
        let ingest = &settings.ingest;
        Self {
            normalization_factor: ingest.normalization_factor,
            layout: LayoutOptions {
                hide_water: ingest.hide_water,
                include_inorganic_carbon: ingest.include_inorganic_carbon,
            },
            poll_interval: ingest.poll_interval(),
            curve_capacity: ingest.curve_channel_capacity,
            mode: FollowMode::Follow,
        }
    }

    /// Same options with another follow mode.
    pub fn with_mode(mut self, mode: FollowMode) -> Self {
        self.mode = mode;
        self
    }

    /// Reject a zero or non-finite normalization factor and zero poll or capacity.
    pub fn validate(&self) -> AppResult<()> {
        let norm = self.normalization_factor;
        if !norm.is_finite() || norm == 0.0 {
            return Err(MimsError::InvalidOption(format!(
                "normalization factor must be finite and nonzero, got {norm}"
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(MimsError::InvalidOption(
                "poll interval must be greater than 0".to_string(),
            ));
        }
        if self.curve_capacity == 0 {
            return Err(MimsError::InvalidOption(
                "curve channel capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a closed session.
#[derive(Debug)]
pub struct SessionReport {
    /// Rows ingested before the session ended.
    pub rows: usize,
    /// Error that ended ingest, if any.
    pub error: Option<MimsError>,
}

struct OpenCurve {
    task: CurveTask,
    updates: mpsc::Sender<CurveUpdate>,
}

/// One running ingest session.
pub struct Session {
    factor_path: PathBuf,
    data_path: PathBuf,
    options: SessionOptions,
    store: Arc<SeriesStore>,
    state: watch::Receiver<TailerState>,
    shutdown: watch::Sender<bool>,
    pause: watch::Sender<bool>,
    producer: Option<JoinHandle<AppResult<usize>>>,
    curves: BTreeMap<CurveId, OpenCurve>,
    next_curve: u64,
}

impl Session {
    /// Load factors, resolve the layout from the header and start ingest.
    ///
    /// Configuration problems are returned here, before any row is
    /// published.
    #[instrument(skip_all, fields(factors = %factor_path.as_ref().display(), data = %data_path.as_ref().display()))]
    pub async fn open(
        factor_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
        options: SessionOptions,
    ) -> AppResult<Self> {
        options.validate()?;
        let (state_tx, state) = watch::channel(TailerState::Idle);

        let prepared = Self::prepare(factor_path.as_ref(), data_path.as_ref(), &options).await;
        let (reader, layout) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(error = %e, "Session rejected");
                state_tx.send_replace(TailerState::Error);
                return Err(e);
            }
        };
        state_tx.send_replace(TailerState::HeaderRead);

        let store = Arc::new(SeriesStore::new(layout.clone()));
        let pipeline = DerivationPipeline::new(layout, options.normalization_factor);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (pause, pause_rx) = watch::channel(false);
        let tailer = Tailer::new(
            reader,
            pipeline,
            store.clone(),
            state_tx,
            options.poll_interval,
            options.mode,
        );
        let producer = tokio::spawn(tailer.run(shutdown_rx, pause_rx));

        info!(
            series = ?store.available().map(|s| s.name()).collect::<Vec<_>>(),
            "Session opened"
        );
        Ok(Self {
            factor_path: factor_path.as_ref().to_path_buf(),
            data_path: data_path.as_ref().to_path_buf(),
            options,
            store,
            state,
            shutdown,
            pause,
            producer: Some(producer),
            curves: BTreeMap::new(),
            next_curve: 1,
        })
    }

    async fn prepare(
        factor_path: &Path,
        data_path: &Path,
        options: &SessionOptions,
    ) -> AppResult<(LineReader, Arc<ColumnLayout>)> {
        let factors = FactorTable::load(factor_path).await?;
        let mut reader = LineReader::open(data_path).await?;
        let header = loop {
            match reader.read_header(options.mode).await {
                Err(MimsError::EmptyDataFile) if options.mode == FollowMode::Follow => {
                    tokio::time::sleep(options.poll_interval).await;
                }
                other => break other?,
            }
        };
        let layout = ColumnLayout::resolve(&header.channels, &factors, &options.layout)?;
        Ok((reader, Arc::new(layout)))
    }

    /// Factor file the layout was resolved from.
    pub fn factor_path(&self) -> &Path {
        &self.factor_path
    }

    /// Data file being read.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Options the session was opened with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Shared series storage.
    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    /// Column layout resolved from the header.
    pub fn layout(&self) -> &Arc<ColumnLayout> {
        self.store.layout()
    }

    /// Current producer state.
    pub fn state(&self) -> TailerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change of the producer.
    pub fn watch_state(&self) -> watch::Receiver<TailerState> {
        self.state.clone()
    }

    /// Stop reading the data file; curves keep polling.
    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    /// Continue reading the data file.
    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    /// Wait until the producer stops (end of file in one-shot mode, error,
    /// or close) and return the rows ingested.
    pub async fn wait_for_end(&self) -> AppResult<usize> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| MimsError::SessionClosed)?;
        Ok(self.store.row_count())
    }

    /// Open a curve display and start its consumer task.
    pub fn open_curve(&mut self, kind: CurveKind) -> AppResult<CurveSubscription> {
        let (engine, initial) = CurveEngine::open(self.store.clone(), &kind)?;
        let id = CurveId(self.next_curve);
        self.next_curve += 1;

        let (updates, receiver) = mpsc::channel(self.options.curve_capacity);
        let task = CurveTask::spawn(
            id,
            kind.clone(),
            engine,
            initial,
            updates.clone(),
            self.options.poll_interval,
        );
        info!(%id, ?kind, "Curve opened");
        self.curves.insert(id, OpenCurve { task, updates });
        Ok(CurveSubscription {
            id,
            updates: receiver,
        })
    }

    /// Change the half-width of a smoothed curve.
    ///
    /// The new window is built first; if it does not fit, the request is
    /// rejected and the running consumer is left untouched. Otherwise only
    /// this consumer is stopped, joined and replaced, and its display
    /// receives a reset with the rebuilt rows.
    pub async fn set_smoothing(&mut self, id: CurveId, half_width: usize) -> AppResult<()> {
        let curve = self
            .curves
            .get(&id)
            .ok_or_else(|| MimsError::InvalidOption(format!("{id} is not open")))?;
        let series = match curve.task.kind() {
            CurveKind::Smoothed { series, .. } => *series,
            other => {
                return Err(MimsError::InvalidOption(format!(
                    "{id} is not a smoothed curve ({other:?})"
                )))
            }
        };
        let kind = CurveKind::Smoothed { series, half_width };
        let (engine, initial) = CurveEngine::open(self.store.clone(), &kind)?;

        let Some(OpenCurve { task, updates }) = self.curves.remove(&id) else {
            return Err(MimsError::SessionClosed);
        };
        task.stop().await?;

        let task = CurveTask::spawn(
            id,
            kind,
            engine,
            initial,
            updates.clone(),
            self.options.poll_interval,
        );
        info!(%id, half_width, "Curve smoothing rebuilt");
        self.curves.insert(id, OpenCurve { task, updates });
        Ok(())
    }

    /// Stop and join one curve consumer.
    pub async fn close_curve(&mut self, id: CurveId) -> AppResult<()> {
        let curve = self
            .curves
            .remove(&id)
            .ok_or_else(|| MimsError::InvalidOption(format!("{id} is not open")))?;
        curve.task.stop().await?;
        info!(%id, "Curve closed");
        Ok(())
    }

    /// Ids of the open curves.
    pub fn curves(&self) -> impl Iterator<Item = CurveId> + '_ {
        self.curves.keys().copied()
    }

    /// Signal every task of this session and wait for all of them.
    pub async fn close(mut self) -> SessionReport {
        self.shutdown.send_replace(true);
        self.pause.send_replace(false);

        let curves: Vec<_> = std::mem::take(&mut self.curves)
            .into_values()
            .map(|curve| curve.task.stop())
            .collect();
        let producer = self.producer.take();

        let (produced, consumers) = tokio::join!(
            async {
                match producer {
                    Some(handle) => Some(handle.await),
                    None => None,
                }
            },
            join_all(curves)
        );

        for result in consumers {
            if let Err(e) = result {
                warn!(error = %e, "Curve consumer failed");
            }
        }

        let rows = self.store.row_count();
        let error = match produced {
            Some(Ok(Ok(_))) | None => None,
            Some(Ok(Err(e))) => Some(e),
            Some(Err(e)) => Some(MimsError::TaskJoin(e)),
        };
        info!(rows, failed = error.is_some(), "Session closed");
        SessionReport { rows, error }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Tasks still running when a session is dropped without close
        // exit at their next suspension point.
        self.shutdown.send_replace(true);
        for curve in self.curves.values_mut() {
            curve.task.signal_stop();
        }
    }
}

/// Holds the current session and restarts it when its inputs change.
pub struct SessionManager {
    options: SessionOptions,
    current: Option<Session>,
}

impl SessionManager {
    /// Manager with no session open.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            current: None,
        }
    }

    /// Options used for the next session.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Open session, if any.
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Open session, mutably.
    pub fn current_mut(&mut self) -> Option<&mut Session> {
        self.current.as_mut()
    }

    /// Close the running session, if any, then open a new one.
    pub async fn open(
        &mut self,
        factor_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
    ) -> AppResult<&mut Session> {
        if let Some(report) = self.close().await {
            info!(rows = report.rows, "Previous session replaced");
        }
        let session = Session::open(factor_path, data_path, self.options.clone()).await?;
        Ok(self.current.insert(session))
    }

    /// Change session options; a running session restarts from its first row.
    pub async fn set_options(&mut self, options: SessionOptions) -> AppResult<Option<&mut Session>> {
        options.validate()?;
        self.options = options;
        match self.paths() {
            Some((factors, data)) => Ok(Some(self.open(factors, data).await?)),
            None => Ok(None),
        }
    }

    /// Restart the running session with a new factor file.
    pub async fn reload_factors(&mut self, factor_path: impl AsRef<Path>) -> AppResult<&mut Session> {
        let (_, data) = self.paths().ok_or(MimsError::SessionClosed)?;
        self.open(factor_path, data).await
    }

    /// Close and join the running session.
    pub async fn close(&mut self) -> Option<SessionReport> {
        let session = self.current.take()?;
        Some(session.close().await)
    }

    fn paths(&self) -> Option<(PathBuf, PathBuf)> {
        self.current
            .as_ref()
            .map(|s| (s.factor_path.clone(), s.data_path.clone()))
    }
}
