//! Append-only storage for every derived series of a session.
//!
//! The tailer task is the only writer. It appends one row to every series,
//! then publishes the new row count with `Release` ordering and raises the
//! dirty flags. Readers load the count with `Acquire` and copy a prefix of
//! at most that many rows, so they never observe a row that is only
//! partially appended across series.
//!
//! Dirty flags are shared by every reader of a series. Consumers that need
//! exact catch-up keep their own cursor and use [`SeriesStore::rows_from`].

use crate::data::pipeline::DerivedRows;
use crate::error::{AppResult, MimsError};
use crate::layout::{ColumnLayout, TIME_LABEL};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Identifies one derived series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeriesId {
    /// Raw ion currents as read.
    IonCurrent,
    /// Concentration per molecule.
    Concentration,
    /// `v = ((C - Cp) / dt + k * Cp) / norm`.
    ExchangeRate,
    /// Integral of the exchange rate, seeded with the first concentration.
    Cumulative,
    /// Exchange rate corrected by the reference mass leak.
    DenoisedRate,
    /// Integral of the denoised rate.
    DenoisedCumulative,
    /// Oxygen uptake, evolution and net rate.
    OxygenRate,
    /// Integral of uptake and evolution, seeded with zeros.
    OxygenExchange,
    /// Hydrogenase activity.
    Hydrogenase,
}

impl SeriesId {
    /// Every series, in storage order.
    pub const ALL: [SeriesId; 9] = [
        SeriesId::IonCurrent,
        SeriesId::Concentration,
        SeriesId::ExchangeRate,
        SeriesId::Cumulative,
        SeriesId::DenoisedRate,
        SeriesId::DenoisedCumulative,
        SeriesId::OxygenRate,
        SeriesId::OxygenExchange,
        SeriesId::Hydrogenase,
    ];

    /// Kebab-case name, as used in config files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            SeriesId::IonCurrent => "ion-current",
            SeriesId::Concentration => "concentration",
            SeriesId::ExchangeRate => "exchange-rate",
            SeriesId::Cumulative => "cumulative",
            SeriesId::DenoisedRate => "denoised-rate",
            SeriesId::DenoisedCumulative => "denoised-cumulative",
            SeriesId::OxygenRate => "oxygen-rate",
            SeriesId::OxygenExchange => "oxygen-exchange",
            SeriesId::Hydrogenase => "hydrogenase",
        }
    }

    /// Rows this series lags behind the ingested row count (1 for rates).
    pub fn offset(self) -> usize {
        match self {
            SeriesId::ExchangeRate
            | SeriesId::DenoisedRate
            | SeriesId::OxygenRate
            | SeriesId::Hydrogenase => 1,
            _ => 0,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SeriesId {
    type Err = MimsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SeriesId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| MimsError::SeriesUnavailable(s.to_string()))
    }
}

/// Column labels and rows, ready for an export collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTable {
    /// Labels with units, time first.
    pub column_labels: Vec<String>,
    /// Published rows.
    pub rows: Vec<Vec<f64>>,
}

/// Read interface for rendering and export collaborators.
pub trait SeriesSource: Send + Sync {
    /// Published rows of a series.
    fn series(&self, id: SeriesId) -> AppResult<Vec<Vec<f64>>>;

    /// Column labels of a series, time first.
    fn columns(&self, id: SeriesId) -> AppResult<Vec<String>>;

    /// Number of ingested data rows.
    fn row_count(&self) -> usize;

    /// Whether rows were appended since the flag was last cleared; clears it.
    fn on_new_rows(&self, id: SeriesId) -> bool;

    fn export_table(&self, id: SeriesId) -> AppResult<ExportTable> {
        Ok(ExportTable {
            column_labels: self.columns(id)?,
            rows: self.series(id)?,
        })
    }
}

#[derive(Debug, Default)]
struct Slot {
    available: bool,
    rows: RwLock<Vec<Vec<f64>>>,
    dirty: AtomicBool,
}

/// Every series of one session plus the shared row counter.
#[derive(Debug)]
pub struct SeriesStore {
    layout: Arc<ColumnLayout>,
    slots: [Slot; 9],
    row_count: AtomicUsize,
}

impl SeriesStore {
    /// Empty store; series the layout cannot produce are marked unavailable.
    pub fn new(layout: Arc<ColumnLayout>) -> Self {
        let resolved = layout.resolved();
        let slots = SeriesId::ALL.map(|id| Slot {
            available: match id {
                SeriesId::DenoisedRate | SeriesId::DenoisedCumulative => layout.denoising(),
                SeriesId::OxygenRate | SeriesId::OxygenExchange => resolved.oxygen().is_some(),
                SeriesId::Hydrogenase => resolved.hydrogen().is_some(),
                _ => true,
            },
            ..Slot::default()
        });
        Self {
            layout,
            slots,
            row_count: AtomicUsize::new(0),
        }
    }

    /// Layout every row is shaped by.
    pub fn layout(&self) -> &Arc<ColumnLayout> {
        &self.layout
    }

    /// Whether the layout produces `id`.
    pub fn is_available(&self, id: SeriesId) -> bool {
        self.slots[id.slot()].available
    }

    /// Series produced for this layout.
    pub fn available(&self) -> impl Iterator<Item = SeriesId> + '_ {
        SeriesId::ALL.into_iter().filter(|id| self.is_available(*id))
    }

    fn slot(&self, id: SeriesId) -> AppResult<&Slot> {
        let slot = &self.slots[id.slot()];
        if !slot.available {
            return Err(MimsError::SeriesUnavailable(id.to_string()));
        }
        Ok(slot)
    }

    /// Append all rows derived from one sample and publish them.
    pub fn append(&self, derived: DerivedRows) {
        let DerivedRows {
            ion_current,
            concentration,
            cumulative,
            exchange_rate,
            denoised_rate,
            denoised_cumulative,
            oxygen_rate,
            oxygen_exchange,
            hydrogenase,
        } = derived;

        let entries = [
            (SeriesId::IonCurrent, Some(ion_current)),
            (SeriesId::Concentration, Some(concentration)),
            (SeriesId::Cumulative, Some(cumulative)),
            (SeriesId::ExchangeRate, exchange_rate),
            (SeriesId::DenoisedRate, denoised_rate),
            (SeriesId::DenoisedCumulative, denoised_cumulative),
            (SeriesId::OxygenRate, oxygen_rate),
            (SeriesId::OxygenExchange, oxygen_exchange),
            (SeriesId::Hydrogenase, hydrogenase),
        ];
        for (id, row) in entries {
            let slot = &self.slots[id.slot()];
            if let (true, Some(row)) = (slot.available, row) {
                slot.rows.write().push(row);
            }
        }

        self.row_count.fetch_add(1, Ordering::Release);
        for slot in self.slots.iter().filter(|s| s.available) {
            slot.dirty.store(true, Ordering::Release);
        }
    }

    /// Number of fully published data rows.
    pub fn row_count(&self) -> usize {
        self.row_count.load(Ordering::Acquire)
    }

    /// Published rows of `id` given the current row count.
    pub fn visible_rows(&self, id: SeriesId) -> usize {
        self.row_count().saturating_sub(id.offset())
    }

    /// Copy of the published rows of `id`.
    pub fn snapshot(&self, id: SeriesId) -> AppResult<Vec<Vec<f64>>> {
        self.rows_from(id, 0)
    }

    /// Published rows of `id` from index `start` on; empty when caught up.
    pub fn rows_from(&self, id: SeriesId, start: usize) -> AppResult<Vec<Vec<f64>>> {
        let slot = self.slot(id)?;
        let visible = self.visible_rows(id);
        let rows = slot.rows.read();
        let end = visible.min(rows.len());
        Ok(rows.get(start..end).map(<[_]>::to_vec).unwrap_or_default())
    }

    /// Column labels of `id`.
    pub fn column_labels(&self, id: SeriesId) -> AppResult<Vec<String>> {
        self.slot(id)?;
        Ok(series_labels(&self.layout, id))
    }

    /// Read and clear the dirty flag of `id`.
    pub fn take_dirty(&self, id: SeriesId) -> bool {
        self.slots[id.slot()].dirty.swap(false, Ordering::AcqRel)
    }
}

impl SeriesSource for SeriesStore {
    fn series(&self, id: SeriesId) -> AppResult<Vec<Vec<f64>>> {
        self.snapshot(id)
    }

    fn columns(&self, id: SeriesId) -> AppResult<Vec<String>> {
        self.column_labels(id)
    }

    fn row_count(&self) -> usize {
        SeriesStore::row_count(self)
    }

    fn on_new_rows(&self, id: SeriesId) -> bool {
        self.take_dirty(id)
    }
}

/// `NAME  (µM)`
pub fn concentration_label(name: &str) -> String {
    format!("{name}  (µM)")
}

/// `NAME  (µM / min)`
pub fn rate_label(name: &str) -> String {
    format!("{name}  (µM / min)")
}

const OXYGEN_TERMS: [&str; 3] = ["Uo", "Eo", "Net"];

/// Labels of a series for a given layout, whether or not it is produced.
pub fn series_labels(layout: &ColumnLayout, id: SeriesId) -> Vec<String> {
    let reference = layout.resolved().reference();
    let named = |label: fn(&str) -> String, skip_reference: bool| {
        std::iter::once(TIME_LABEL.to_string())
            .chain(
                layout
                    .columns()
                    .iter()
                    .enumerate()
                    .skip(1)
                    .filter(|(i, _)| !(skip_reference && Some(*i) == reference))
                    .map(|(_, c)| label(&c.name)),
            )
            .collect::<Vec<_>>()
    };

    match id {
        SeriesId::IonCurrent => std::iter::once(TIME_LABEL.to_string())
            .chain(layout.channels().iter().cloned())
            .collect(),
        SeriesId::Concentration | SeriesId::Cumulative => named(concentration_label, false),
        SeriesId::ExchangeRate => named(rate_label, false),
        SeriesId::DenoisedRate => named(rate_label, true),
        SeriesId::DenoisedCumulative => named(concentration_label, true),
        SeriesId::OxygenRate => std::iter::once(TIME_LABEL.to_string())
            .chain(OXYGEN_TERMS.iter().map(|t| format!("{t} (µM / min)")))
            .collect(),
        SeriesId::OxygenExchange => std::iter::once(TIME_LABEL.to_string())
            .chain(OXYGEN_TERMS.iter().map(|t| format!("{t} (µM)")))
            .collect(),
        SeriesId::Hydrogenase => vec![
            TIME_LABEL.to_string(),
            "Hydrogenase Activity  (µM / min)".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::pipeline::DerivationPipeline;
    use crate::factor::FactorTable;
    use crate::layout::LayoutOptions;

    fn layout(channels: &[&str]) -> Arc<ColumnLayout> {
        let table = FactorTable::parse(
            "h\n2;H2;10;2;0;0,1;;7;40\n32;O2;10;2;0;0,1\n40;Ar;10;2;0;0,1\n",
        )
        .unwrap();
        let ids: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        Arc::new(ColumnLayout::resolve(&ids, &table, &LayoutOptions::default()).unwrap())
    }

    fn fill(store: &SeriesStore, rows: usize) {
        let mut pipeline = DerivationPipeline::new(store.layout().clone(), 1.0);
        for t in 0..rows {
            store.append(pipeline.push(vec![t as f64, 1.0, 1.5, 1.0]));
        }
    }

    #[test]
    fn row_counts_follow_series_offsets() {
        let store = SeriesStore::new(layout(&["2", "32", "40"]));
        fill(&store, 4);

        assert_eq!(store.row_count(), 4);
        assert_eq!(store.snapshot(SeriesId::Concentration).unwrap().len(), 4);
        assert_eq!(store.snapshot(SeriesId::ExchangeRate).unwrap().len(), 3);
        assert_eq!(store.snapshot(SeriesId::DenoisedRate).unwrap().len(), 3);
        assert_eq!(store.snapshot(SeriesId::DenoisedCumulative).unwrap().len(), 4);
    }

    #[test]
    fn absent_series_are_unavailable() {
        let store = SeriesStore::new(layout(&["2", "32", "40"]));
        assert!(!store.is_available(SeriesId::OxygenRate));
        assert!(matches!(
            store.snapshot(SeriesId::Hydrogenase),
            Err(MimsError::SeriesUnavailable(_))
        ));
        let available: Vec<_> = store.available().collect();
        assert_eq!(available.len(), 6);
    }

    #[test]
    fn dirty_flag_is_cleared_by_reader() {
        let store = SeriesStore::new(layout(&["2", "32", "40"]));
        assert!(!store.on_new_rows(SeriesId::Concentration));
        fill(&store, 1);
        assert!(store.on_new_rows(SeriesId::Concentration));
        assert!(!store.on_new_rows(SeriesId::Concentration));
        // Each series has its own flag.
        assert!(store.on_new_rows(SeriesId::Cumulative));
    }

    #[test]
    fn rows_from_cursor() {
        let store = SeriesStore::new(layout(&["2", "32", "40"]));
        fill(&store, 5);
        let tail = store.rows_from(SeriesId::Concentration, 3).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0][0], 3.0);
        assert!(store.rows_from(SeriesId::Concentration, 9).unwrap().is_empty());
    }

    #[test]
    fn labels_drop_reference_in_denoised_series() {
        let store = SeriesStore::new(layout(&["2", "32", "40"]));
        assert_eq!(
            store.columns(SeriesId::ExchangeRate).unwrap(),
            ["Time (min)", "H2  (µM / min)", "O2  (µM / min)", "Ar  (µM / min)"]
        );
        assert_eq!(
            store.columns(SeriesId::DenoisedCumulative).unwrap(),
            ["Time (min)", "H2  (µM)", "O2  (µM)"]
        );
        assert_eq!(
            store.columns(SeriesId::IonCurrent).unwrap(),
            ["Time (min)", "2", "32", "40"]
        );
    }

    #[test]
    fn export_table_pairs_labels_and_rows() {
        let store = SeriesStore::new(layout(&["2", "32", "40"]));
        fill(&store, 2);
        let table = store.export_table(SeriesId::Cumulative).unwrap();
        assert_eq!(table.column_labels.len(), table.rows[0].len());
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn series_ids_parse_from_names() {
        for id in SeriesId::ALL {
            assert_eq!(id.name().parse::<SeriesId>().unwrap(), id);
        }
        assert!("nope".parse::<SeriesId>().is_err());
    }
}
