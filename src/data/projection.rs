//! Rate as a function of concentration.
//!
//! Re-indexes a denoised rate column, or the oxygen Uo/Eo/Net triple,
//! against one concentration column, row by row. Row `i` pairs the
//! concentration at row `i` with the rate stamped at row `i` (the interval
//! starting there), so the projection has as many rows as the rate series.

use crate::data::series::{series_labels, SeriesId};
use crate::error::{AppResult, MimsError};
use crate::layout::ColumnLayout;
use serde::{Deserialize, Serialize};

/// Rate side of a projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSelection {
    /// Denoised rate of one molecule.
    Molecule(String),
    /// Oxygen uptake, evolution and net exchange.
    Oxygen,
}

/// Resolved column selection for one rate-vs-concentration curve.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    concentration: usize,
    rate_series: SeriesId,
    rate_columns: Vec<usize>,
    labels: Vec<String>,
}

impl Projection {
    /// Resolve the concentration column and rate columns against `layout`.
    pub fn new(layout: &ColumnLayout, concentration: &str, rate: &RateSelection) -> AppResult<Self> {
        let conc_col = layout
            .index_of(concentration)
            .ok_or_else(|| MimsError::UnknownColumn(concentration.to_string()))?;
        let mut labels = vec![format!("{concentration} (µM)")];

        let (rate_series, rate_columns) = match rate {
            RateSelection::Molecule(name) => {
                if !layout.denoising() {
                    return Err(MimsError::SeriesUnavailable(
                        SeriesId::DenoisedRate.to_string(),
                    ));
                }
                let column = layout
                    .index_of(name)
                    .and_then(|c| layout.resolved().denoised_index(c))
                    .ok_or_else(|| MimsError::UnknownColumn(name.clone()))?;
                (SeriesId::DenoisedRate, vec![column])
            }
            RateSelection::Oxygen => {
                if layout.resolved().oxygen().is_none() {
                    return Err(MimsError::SeriesUnavailable(SeriesId::OxygenRate.to_string()));
                }
                (SeriesId::OxygenRate, vec![1, 2, 3])
            }
        };

        let rate_labels = series_labels(layout, rate_series);
        labels.extend(rate_columns.iter().map(|&c| rate_labels[c].clone()));

        Ok(Self {
            concentration: conc_col,
            rate_series,
            rate_columns,
            labels,
        })
    }

    /// Series the rate side is read from.
    pub fn source_series(&self) -> SeriesId {
        self.rate_series
    }

    /// Output labels: the concentration first, then the selected rates.
    pub fn columns(&self) -> &[String] {
        &self.labels
    }

    /// Pair rows of equal index; extra concentration rows are ignored.
    pub fn project(&self, concentration: &[Vec<f64>], rates: &[Vec<f64>]) -> Vec<Vec<f64>> {
        concentration
            .iter()
            .zip(rates)
            .map(|(c, r)| {
                std::iter::once(c[self.concentration])
                    .chain(self.rate_columns.iter().map(|&i| r[i]))
                    .collect()
            })
            .collect()
    }
}
