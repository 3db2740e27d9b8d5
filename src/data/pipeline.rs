//! Row-by-row derivation of physical quantities from ion currents.
//!
//! Each stage is a pure function of the new row and the previous output
//! rows; [`DerivationPipeline`] only remembers those previous rows. Nothing
//! is recomputed from older history.
//!
//! | stage                | row time | needs                         |
//! |----------------------|----------|-------------------------------|
//! | concentration        | `t`      | ion currents                  |
//! | exchange rate        | `t - 1`  | two concentration rows        |
//! | cumulative           | `t`      | previous cumulative, rate     |
//! | denoised rate        | `t - 1`  | two concentration rows, ref.  |
//! | oxygen exchange rate | `t - 1`  | denoised rate, previous conc. |
//! | hydrogenase          | `t - 1`  | denoised rate, previous conc. |
//!
//! Division by zero is not trapped: NaN and infinities propagate to the
//! series, as they would on the instrument's own display.

use crate::layout::{ColumnLayout, ColumnSource, HydrogenIndices, OxygenIndices};
use std::sync::Arc;
use tracing::warn;

/// Concentration row for one ion-current sample.
pub fn concentration_row(layout: &ColumnLayout, sample: &[f64]) -> Vec<f64> {
    let mut row = Vec::with_capacity(layout.width());
    for spec in layout.columns() {
        let amplitude = match spec.source {
            ColumnSource::Time => {
                row.push(sample[0]);
                continue;
            }
            ColumnSource::InorganicCarbon { column } => {
                row.push(row[column] * spec.correction);
                continue;
            }
            ColumnSource::Direct { raw } => sample[raw],
            ColumnSource::CompanionShare { companion, ratio } => sample[companion] / ratio,
            ColumnSource::Remainder {
                raw,
                companion,
                ratio,
            } => sample[raw] - sample[companion] / ratio,
            ColumnSource::NitricOxide {
                raw,
                overlap,
                companion,
                carbon_ratio,
                overlap_ratio,
            } => sample[raw] - (sample[overlap] - sample[companion] / carbon_ratio) * overlap_ratio,
        };
        row.push((amplitude - spec.signal_zero) * spec.correction);
    }
    row
}

/// `v = ((C - Cp) / dt + k * Cp) / norm`, stamped with the previous time.
pub fn exchange_rate_row(
    layout: &ColumnLayout,
    previous: &[f64],
    current: &[f64],
    normalization: f64,
) -> Vec<f64> {
    let dt = current[0] - previous[0];
    let mut row = Vec::with_capacity(current.len());
    row.push(previous[0]);
    for (i, spec) in layout.columns().iter().enumerate().skip(1) {
        let slope = (current[i] - previous[i]) / dt;
        row.push((slope + spec.consumption * previous[i]) / normalization);
    }
    row
}

/// `cum[i] = cum_prev[i] + rate[i] * dt`, stamped with `time`.
///
/// Works for any width; `rate[0]` is ignored.
pub fn cumulative_row(previous: &[f64], rate: &[f64], time: f64, dt: f64) -> Vec<f64> {
    let mut row = Vec::with_capacity(previous.len());
    row.push(time);
    row.extend(
        previous
            .iter()
            .zip(rate)
            .skip(1)
            .map(|(cum, v)| cum + v * dt),
    );
    row
}

/// Exchange rate corrected by the apparent consumption of the reference mass.
///
/// For every column `i` except the reference `m`:
/// `vd = ((C_i - Cp_i)/dt - k_i * ((C_m - Cp_m)/dt) / Cp_m / k_m * Cp_i) / norm`.
pub fn denoised_rate_row(
    layout: &ColumnLayout,
    reference: usize,
    previous: &[f64],
    current: &[f64],
    normalization: f64,
) -> Vec<f64> {
    let columns = layout.columns();
    let dt = current[0] - previous[0];
    let reference_slope = (current[reference] - previous[reference]) / dt;
    let leak = reference_slope / previous[reference] / columns[reference].consumption;

    let mut row = Vec::with_capacity(current.len() - 1);
    row.push(previous[0]);
    for (i, spec) in columns.iter().enumerate().skip(1) {
        if i == reference {
            continue;
        }
        let slope = (current[i] - previous[i]) / dt;
        row.push((slope - spec.consumption * leak * previous[i]) / normalization);
    }
    row
}

/// Drop the reference column from a concentration row.
pub fn without_column(row: &[f64], column: usize) -> Vec<f64> {
    row.iter()
        .enumerate()
        .filter(|&(i, _)| i != column)
        .map(|(_, v)| *v)
        .collect()
}

/// `[t, Uo, Eo, Net]` from denoised 32/36 rates and the previous concentrations.
pub fn oxygen_rate_row(indices: &OxygenIndices, previous: &[f64], denoised: &[f64]) -> Vec<f64> {
    let ratio = previous[indices.conc32] / previous[indices.conc36];
    let uptake = denoised[indices.rate36] * (1.0 + ratio);
    let evolution = denoised[indices.rate32] - denoised[indices.rate36] * ratio;
    vec![denoised[0], uptake, evolution, uptake + evolution]
}

/// Integrate Uo and Eo; Net is their sum.
pub fn oxygen_exchange_row(previous: &[f64], rate: &[f64], time: f64, dt: f64) -> Vec<f64> {
    let uptake = previous[1] + rate[1] * dt;
    let evolution = previous[2] + rate[2] * dt;
    vec![time, uptake, evolution, uptake + evolution]
}

/// `[t, (2 vd2 + vd3) / ((Cp4 + Cp3/2) / (Cp4 + Cp2 + Cp3)) + |vd2 + vd3 + vd4|]`.
pub fn hydrogenase_row(indices: &HydrogenIndices, previous: &[f64], denoised: &[f64]) -> Vec<f64> {
    let [h2, hd, d2] = indices.conc.map(|c| previous[c]);
    let [v_h2, v_hd, v_d2] = indices.rate.map(|r| denoised[r]);
    let deuterium_fraction = (d2 + hd / 2.0) / (d2 + h2 + hd);
    let activity = (2.0 * v_h2 + v_hd) / deuterium_fraction + (v_h2 + v_hd + v_d2).abs();
    vec![denoised[0], activity]
}

/// Every row produced from one ion-current sample.
///
/// Rate-style entries are `None` on the first row; the denoised, oxygen and
/// hydrogenase families are `None` when the layout does not support them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedRows {
    /// Sample as fed, time first.
    pub ion_current: Vec<f64>,
    /// Concentration row.
    pub concentration: Vec<f64>,
    /// Cumulative row.
    pub cumulative: Vec<f64>,
    /// Exchange rate row.
    pub exchange_rate: Option<Vec<f64>>,
    /// Denoised rate row, reference column dropped.
    pub denoised_rate: Option<Vec<f64>>,
    /// Denoised cumulative row.
    pub denoised_cumulative: Option<Vec<f64>>,
    /// `[t, Uo, Eo, Net]`.
    pub oxygen_rate: Option<Vec<f64>>,
    /// Integrated `[t, Uo, Eo, Net]`.
    pub oxygen_exchange: Option<Vec<f64>>,
    /// `[t, activity]`.
    pub hydrogenase: Option<Vec<f64>>,
}

#[derive(Debug, Clone)]
struct Previous {
    concentration: Vec<f64>,
    cumulative: Vec<f64>,
    denoised_cumulative: Option<Vec<f64>>,
    oxygen_exchange: Option<Vec<f64>>,
}

/// Incremental pipeline state for one session.
#[derive(Debug)]
pub struct DerivationPipeline {
    layout: Arc<ColumnLayout>,
    normalization: f64,
    previous: Option<Previous>,
    warned_time: bool,
}

impl DerivationPipeline {
    /// Pipeline with no previous row.
    pub fn new(layout: Arc<ColumnLayout>, normalization: f64) -> Self {
        Self {
            layout,
            normalization,
            previous: None,
            warned_time: false,
        }
    }

    /// Layout the rows are shaped by.
    pub fn layout(&self) -> &Arc<ColumnLayout> {
        &self.layout
    }

    /// Feed one ion-current sample (time in minutes first).
    pub fn push(&mut self, sample: Vec<f64>) -> DerivedRows {
        let resolved = self.layout.resolved();
        let reference = resolved.reference();
        let concentration = concentration_row(&self.layout, &sample);

        let Some(previous) = self.previous.take() else {
            let denoised_cumulative = reference.map(|m| without_column(&concentration, m));
            let oxygen_exchange = resolved.oxygen().map(|_| vec![0.0; 4]);
            self.previous = Some(Previous {
                concentration: concentration.clone(),
                cumulative: concentration.clone(),
                denoised_cumulative: denoised_cumulative.clone(),
                oxygen_exchange: oxygen_exchange.clone(),
            });
            return DerivedRows {
                ion_current: sample,
                cumulative: concentration.clone(),
                concentration,
                denoised_cumulative,
                oxygen_exchange,
                ..Default::default()
            };
        };

        let time = concentration[0];
        let dt = time - previous.concentration[0];
        if dt <= 0.0 && !self.warned_time {
            warn!(time, previous = previous.concentration[0], "Time is not increasing; rates will be infinite or NaN");
            self.warned_time = true;
        }

        let rate = exchange_rate_row(
            &self.layout,
            &previous.concentration,
            &concentration,
            self.normalization,
        );
        let cumulative = cumulative_row(&previous.cumulative, &rate, time, dt);

        let mut rows = DerivedRows {
            ion_current: sample,
            ..Default::default()
        };

        if let (Some(m), Some(prev_dcum)) = (reference, previous.denoised_cumulative.as_deref()) {
            let denoised = denoised_rate_row(
                &self.layout,
                m,
                &previous.concentration,
                &concentration,
                self.normalization,
            );
            rows.denoised_cumulative = Some(cumulative_row(prev_dcum, &denoised, time, dt));

            if let (Some(oxygen), Some(prev_oxygen)) =
                (resolved.oxygen(), previous.oxygen_exchange.as_deref())
            {
                let oxygen_rate = oxygen_rate_row(&oxygen, &previous.concentration, &denoised);
                rows.oxygen_exchange = Some(oxygen_exchange_row(prev_oxygen, &oxygen_rate, time, dt));
                rows.oxygen_rate = Some(oxygen_rate);
            }
            if let Some(hydrogen) = resolved.hydrogen() {
                rows.hydrogenase = Some(hydrogenase_row(&hydrogen, &previous.concentration, &denoised));
            }
            rows.denoised_rate = Some(denoised);
        }

        self.previous = Some(Previous {
            concentration: concentration.clone(),
            cumulative: cumulative.clone(),
            denoised_cumulative: rows.denoised_cumulative.clone(),
            oxygen_exchange: rows.oxygen_exchange.clone(),
        });

        rows.concentration = concentration;
        rows.cumulative = cumulative;
        rows.exchange_rate = Some(rate);
        rows
    }
}
