//! Read-only statistics over a curve table.
//!
//! Curves are sorted by their first column (time, or concentration for
//! projections). Lookups interpolate linearly between neighbouring rows.

use crate::data::series::ExportTable;
use crate::error::{AppResult, MimsError};
use serde::Serialize;

/// Significant figures used for displayed extrema.
pub const DISPLAY_DIGITS: i32 = 3;

/// Extrema per column of a curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    /// Column label with unit.
    pub label: String,
    /// Smallest finite value.
    pub min: f64,
    /// Largest finite value.
    pub max: f64,
}

/// Extrema of a whole curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveSummary {
    /// Rows summarized.
    pub rows: usize,
    /// One entry per column, time first.
    pub columns: Vec<ColumnSummary>,
}

/// Min and max of every column, rounded to [`DISPLAY_DIGITS`] figures.
///
/// NaN values are skipped; a column with no finite value reports NaN.
pub fn summarize(table: &ExportTable) -> CurveSummary {
    let columns = table
        .column_labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let values = table.rows.iter().filter_map(|r| r.get(i)).filter(|v| !v.is_nan());
            let (min, max) = values.fold((f64::NAN, f64::NAN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            ColumnSummary {
                label: label.clone(),
                min: significant_digits(min, DISPLAY_DIGITS),
                max: significant_digits(max, DISPLAY_DIGITS),
            }
        })
        .collect();
    CurveSummary {
        rows: table.rows.len(),
        columns,
    }
}

/// Round `value` to `digits` significant figures.
pub fn significant_digits(value: f64, digits: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let exponent = digits - 1 - magnitude;
    // Keep the power of ten an exact integer in both directions.
    if exponent >= 0 {
        let scale = 10f64.powi(exponent);
        (value * scale).round() / scale
    } else {
        let scale = 10f64.powi(-exponent);
        (value / scale).round() * scale
    }
}

fn check_column(rows: &[Vec<f64>], column: usize) -> AppResult<()> {
    match rows.first() {
        Some(row) if column < row.len() && column > 0 => Ok(()),
        _ => Err(MimsError::UnknownColumn(column.to_string())),
    }
}

/// Value of `column` at abscissa `x`.
///
/// Finds the row nearest to `x` (ties resolve to the later row, first and
/// last rows excluded), then interpolates toward the neighbour on the side
/// of `x`. Curves with fewer than three rows interpolate between their ends.
pub fn value_at(rows: &[Vec<f64>], column: usize, x: f64) -> AppResult<f64> {
    check_column(rows, column)?;
    let first = rows[0][0];
    let last = rows[rows.len() - 1][0];
    if !(first..=last).contains(&x) {
        return Err(MimsError::OutOfRange {
            value: x,
            lower: first,
            upper: last,
        });
    }

    let (a, b) = if rows.len() < 3 {
        (0, rows.len() - 1)
    } else {
        let mut nearest = 1;
        for j in 1..rows.len() - 1 {
            if (rows[j][0] - x).abs() <= (rows[nearest][0] - x).abs() {
                nearest = j;
            }
        }
        if rows[nearest][0] <= x {
            (nearest, nearest + 1)
        } else {
            (nearest - 1, nearest)
        }
    };

    let (x0, y0) = (rows[a][0], rows[a][column]);
    let (x1, y1) = (rows[b][0], rows[b][column]);
    if a == b {
        return Ok(y0);
    }
    Ok(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
}

/// Mean of `column` over rows whose abscissa lies in `[lower, upper]`.
///
/// NaN when no row falls inside the bounds.
pub fn average_between(rows: &[Vec<f64>], column: usize, lower: f64, upper: f64) -> AppResult<f64> {
    if lower > upper {
        return Err(MimsError::InvalidBounds { lower, upper });
    }
    check_column(rows, column)?;
    let (sum, count) = rows
        .iter()
        .filter(|r| (lower..=upper).contains(&r[0]))
        .fold((0.0, 0usize), |(sum, n), r| (sum + r[column], n + 1));
    if count == 0 {
        return Ok(f64::NAN);
    }
    Ok(sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> Vec<Vec<f64>> {
        (0..5).map(|i| vec![i as f64, 10.0 * i as f64]).collect()
    }

    #[test]
    fn rounds_to_significant_figures() {
        assert_eq!(significant_digits(123_456.0, 3), 123_000.0);
        assert_eq!(significant_digits(0.012_345, 3), 0.0123);
        assert_eq!(significant_digits(-9.876, 3), -9.88);
        assert_eq!(significant_digits(0.0, 3), 0.0);
        assert!(significant_digits(f64::NAN, 3).is_nan());
    }

    #[test]
    fn summary_extrema() {
        let table = ExportTable {
            column_labels: vec!["Time (min)".into(), "O2  (µM)".into()],
            rows: vec![vec![0.0, 1.234_56], vec![1.0, f64::NAN], vec![2.0, -5.678_9]],
        };
        let summary = summarize(&table);
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.columns[1].min, -5.68);
        assert_eq!(summary.columns[1].max, 1.23);
        assert_eq!(summary.columns[0].max, 2.0);
    }

    #[test]
    fn interpolates_between_neighbours() {
        let rows = line();
        assert!((value_at(&rows, 1, 2.5).unwrap() - 25.0).abs() < 1e-12);
        assert!((value_at(&rows, 1, 0.2).unwrap() - 2.0).abs() < 1e-12);
        assert!((value_at(&rows, 1, 4.0).unwrap() - 40.0).abs() < 1e-12);
    }

    #[test]
    fn two_row_curve_uses_its_ends() {
        let rows = vec![vec![0.0, 0.0], vec![2.0, 4.0]];
        assert_eq!(value_at(&rows, 1, 1.0).unwrap(), 2.0);
    }

    #[test]
    fn out_of_range_abscissa() {
        assert!(matches!(
            value_at(&line(), 1, 4.5),
            Err(MimsError::OutOfRange { upper, .. }) if upper == 4.0
        ));
        assert!(matches!(value_at(&line(), 3, 1.0), Err(MimsError::UnknownColumn(_))));
    }

    #[test]
    fn average_over_bounds() {
        let rows = line();
        assert_eq!(average_between(&rows, 1, 1.0, 3.0).unwrap(), 20.0);
        assert!(average_between(&rows, 1, 3.5, 3.9).unwrap().is_nan());
        assert!(matches!(
            average_between(&rows, 1, 3.0, 1.0),
            Err(MimsError::InvalidBounds { .. })
        ));
    }
}
