//! Calibration factors keyed by mass channel.
//!
//! The factor file is a semicolon-separated sheet exported from the lab's
//! calibration workbook. After a discarded header line, each row reads
//!
//! ```text
//! key;name;Cmax;Amax;A0;k;ratio;pH;denoise_mass
//! ```
//!
//! where `ratio` links a channel to its companion (12 to 44, 27 to 31, and
//! the N2O overlap on 30). `pH` and `denoise_mass` are only meaningful on
//! the mass 2 row. Blank fields default to `"1"`.
//!
//! Two species sharing a nominal mass (CO2 and N2O at 44, ETOH and METOH at
//! 31) are listed twice; the second row is stored under the negated key.

use crate::error::{AppResult, MimsError};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Number of fields stored after the key.
pub const FIELD_COUNT: usize = 8;

/// Row holding the pH and the denoising-reference mass.
pub const SETTINGS_ROW: i32 = 2;

const BLANK: &str = "1";

/// Field positions within a factor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Molecule name.
    Name = 0,
    /// `Cmax`, concentration at full signal.
    ConcentrationMax = 1,
    /// `Amax`, signal at `Cmax`.
    SignalMax = 2,
    /// `A0`, signal at zero concentration.
    SignalZero = 3,
    /// Consumption constant `k`.
    Consumption = 4,
    /// Share of an isobaric companion's signal on this mass.
    CompanionRatio = 5,
    /// Sample pH (settings row only).
    Ph = 6,
    /// Denoising reference mass (settings row only).
    DenoisingMass = 7,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::ConcentrationMax => "concentration max",
            Field::SignalMax => "signal max",
            Field::SignalZero => "signal zero",
            Field::Consumption => "consumption",
            Field::CompanionRatio => "companion ratio",
            Field::Ph => "pH",
            Field::DenoisingMass => "denoising mass",
        }
    }
}

/// One calibration row.
#[derive(Debug, Clone, PartialEq)]
pub struct MassFactor {
    key: i32,
    fields: [String; FIELD_COUNT],
}

impl MassFactor {
    /// Build a row from raw cells; missing or blank cells become `"1"`.
    pub fn new<S: AsRef<str>>(key: i32, cells: &[S]) -> Self {
        let fields = std::array::from_fn(|i| match cells.get(i).map(|c| c.as_ref().trim()) {
            Some(cell) if !cell.is_empty() => cell.to_string(),
            _ => BLANK.to_string(),
        });
        Self { key, fields }
    }

    /// Mass this row calibrates; negative for a duplicate entry.
    pub fn key(&self) -> i32 {
        self.key
    }

    /// Molecule name used for column labels.
    pub fn name(&self) -> &str {
        &self.fields[Field::Name as usize]
    }

    /// Raw text of a field.
    pub fn raw(&self, field: Field) -> &str {
        &self.fields[field as usize]
    }

    fn number(&self, field: Field) -> AppResult<f64> {
        let value = self.raw(field);
        value
            .parse::<f64>()
            .map_err(|_| MimsError::InvalidFactorField {
                key: self.key,
                field: field.label(),
                value: value.to_string(),
            })
    }

    /// `Cmax`.
    pub fn concentration_max(&self) -> AppResult<f64> {
        self.number(Field::ConcentrationMax)
    }

    /// `Amax`.
    pub fn signal_max(&self) -> AppResult<f64> {
        self.number(Field::SignalMax)
    }

    /// `A0`.
    pub fn signal_zero(&self) -> AppResult<f64> {
        self.number(Field::SignalZero)
    }

    /// Consumption constant `k`.
    pub fn consumption(&self) -> AppResult<f64> {
        self.number(Field::Consumption)
    }

    /// Ratio used to split an isobaric pair.
    pub fn companion_ratio(&self) -> AppResult<f64> {
        self.number(Field::CompanionRatio)
    }

    /// Sample pH used for the inorganic carbon factor.
    pub fn ph(&self) -> AppResult<f64> {
        self.number(Field::Ph)
    }

    /// `Cmax / (Amax - A0)`, the slope turning an ion current into a concentration.
    pub fn correction(&self) -> AppResult<f64> {
        Ok(self.concentration_max()? / (self.signal_max()? - self.signal_zero()?))
    }
}

/// Immutable calibration table for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorTable {
    rows: BTreeMap<i32, MassFactor>,
}

impl FactorTable {
    /// Parse factor file contents.
    pub fn parse(text: &str) -> AppResult<Self> {
        let normalized = text.replace(',', ".");
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .flexible(true)
            .from_reader(normalized.as_bytes());

        let mut rows = BTreeMap::new();
        for (index, record) in reader.records().enumerate() {
            let record = record.map_err(|e| MimsError::FactorFormat {
                line: index + 2,
                reason: e.to_string(),
            })?;
            let line = record
                .position()
                .map_or(index + 2, |pos| pos.line() as usize);

            let key_cell = record.get(0).unwrap_or_default().trim();
            if key_cell.is_empty() && record.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let key: i32 = key_cell.parse().map_err(|_| MimsError::FactorFormat {
                line,
                reason: format!("mass key '{key_cell}' is not an integer"),
            })?;

            let cells: Vec<&str> = record.iter().skip(1).collect();
            let stored_key = if rows.contains_key(&key) {
                if rows.contains_key(&-key) {
                    warn!(key, line, "Third row for one mass, replacing the duplicate entry");
                }
                -key
            } else {
                key
            };
            debug!(key = stored_key, name = cells.first().copied().unwrap_or(BLANK), "Factor row");
            rows.insert(stored_key, MassFactor::new(stored_key, &cells));
        }

        Ok(Self { rows })
    }

    /// Read and parse a factor file.
    pub async fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let table = Self::parse(&text)?;
        info!(path = %path.display(), rows = table.len(), "Factor file loaded");
        Ok(table)
    }

    /// Row for `key`.
    pub fn get(&self, key: i32) -> Option<&MassFactor> {
        self.rows.get(&key)
    }

    /// Like [`get`](Self::get) but a missing row is an error.
    pub fn require(&self, key: i32) -> AppResult<&MassFactor> {
        self.get(key).ok_or(MimsError::MissingFactor(key))
    }

    /// Whether a row exists for `key`.
    pub fn contains(&self, key: i32) -> bool {
        self.rows.contains_key(&key)
    }

    /// Number of rows, duplicates included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys in ascending order, duplicates (negative) first.
    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.rows.keys().copied()
    }

    fn settings_row(&self) -> AppResult<&MassFactor> {
        self.get(SETTINGS_ROW).ok_or(MimsError::MissingDenoisingMass)
    }

    /// Denoising-reference mass from the mass 2 row.
    ///
    /// A blank cell reads as `1`, which matches no channel and leaves
    /// denoising off.
    pub fn denoising_mass(&self) -> AppResult<i32> {
        let row = self.settings_row()?;
        let value = row.raw(Field::DenoisingMass);
        value
            .parse::<i32>()
            .map_err(|_| MimsError::InvalidFactorField {
                key: SETTINGS_ROW,
                field: Field::DenoisingMass.label(),
                value: value.to_string(),
            })
    }

    /// Sample pH from the mass 2 row.
    pub fn ph(&self) -> AppResult<f64> {
        self.settings_row()?.ph()
    }
}
