//! Column resolution: from raw mass channels to named molecule columns.
//!
//! Resolution runs once per session, on the header row, in two phases:
//!
//! 1. [`plan`] classifies every raw channel into a [`ChannelAction`]
//!    (companion, suppressed, isobaric split, NO correction, pass-through).
//! 2. [`ColumnLayout::materialize`] turns the plan into the fixed list of
//!    concentration columns, each carrying its calibration coefficients and
//!    a [`ColumnSource`] telling the pipeline which ion currents to read.
//!
//! The layout also carries [`ResolvedChannels`], the typed lookup for the
//! columns that later stages need by mass (oxygen isotopes, hydrogen
//! isotopes, the denoising reference).

use crate::error::{AppResult, MimsError};
use crate::factor::FactorTable;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Label of the time column shared by every series.
pub const TIME_LABEL: &str = "Time (min)";

const CARBON_COMPANION: i32 = 12;
const ETHANOL_COMPANION: i32 = 27;
const CARBON_DIOXIDE: i32 = 44;
const ETHANOL: i32 = 31;
const WATER: i32 = 18;
const NITRIC_OXIDE: i32 = 30;
const OXYGEN_32: i32 = 32;
const OXYGEN_36: i32 = 36;
const HYDROGEN: i32 = 2;
const HYDROGEN_DEUTERIDE: i32 = 3;
const DEUTERIUM: i32 = 4;

/// Masses whose column index is tracked in [`ResolvedChannels`].
const TRACKED: [i32; 6] = [
    HYDROGEN,
    HYDROGEN_DEUTERIDE,
    DEUTERIUM,
    NITRIC_OXIDE,
    OXYGEN_32,
    OXYGEN_36,
];

/// Session options that shape the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Drop the water channel (18).
    pub hide_water: bool,
    /// Add an inorganic carbon column after CO2.
    pub include_inorganic_carbon: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            hide_water: true,
            include_inorganic_carbon: true,
        }
    }
}

/// What a raw channel contributes to the concentration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    /// 12 or 27: read only as the companion of a split channel.
    Companion,
    /// Water hidden by option.
    Suppress,
    /// Shared nominal mass split into the factor rows at `mass` and `-mass`.
    IsobaricSplit {
        /// Raw channel of the companion mass (12 for 44, 27 for 31).
        companion: usize,
        /// Append an inorganic carbon column (44 only).
        inorganic_carbon: bool,
    },
    /// Mass 30 corrected for the N2O contribution.
    NitricOxide {
        /// Raw channel of mass 44.
        overlap: usize,
        /// Raw channel of mass 12.
        companion: usize,
    },
    /// Plain calibration with the channel's own factor row.
    PassThrough {
        /// Append an inorganic carbon column (44 without 12).
        inorganic_carbon: bool,
    },
}

/// One classified raw channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPlan {
    /// Column of this channel in the ion-current sample (time is 0).
    pub raw: usize,
    /// Mass read from the header.
    pub mass: i32,
    /// How the channel turns into concentration columns.
    pub action: ChannelAction,
}

/// Classify header channels.
///
/// Companion presence (12, 27) is taken from the whole header, so the plan
/// does not depend on the column order of the log.
pub fn plan(
    channels: &[String],
    factors: &FactorTable,
    options: &LayoutOptions,
) -> AppResult<Vec<ChannelPlan>> {
    let masses = channels
        .iter()
        .map(|id| {
            id.trim()
                .parse::<i32>()
                .map_err(|_| MimsError::UnknownChannel(id.clone()))
        })
        .collect::<AppResult<Vec<_>>>()?;

    // Raw sample columns are shifted by one for the time column.
    let raw_of = |mass: i32| masses.iter().position(|&m| m == mass).map(|i| i + 1);
    let carbon_companion = raw_of(CARBON_COMPANION);
    let ethanol_companion = raw_of(ETHANOL_COMPANION);
    let carbon_dioxide = raw_of(CARBON_DIOXIDE);

    masses
        .iter()
        .enumerate()
        .map(|(i, &mass)| {
            let action = match mass {
                CARBON_COMPANION | ETHANOL_COMPANION => ChannelAction::Companion,
                CARBON_DIOXIDE => match carbon_companion {
                    Some(companion) => ChannelAction::IsobaricSplit {
                        companion,
                        inorganic_carbon: options.include_inorganic_carbon,
                    },
                    None => ChannelAction::PassThrough {
                        inorganic_carbon: options.include_inorganic_carbon,
                    },
                },
                ETHANOL => match ethanol_companion {
                    Some(companion) => ChannelAction::IsobaricSplit {
                        companion,
                        inorganic_carbon: false,
                    },
                    None => ChannelAction::PassThrough {
                        inorganic_carbon: false,
                    },
                },
                WATER if options.hide_water => ChannelAction::Suppress,
                NITRIC_OXIDE => match (carbon_companion, carbon_dioxide) {
                    (Some(companion), Some(overlap)) => {
                        ChannelAction::NitricOxide { overlap, companion }
                    }
                    _ => ChannelAction::PassThrough {
                        inorganic_carbon: false,
                    },
                },
                _ => ChannelAction::PassThrough {
                    inorganic_carbon: false,
                },
            };

            if !matches!(action, ChannelAction::Companion | ChannelAction::Suppress)
                && !factors.contains(mass)
            {
                return Err(MimsError::UnknownChannel(channels[i].clone()));
            }

            Ok(ChannelPlan {
                raw: i + 1,
                mass,
                action,
            })
        })
        .collect()
}

/// How a concentration column is computed from one ion-current sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnSource {
    /// Minutes since the first sample.
    Time,
    /// `A[raw]`.
    Direct {
        /// Raw channel read.
        raw: usize,
    },
    /// `A[companion] / ratio`: the part of a shared mass explained by the
    /// companion channel (CO2 from 12, ETOH from 27).
    CompanionShare {
        /// Raw channel of the companion mass.
        companion: usize,
        /// Companion ratio of the shared mass.
        ratio: f64,
    },
    /// `A[raw] - A[companion] / ratio`: what remains of the shared mass
    /// (N2O, METOH).
    Remainder {
        /// Raw channel of the shared mass.
        raw: usize,
        /// Raw channel of the companion mass.
        companion: usize,
        /// Companion ratio of the shared mass.
        ratio: f64,
    },
    /// `A30 - (A44 - A12 / carbon_ratio) * overlap_ratio`.
    NitricOxide {
        /// Raw channel of mass 30.
        raw: usize,
        /// Raw channel of mass 44.
        overlap: usize,
        /// Raw channel of mass 12.
        companion: usize,
        /// Companion ratio of CO2.
        carbon_ratio: f64,
        /// Companion ratio of NO, the N2O share seen on mass 30.
        overlap_ratio: f64,
    },
    /// Scales an already computed concentration column; no signal zero.
    InorganicCarbon {
        /// Concentration column of CO2.
        column: usize,
    },
}

/// One concentration column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Molecule name.
    pub name: String,
    /// How the amplitude is read from the ion-current sample.
    pub source: ColumnSource,
    /// `A0` subtracted from the source amplitude.
    pub signal_zero: f64,
    /// Multiplier applied after subtracting `A0`.
    pub correction: f64,
    /// Consumption constant `k`.
    pub consumption: f64,
}

impl ColumnSpec {
    fn time() -> Self {
        Self {
            name: "Time".to_string(),
            source: ColumnSource::Time,
            signal_zero: 0.0,
            correction: 1.0,
            consumption: 0.0,
        }
    }
}

/// Column indices of the oxygen isotopes.
///
/// `rate32`/`rate36` index the denoised rate row: one less than the
/// concentration index when the denoising reference lies before it,
/// otherwise 0 (the time column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OxygenIndices {
    /// Concentration column of O2 (mass 32).
    pub conc32: usize,
    /// Concentration column of 18O2 (mass 36).
    pub conc36: usize,
    /// Column of O2 in the denoised rate row.
    pub rate32: usize,
    /// Column of 18O2 in the denoised rate row.
    pub rate36: usize,
}

/// Column indices of the hydrogen isotopes, concentration and denoised rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrogenIndices {
    /// Concentration columns of H2, HD and D2.
    pub conc: [usize; 3],
    /// Denoised rate columns of H2, HD and D2.
    pub rate: [usize; 3],
}

/// Typed lookup for the columns later stages need.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedChannels {
    by_mass: BTreeMap<i32, usize>,
    reference: Option<usize>,
    reference_mass: Option<i32>,
    oxygen: Option<OxygenIndices>,
    hydrogen: Option<HydrogenIndices>,
}

impl ResolvedChannels {
    /// Concentration column emitted by a tracked mass (2, 3, 4, 30, 32, 36).
    pub fn column(&self, mass: i32) -> Option<usize> {
        self.by_mass.get(&mass).copied()
    }

    /// Concentration column of the denoising reference, when denoising is active.
    pub fn reference(&self) -> Option<usize> {
        self.reference
    }

    /// Mass used as the denoising reference, from the settings row.
    pub fn reference_mass(&self) -> Option<i32> {
        self.reference_mass
    }

    /// Oxygen isotope columns, when both 32 and 36 are present with a reference.
    pub fn oxygen(&self) -> Option<OxygenIndices> {
        self.oxygen
    }

    /// Hydrogen isotope columns, when 2, 3 and 4 are present with a reference.
    pub fn hydrogen(&self) -> Option<HydrogenIndices> {
        self.hydrogen
    }

    /// Position of a concentration column in the denoised rows, `None` for
    /// the reference itself.
    pub fn denoised_index(&self, column: usize) -> Option<usize> {
        match self.reference {
            Some(reference) if column == reference => None,
            Some(reference) if column > reference => Some(column - 1),
            _ => Some(column),
        }
    }
}

/// Fixed column layout of one ingest session.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    channels: Vec<String>,
    columns: Vec<ColumnSpec>,
    resolved: ResolvedChannels,
}

impl ColumnLayout {
    /// Classify and materialize in one step.
    pub fn resolve(
        channels: &[String],
        factors: &FactorTable,
        options: &LayoutOptions,
    ) -> AppResult<Self> {
        let denoising_mass = factors.denoising_mass()?;
        let plans = plan(channels, factors, options)?;
        Self::materialize(channels, &plans, factors, denoising_mass)
    }

    /// Build the column list from a channel plan.
    pub fn materialize(
        channels: &[String],
        plans: &[ChannelPlan],
        factors: &FactorTable,
        denoising_mass: i32,
    ) -> AppResult<Self> {
        let mut columns = vec![ColumnSpec::time()];
        let mut resolved = ResolvedChannels::default();
        let mut inorganic_carbon_factor = None;

        for plan in plans {
            let first = columns.len();
            let mass = plan.mass;

            match plan.action {
                ChannelAction::Companion | ChannelAction::Suppress => {
                    debug!(mass, action = ?plan.action, "Channel emits no column");
                    continue;
                }
                ChannelAction::IsobaricSplit {
                    companion,
                    inorganic_carbon,
                } => {
                    let primary = factors.require(mass)?;
                    let duplicate = factors.require(-mass)?;
                    let ratio = primary.companion_ratio()?;
                    let (primary_name, duplicate_name) = if mass == CARBON_DIOXIDE {
                        ("CO2", "N2O")
                    } else {
                        ("ETOH", "METOH")
                    };

                    columns.push(ColumnSpec {
                        name: primary_name.to_string(),
                        source: ColumnSource::CompanionShare { companion, ratio },
                        signal_zero: primary.signal_zero()?,
                        correction: primary.correction()?,
                        consumption: primary.consumption()?,
                    });
                    columns.push(ColumnSpec {
                        name: duplicate_name.to_string(),
                        source: ColumnSource::Remainder {
                            raw: plan.raw,
                            companion,
                            ratio,
                        },
                        signal_zero: duplicate.signal_zero()?,
                        correction: duplicate.correction()?,
                        consumption: duplicate.consumption()?,
                    });
                    if inorganic_carbon {
                        let factor = *inorganic_carbon_factor
                            .get_or_insert(inorganic_carbon_correction(factors.ph()?));
                        columns.push(ColumnSpec {
                            name: "Ci".to_string(),
                            source: ColumnSource::InorganicCarbon { column: first },
                            signal_zero: 0.0,
                            correction: factor,
                            consumption: primary.consumption()?,
                        });
                    }
                }
                ChannelAction::NitricOxide { overlap, companion } => {
                    let row = factors.require(mass)?;
                    columns.push(ColumnSpec {
                        name: row.name().to_string(),
                        source: ColumnSource::NitricOxide {
                            raw: plan.raw,
                            overlap,
                            companion,
                            carbon_ratio: factors.require(CARBON_DIOXIDE)?.companion_ratio()?,
                            overlap_ratio: row.companion_ratio()?,
                        },
                        signal_zero: row.signal_zero()?,
                        correction: row.correction()?,
                        consumption: row.consumption()?,
                    });
                }
                ChannelAction::PassThrough { inorganic_carbon } => {
                    let row = factors
                        .get(mass)
                        .ok_or_else(|| MimsError::UnknownChannel(channels[plan.raw - 1].clone()))?;
                    columns.push(ColumnSpec {
                        name: row.name().to_string(),
                        source: ColumnSource::Direct { raw: plan.raw },
                        signal_zero: row.signal_zero()?,
                        correction: row.correction()?,
                        consumption: row.consumption()?,
                    });
                    if inorganic_carbon {
                        let factor = *inorganic_carbon_factor
                            .get_or_insert(inorganic_carbon_correction(factors.ph()?));
                        columns.push(ColumnSpec {
                            name: "Ci".to_string(),
                            source: ColumnSource::InorganicCarbon { column: first },
                            signal_zero: 0.0,
                            correction: factor,
                            consumption: row.consumption()?,
                        });
                    }
                }
            }

            if TRACKED.contains(&mass) {
                resolved.by_mass.entry(mass).or_insert(first);
            }
            if mass == denoising_mass && mass != WATER && resolved.reference.is_none() {
                resolved.reference = Some(first);
                resolved.reference_mass = Some(mass);
            }
        }

        resolved.oxygen = oxygen_indices(&resolved);
        resolved.hydrogen = hydrogen_indices(&resolved);

        let layout = Self {
            channels: channels.to_vec(),
            columns,
            resolved,
        };
        info!(
            columns = ?layout.molecule_names().collect::<Vec<_>>(),
            reference = ?layout.resolved.reference_mass,
            oxygen = layout.resolved.oxygen.is_some(),
            hydrogenase = layout.resolved.hydrogen.is_some(),
            "Column layout resolved"
        );
        Ok(layout)
    }

    /// Raw channel ids from the header.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Concentration columns, time first.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Number of concentration columns including time.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Width of an ion-current sample including time.
    pub fn raw_width(&self) -> usize {
        self.channels.len() + 1
    }

    /// Columns later stages look up by mass.
    pub fn resolved(&self) -> &ResolvedChannels {
        &self.resolved
    }

    /// Whether the denoised family of series is produced.
    pub fn denoising(&self) -> bool {
        self.resolved.reference.is_some()
    }

    /// Molecule names, time excluded.
    pub fn molecule_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().skip(1).map(|c| c.name.as_str())
    }

    /// Concentration column of a molecule.
    pub fn index_of(&self, molecule: &str) -> Option<usize> {
        self.columns
            .iter()
            .skip(1)
            .position(|c| c.name == molecule)
            .map(|i| i + 1)
    }
}

/// Ratio of total inorganic carbon to dissolved CO2 at a given pH.
pub fn inorganic_carbon_correction(ph: f64) -> f64 {
    1.0 + 10f64.powf(ph - 6.4) * (1.0 + 10f64.powf(ph - 10.3))
}

fn oxygen_indices(resolved: &ResolvedChannels) -> Option<OxygenIndices> {
    let reference = resolved.reference?;
    let conc32 = resolved.column(OXYGEN_32)?;
    let conc36 = resolved.column(OXYGEN_36)?;
    let shifted = |column: usize| if reference < column { column - 1 } else { 0 };

    let indices = OxygenIndices {
        conc32,
        conc36,
        rate32: shifted(conc32),
        rate36: shifted(conc36),
    };
    if indices.rate32 == 0 || indices.rate36 == 0 {
        warn!(
            reference,
            conc32,
            conc36,
            "Denoising reference is not before both oxygen columns; oxygen exchange reads the time column as a rate, check against reference output"
        );
    }
    Some(indices)
}

fn hydrogen_indices(resolved: &ResolvedChannels) -> Option<HydrogenIndices> {
    resolved.reference?;
    let conc = [
        resolved.column(HYDROGEN)?,
        resolved.column(HYDROGEN_DEUTERIDE)?,
        resolved.column(DEUTERIUM)?,
    ];
    let mut rate = [0; 3];
    for (slot, &column) in rate.iter_mut().zip(conc.iter()) {
        match resolved.denoised_index(column) {
            Some(index) => *slot = index,
            None => {
                warn!(
                    column,
                    "Denoising reference is a hydrogen isotope; hydrogenase activity disabled"
                );
                return None;
            }
        }
    }
    Some(HydrogenIndices { conc, rate })
}
