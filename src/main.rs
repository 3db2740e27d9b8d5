//! CLI entry point for mims-daq
//!
//! Provides command-line access to the ingest pipeline:
//! - `watch`: follow a live instrument log until Ctrl+C
//! - `export`: ingest a finished log and write every series as CSV
//! - `summary`: ingest a finished log and print curve statistics as JSON
//! - `config`: print the effective settings after file and env overrides
//!
//! # Usage
//!
//! ```bash
//! mims-daq watch --factors factors.csv --data run.csv
//! mims-daq export --factors factors.csv --data run.csv --output exports/
//! mims-daq summary --factors factors.csv --data run.csv --series concentration --at 12.5
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mims_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use mims_daq::data::moving_average::MovingAverageWindow;
use mims_daq::data::series::{SeriesId, SeriesSource};
use mims_daq::data::storage::CsvExporter;
use mims_daq::data::summary;
use mims_daq::ingest::tailer::{FollowMode, TailerState};
use mims_daq::{logging, Session, SessionOptions};
use serde::Serialize;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mims-daq")]
#[command(about = "Live ingest and derivation for MIMS instrument logs", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Inputs {
    /// Calibration factor file
    #[arg(long)]
    factors: PathBuf,

    /// Instrument data log
    #[arg(long)]
    data: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a growing data file until interrupted
    Watch {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// Ingest to end of file and export every available series as CSV
    Export {
        #[command(flatten)]
        inputs: Inputs,

        /// Output directory (defaults to the configured export directory)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Ingest to end of file and print a series summary as JSON
    Summary {
        #[command(flatten)]
        inputs: Inputs,

        /// Series name, e.g. concentration, denoised-rate, oxygen-rate
        #[arg(long, default_value = "concentration")]
        series: String,

        /// Column index for --at and --between (1 is the first data column)
        #[arg(long, default_value = "1")]
        column: usize,

        /// Interpolate the column at this time
        #[arg(long)]
        at: Option<f64>,

        /// Average the column between two times
        #[arg(long, num_args = 2, value_names = ["LOWER", "UPPER"])]
        between: Option<Vec<f64>>,

        /// Apply the sliding average before summarizing
        #[arg(long)]
        smooth: bool,

        /// Half-width of the sliding average (defaults to the configured one)
        #[arg(long, requires = "smooth")]
        half_width: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    settings.validate().map_err(|e| anyhow!(e))?;
    logging::init_from_settings(&settings).map_err(|e| anyhow!(e))?;
    info!(app = %settings.application.name, config = %cli.config.display(), "Starting");

    let options = SessionOptions::from_settings(&settings);
    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Watch { inputs } => watch(inputs, options).await,
        Commands::Export { inputs, output } => {
            let output = output.unwrap_or_else(|| settings.export.output_dir.clone());
            export(inputs, options, output).await
        }
        Commands::Summary {
            inputs,
            series,
            column,
            at,
            between,
            smooth,
            half_width,
        } => {
            let request = SummaryRequest {
                series,
                column,
                at,
                between,
                half_width: smooth
                    .then(|| half_width.unwrap_or(settings.smoothing.default_half_width)),
            };
            summarize(inputs, options, request).await
        }
    }
}

async fn watch(inputs: Inputs, options: SessionOptions) -> Result<()> {
    let poll = options.poll_interval;
    let session = Session::open(&inputs.factors, &inputs.data, options).await?;
    let mut state = session.watch_state();
    let mut ticker = tokio::time::interval(poll);
    let mut last_rows = 0;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = state.changed() => {
                let current = *state.borrow_and_update();
                if changed.is_err() || current.is_terminal() {
                    break;
                }
                info!(state = ?current, "Ingest state");
            }
            _ = ticker.tick() => {
                let rows = session.store().row_count();
                if rows != last_rows {
                    info!(rows, new = rows - last_rows, "Rows ingested");
                    last_rows = rows;
                }
            }
        }
    }

    let report = session.close().await;
    info!(rows = report.rows, "Watch finished");
    match report.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Ingest a finished file; errors after the header still leave rows readable.
async fn ingest_to_end(inputs: &Inputs, options: SessionOptions) -> Result<Session> {
    let session =
        Session::open(&inputs.factors, &inputs.data, options.with_mode(FollowMode::UntilEof))
            .await?;
    let rows = session.wait_for_end().await?;
    if session.state() == TailerState::Error {
        warn!(rows, "Ingest stopped on an error; using the rows read so far");
    }
    Ok(session)
}

async fn export(inputs: Inputs, options: SessionOptions, output: PathBuf) -> Result<()> {
    let session = ingest_to_end(&inputs, options).await?;
    let exporter = CsvExporter::new(output);
    let stem = inputs
        .data
        .file_stem()
        .map_or_else(|| "session".to_string(), |s| s.to_string_lossy().into_owned());

    let store = session.store().clone();
    for id in store.available().collect::<Vec<_>>() {
        let table = store.export_table(id)?;
        let path = exporter.export(&format!("{stem}_{id}"), &table)?;
        println!("{}", path.display());
    }

    let report = session.close().await;
    match report.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

struct SummaryRequest {
    series: String,
    column: usize,
    at: Option<f64>,
    between: Option<Vec<f64>>,
    half_width: Option<usize>,
}

#[derive(Serialize)]
struct SummaryOutput {
    series: SeriesId,
    #[serde(skip_serializing_if = "Option::is_none")]
    half_width: Option<usize>,
    #[serde(flatten)]
    summary: summary::CurveSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    average: Option<f64>,
}

async fn summarize(inputs: Inputs, options: SessionOptions, request: SummaryRequest) -> Result<()> {
    let id: SeriesId = request.series.parse()?;
    let session = ingest_to_end(&inputs, options).await?;
    let mut table = session.store().export_table(id)?;
    if let Some(half_width) = request.half_width {
        table.rows = MovingAverageWindow::new(half_width).build(&table.rows)?;
    }

    let column = request.column;
    let value_at = request
        .at
        .map(|x| summary::value_at(&table.rows, column, x))
        .transpose()?;
    let average = match request.between.as_deref() {
        Some([lower, upper]) => Some(summary::average_between(&table.rows, column, *lower, *upper)?),
        _ => None,
    };

    let output = SummaryOutput {
        series: id,
        half_width: request.half_width,
        summary: summary::summarize(&table),
        value_at,
        average,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    let report = session.close().await;
    if let Some(e) = report.error {
        warn!(error = %e, "Summary computed from a partial ingest");
    }
    Ok(())
}
