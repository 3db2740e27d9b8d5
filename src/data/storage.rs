//! CSV export of series and curve tables.
use crate::data::series::ExportTable;
use crate::error::AppResult;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write a table as CSV: one header record of labels, one record per row.
pub fn write_table<W: Write>(writer: W, table: &ExportTable) -> AppResult<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(&table.column_labels)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes export tables into one directory with timestamped file names.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    output_dir: PathBuf,
}

impl CsvExporter {
    /// Exporter writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory exports are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `table` to `<output_dir>/<stem>_<YYYYmmdd_HHMMSS>.csv`.
    pub fn export(&self, stem: &str, table: &ExportTable) -> AppResult<PathBuf> {
        if !self.output_dir.exists() {
            std::fs::create_dir_all(&self.output_dir)?;
        }
        let file_name = format!(
            "{}_{}.csv",
            stem,
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.output_dir.join(file_name);
        write_table(File::create(&path)?, table)?;
        info!(path = %path.display(), rows = table.rows.len(), "CSV export written");
        Ok(path)
    }
}
