//! Table persistence.

use csv::{ReaderBuilder, WriterBuilder};
use std::path::{Path, PathBuf};

use gait_core::{ColumnData, Error, Result, Table};

use crate::csv_error;

/// Columns always read back as text, even when every cell looks numeric
pub const LABEL_COLUMNS: &[&str] = &[
    "ID",
    "Run",
    "Leg",
    "Flipped",
    "Group",
    "Contrast",
    "Reject",
    "Significance",
    "Feature",
];

/// On-disk table format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    /// Spreadsheet workbooks (`.xlsx`), written by an external store
    Spreadsheet,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Spreadsheet => "xlsx",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(TableFormat::Csv),
            "xlsx" | "xls" => Some(TableFormat::Spreadsheet),
            _ => None,
        }
    }
}

/// Persistence backend for [`Table`]s.
///
/// Paths are given without extension; the store appends its own.
pub trait TableStore: Send + Sync {
    fn format(&self) -> TableFormat;

    fn write(&self, stem: &Path, table: &Table) -> Result<PathBuf>;

    fn read(&self, stem: &Path) -> Result<Table>;

    fn path_for(&self, stem: &Path) -> PathBuf {
        let mut name = stem.as_os_str().to_owned();
        name.push(".");
        name.push(self.format().extension());
        PathBuf::from(name)
    }

    fn exists(&self, stem: &Path) -> bool {
        self.path_for(stem).is_file()
    }
}

/// Comma-separated text tables
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvStore;

impl TableStore for CsvStore {
    fn format(&self) -> TableFormat {
        TableFormat::Csv
    }

    fn write(&self, stem: &Path, table: &Table) -> Result<PathBuf> {
        let path = self.path_for(stem);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = WriterBuilder::new()
            .from_path(&path)
            .map_err(|e| csv_error("table output", e))?;
        writer
            .write_record(table.names())
            .map_err(|e| csv_error("table output", e))?;

        for row in 0..table.rows() {
            let cells = table.columns().iter().map(|c| c.data.cell(row));
            writer
                .write_record(cells)
                .map_err(|e| csv_error("table output", e))?;
        }
        writer.flush()?;

        tracing::debug!(path = %path.display(), rows = table.rows(), "Wrote table");
        Ok(path)
    }

    fn read(&self, stem: &Path) -> Result<Table> {
        let path = self.path_for(stem);
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| csv_error(&path.display().to_string(), e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| csv_error("table input", e))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(|e| csv_error("table input", e))?;
            for (j, column) in cells.iter_mut().enumerate() {
                column.push(record.get(j).unwrap_or("").to_string());
            }
        }

        let mut table = Table::new();
        for (name, column) in headers.into_iter().zip(cells) {
            match classify(&name, column) {
                ColumnData::Label(labels) => table.push_labels(name, labels)?,
                ColumnData::Value(values) => table.push_values(name, values)?,
            }
        }
        Ok(table)
    }
}

fn classify(name: &str, cells: Vec<String>) -> ColumnData {
    if LABEL_COLUMNS.contains(&name) {
        return ColumnData::Label(cells);
    }

    let parsed: Option<Vec<f64>> = cells
        .iter()
        .map(|c| {
            let c = c.trim();
            if c.is_empty() {
                Some(f64::NAN)
            } else {
                c.parse::<f64>().ok()
            }
        })
        .collect();

    match parsed {
        Some(values) => ColumnData::Value(values),
        None => ColumnData::Label(cells),
    }
}

/// Fail unless the store speaks the requested format
pub fn ensure_format(store: &dyn TableStore, format: TableFormat) -> Result<()> {
    if store.format() != format {
        return Err(Error::IoFormat(format!(
            "output format {:?} requested but the table store writes {:?}",
            format,
            store.format()
        )));
    }
    Ok(())
}
