//! Step-cycle annotation table.
//!
//! One row per subject (and run or leg) listing swing onset (`Swing (ti)`)
//! and stance onset (`Stance (te)`) latencies in seconds. Additional cycles
//! repeat the pair, pandas-style suffixed `.1`, `.2`, ...

use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;

use gait_core::{Error, Result};

use crate::csv_error;

pub const ID_ALIASES: &[&str] = &["ID", "Subject", "Name", "Mouse", "Participant"];
pub const RUN_ALIASES: &[&str] = &["Run", "Run Number", "Trial"];
pub const LEG_ALIASES: &[&str] = &["Leg", "Side"];
pub const SC_COUNT_ALIASES: &[&str] = &[
    "SC Number",
    "SC Number (#)",
    "Number of SCs",
    "Stepcycles",
    "SC Count",
];
pub const SWING_PREFIX: &str = "Swing (ti)";
pub const STANCE_PREFIX: &str = "Stance (te)";

/// Raw annotation table, all cells kept as text
#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl AnnotationTable {
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::InputMissing(format!(
                "annotation table {} not found",
                path.display()
            )),
            _ => Error::Io(e),
        })?;
        Self::parse_csv(file)
    }

    pub fn parse_csv<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| csv_error("annotation table", e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| csv_error("annotation table", e))?;
            let mut row: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// First column whose header matches any alias (case-insensitive)
    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| aliases.iter().any(|a| h.eq_ignore_ascii_case(a)))
    }

    pub fn require_column(&self, aliases: &[&str]) -> Result<usize> {
        self.column(aliases).ok_or_else(|| {
            Error::ConfigInvalid(format!(
                "annotation table has no column named any of {aliases:?}"
            ))
        })
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn is_blank_row(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .map_or(true, |r| r.iter().all(|c| c.is_empty()))
    }

    /// `(swing, stance)` column pairs in cycle order
    pub fn cycle_columns(&self) -> Result<Vec<(usize, usize)>> {
        let swing: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.starts_with(SWING_PREFIX))
            .map(|(i, _)| i)
            .collect();
        let stance: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.starts_with(STANCE_PREFIX))
            .map(|(i, _)| i)
            .collect();

        if swing.is_empty() || stance.is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "annotation table needs {SWING_PREFIX:?} and {STANCE_PREFIX:?} columns"
            )));
        }
        if swing.len() != stance.len() {
            return Err(Error::ConfigInvalid(format!(
                "annotation table has {} swing but {} stance columns",
                swing.len(),
                stance.len()
            )));
        }
        Ok(swing.into_iter().zip(stance).collect())
    }
}
