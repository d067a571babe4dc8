//! Coordinate standardisation lookup table.
//!
//! Columns `ID`, optionally `Run` (2D), and `Standardisation Value`. Each
//! subject (and run) must have exactly one row; the value divides every
//! configured joint coordinate and must therefore be at least 1.

use std::io::Read;
use std::path::Path;

use gait_core::{Error, Result, SubjectKey};

use crate::annotation::{AnnotationTable, ID_ALIASES, RUN_ALIASES};

pub const VALUE_COLUMN: &str = "Standardisation Value";

#[derive(Debug, Clone)]
pub struct StandardisationTable {
    table: AnnotationTable,
}

impl StandardisationTable {
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            table: AnnotationTable::read_csv(path)?,
        })
    }

    pub fn parse_csv<R: Read>(reader: R) -> Result<Self> {
        Ok(Self {
            table: AnnotationTable::parse_csv(reader)?,
        })
    }

    /// Divisor for one subject
    pub fn divisor(&self, subject: &SubjectKey) -> Result<f64> {
        let id_col = self.table.require_column(ID_ALIASES)?;
        let value_col = self.table.require_column(&[VALUE_COLUMN])?;
        let run_col = match &subject.run {
            Some(_) => Some(self.table.require_column(RUN_ALIASES)?),
            None => None,
        };

        let matches: Vec<usize> = (0..self.table.rows.len())
            .filter(|&r| self.table.cell(r, id_col) == subject.name)
            .filter(|&r| match (run_col, &subject.run) {
                (Some(c), Some(run)) => same_run(self.table.cell(r, c), run),
                _ => true,
            })
            .collect();

        let row = match matches.as_slice() {
            [] => {
                return Err(Error::InputMissing(format!(
                    "no standardisation value for {subject}"
                )))
            }
            [row] => *row,
            _ => {
                return Err(Error::InputAmbiguous(format!(
                    "{} standardisation rows for {subject}",
                    matches.len()
                )))
            }
        };

        let raw = self.table.cell(row, value_col);
        let value: f64 = raw.parse().map_err(|_| {
            Error::ConfigInvalid(format!(
                "standardisation value {raw:?} for {subject} is not a number"
            ))
        })?;
        if !(value >= 1.0) {
            return Err(Error::ConfigInvalid(format!(
                "standardisation value for {subject} must be at least 1, got {value}"
            )));
        }
        Ok(value)
    }
}

/// Runs compare numerically when both parse (`"1"` == `"1.0"`)
pub fn same_run(cell: &str, run: &str) -> bool {
    match (cell.parse::<f64>(), run.parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => cell == run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
ID,Run,Standardisation Value
M1,1,12.5
M1,2,0.5
M2,1,abc
M3,1,2
M3,1,3
";

    #[test]
    fn test_divisor_lookup() {
        let table = StandardisationTable::parse_csv(TABLE.as_bytes()).unwrap();
        let v = table.divisor(&SubjectKey::with_run("M1", "1.0")).unwrap();
        assert_eq!(v, 12.5);
    }

    #[test]
    fn test_divisor_errors() {
        let table = StandardisationTable::parse_csv(TABLE.as_bytes()).unwrap();
        assert!(matches!(
            table.divisor(&SubjectKey::with_run("M1", "2")),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            table.divisor(&SubjectKey::with_run("M2", "1")),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            table.divisor(&SubjectKey::with_run("M3", "1")),
            Err(Error::InputAmbiguous(_))
        ));
        assert!(matches!(
            table.divisor(&SubjectKey::with_run("M9", "1")),
            Err(Error::InputMissing(_))
        ));
    }
}
