//! Label + numeric column table exchanged between pipeline stages and on disk.

use crate::error::{Error, Result};

/// Storage of one table column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Text columns such as `ID`, `Run`, `Leg`, `Flipped`
    Label(Vec<String>),
    Value(Vec<f64>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Label(v) => v.len(),
            ColumnData::Value(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty_like(&self, rows: usize) -> Self {
        match self {
            ColumnData::Label(_) => ColumnData::Label(vec![String::new(); rows]),
            ColumnData::Value(_) => ColumnData::Value(vec![f64::NAN; rows]),
        }
    }

    fn take(&self, rows: &[usize]) -> Self {
        match self {
            ColumnData::Label(v) => ColumnData::Label(rows.iter().map(|&r| v[r].clone()).collect()),
            ColumnData::Value(v) => ColumnData::Value(rows.iter().map(|&r| v[r]).collect()),
        }
    }

    /// Cell rendered as text
    pub fn cell(&self, row: usize) -> String {
        match self {
            ColumnData::Label(v) => v[row].clone(),
            ColumnData::Value(v) => {
                let x = v[row];
                if x.is_nan() {
                    String::new()
                } else {
                    x.to_string()
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub data: ColumnData,
}

/// Ordered, named columns of equal length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<TableColumn>,
    rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn check_len(&mut self, name: &str, len: usize) -> Result<()> {
        if self.columns.is_empty() && self.rows == 0 {
            self.rows = len;
        }
        if len != self.rows {
            return Err(Error::IoFormat(format!(
                "column {name} has {len} rows, expected {}",
                self.rows
            )));
        }
        Ok(())
    }

    fn put(&mut self, column: TableColumn, front: bool) -> Result<()> {
        self.check_len(&column.name, column.data.len())?;
        match self.position(&column.name) {
            Some(i) => self.columns[i] = column,
            None if front => self.columns.insert(0, column),
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn push_values(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        self.put(
            TableColumn {
                name: name.into(),
                data: ColumnData::Value(values),
            },
            false,
        )
    }

    pub fn push_labels(&mut self, name: impl Into<String>, labels: Vec<String>) -> Result<()> {
        self.put(
            TableColumn {
                name: name.into(),
                data: ColumnData::Label(labels),
            },
            false,
        )
    }

    pub fn prepend_values(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        self.put(
            TableColumn {
                name: name.into(),
                data: ColumnData::Value(values),
            },
            true,
        )
    }

    pub fn prepend_labels(&mut self, name: impl Into<String>, labels: Vec<String>) -> Result<()> {
        self.put(
            TableColumn {
                name: name.into(),
                data: ColumnData::Label(labels),
            },
            true,
        )
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.columns.iter().find(|c| c.name == name).and_then(|c| match &c.data {
            ColumnData::Value(v) => Some(v.as_slice()),
            ColumnData::Label(_) => None,
        })
    }

    pub fn labels(&self, name: &str) -> Option<&[String]> {
        self.columns.iter().find(|c| c.name == name).and_then(|c| match &c.data {
            ColumnData::Label(v) => Some(v.as_slice()),
            ColumnData::Value(_) => None,
        })
    }

    /// Numeric column that must exist
    pub fn require_values(&self, name: &str) -> Result<&[f64]> {
        self.values(name)
            .ok_or_else(|| Error::InputMissing(format!("numeric column {name} not found")))
    }

    pub fn require_labels(&self, name: &str) -> Result<&[String]> {
        self.labels(name)
            .ok_or_else(|| Error::InputMissing(format!("label column {name} not found")))
    }

    /// Names of numeric columns, in order
    pub fn value_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| matches!(c.data, ColumnData::Value(_)))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Subset of rows, in the given order
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| TableColumn {
                    name: c.name.clone(),
                    data: c.data.take(rows),
                })
                .collect(),
            rows: rows.len(),
        }
    }

    /// Rows whose label in `column` equals `value`
    pub fn filter_label(&self, column: &str, value: &str) -> Self {
        let rows: Vec<usize> = match self.labels(column) {
            Some(labels) => labels
                .iter()
                .enumerate()
                .filter(|(_, l)| l.as_str() == value)
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        };
        self.take_rows(&rows)
    }

    /// Distinct labels of a column in first-seen order
    pub fn unique_labels(&self, column: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for label in self.labels(column).unwrap_or_default() {
            if !label.is_empty() && !out.contains(label) {
                out.push(label.clone());
            }
        }
        out
    }

    /// Append `n` rows of NaN / empty labels
    pub fn push_blank_rows(&mut self, n: usize) {
        for column in &mut self.columns {
            match &mut column.data {
                ColumnData::Label(v) => v.extend(std::iter::repeat(String::new()).take(n)),
                ColumnData::Value(v) => v.extend(std::iter::repeat(f64::NAN).take(n)),
            }
        }
        self.rows += n;
    }

    /// Append one row where every cell holds `value`
    pub fn push_constant_row(&mut self, value: f64) {
        for column in &mut self.columns {
            match &mut column.data {
                ColumnData::Label(v) => v.push(value.to_string()),
                ColumnData::Value(v) => v.push(value),
            }
        }
        self.rows += 1;
    }

    /// Vertical concatenation; columns are unioned by name in first-seen order
    pub fn vstack(tables: &[Table]) -> Self {
        let mut out = Table::new();
        for table in tables {
            for column in &table.columns {
                if !out.has_column(&column.name) {
                    out.columns.push(TableColumn {
                        name: column.name.clone(),
                        data: column.data.empty_like(0),
                    });
                }
            }
        }

        for table in tables {
            for column in &mut out.columns {
                let incoming = table
                    .columns
                    .iter()
                    .find(|c| c.name == column.name)
                    .map(|c| c.data.clone())
                    .unwrap_or_else(|| column.data.empty_like(table.rows));

                match (&mut column.data, incoming) {
                    (ColumnData::Label(dst), ColumnData::Label(src)) => dst.extend(src),
                    (ColumnData::Value(dst), ColumnData::Value(src)) => dst.extend(src),
                    (ColumnData::Label(dst), ColumnData::Value(src)) => {
                        dst.extend(src.iter().map(|x| if x.is_nan() { String::new() } else { x.to_string() }))
                    }
                    (ColumnData::Value(dst), ColumnData::Label(src)) => {
                        dst.extend(src.iter().map(|s| s.parse().unwrap_or(f64::NAN)))
                    }
                }
            }
            out.rows += table.rows;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new();
        t.push_labels("ID", vec!["A".into(), "A".into(), "B".into()]).unwrap();
        t.push_values("Knee y", vec![1.0, 2.0, 3.0]).unwrap();
        t
    }

    #[test]
    fn test_length_is_enforced() {
        let mut t = sample();
        assert!(t.push_values("Hip y", vec![1.0]).is_err());
        assert!(t.prepend_values("Time", vec![0.0, 0.1, 0.2]).is_ok());
        assert_eq!(t.names().next(), Some("Time"));
    }

    #[test]
    fn test_filter_and_unique() {
        let t = sample();
        assert_eq!(t.unique_labels("ID"), vec!["A".to_string(), "B".to_string()]);
        let a = t.filter_label("ID", "A");
        assert_eq!(a.rows(), 2);
        assert_eq!(a.values("Knee y").unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_vstack_unions_columns() {
        let mut other = Table::new();
        other.push_labels("ID", vec!["C".into()]).unwrap();
        other.push_values("Hip y", vec![9.0]).unwrap();

        let stacked = Table::vstack(&[sample(), other]);
        assert_eq!(stacked.rows(), 4);
        let knee = stacked.values("Knee y").unwrap();
        assert!(knee[3].is_nan());
        let hip = stacked.values("Hip y").unwrap();
        assert!(hip[0].is_nan());
        assert_eq!(hip[3], 9.0);
    }

    #[test]
    fn test_separator_rows() {
        let mut t = sample();
        t.push_blank_rows(1);
        t.push_constant_row(2.0);
        assert_eq!(t.rows(), 5);
        assert!(t.values("Knee y").unwrap()[3].is_nan());
        assert_eq!(t.labels("ID").unwrap()[4], "2");
    }
}
