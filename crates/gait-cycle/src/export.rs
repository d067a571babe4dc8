//! Serialization of subject results into tables.
//!
//! Cycles are kept as typed lists in memory; the separator triplet
//! (blank row, ordinal row, blank row) between consecutive cycles only
//! exists in the written tables.

use std::ops::Range;

use gait_core::{Dimensionality, Error, Result, Side, SubjectKey, Table};

use crate::aggregate::SubjectSummary;
use crate::features::CycleSeries;

pub const ORIGINAL_STEPCYCLES: &str = "Original Stepcycles";
pub const NORMALISED_STEPCYCLES: &str = "Normalised Stepcycles";
pub const X_STANDARDISED_STEPCYCLES: &str = "X-Standardised Stepcycles";
pub const AVERAGE_STEPCYCLE: &str = "Average Stepcycle";
pub const STD_STEPCYCLE: &str = "Standard Deviation Stepcycle";

pub const TIME: &str = "Time";
pub const FLIPPED: &str = "Flipped";
pub const LEG: &str = "Leg";
pub const ID: &str = "ID";
pub const RUN: &str = "Run";
pub const STEPCYCLE: &str = "Stepcycle";
pub const SC_PERCENTAGE: &str = "SC Percentage";
pub const SC_NUMBER: &str = "SC Number";

/// Slice of a subject's results written to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sheet {
    /// 2D: every cycle
    All,
    /// 3D: one leg
    Leg(Side),
    /// 3D: both legs pooled
    Both,
}

impl Sheet {
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            Sheet::All => None,
            Sheet::Leg(side) => Some(side.as_str()),
            Sheet::Both => Some("both"),
        }
    }
}

/// File stem of one artifact, e.g. `"M1 - Run 2 - Average Stepcycle"`
pub fn artifact_stem(label: &str, artifact: &str, sheet: Sheet) -> String {
    match sheet.suffix() {
        Some(suffix) => format!("{label} - {artifact} - {suffix}"),
        None => format!("{label} - {artifact}"),
    }
}

fn cycle_table(cycle: &CycleSeries, subject: &SubjectKey, dim: Dimensionality) -> Result<Table> {
    let n = cycle.len();
    let mut table = Table::with_rows(n);
    table.push_values(TIME, cycle.time.clone())?;
    match dim {
        Dimensionality::TwoD => {
            let flag = if cycle.flipped { "True" } else { "False" };
            table.push_labels(FLIPPED, vec![flag.to_string(); n])?;
        }
        Dimensionality::ThreeD => {
            let leg = cycle.side.map(|s| s.as_str()).unwrap_or_default();
            table.push_labels(LEG, vec![leg.to_string(); n])?;
        }
    }
    table.push_labels(ID, vec![subject.name.clone(); n])?;
    if let Some(run) = &subject.run {
        table.push_labels(RUN, vec![run.clone(); n])?;
    }
    table.push_values(STEPCYCLE, vec![cycle.ordinal as f64; n])?;
    for (key, values) in &cycle.columns {
        table.push_values(key.display(dim), values.clone())?;
    }
    Ok(table)
}

/// Cycles of one subject, separated by blank / ordinal / blank rows
pub fn cycles_table(cycles: &[CycleSeries], subject: &SubjectKey, dim: Dimensionality) -> Result<Table> {
    let mut parts = Vec::with_capacity(cycles.len() * 2);
    for (i, cycle) in cycles.iter().enumerate() {
        let table = cycle_table(cycle, subject, dim)?;
        if i > 0 {
            let mut separator = table.take_rows(&[]);
            separator.push_blank_rows(1);
            separator.push_constant_row(cycle.ordinal as f64);
            separator.push_blank_rows(1);
            parts.push(separator);
        }
        parts.push(table);
    }
    Ok(Table::vstack(&parts))
}

fn summary_table(summary: &SubjectSummary, values: &[Vec<f64>], dim: Dimensionality) -> Result<Table> {
    let bins = summary.bins();
    let mut table = Table::with_rows(bins);
    table.push_values(SC_PERCENTAGE, summary.percentages.clone())?;
    table.push_labels(ID, vec![summary.id.clone(); bins])?;
    table.push_values(SC_NUMBER, vec![summary.sc_number as f64; bins])?;
    for (key, column) in summary.keys.iter().zip(values) {
        table.push_values(key.display(dim), column.clone())?;
    }
    Ok(table)
}

pub fn average_table(summary: &SubjectSummary, dim: Dimensionality) -> Result<Table> {
    summary_table(summary, &summary.mean, dim)
}

pub fn std_table(summary: &SubjectSummary, dim: Dimensionality) -> Result<Table> {
    summary_table(summary, &summary.std, dim)
}

/// Row ranges of the cycles in a table written by [`cycles_table`].
///
/// A row with a missing `Time` opens a separator triplet; the two rows
/// that follow it are skipped as well.
pub fn cycle_rows(table: &Table) -> Result<Vec<Range<usize>>> {
    let time = table.require_values(TIME)?;
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    let mut row = 0;
    while row < time.len() {
        if time[row].is_nan() {
            if let Some(s) = start.take() {
                ranges.push(s..row);
            }
            row += 3;
            continue;
        }
        start.get_or_insert(row);
        row += 1;
    }
    if let Some(s) = start {
        ranges.push(s..time.len());
    }
    if ranges.is_empty() {
        return Err(Error::IoFormat("table holds no step cycles".into()));
    }
    Ok(ranges)
}
