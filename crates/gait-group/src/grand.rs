//! Grand average and SD of a group across its subjects.

use ndarray::Array2;

use gait_core::{Error, Result, Table};
use gait_cycle::aggregate::row_statistics;
use gait_cycle::export::{ID, SC_PERCENTAGE};
use gait_cycle::normalize::sc_percentages;

use crate::loader::GroupData;

pub const GRAND_AVERAGE_STEPCYCLE: &str = "Grand Average Stepcycle";
pub const GRAND_STD_STEPCYCLE: &str = "Grand Standard Deviation Stepcycle";
pub const N: &str = "N";

/// Mean and sample SD over subject averages, per feature and bin
#[derive(Debug, Clone, PartialEq)]
pub struct GrandSummary {
    pub group: String,
    /// Subjects (IDs) that entered the summary
    pub n: usize,
    pub percentages: Vec<f64>,
    pub features: Vec<String>,
    pub mean: Vec<Vec<f64>>,
    pub std: Vec<Vec<f64>>,
}

impl GrandSummary {
    fn table(&self, values: &[Vec<f64>]) -> Result<Table> {
        let bins = self.percentages.len();
        let mut table = Table::with_rows(bins);
        table.push_values(N, vec![self.n as f64; bins])?;
        table.push_values(SC_PERCENTAGE, self.percentages.clone())?;
        for (feature, column) in self.features.iter().zip(values) {
            table.push_values(feature.clone(), column.clone())?;
        }
        Ok(table)
    }

    pub fn average_table(&self) -> Result<Table> {
        self.table(&self.mean)
    }

    pub fn std_table(&self) -> Result<Table> {
        self.table(&self.std)
    }
}

/// Grand average of one group.
///
/// `ID`, `SC Number` and `SC Percentage` are bookkeeping and never averaged.
pub fn grand_average(group: &GroupData) -> Result<GrandSummary> {
    let ids = group.ids();
    if ids.is_empty() {
        return Err(Error::InputMissing(format!("group {} has no subject averages", group.name)));
    }
    let bins = group.bins;
    let per_id: Vec<Table> = ids.iter().map(|id| group.averages.filter_label(ID, id)).collect();

    let mut mean = Vec::with_capacity(group.features.len());
    let mut std = Vec::with_capacity(group.features.len());
    for feature in &group.features {
        let columns = per_id
            .iter()
            .map(|t| t.require_values(feature))
            .collect::<Result<Vec<_>>>()?;
        let matrix = Array2::from_shape_fn((bins, columns.len()), |(b, s)| columns[s][b]);
        let (m, s) = row_statistics(matrix.view());
        mean.push(m);
        std.push(s);
    }

    Ok(GrandSummary {
        group: group.name.clone(),
        n: ids.len(),
        percentages: sc_percentages(bins),
        features: group.features.clone(),
        mean,
        std,
    })
}
