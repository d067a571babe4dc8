//! Principal components of subject average curves.
//!
//! Every subject contributes one row: the concatenation of its average curve
//! of each PCA variable at the selected bins. Columns are z-scored with the
//! population SD before the SVD; a zero-variance column becomes all zeros.

use nalgebra::DMatrix;
use serde::Serialize;

use gait_core::{parse_pca_bins, parse_scatter_pcs, Error, GroupConfig, PcaComponents, Result, Table};

use crate::loader::GroupData;

pub const PCA_RESULTS: &str = "PCA Results";
pub const PCA_LOADINGS: &str = "PCA Loadings";

/// Label of component `i`, zero-based
pub fn pc_label(i: usize) -> String {
    format!("PC {}", i + 1)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PcaResult {
    pub variables: Vec<String>,
    /// Selected bins, zero-based
    pub bins: Vec<usize>,
    pub n_components: usize,
    pub explained_variance: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
    /// `"<variable> (bin <b>)"` per matrix column, bins one-based
    pub column_names: Vec<String>,
    pub groups: Vec<String>,
    pub ids: Vec<String>,
    /// Raw feature rows, one per subject
    pub features: Vec<Vec<f64>>,
    /// Subjects × components
    pub scores: Vec<Vec<f64>>,
    /// Components × columns
    pub loadings: Vec<Vec<f64>>,
    /// Component groups of the requested scatter plots, one-based
    pub scatter: Vec<Vec<usize>>,
}

impl PcaResult {
    /// `Group`, `ID`, the feature columns and `PC 1 … PC k`
    pub fn scores_table(&self) -> Result<Table> {
        let rows = self.ids.len();
        let mut table = Table::with_rows(rows);
        table.push_labels("Group", self.groups.clone())?;
        table.push_labels("ID", self.ids.clone())?;
        for (c, name) in self.column_names.iter().enumerate() {
            table.push_values(name.clone(), self.features.iter().map(|r| r[c]).collect())?;
        }
        for pc in 0..self.n_components {
            table.push_values(pc_label(pc), self.scores.iter().map(|r| r[pc]).collect())?;
        }
        Ok(table)
    }

    /// One row per component with its explained variance and loadings
    pub fn loadings_table(&self) -> Result<Table> {
        let mut table = Table::with_rows(self.n_components);
        table.push_labels("PC", (0..self.n_components).map(pc_label).collect())?;
        table.push_values("Explained Variance", self.explained_variance.clone())?;
        table.push_values("Explained Variance Ratio", self.explained_variance_ratio.clone())?;
        for (c, name) in self.column_names.iter().enumerate() {
            table.push_values(name.clone(), self.loadings.iter().map(|l| l[c]).collect())?;
        }
        Ok(table)
    }
}

fn dedupe(variables: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(variables.len());
    for v in variables {
        if unique.contains(v) {
            tracing::warn!(variable = %v, "PCA variable listed twice, using it once");
        } else {
            unique.push(v.clone());
        }
    }
    unique
}

fn standardize(data: &mut DMatrix<f64>) {
    let n = data.nrows() as f64;
    for mut column in data.column_iter_mut() {
        let mean = column.sum() / n;
        let sd = (column.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
        for x in column.iter_mut() {
            *x = if sd > 0.0 { (*x - mean) / sd } else { 0.0 };
        }
    }
}

/// Fit the PCA of every subject average across `groups`
pub fn run_pca(groups: &[GroupData], config: &GroupConfig, bin_num: usize) -> Result<PcaResult> {
    let variables = dedupe(&config.pca_variables);
    if variables.is_empty() {
        return Err(Error::ConfigInvalid("no PCA variables configured".into()));
    }
    let bins = parse_pca_bins(&config.pca_bins, bin_num)?;
    let width = variables.len() * bins.len();
    if let PcaComponents::Count(k) = config.pca_n_components {
        if width < k {
            return Err(Error::ConfigInvalid(format!(
                "{} PCA variables at {} bins give {width} features, fewer than {k} components",
                variables.len(),
                bins.len()
            )));
        }
    }

    let column_names: Vec<String> = variables
        .iter()
        .flat_map(|v| bins.iter().map(move |b| format!("{v} (bin {})", b + 1)))
        .collect();

    let mut group_labels = Vec::new();
    let mut ids = Vec::new();
    let mut features = Vec::new();
    for group in groups {
        let samples = variables
            .iter()
            .map(|v| group.samples(v))
            .collect::<Result<Vec<_>>>()?;
        for (s, id) in group.ids().into_iter().enumerate() {
            let row: Vec<f64> = samples
                .iter()
                .flat_map(|sample| bins.iter().map(move |&b| sample.curves[s][b]))
                .collect();
            if row.iter().any(|x| x.is_nan()) {
                tracing::warn!(group = %group.name, id = %id, "Subject has NaN PCA features, left out of the PCA");
                continue;
            }
            group_labels.push(group.name.clone());
            ids.push(id);
            features.push(row);
        }
    }

    let n = features.len();
    if n < 2 {
        return Err(Error::ConfigInvalid(format!(
            "PCA needs at least two subjects, {n} available"
        )));
    }
    let mut data = DMatrix::from_fn(n, width, |r, c| features[r][c]);
    standardize(&mut data);

    let svd = data.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(Error::ConfigInvalid("PCA decomposition failed".into()));
    };
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    let total: f64 = svd.singular_values.iter().map(|s| s * s).sum();
    let ratio: Vec<f64> = order
        .iter()
        .map(|&i| {
            let s = svd.singular_values[i];
            if total > 0.0 {
                s * s / total
            } else {
                0.0
            }
        })
        .collect();

    let n_components = match config.pca_n_components {
        PcaComponents::Count(k) => k,
        PcaComponents::Variance(target) => {
            let mut cumulative = 0.0;
            ratio
                .iter()
                .position(|r| {
                    cumulative += r;
                    cumulative >= target
                })
                .map_or(ratio.len(), |i| i + 1)
        }
    };
    if n_components > order.len() {
        return Err(Error::ConfigInvalid(format!(
            "{n_components} PCA components requested, but {n} subjects and {width} features allow {}",
            order.len()
        )));
    }

    let mut scores = vec![vec![0.0; n_components]; n];
    let mut loadings = Vec::with_capacity(n_components);
    let mut explained_variance = Vec::with_capacity(n_components);
    for (pc, &i) in order.iter().take(n_components).enumerate() {
        let s = svd.singular_values[i];
        let column = u.column(i);
        // largest |U| entry of each component is positive
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };

        for (r, row) in scores.iter_mut().enumerate() {
            row[pc] = sign * column[r] * s;
        }
        loadings.push(v_t.row(i).iter().map(|x| sign * x).collect());
        explained_variance.push(s * s / (n as f64 - 1.0));
    }

    let scatter = parse_scatter_pcs(&config.pca_custom_scatter_pcs, n_components)?;
    tracing::info!(
        subjects = n,
        features = width,
        n_components,
        explained = ratio.iter().take(n_components).sum::<f64>(),
        "PCA fitted"
    );

    Ok(PcaResult {
        variables,
        bins,
        n_components,
        explained_variance,
        explained_variance_ratio: ratio.into_iter().take(n_components).collect(),
        column_names,
        groups: group_labels,
        ids,
        features,
        scores,
        loadings,
        scatter,
    })
}
