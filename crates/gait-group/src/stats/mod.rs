//! Statistics engine: cluster-extent permutation test, RM / Mixed ANOVA and
//! per-bin Tukey HSD.
//!
//! Every procedure works on [`FeatureSamples`]: one feature, every group,
//! one value per subject and bin of the normalized step cycle.

pub mod anova;
pub mod distributions;
pub mod permutation;
pub mod tukey;

pub use anova::{check_design, AnovaEffect, AnovaTable};
pub use permutation::{permutation_test, Cluster, ContrastClusters, PermutationResult};
pub use tukey::{tukey_hsd, tukey_per_bin, TukeyComparison, TukeyTable};

use std::ops::Range;

use serde::Serialize;

use gait_core::kinematics;

/// Subject averages of one group for one feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSamples {
    pub name: String,
    pub ids: Vec<String>,
    /// One curve of `bins` values per subject, aligned with `ids`
    pub curves: Vec<Vec<f64>>,
}

impl GroupSamples {
    /// Non-missing subject values at one bin
    pub fn at_bin(&self, bin: usize) -> Vec<f64> {
        self.curves
            .iter()
            .map(|c| c[bin])
            .filter(|v| !v.is_nan())
            .collect()
    }

    pub fn curve_of(&self, id: &str) -> Option<&[f64]> {
        self.ids
            .iter()
            .position(|i| i == id)
            .map(|i| self.curves[i].as_slice())
    }
}

/// Long-form input of the statistics engine for one feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSamples {
    pub feature: String,
    pub percentages: Vec<f64>,
    pub groups: Vec<GroupSamples>,
}

impl FeatureSamples {
    pub fn bins(&self) -> usize {
        self.percentages.len()
    }

    /// Group index pairs `(i, j)` with `i < j`, in configuration order
    pub fn contrasts(&self) -> Vec<(usize, usize)> {
        let n = self.groups.len();
        (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect()
    }

    pub fn contrast_label(&self, (a, b): (usize, usize)) -> String {
        format!("{} vs {}", self.groups[a].name, self.groups[b].name)
    }

    /// Mean curve of one group
    pub fn group_mean(&self, group: usize) -> Vec<f64> {
        (0..self.bins())
            .map(|bin| kinematics::mean(&self.groups[group].at_bin(bin)))
            .collect()
    }
}

/// Runs of consecutive `true` bins
pub fn clusters(mask: &[bool]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, &on) in mask.iter().enumerate() {
        match (on, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(s..mask.len());
    }
    out
}

/// Three-tier significance label of a p-value
pub fn significance_label(p: f64) -> &'static str {
    if p < 0.001 {
        "***"
    } else if p < 0.01 {
        "**"
    } else if p < 0.05 {
        "*"
    } else {
        "n.s."
    }
}
