//! Tukey HSD across groups at every bin.

use std::ops::Range;

use serde::Serialize;

use gait_core::{kinematics, Result, Table};

use super::distributions::{qtukey, tukey_sf};
use super::{clusters, significance_label, FeatureSamples};

/// One pairwise comparison of a Tukey HSD
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TukeyComparison {
    pub contrast: String,
    /// Mean of the second group minus mean of the first
    pub mean_diff: f64,
    /// Studentized range statistic
    pub q: f64,
    pub p: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub reject: bool,
    pub significance: &'static str,
}

/// Tukey HSD of named samples, contrasts `(i, j)` with `i < j`
pub fn tukey_hsd(groups: &[(&str, Vec<f64>)], alpha: f64) -> Vec<TukeyComparison> {
    tukey_hsd_with(groups, alpha, &mut CriticalValues::default())
}

#[derive(Default)]
struct CriticalValues {
    cache: Vec<((usize, u64), f64)>,
}

impl CriticalValues {
    fn get(&mut self, k: usize, df: f64, alpha: f64) -> f64 {
        let key = (k, df.to_bits() ^ alpha.to_bits());
        if let Some((_, q)) = self.cache.iter().find(|(k, _)| *k == key) {
            return *q;
        }
        let q = qtukey(1.0 - alpha, k as f64, df);
        self.cache.push((key, q));
        q
    }
}

fn tukey_hsd_with(groups: &[(&str, Vec<f64>)], alpha: f64, critical: &mut CriticalValues) -> Vec<TukeyComparison> {
    let k = groups.len();
    let n_total: usize = groups.iter().map(|(_, v)| v.len()).sum();
    let df = n_total as f64 - k as f64;

    let means: Vec<f64> = groups.iter().map(|(_, v)| kinematics::mean(v)).collect();
    let ss_within: f64 = groups
        .iter()
        .zip(&means)
        .map(|((_, v), m)| v.iter().map(|x| (x - m).powi(2)).sum::<f64>())
        .sum();
    let mse = ss_within / df;
    let q_crit = if df >= 2.0 && k >= 2 {
        critical.get(k, df, alpha)
    } else {
        f64::NAN
    };

    let mut out = Vec::new();
    for i in 0..k {
        for j in i + 1..k {
            let (ni, nj) = (groups[i].1.len() as f64, groups[j].1.len() as f64);
            let mean_diff = means[j] - means[i];
            let se = (mse / 2.0 * (1.0 / ni + 1.0 / nj)).sqrt();
            let (q, p) = if se > 0.0 && df >= 2.0 {
                let q = mean_diff.abs() / se;
                (q, tukey_sf(q, k as f64, df))
            } else {
                (f64::NAN, f64::NAN)
            };
            out.push(TukeyComparison {
                contrast: format!("{} vs {}", groups[i].0, groups[j].0),
                mean_diff,
                q,
                p,
                ci_lower: mean_diff - q_crit * se,
                ci_upper: mean_diff + q_crit * se,
                reject: p < alpha,
                significance: significance_label(p),
            });
        }
    }
    out
}

/// Tukey HSD of one feature at every bin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TukeyTable {
    pub feature: String,
    pub percentages: Vec<f64>,
    /// Comparisons of each bin, in contrast order
    pub bins: Vec<Vec<TukeyComparison>>,
}

pub fn tukey_per_bin(samples: &FeatureSamples, alpha: f64) -> TukeyTable {
    let mut critical = CriticalValues::default();
    let bins = (0..samples.bins())
        .map(|bin| {
            let groups: Vec<(&str, Vec<f64>)> = samples
                .groups
                .iter()
                .map(|g| (g.name.as_str(), g.at_bin(bin)))
                .collect();
            tukey_hsd_with(&groups, alpha, &mut critical)
        })
        .collect();

    TukeyTable {
        feature: samples.feature.clone(),
        percentages: samples.percentages.clone(),
        bins,
    }
}

impl TukeyTable {
    /// Contrast labels in comparison order
    pub fn contrasts(&self) -> Vec<&str> {
        self.bins
            .first()
            .map(|b| b.iter().map(|c| c.contrast.as_str()).collect())
            .unwrap_or_default()
    }

    /// Runs of consecutive bins where a contrast rejects H0
    pub fn clusters(&self) -> Vec<(String, Vec<Range<usize>>)> {
        self.contrasts()
            .iter()
            .enumerate()
            .map(|(c, label)| {
                let mask: Vec<bool> = self.bins.iter().map(|b| b[c].reject).collect();
                (label.to_string(), clusters(&mask))
            })
            .collect()
    }

    /// Table with a feature row followed by one row per bin and contrast
    pub fn to_table(&self) -> Result<Table> {
        let rows = 1 + self.bins.iter().map(Vec::len).sum::<usize>();
        let mut feature = vec![String::new(); rows];
        feature[0] = self.feature.clone();
        let mut contrast = vec![String::new()];
        let mut percentage = vec![f64::NAN];
        let mut mean_diff = vec![f64::NAN];
        let mut q = vec![f64::NAN];
        let mut p = vec![f64::NAN];
        let mut lower = vec![f64::NAN];
        let mut upper = vec![f64::NAN];
        let mut reject = vec![String::new()];
        let mut significance = vec![String::new()];

        for (pct, comparisons) in self.percentages.iter().zip(&self.bins) {
            for c in comparisons {
                contrast.push(c.contrast.clone());
                percentage.push(*pct);
                mean_diff.push(c.mean_diff);
                q.push(c.q);
                p.push(c.p);
                lower.push(c.ci_lower);
                upper.push(c.ci_upper);
                reject.push(if c.reject { "True" } else { "False" }.to_string());
                significance.push(c.significance.to_string());
            }
        }

        let mut table = Table::with_rows(rows);
        table.push_labels("Feature", feature)?;
        table.push_labels("Contrast", contrast)?;
        table.push_values("SC Percentage", percentage)?;
        table.push_values("Mean Diff", mean_diff)?;
        table.push_values("q", q)?;
        table.push_values("p", p)?;
        table.push_values("CI Lower", lower)?;
        table.push_values("CI Upper", upper)?;
        table.push_labels("Reject", reject)?;
        table.push_labels("Significance", significance)?;
        Ok(table)
    }
}
