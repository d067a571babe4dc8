//! One-way repeated-measures and mixed ANOVA over the step cycle.
//!
//! Both designs carry `SC Percentage` as a within-subject factor. In the RM
//! design `Group` is a second within factor (every subject measured in every
//! group); in the mixed design it is a between factor (disjoint subjects).
//! Within effects are reported with and without the Greenhouse-Geisser
//! correction.

use std::collections::BTreeSet;

use nalgebra::DMatrix;
use ndarray::{Array2, Array3, Axis};
use serde::Serialize;

use gait_core::{AnovaDesign, Error, Result};

use super::distributions::f_sf;
use super::FeatureSamples;

pub const GROUP_FACTOR: &str = "Group";
pub const BIN_FACTOR: &str = "SC Percentage";
pub const INTERACTION: &str = "Group * SC Percentage";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnovaEffect {
    pub source: String,
    pub ss: f64,
    pub df1: f64,
    pub df2: f64,
    pub ms: f64,
    pub f: f64,
    pub p: f64,
    /// Greenhouse-Geisser epsilon, within effects only
    pub epsilon: Option<f64>,
    pub p_gg: Option<f64>,
}

impl AnovaEffect {
    fn new(source: &str, ss: f64, df1: f64, ss_error: f64, df2: f64, epsilon: Option<f64>) -> Self {
        let ms = ss / df1;
        let f = ms / (ss_error / df2);
        let p = f_sf(f, df1, df2);
        Self {
            source: source.to_string(),
            ss,
            df1,
            df2,
            ms,
            f,
            p,
            epsilon,
            p_gg: epsilon.map(|e| f_sf(f, df1 * e, df2 * e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnovaTable {
    pub feature: String,
    pub design: AnovaDesign,
    /// Subjects that entered the model
    pub subjects: usize,
    pub effects: Vec<AnovaEffect>,
}

impl AnovaTable {
    pub fn effect(&self, source: &str) -> Option<&AnovaEffect> {
        self.effects.iter().find(|e| e.source == source)
    }
}

/// Verify that subject IDs fit the requested design.
///
/// RM needs every ID in every group; Mixed needs disjoint IDs.
pub fn check_design(samples: &FeatureSamples, design: AnovaDesign) -> Result<()> {
    let sets: Vec<BTreeSet<&str>> = samples
        .groups
        .iter()
        .map(|g| g.ids.iter().map(String::as_str).collect())
        .collect();
    let all: BTreeSet<&str> = sets.iter().flatten().copied().collect();

    match design {
        AnovaDesign::RepeatedMeasures => {
            let shared: BTreeSet<&str> = all
                .iter()
                .copied()
                .filter(|id| sets.iter().all(|s| s.contains(id)))
                .collect();
            if shared.is_empty() {
                return Err(Error::ConfigInvalid(
                    "RM ANOVA requires the same subjects in every group, but the groups share no IDs"
                        .into(),
                ));
            }
            let missing: Vec<&str> = all.difference(&shared).copied().collect();
            if !missing.is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "RM ANOVA requires the same subjects in every group; not in every group: {}",
                    missing.join(", ")
                )));
            }
        }
        AnovaDesign::Mixed => {
            let shared: Vec<&str> = all
                .iter()
                .copied()
                .filter(|id| sets.iter().filter(|s| s.contains(id)).count() > 1)
                .collect();
            if !shared.is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "Mixed ANOVA requires different subjects in each group; found in several groups: {}",
                    shared.join(", ")
                )));
            }
        }
    }
    Ok(())
}

/// Check the design, then fit it
pub fn anova(samples: &FeatureSamples, design: AnovaDesign) -> Result<AnovaTable> {
    check_design(samples, design)?;
    match design {
        AnovaDesign::RepeatedMeasures => rm_anova(samples),
        AnovaDesign::Mixed => mixed_anova(samples),
    }
}

/// Orthonormal Helmert contrasts, `k × (k - 1)`
fn helmert(k: usize) -> DMatrix<f64> {
    DMatrix::from_fn(k, k.saturating_sub(1), |i, j| {
        let norm = (((j + 1) * (j + 2)) as f64).sqrt();
        if i <= j {
            1.0 / norm
        } else if i == j + 1 {
            -((j + 1) as f64) / norm
        } else {
            0.0
        }
    })
}

fn averaging(k: usize) -> DMatrix<f64> {
    DMatrix::from_element(k, 1, 1.0 / (k as f64).sqrt())
}

/// Greenhouse-Geisser epsilon of the effect spanned by `contrast`, given
/// one row of repeated measurements per subject
pub fn gg_epsilon(data: &DMatrix<f64>, contrast: &DMatrix<f64>) -> f64 {
    let d = contrast.ncols();
    let n = data.nrows();
    if d <= 1 || n < 2 {
        return 1.0;
    }
    let mut centered = data.clone();
    for mut column in centered.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
    let cov = centered.transpose() * &centered / (n as f64 - 1.0);
    let s = contrast.transpose() * cov * contrast;
    let trace = s.trace();
    let trace_sq = (&s * &s).trace();
    if trace_sq <= 0.0 {
        return 1.0;
    }
    (trace * trace / (d as f64 * trace_sq)).min(1.0)
}

/// Two-way RM ANOVA with `Group` and `SC Percentage` as within factors
pub fn rm_anova(samples: &FeatureSamples) -> Result<AnovaTable> {
    let a = samples.groups.len();
    let b = samples.bins();
    let ids: Vec<&String> = samples
        .groups
        .first()
        .map(|g| g.ids.iter().collect())
        .unwrap_or_default();

    let mut rows: Vec<Vec<f64>> = Vec::new();
    for id in ids {
        let mut cells = Vec::with_capacity(a * b);
        for group in &samples.groups {
            match group.curve_of(id) {
                Some(curve) => cells.extend_from_slice(curve),
                None => cells.extend(std::iter::repeat(f64::NAN).take(b)),
            }
        }
        if cells.iter().all(|v| !v.is_nan()) {
            rows.push(cells);
        }
    }
    let n = rows.len();
    if n < 2 || a < 2 || b < 2 {
        return Err(Error::ConfigInvalid(format!(
            "RM ANOVA of {} needs at least two complete subjects, groups and bins",
            samples.feature
        )));
    }

    let y = Array3::from_shape_fn((n, a, b), |(s, g, j)| rows[s][g * b + j]);
    let gm = y.iter().sum::<f64>() / (n * a * b) as f64;
    let subj = y.mean_axis(Axis(2)).and_then(|m| m.mean_axis(Axis(1)));
    let grp = y.mean_axis(Axis(2)).and_then(|m| m.mean_axis(Axis(0)));
    let bin = y.mean_axis(Axis(1)).and_then(|m| m.mean_axis(Axis(0)));
    let subj_grp = y.mean_axis(Axis(2));
    let subj_bin = y.mean_axis(Axis(1));
    let grp_bin = y.mean_axis(Axis(0));
    let (Some(subj), Some(grp), Some(bin), Some(subj_grp), Some(subj_bin), Some(grp_bin)) =
        (subj, grp, bin, subj_grp, subj_bin, grp_bin)
    else {
        return Err(Error::ConfigInvalid("RM ANOVA on empty data".into()));
    };

    let (nf, af, bf) = (n as f64, a as f64, b as f64);
    let ss_total: f64 = y.iter().map(|v| (v - gm).powi(2)).sum();
    let ss_a = nf * bf * grp.iter().map(|m| (m - gm).powi(2)).sum::<f64>();
    let ss_b = nf * af * bin.iter().map(|m| (m - gm).powi(2)).sum::<f64>();
    let ss_s = af * bf * subj.iter().map(|m| (m - gm).powi(2)).sum::<f64>();

    let mut ss_as = 0.0;
    for ((s, g), m) in subj_grp.indexed_iter() {
        ss_as += (m - grp[g] - subj[s] + gm).powi(2);
    }
    ss_as *= bf;
    let mut ss_bs = 0.0;
    for ((s, j), m) in subj_bin.indexed_iter() {
        ss_bs += (m - bin[j] - subj[s] + gm).powi(2);
    }
    ss_bs *= af;
    let mut ss_ab = 0.0;
    for ((g, j), m) in grp_bin.indexed_iter() {
        ss_ab += (m - grp[g] - bin[j] + gm).powi(2);
    }
    ss_ab *= nf;
    let ss_abs = ss_total - ss_a - ss_b - ss_s - ss_as - ss_bs - ss_ab;

    let data = DMatrix::from_fn(n, a * b, |s, c| rows[s][c]);
    let eps_a = gg_epsilon(&data, &helmert(a).kronecker(&averaging(b)));
    let eps_b = gg_epsilon(&data, &averaging(a).kronecker(&helmert(b)));
    let eps_ab = gg_epsilon(&data, &helmert(a).kronecker(&helmert(b)));

    let effects = vec![
        AnovaEffect::new(GROUP_FACTOR, ss_a, af - 1.0, ss_as, (af - 1.0) * (nf - 1.0), Some(eps_a)),
        AnovaEffect::new(BIN_FACTOR, ss_b, bf - 1.0, ss_bs, (bf - 1.0) * (nf - 1.0), Some(eps_b)),
        AnovaEffect::new(
            INTERACTION,
            ss_ab,
            (af - 1.0) * (bf - 1.0),
            ss_abs,
            (af - 1.0) * (bf - 1.0) * (nf - 1.0),
            Some(eps_ab),
        ),
    ];

    Ok(AnovaTable {
        feature: samples.feature.clone(),
        design: AnovaDesign::RepeatedMeasures,
        subjects: n,
        effects,
    })
}

/// Split-plot ANOVA with `Group` between and `SC Percentage` within subjects
pub fn mixed_anova(samples: &FeatureSamples) -> Result<AnovaTable> {
    let b = samples.bins();
    let mut curves: Vec<&[f64]> = Vec::new();
    let mut membership: Vec<usize> = Vec::new();
    for (g, group) in samples.groups.iter().enumerate() {
        for curve in &group.curves {
            if curve.iter().all(|v| !v.is_nan()) {
                curves.push(curve);
                membership.push(g);
            }
        }
    }
    let a = samples.groups.len();
    let sizes: Vec<usize> = (0..a)
        .map(|g| membership.iter().filter(|&&m| m == g).count())
        .collect();
    let n = curves.len();
    if sizes.iter().any(|&s| s == 0) || n <= a || b < 2 {
        return Err(Error::ConfigInvalid(format!(
            "Mixed ANOVA of {} needs complete subjects in every group and more subjects than groups",
            samples.feature
        )));
    }

    let y = Array2::from_shape_fn((n, b), |(s, j)| curves[s][j]);
    let (nf, af, bf) = (n as f64, a as f64, b as f64);
    let gm = y.iter().sum::<f64>() / (nf * bf);
    let subj: Vec<f64> = y.rows().into_iter().map(|r| r.sum() / bf).collect();
    let bin: Vec<f64> = y.columns().into_iter().map(|c| c.sum() / nf).collect();

    let mut grp = vec![0.0; a];
    let mut cell = Array2::<f64>::zeros((a, b));
    for (s, &g) in membership.iter().enumerate() {
        grp[g] += subj[s] / sizes[g] as f64;
        for j in 0..b {
            cell[[g, j]] += y[[s, j]] / sizes[g] as f64;
        }
    }

    let ss_total: f64 = y.iter().map(|v| (v - gm).powi(2)).sum();
    let ss_groups = bf * (0..a).map(|g| sizes[g] as f64 * (grp[g] - gm).powi(2)).sum::<f64>();
    let ss_subjects = bf * subj.iter().map(|m| (m - gm).powi(2)).sum::<f64>();
    let ss_between_error = ss_subjects - ss_groups;
    let ss_bins = nf * bin.iter().map(|m| (m - gm).powi(2)).sum::<f64>();
    let ss_cells: f64 = cell
        .indexed_iter()
        .map(|((g, _), m)| sizes[g] as f64 * (m - gm).powi(2))
        .sum();
    let ss_interaction = ss_cells - ss_groups - ss_bins;
    let ss_within_error = ss_total - ss_subjects - ss_bins - ss_interaction;

    let data = DMatrix::from_fn(n, b, |s, j| y[[s, j]]);
    let eps = gg_epsilon(&data, &helmert(b));
    let df_between_error = nf - af;
    let df_within_error = (nf - af) * (bf - 1.0);

    let effects = vec![
        AnovaEffect::new(GROUP_FACTOR, ss_groups, af - 1.0, ss_between_error, df_between_error, None),
        AnovaEffect::new(BIN_FACTOR, ss_bins, bf - 1.0, ss_within_error, df_within_error, Some(eps)),
        AnovaEffect::new(
            INTERACTION,
            ss_interaction,
            (af - 1.0) * (bf - 1.0),
            ss_within_error,
            df_within_error,
            Some(eps),
        ),
    ];

    Ok(AnovaTable {
        feature: samples.feature.clone(),
        design: AnovaDesign::Mixed,
        subjects: n,
        effects,
    })
}
