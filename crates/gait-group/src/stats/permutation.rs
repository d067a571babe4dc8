//! Cluster-extent permutation test across the normalized step cycle.
//!
//! First level: Welch t-test per bin, bins with `p < 0.05` form clusters
//! whose mass is the summed `|t|`. Second level: group labels are shuffled
//! at the subject level and the largest cluster mass over every contrast is
//! collected per permutation; a cluster's p-value is the share of
//! permutations reaching its mass.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use gait_core::{kinematics, Error, Result};

use super::distributions::t_two_sided;
use super::{clusters, FeatureSamples};

/// First-level significance threshold of the per-bin t-tests
pub const FIRST_LEVEL_ALPHA: f64 = 0.05;

/// One run of first-level significant bins
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// First bin, zero-based
    pub start: usize,
    /// Last bin, inclusive
    pub end: usize,
    /// Summed `|t|` over the cluster
    pub mass: f64,
    pub p: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContrastClusters {
    pub contrast: String,
    pub t: Vec<f64>,
    pub p: Vec<f64>,
    pub clusters: Vec<Cluster>,
}

impl ContrastClusters {
    /// Cluster mass assigned to every bin of its cluster, zero elsewhere
    pub fn mass_per_bin(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.t.len()];
        for cluster in &self.clusters {
            for m in &mut out[cluster.start..=cluster.end] {
                *m = cluster.mass;
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermutationResult {
    pub feature: String,
    pub permutations: usize,
    pub contrasts: Vec<ContrastClusters>,
    /// Largest cluster mass of each permutation
    pub null_masses: Vec<f64>,
}

/// Welch t statistic and two-sided p-value of two samples
pub fn welch_t(a: &[f64], b: &[f64]) -> (f64, f64) {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    if a.len() < 2 || b.len() < 2 {
        return (f64::NAN, f64::NAN);
    }
    let (va, vb) = (kinematics::sample_variance(a), kinematics::sample_variance(b));
    let (sa, sb) = (va / na, vb / nb);
    let se = (sa + sb).sqrt();
    if se == 0.0 || se.is_nan() {
        return (f64::NAN, f64::NAN);
    }
    let t = (kinematics::mean(a) - kinematics::mean(b)) / se;
    let df = (sa + sb).powi(2) / (sa * sa / (na - 1.0) + sb * sb / (nb - 1.0));
    (t, t_two_sided(t, df))
}

// Per-bin (t, p) of one contrast given each subject's curve
fn first_level(curves_a: &[&[f64]], curves_b: &[&[f64]], bins: usize) -> (Vec<f64>, Vec<f64>) {
    (0..bins)
        .map(|bin| {
            let pick = |curves: &[&[f64]]| -> Vec<f64> {
                curves.iter().map(|c| c[bin]).filter(|v| !v.is_nan()).collect()
            };
            welch_t(&pick(curves_a), &pick(curves_b))
        })
        .unzip()
}

fn masses(t: &[f64], p: &[f64]) -> Vec<(usize, usize, f64)> {
    let mask: Vec<bool> = p.iter().map(|&p| p < FIRST_LEVEL_ALPHA).collect();
    clusters(&mask)
        .into_iter()
        .map(|r| {
            let mass = t[r.clone()].iter().map(|t| t.abs()).sum();
            (r.start, r.end - 1, mass)
        })
        .collect()
}

// Cut a pooled subject order back into groups of the given sizes
fn split<'s>(order: &[&'s [f64]], sizes: &[usize]) -> Vec<Vec<&'s [f64]>> {
    let mut out = Vec::with_capacity(sizes.len());
    let mut offset = 0;
    for &n in sizes {
        out.push(order[offset..offset + n].to_vec());
        offset += n;
    }
    out
}

/// Run the cluster-extent permutation test for one feature.
///
/// The same `seed` and `permutations` reproduce identical p-values.
pub fn permutation_test(
    samples: &FeatureSamples,
    permutations: usize,
    alpha: f64,
    seed: u64,
) -> Result<PermutationResult> {
    if permutations == 0 {
        return Err(Error::ConfigInvalid(
            "permutation_number must be at least 1".into(),
        ));
    }
    let bins = samples.bins();
    let contrasts = samples.contrasts();

    let mut pooled: Vec<&[f64]> = Vec::new();
    let mut sizes = Vec::with_capacity(samples.groups.len());
    for group in &samples.groups {
        sizes.push(group.curves.len());
        pooled.extend(group.curves.iter().map(|c| c.as_slice()));
    }
    let observed_groups = split(&pooled, &sizes);
    let observed: Vec<(Vec<f64>, Vec<f64>)> = contrasts
        .iter()
        .map(|&(a, b)| first_level(&observed_groups[a], &observed_groups[b], bins))
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut shuffled = pooled.clone();
    let mut null_masses = Vec::with_capacity(permutations);
    for _ in 0..permutations {
        shuffled.shuffle(&mut rng);
        let groups = split(&shuffled, &sizes);
        let max = contrasts
            .iter()
            .flat_map(|&(a, b)| {
                let (t, p) = first_level(&groups[a], &groups[b], bins);
                masses(&t, &p).into_iter().map(|(_, _, m)| m)
            })
            .fold(0.0, f64::max);
        null_masses.push(max);
    }

    let contrasts = contrasts
        .iter()
        .zip(observed)
        .map(|(&pair, (t, p))| {
            let clusters = masses(&t, &p)
                .into_iter()
                .map(|(start, end, mass)| {
                    let reached = null_masses.iter().filter(|&&m| m >= mass).count();
                    let p = reached as f64 / permutations as f64;
                    Cluster {
                        start,
                        end,
                        mass,
                        p,
                        significant: p < alpha,
                    }
                })
                .collect();
            ContrastClusters {
                contrast: samples.contrast_label(pair),
                t,
                p,
                clusters,
            }
        })
        .collect();

    tracing::debug!(feature = %samples.feature, permutations, "Permutation test finished");
    Ok(PermutationResult {
        feature: samples.feature.clone(),
        permutations,
        contrasts,
        null_masses,
    })
}
