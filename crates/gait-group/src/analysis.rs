//! Group analysis driver: load, check, aggregate, PCA, statistics, persist.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use gait_core::{AnovaDesign, Error, GroupConfig, IssueLog, Result};
use gait_cycle::export::{
    AVERAGE_STEPCYCLE, NORMALISED_STEPCYCLES, ORIGINAL_STEPCYCLES, STD_STEPCYCLE,
    X_STANDARDISED_STEPCYCLES,
};
use gait_cycle::normalize::sc_percentages;
use gait_io::{ensure_format, TableStore};

use crate::grand::{grand_average, GrandSummary, GRAND_AVERAGE_STEPCYCLE, GRAND_STD_STEPCYCLE};
use crate::loader::{feature_samples, group_sheet, output_format, GroupData, GroupLoader};
use crate::pca::{run_pca, PcaResult, PCA_LOADINGS, PCA_RESULTS};
use crate::stats::anova::anova;
use crate::stats::{permutation_test, tukey_per_bin, AnovaTable, PermutationResult, TukeyTable};

pub const STATS_SUMMARY_FILENAME: &str = "Stats Summary.txt";
pub const TUKEY_PVALUES: &str = "Tukey pvalues";

/// Statistics of one feature
#[derive(Debug, Clone)]
pub struct FeatureStats {
    pub feature: String,
    pub permutation: Option<PermutationResult>,
    pub anova: Option<AnovaTable>,
    /// Why the ANOVA did not run although it was requested
    pub anova_skipped: Option<String>,
    pub tukey: Option<TukeyTable>,
}

/// Everything a group analysis produced
#[derive(Debug)]
pub struct GroupReport {
    pub results_dir: PathBuf,
    pub groups: Vec<String>,
    pub grand: Vec<GrandSummary>,
    pub pca: Option<PcaResult>,
    pub stats: Vec<FeatureStats>,
    pub written: Vec<PathBuf>,
    pub issues: usize,
}

/// Run the group stage over finished subject results.
///
/// Sanity failures (bin counts, configuration snapshots) abort before
/// anything is written. An ANOVA whose design does not fit the subject IDs
/// is skipped and logged; Tukey HSD still runs.
pub fn run_group_analysis(config: &GroupConfig, store: &dyn TableStore) -> Result<GroupReport> {
    config.check()?;
    let sheet = group_sheet(config);

    let mut loader = GroupLoader::new(store, sheet);
    let groups = config
        .group_names
        .iter()
        .zip(&config.group_dirs)
        .map(|(name, dir)| loader.load(name, dir))
        .collect::<Result<Vec<_>>>()?;
    let bins = groups.first().map_or(0, |g| g.bins);

    ensure_format(store, output_format(&groups, config.save_to_xls))?;
    fs::create_dir_all(&config.results_dir)?;
    let log = IssueLog::in_dir("Group analysis", &config.results_dir);
    let out = |stem: &str| config.results_dir.join(stem);

    let mut written = Vec::new();
    let mut grand = Vec::with_capacity(groups.len());
    for group in &groups {
        written.extend(write_group_tables(group, &config.results_dir, store)?);
        let summary = grand_average(group)?;
        written.push(store.write(
            &out(&format!("{} - {GRAND_AVERAGE_STEPCYCLE}", group.name)),
            &summary.average_table()?,
        )?);
        written.push(store.write(
            &out(&format!("{} - {GRAND_STD_STEPCYCLE}", group.name)),
            &summary.std_table()?,
        )?);
        grand.push(summary);
    }

    let pca = if config.pca_variables.is_empty() {
        None
    } else {
        let result = run_pca(&groups, config, bins)?;
        written.push(store.write(&out(PCA_RESULTS), &result.scores_table()?)?);
        written.push(store.write(&out(PCA_LOADINGS), &result.loadings_table()?)?);
        Some(result)
    };

    let mut stats = Vec::with_capacity(config.stats_variables.len());
    for feature in &config.stats_variables {
        let feature_stats = feature_statistics(&groups, feature, config, &log)?;
        if let Some(tukey) = &feature_stats.tukey {
            written.push(store.write(
                &out(&format!("{feature} - {TUKEY_PVALUES}")),
                &tukey.to_table()?,
            )?);
        }
        stats.push(feature_stats);
    }
    if !stats.is_empty() {
        let path = out(STATS_SUMMARY_FILENAME);
        fs::write(&path, stats_summary(&stats, config))?;
        written.push(path);
    }

    tracing::info!(
        groups = groups.len(),
        features = stats.len(),
        files = written.len(),
        "Group analysis finished"
    );
    Ok(GroupReport {
        results_dir: config.results_dir.clone(),
        groups: groups.into_iter().map(|g| g.name).collect(),
        grand,
        pca,
        stats,
        written,
        issues: log.len(),
    })
}

fn write_group_tables(group: &GroupData, dir: &Path, store: &dyn TableStore) -> Result<Vec<PathBuf>> {
    let stem = |artifact: &str| dir.join(format!("{} - {artifact}", group.name));
    let mut written = vec![
        store.write(&stem(ORIGINAL_STEPCYCLES), &group.original)?,
        store.write(&stem(NORMALISED_STEPCYCLES), &group.normalized)?,
    ];
    if let Some(x) = &group.x_standardised {
        written.push(store.write(&stem(X_STANDARDISED_STEPCYCLES), x)?);
    }
    written.push(store.write(&stem(AVERAGE_STEPCYCLE), &group.averages)?);
    written.push(store.write(&stem(STD_STEPCYCLE), &group.stds)?);
    Ok(written)
}

fn feature_statistics(
    groups: &[GroupData],
    feature: &str,
    config: &GroupConfig,
    log: &IssueLog,
) -> Result<FeatureStats> {
    let samples = feature_samples(groups, feature)?;
    let alpha = config.stats_threshold;

    let permutation = if config.do_permtest {
        Some(permutation_test(
            &samples,
            config.permutation_number,
            alpha,
            config.permutation_seed,
        )?)
    } else {
        None
    };

    let (anova, anova_skipped, tukey) = if config.do_anova {
        let (table, skipped) = match anova(&samples, config.anova_design) {
            Ok(table) => (Some(table), None),
            Err(Error::ConfigInvalid(why)) => {
                log.record(format!("{feature}: ANOVA skipped, {why}"));
                (None, Some(why))
            }
            Err(e) => return Err(e),
        };
        (table, skipped, Some(tukey_per_bin(&samples, alpha)))
    } else {
        (None, None, None)
    };

    Ok(FeatureStats {
        feature: feature.to_string(),
        permutation,
        anova,
        anova_skipped,
        tukey,
    })
}

fn bin_span(percentages: &[f64], start: usize, end: usize) -> String {
    format!("{:.1}% - {:.1}%", percentages[start], percentages[end])
}

/// Plain-text report of every feature's statistics
pub fn stats_summary(stats: &[FeatureStats], config: &GroupConfig) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Groups: {}", config.group_names.join(", "));
    let _ = writeln!(text, "Alpha: {}", config.stats_threshold);

    for feature in stats {
        let _ = writeln!(text, "\n*** {} ***", feature.feature);

        if let Some(perm) = &feature.permutation {
            let _ = writeln!(text, "\nCluster-extent permutation test ({} permutations)", perm.permutations);
            let percentages = sc_percentages(perm.contrasts.first().map_or(0, |c| c.t.len()));
            for contrast in &perm.contrasts {
                if contrast.clusters.is_empty() {
                    let _ = writeln!(text, "{}: no cluster", contrast.contrast);
                }
                for cluster in &contrast.clusters {
                    let _ = writeln!(
                        text,
                        "{}: cluster {} | mass {:.3} | p = {:.4}{}",
                        contrast.contrast,
                        bin_span(&percentages, cluster.start, cluster.end),
                        cluster.mass,
                        cluster.p,
                        if cluster.significant { " | significant" } else { "" }
                    );
                }
            }
        }

        if let Some(why) = &feature.anova_skipped {
            let _ = writeln!(text, "\nANOVA skipped: {why}");
        }
        if let Some(table) = &feature.anova {
            let design = match table.design {
                AnovaDesign::RepeatedMeasures => "RM ANOVA",
                AnovaDesign::Mixed => "Mixed ANOVA",
            };
            let _ = writeln!(text, "\n{design} ({} subjects)", table.subjects);
            for e in &table.effects {
                let _ = write!(
                    text,
                    "{}: F({}, {}) = {:.3}, p = {:.4}",
                    e.source, e.df1, e.df2, e.f, e.p
                );
                if let (Some(eps), Some(p_gg)) = (e.epsilon, e.p_gg) {
                    let _ = write!(text, ", GG epsilon = {eps:.3}, p-GG-corr = {p_gg:.4}");
                }
                text.push('\n');
            }
        }

        if let Some(tukey) = &feature.tukey {
            let _ = writeln!(text, "\nTukey HSD");
            for (contrast, runs) in tukey.clusters() {
                if runs.is_empty() {
                    let _ = writeln!(text, "{contrast}: no significant bins");
                }
                for run in runs {
                    let _ = writeln!(
                        text,
                        "{contrast}: significant {}",
                        bin_span(&tukey.percentages, run.start, run.end - 1)
                    );
                }
            }
        }
    }
    text
}
