//! Reassembly of per-subject results into group tables, with the
//! cross-subject sanity checks that gate the group stage.
//!
//! A subject directory counts as a result iff its original step-cycle
//! artifact exists. Bin counts and configuration snapshots must agree across
//! every subject of every group; the first loaded subject is the reference.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde_json::{Map, Value};

use gait_core::{
    Dimensionality, Error, GroupConfig, LegSelection, Result, Side, Table, PER_SUBJECT_KEYS,
};
use gait_cycle::aggregate::row_statistics;
use gait_cycle::export::{
    artifact_stem, cycle_rows, Sheet, AVERAGE_STEPCYCLE, ID, NORMALISED_STEPCYCLES,
    ORIGINAL_STEPCYCLES, SC_NUMBER, SC_PERCENTAGE, X_STANDARDISED_STEPCYCLES,
};
use gait_cycle::normalize::sc_percentages;
use gait_io::{ensure_format, read_snapshot, TableFormat, TableStore};

use crate::stats::{FeatureSamples, GroupSamples};

/// Per-subject sheet a group analysis reads
pub fn group_sheet(config: &GroupConfig) -> Sheet {
    match (config.dimensionality, config.which_leg) {
        (Dimensionality::TwoD, _) => Sheet::All,
        (Dimensionality::ThreeD, LegSelection::Left) => Sheet::Leg(Side::Left),
        (Dimensionality::ThreeD, LegSelection::Right) => Sheet::Leg(Side::Right),
        (Dimensionality::ThreeD, LegSelection::Both) => Sheet::Both,
    }
}

/// Results directory of one subject inside a group directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectDir {
    pub label: String,
    pub dir: PathBuf,
    pub format: TableFormat,
}

impl SubjectDir {
    fn stem(&self, artifact: &str, sheet: Sheet) -> PathBuf {
        self.dir.join(artifact_stem(&self.label, artifact, sheet))
    }
}

fn artifact_format(stem: &Path) -> Option<TableFormat> {
    ["csv", "xlsx", "xls"].into_iter().find_map(|ext| {
        let mut name = stem.as_os_str().to_owned();
        name.push(".");
        name.push(ext);
        let path = PathBuf::from(name);
        if path.is_file() {
            TableFormat::from_path(&path)
        } else {
            None
        }
    })
}

/// Subject result directories of a group, sorted by name
pub fn discover_subjects(group_dir: &Path, sheet: Sheet) -> Result<Vec<SubjectDir>> {
    let entries = fs::read_dir(group_dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::InputMissing(format!("group directory {} not found", group_dir.display()))
        }
        _ => Error::Io(e),
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(label) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let stem = dir.join(artifact_stem(&label, ORIGINAL_STEPCYCLES, sheet));
        match artifact_format(&stem) {
            Some(format) => dirs.push(SubjectDir { label, dir, format }),
            None => tracing::debug!(dir = %dir.display(), "Not a subject results directory"),
        }
    }
    dirs.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(dirs)
}

/// Everything the group stage needs from one group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupData {
    pub name: String,
    pub subjects: Vec<SubjectDir>,
    pub bins: usize,
    /// Columns that entered the per-subject averages
    pub features: Vec<String>,
    /// Subjects' original cycles, one NaN row between subjects
    pub original: Table,
    pub normalized: Table,
    pub x_standardised: Option<Table>,
    /// Per-ID averages over every cycle of every run, `bins` rows per ID
    pub averages: Table,
    pub stds: Table,
}

impl GroupData {
    /// Subject IDs in first-seen order
    pub fn ids(&self) -> Vec<String> {
        self.averages.unique_labels(ID)
    }

    /// Average curve of every ID for one feature
    pub fn samples(&self, feature: &str) -> Result<GroupSamples> {
        if !self.features.iter().any(|f| f == feature) {
            return Err(Error::ConfigInvalid(format!(
                "{feature} is not among the averaged columns of group {}",
                self.name
            )));
        }
        let ids = self.ids();
        let curves = ids
            .iter()
            .map(|id| {
                let rows = self.averages.filter_label(ID, id);
                rows.require_values(feature).map(<[f64]>::to_vec)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(GroupSamples {
            name: self.name.clone(),
            ids,
            curves,
        })
    }
}

/// Long-form statistics input of one feature across groups
pub fn feature_samples(groups: &[GroupData], feature: &str) -> Result<FeatureSamples> {
    let bins = groups.first().map_or(0, |g| g.bins);
    Ok(FeatureSamples {
        feature: feature.to_string(),
        percentages: sc_percentages(bins),
        groups: groups
            .iter()
            .map(|g| g.samples(feature))
            .collect::<Result<Vec<_>>>()?,
    })
}

struct Reference {
    label: String,
    bins: usize,
    snapshot: Map<String, Value>,
}

/// Loads groups one after the other, checking each subject against the
/// first one loaded
pub struct GroupLoader<'a> {
    store: &'a dyn TableStore,
    sheet: Sheet,
    reference: Option<Reference>,
}

impl<'a> GroupLoader<'a> {
    pub fn new(store: &'a dyn TableStore, sheet: Sheet) -> Self {
        Self {
            store,
            sheet,
            reference: None,
        }
    }

    fn read(&self, subject: &SubjectDir, artifact: &str) -> Result<Table> {
        ensure_format(self.store, subject.format)?;
        self.store.read(&subject.stem(artifact, self.sheet))
    }

    fn check_subject(&mut self, subject: &SubjectDir, bins: usize) -> Result<()> {
        let snapshot = read_snapshot(&subject.dir).map_err(|e| Error::CrossSubjectMismatch {
            id: subject.label.clone(),
            detail: format!("configuration snapshot unreadable: {e}"),
        })?;

        let Some(reference) = &self.reference else {
            self.reference = Some(Reference {
                label: subject.label.clone(),
                bins,
                snapshot,
            });
            return Ok(());
        };

        if bins != reference.bins {
            return Err(Error::CrossSubjectMismatch {
                id: subject.label.clone(),
                detail: format!(
                    "{bins} bins per step cycle, but {} has {}",
                    reference.label, reference.bins
                ),
            });
        }
        compare_snapshots(&reference.snapshot, &snapshot, &reference.label, &subject.label)
    }

    /// Load and check every subject of one group
    pub fn load(&mut self, name: &str, group_dir: &Path) -> Result<GroupData> {
        let subjects = discover_subjects(group_dir, self.sheet)?;
        if subjects.is_empty() {
            return Err(Error::InputMissing(format!(
                "group {name}: no subject results in {}",
                group_dir.display()
            )));
        }

        let mut original = Vec::new();
        let mut normalized = Vec::new();
        let mut x_standardised = Vec::new();
        let mut features: Option<Vec<String>> = None;
        let mut cycles_by_id: Vec<(String, Vec<Table>)> = Vec::new();
        let mut bins = 0;

        for (i, subject) in subjects.iter().enumerate() {
            let norm = self.read(subject, NORMALISED_STEPCYCLES)?;
            let ranges = cycle_rows(&norm)?;
            let subject_bins = ranges[0].len();
            if let Some(bad) = ranges.iter().find(|r| r.len() != subject_bins) {
                return Err(Error::CrossSubjectMismatch {
                    id: subject.label.clone(),
                    detail: format!(
                        "normalized cycles of {subject_bins} and {} bins in one subject",
                        bad.len()
                    ),
                });
            }
            self.check_subject(subject, subject_bins)?;
            bins = subject_bins;

            let average = self.read(subject, AVERAGE_STEPCYCLE)?;
            let subject_features: Vec<String> = average
                .value_names()
                .into_iter()
                .filter(|n| n != SC_PERCENTAGE && n != SC_NUMBER)
                .collect();
            match &features {
                None => features = Some(subject_features),
                Some(existing) if *existing != subject_features => {
                    return Err(Error::CrossSubjectMismatch {
                        id: subject.label.clone(),
                        detail: "averaged columns differ from the other subjects".into(),
                    });
                }
                Some(_) => {}
            }

            let ids = norm.require_labels(ID)?;
            for range in &ranges {
                let id = ids[range.start].clone();
                let rows: Vec<usize> = range.clone().collect();
                let cycle = norm.take_rows(&rows);
                match cycles_by_id.iter_mut().find(|(known, _)| *known == id) {
                    Some((_, cycles)) => cycles.push(cycle),
                    None => cycles_by_id.push((id, vec![cycle])),
                }
            }

            let orig = self.read(subject, ORIGINAL_STEPCYCLES)?;
            let xstd_stem = subject.stem(X_STANDARDISED_STEPCYCLES, self.sheet);
            let xstd = if self.store.exists(&xstd_stem) {
                Some(self.store.read(&xstd_stem)?)
            } else {
                None
            };

            if i > 0 {
                original.push(separator(&orig));
                normalized.push(separator(&norm));
                if let Some(x) = &xstd {
                    x_standardised.push(separator(x));
                }
            }
            original.push(orig);
            normalized.push(norm);
            x_standardised.extend(xstd);
        }

        let features = features.unwrap_or_default();
        let (averages, stds) = id_summaries(&cycles_by_id, &features, bins)?;

        tracing::info!(
            group = name,
            subjects = subjects.len(),
            ids = cycles_by_id.len(),
            bins,
            "Group loaded"
        );
        Ok(GroupData {
            name: name.to_string(),
            subjects,
            bins,
            features,
            original: Table::vstack(&original),
            normalized: Table::vstack(&normalized),
            x_standardised: (!x_standardised.is_empty()).then(|| Table::vstack(&x_standardised)),
            averages,
            stds,
        })
    }
}

fn separator(like: &Table) -> Table {
    let mut row = like.take_rows(&[]);
    row.push_blank_rows(1);
    row
}

/// Key-by-key comparison of two configuration snapshots
pub fn compare_snapshots(
    reference: &Map<String, Value>,
    other: &Map<String, Value>,
    reference_label: &str,
    label: &str,
) -> Result<()> {
    let keys: BTreeSet<&String> = reference.keys().chain(other.keys()).collect();
    for key in keys {
        if PER_SUBJECT_KEYS.contains(&key.as_str()) {
            continue;
        }
        let detail = match (reference.get(key), other.get(key)) {
            (Some(a), Some(b)) if a == b => continue,
            (Some(a), Some(b)) => format!("configuration key {key} is {b}, but {a} in {reference_label}"),
            (Some(_), None) => format!("configuration key {key} is missing"),
            (None, _) => format!("configuration key {key} is missing in {reference_label}"),
        };
        return Err(Error::CrossSubjectMismatch {
            id: label.to_string(),
            detail,
        });
    }
    Ok(())
}

// Mean and SD over every normalized cycle of each ID
fn id_summaries(cycles_by_id: &[(String, Vec<Table>)], features: &[String], bins: usize) -> Result<(Table, Table)> {
    let mut averages = Vec::with_capacity(cycles_by_id.len());
    let mut stds = Vec::with_capacity(cycles_by_id.len());

    for (id, cycles) in cycles_by_id {
        let mut mean_table = Table::with_rows(bins);
        let mut std_table = Table::with_rows(bins);
        for table in [&mut mean_table, &mut std_table] {
            table.push_values(SC_PERCENTAGE, sc_percentages(bins))?;
            table.push_labels(ID, vec![id.clone(); bins])?;
            table.push_values(SC_NUMBER, vec![cycles.len() as f64; bins])?;
        }

        for feature in features {
            let columns = cycles
                .iter()
                .map(|c| c.require_values(feature))
                .collect::<Result<Vec<_>>>()?;
            let matrix = Array2::from_shape_fn((bins, columns.len()), |(b, c)| columns[c][b]);
            let (mean, std) = row_statistics(matrix.view());
            mean_table.push_values(feature.clone(), mean)?;
            std_table.push_values(feature.clone(), std)?;
        }
        averages.push(mean_table);
        stds.push(std_table);
    }
    Ok((Table::vstack(&averages), Table::vstack(&stds)))
}

/// Output format of the group artifacts.
///
/// Spreadsheet subjects switch every group output to spreadsheets.
pub fn output_format(groups: &[GroupData], save_to_xls: bool) -> TableFormat {
    let spreadsheet_subject = groups
        .iter()
        .flat_map(|g| &g.subjects)
        .find(|s| s.format == TableFormat::Spreadsheet);
    match spreadsheet_subject {
        Some(subject) if !save_to_xls => {
            tracing::warn!(
                subject = %subject.label,
                "Subject results are spreadsheets; writing group results as spreadsheets too"
            );
            TableFormat::Spreadsheet
        }
        _ if save_to_xls => TableFormat::Spreadsheet,
        _ => TableFormat::Csv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{write_subject, SubjectFixture};
    use gait_io::CsvStore;

    #[test]
    fn test_discovery_needs_original_cycles() {
        let dir = tempfile::tempdir().unwrap();
        write_subject(dir.path(), &SubjectFixture::new("M1", 0.0));
        fs::create_dir_all(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("stray.csv"), "x").unwrap();

        let subjects = discover_subjects(dir.path(), Sheet::All).unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].label, "M1 - Run 1");
        assert_eq!(subjects[0].format, TableFormat::Csv);
    }

    #[test]
    fn test_load_group_pools_runs_by_id() {
        let dir = tempfile::tempdir().unwrap();
        write_subject(dir.path(), &SubjectFixture::new("M1", 0.0));
        write_subject(dir.path(), &SubjectFixture::new("M1", 2.0).run("2"));
        write_subject(dir.path(), &SubjectFixture::new("M2", 10.0));

        let store = CsvStore;
        let group = GroupLoader::new(&store, Sheet::All).load("WT", dir.path()).unwrap();

        assert_eq!(group.bins, 5);
        assert_eq!(group.ids(), vec!["M1", "M2"]);
        assert_eq!(group.averages.rows(), 10);
        assert_eq!(group.features, vec!["Hip y", "Hip Angle"]);

        // M1 pools two runs of two cycles each: levels 0, 1, 2, 3
        let m1 = group.averages.filter_label(ID, "M1");
        assert_eq!(m1.values(SC_NUMBER).unwrap()[0], 4.0);
        assert_eq!(m1.values("Hip y").unwrap()[0], 1.5);
        assert_eq!(m1.values(SC_PERCENTAGE).unwrap(), &[20.0, 40.0, 60.0, 80.0, 100.0]);

        // three subjects, one NaN row between each
        let cycles = 2 * 5 + 3;
        assert_eq!(group.normalized.rows(), 3 * cycles + 2);
        assert!(group.normalized.values("Time").unwrap()[cycles].is_nan());
        assert!(group.x_standardised.is_none());

        let samples = group.samples("Hip y").unwrap();
        assert_eq!(samples.ids, vec!["M1", "M2"]);
        assert_eq!(samples.curves[1][0], 10.5);
    }

    #[test]
    fn test_bin_mismatch_names_subject() {
        let dir = tempfile::tempdir().unwrap();
        write_subject(dir.path(), &SubjectFixture::new("S1", 0.0).bins(25));
        write_subject(dir.path(), &SubjectFixture::new("S2", 0.0).bins(50));

        let store = CsvStore;
        let err = GroupLoader::new(&store, Sheet::All)
            .load("WT", dir.path())
            .unwrap_err();
        match err {
            Error::CrossSubjectMismatch { id, detail } => {
                assert!(id.starts_with("S2"));
                assert!(detail.contains("50 bins"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_bin_mismatch_across_groups() {
        let wt = tempfile::tempdir().unwrap();
        let ko = tempfile::tempdir().unwrap();
        write_subject(wt.path(), &SubjectFixture::new("M1", 0.0));
        write_subject(ko.path(), &SubjectFixture::new("M7", 0.0).bins(8));

        let store = CsvStore;
        let mut loader = GroupLoader::new(&store, Sheet::All);
        loader.load("WT", wt.path()).unwrap();
        assert!(matches!(
            loader.load("KO", ko.path()),
            Err(Error::CrossSubjectMismatch { ref id, .. }) if id.starts_with("M7")
        ));
    }

    #[test]
    fn test_config_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_subject(dir.path(), &SubjectFixture::new("M1", 0.0));
        write_subject(dir.path(), &SubjectFixture::new("M2", 0.0).sampling_rate(250));

        let store = CsvStore;
        let err = GroupLoader::new(&store, Sheet::All)
            .load("WT", dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("sampling_rate"));
    }

    #[test]
    fn test_per_subject_keys_are_exempt() {
        let mut a = Map::new();
        a.insert("root_dir".into(), Value::from("/data/a"));
        a.insert("bin_num".into(), Value::from(25));
        let mut b = a.clone();
        b.insert("root_dir".into(), Value::from("/data/b"));
        assert!(compare_snapshots(&a, &b, "A", "B").is_ok());

        b.remove("bin_num");
        assert!(compare_snapshots(&a, &b, "A", "B").is_err());
    }

    #[test]
    fn test_output_format() {
        let dir = tempfile::tempdir().unwrap();
        write_subject(dir.path(), &SubjectFixture::new("M1", 0.0));
        let store = CsvStore;
        let mut group = GroupLoader::new(&store, Sheet::All).load("WT", dir.path()).unwrap();

        assert_eq!(output_format(std::slice::from_ref(&group), false), TableFormat::Csv);
        assert_eq!(output_format(std::slice::from_ref(&group), true), TableFormat::Spreadsheet);
        group.subjects[0].format = TableFormat::Spreadsheet;
        assert_eq!(output_format(&[group], false), TableFormat::Spreadsheet);
    }
}
