//! One subject pass: preparation, extraction, features, normalization and
//! averaging, followed by persistence of every artifact.

use std::path::{Path, PathBuf};

use gait_core::{
    CoordFrame, Dimensionality, Error, IssueLog, Result, SubjectConfig, SubjectKey,
};
use gait_io::{
    read_3d_csv, read_tracker_csv, write_snapshot, AnnotationTable, StandardisationTable, TableFormat,
    TableStore,
};

use crate::aggregate::{average_cycles, AverageExclusions, SubjectSummary};
use crate::export::{
    artifact_stem, average_table, cycles_table, std_table, Sheet, AVERAGE_STEPCYCLE,
    NORMALISED_STEPCYCLES, ORIGINAL_STEPCYCLES, STD_STEPCYCLE, X_STANDARDISED_STEPCYCLES,
};
use crate::extract::{CycleExtractor, ExtractedCycles};
use crate::features::{ensure_features, CycleFeatures, CycleSeries, FeatureEngine};
use crate::locate::{copy_inputs, find_subject_files, fresh_results_dir, results_subdir, SubjectFiles};
use crate::normalize::normalize_cycle;
use crate::prepare::prepare;

/// Everything a subject pass reads
#[derive(Debug, Clone)]
pub struct SubjectInputs {
    pub key: SubjectKey,
    pub coords: CoordFrame,
    pub beam: Option<CoordFrame>,
    pub annotation: AnnotationTable,
    /// Coordinate standardisation divisor
    pub divisor: Option<f64>,
}

/// Cycle representations and averages of one sheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetResults {
    pub sheet: Sheet,
    pub original: Vec<CycleSeries>,
    /// Empty unless x standardisation is enabled
    pub x_standardised: Vec<CycleSeries>,
    pub normalized: Vec<CycleSeries>,
    pub summary: SubjectSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectResults {
    pub key: SubjectKey,
    pub dim: Dimensionality,
    pub sheets: Vec<SheetResults>,
    /// Configuration as analysed, with unknown joints and angles removed
    pub config: SubjectConfig,
}

impl SubjectResults {
    pub fn sheet(&self, sheet: Sheet) -> Option<&SheetResults> {
        self.sheets.iter().find(|s| s.sheet == sheet)
    }
}

fn build_sheet(
    sheet: Sheet,
    features: Vec<CycleFeatures>,
    subject: &SubjectKey,
    config: &SubjectConfig,
) -> Result<SheetResults> {
    ensure_features(&features, &subject.label())?;

    let normalized: Vec<CycleSeries> = features
        .iter()
        .map(|f| normalize_cycle(f.analysed(), config.bin_num))
        .collect();
    let exclusions = AverageExclusions {
        horizontal: (!config.average_horizontal()).then(|| config.dimensionality.horizontal()),
    };
    let summary = average_cycles(&subject.name, &normalized, config.bin_num, exclusions)?;

    let (original, x_standardised) = features
        .into_iter()
        .map(|f| (f.original, f.x_standardised))
        .unzip::<_, _, Vec<_>, Vec<_>>();

    Ok(SheetResults {
        sheet,
        original,
        x_standardised: x_standardised.into_iter().flatten().collect(),
        normalized,
        summary,
    })
}

/// Run the analysis stages on in-memory inputs
pub fn analyse_subject(inputs: SubjectInputs, config: &SubjectConfig, log: &IssueLog) -> Result<SubjectResults> {
    let key = inputs.key;
    let prepared = prepare(inputs.coords, inputs.beam, config, inputs.divisor, log)?;
    let extracted = CycleExtractor::new(&prepared, config, log).extract(&inputs.annotation, &key)?;
    let engine = FeatureEngine::new(&prepared, config, log);
    let effective = prepared.resolved.effective(config);

    let mut sheets = Vec::new();
    match extracted {
        ExtractedCycles::Single(cycles) => {
            let features = engine.process_all(&cycles, None);
            sheets.push(build_sheet(Sheet::All, features, &key, config)?);
        }
        ExtractedCycles::Sided(sides) => {
            let mut both = Vec::new();
            for side_cycles in sides {
                let side = side_cycles.side;
                let mut features: Vec<CycleFeatures> = side_cycles
                    .runs
                    .iter()
                    .flat_map(|run| engine.process_all(run, Some(side)))
                    .collect();
                if features.is_empty() {
                    log.record(format!("{side} leg: no step cycle survived feature computation"));
                    continue;
                }
                for (i, f) in features.iter_mut().enumerate() {
                    f.original.ordinal = i + 1;
                    if let Some(x) = f.x_standardised.as_mut() {
                        x.ordinal = i + 1;
                    }
                }
                both.extend(features.iter().cloned());
                sheets.push(build_sheet(Sheet::Leg(side), features, &key, config)?);
            }
            sheets.push(build_sheet(Sheet::Both, both, &key, config)?);
        }
    }

    tracing::info!(
        subject = %key,
        sheets = sheets.len(),
        cycles = sheets.last().map_or(0, |s| s.original.len()),
        "Subject analysed"
    );
    Ok(SubjectResults {
        key,
        dim: config.dimensionality,
        sheets,
        config: effective,
    })
}

/// Write every artifact of a subject into `dir`
pub fn write_results(results: &SubjectResults, dir: &Path, store: &dyn TableStore) -> Result<Vec<PathBuf>> {
    let label = results.key.label();
    let dim = results.dim;
    let mut written = Vec::new();

    for sheet in &results.sheets {
        let stem = |artifact: &str| dir.join(artifact_stem(&label, artifact, sheet.sheet));
        written.push(store.write(
            &stem(ORIGINAL_STEPCYCLES),
            &cycles_table(&sheet.original, &results.key, dim)?,
        )?);
        if !sheet.x_standardised.is_empty() {
            written.push(store.write(
                &stem(X_STANDARDISED_STEPCYCLES),
                &cycles_table(&sheet.x_standardised, &results.key, dim)?,
            )?);
        }
        written.push(store.write(
            &stem(NORMALISED_STEPCYCLES),
            &cycles_table(&sheet.normalized, &results.key, dim)?,
        )?);
        written.push(store.write(&stem(AVERAGE_STEPCYCLE), &average_table(&sheet.summary, dim)?)?);
        written.push(store.write(&stem(STD_STEPCYCLE), &std_table(&sheet.summary, dim)?)?);
    }
    Ok(written)
}

/// Outcome of a persisted subject pass
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectReport {
    pub key: SubjectKey,
    pub results_dir: PathBuf,
    pub cycles: usize,
    pub issues: usize,
    pub written: Vec<PathBuf>,
}

fn read_coordinates(path: &Path, config: &SubjectConfig) -> Result<CoordFrame> {
    match (TableFormat::from_path(path), config.dimensionality) {
        (Some(TableFormat::Csv), Dimensionality::TwoD) => read_tracker_csv(path, config.sampling_rate),
        (Some(TableFormat::Csv), Dimensionality::ThreeD) => read_3d_csv(path, config.sampling_rate),
        _ => Err(Error::IoFormat(format!(
            "{}: only CSV coordinate files are read directly; convert track tensors with \
             TrackTensor::flatten and pass them to analyse_subject",
            path.display()
        ))),
    }
}

/// Read a subject's raw inputs from disk
pub fn load_inputs(config: &SubjectConfig, key: &SubjectKey, files: &SubjectFiles) -> Result<SubjectInputs> {
    let coords = read_coordinates(&files.data, config)?;
    let beam = files
        .beam
        .as_deref()
        .map(|p| read_coordinates(p, config))
        .transpose()?;
    let annotation = AnnotationTable::read_csv(config.root_dir.join(&config.sctable_filename))?;

    let divisor = match &config.coordinate_standardisation_xls {
        Some(path) => {
            let path = config.root_dir.join(path);
            if TableFormat::from_path(&path) != Some(TableFormat::Csv) {
                return Err(Error::IoFormat(format!(
                    "{}: coordinate standardisation table must be CSV",
                    path.display()
                )));
            }
            Some(StandardisationTable::read_csv(&path)?.divisor(key)?)
        }
        None => None,
    };

    Ok(SubjectInputs {
        key: key.clone(),
        coords,
        beam,
        annotation,
        divisor,
    })
}

/// Analyse one subject from disk and persist its results.
///
/// Failures are appended to the subject's `Issues.txt` before returning.
pub fn run_subject(config: &SubjectConfig, key: &SubjectKey, store: &dyn TableStore) -> Result<SubjectReport> {
    config.check()?;
    let dir = results_subdir(config, key);
    fresh_results_dir(&dir)?;
    let log = IssueLog::in_dir(key.label(), &dir);

    let outcome = find_subject_files(config, key)
        .and_then(|files| copy_inputs(&files, &dir, &log))
        .and_then(|copied| load_inputs(config, key, &copied))
        .and_then(|inputs| analyse_subject(inputs, config, &log))
        .and_then(|results| {
            write_snapshot(&dir, &results.config)?;
            let written = write_results(&results, &dir, store)?;
            Ok((results, written))
        });

    match outcome {
        Ok((results, written)) => Ok(SubjectReport {
            key: key.clone(),
            cycles: results.sheets.last().map_or(0, |s| s.original.len()),
            issues: log.len(),
            results_dir: dir,
            written,
        }),
        Err(err) => {
            log.record(format!("{key} skipped: {err}"));
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::cycle_rows;
    use approx::assert_abs_diff_eq;
    use gait_core::{AngleConfig, ColumnKey, Coord, Joint, Side};
    use gait_io::{read_snapshot, CsvStore};

    fn walk_2d(rows: usize) -> CoordFrame {
        let col = |j: &str, c: Coord, f: &dyn Fn(f64) -> f64| {
            (
                ColumnKey::coordinate(Joint::central(j), c),
                (0..rows).map(|i| f(i as f64)).collect::<Vec<f64>>(),
            )
        };
        CoordFrame::from_columns(
            Dimensionality::TwoD,
            100,
            vec![
                col("Hip", Coord::X, &|t| t),
                col("Hip", Coord::Y, &|_| 3.0),
                col("Knee", Coord::X, &|t| t + 1.0),
                col("Knee", Coord::Y, &|t| 2.0 + (t / 10.0).sin()),
                col("Ankle", Coord::X, &|t| t),
                col("Ankle", Coord::Y, &|_| 1.0),
            ],
        )
        .unwrap()
    }

    fn config_2d() -> SubjectConfig {
        SubjectConfig {
            hind_joints: vec!["Hip".into(), "Knee".into(), "Ankle".into()],
            angles: AngleConfig {
                name: vec!["Knee".into()],
                lower_joint: vec!["Ankle".into()],
                upper_joint: vec!["Hip".into()],
            },
            bin_num: 10,
            ..SubjectConfig::default()
        }
    }

    fn annotation(body: &str) -> AnnotationTable {
        AnnotationTable::parse_csv(body.as_bytes()).unwrap()
    }

    #[test]
    fn test_analyse_2d_subject() {
        let config = config_2d();
        let log = IssueLog::in_memory("M1");
        let inputs = SubjectInputs {
            key: SubjectKey::with_run("M1", "1"),
            coords: walk_2d(120),
            beam: None,
            annotation: annotation(
                "ID,Run,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1,Swing (ti).2,Stance (te).2\n\
                 M1,1,0.05,0.30,0.30,0.52,0.9,1.5\n",
            ),
            divisor: None,
        };

        let results = analyse_subject(inputs, &config, &log).unwrap();
        assert_eq!(results.sheets.len(), 1);
        let sheet = results.sheet(Sheet::All).unwrap();
        assert_eq!(sheet.original.len(), 2);
        assert_eq!(sheet.original[0].len(), 26);
        assert_eq!(sheet.original[1].len(), 22);
        assert!(sheet.normalized.iter().all(|c| c.len() == 10));
        assert_eq!(sheet.summary.sc_number, 2);
        assert_eq!(sheet.summary.bins(), 10);
        assert!(sheet
            .summary
            .mean_of(&ColumnKey::angle(Joint::central("Knee")))
            .is_some());
        assert!(log.contains("not in data range"));
    }

    fn knee_angles(coords: CoordFrame, config: &SubjectConfig, divisor: Option<f64>) -> Vec<Vec<f64>> {
        let inputs = SubjectInputs {
            key: SubjectKey::with_run("M1", "1"),
            coords,
            beam: None,
            annotation: annotation(
                "ID,Run,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1\n\
                 M1,1,0.05,0.30,0.30,0.52\n",
            ),
            divisor,
        };
        let results = analyse_subject(inputs, config, &IssueLog::in_memory("M1")).unwrap();
        let angle = ColumnKey::angle(Joint::central("Knee"));
        results
            .sheet(Sheet::All)
            .unwrap()
            .normalized
            .iter()
            .map(|c| c.column(&angle).unwrap().to_vec())
            .collect()
    }

    fn assert_same_curves(a: &[Vec<f64>], b: &[Vec<f64>]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_eq!(x.len(), y.len());
            for (u, v) in x.iter().zip(y) {
                assert_abs_diff_eq!(u, v, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_angles_ignore_coordinate_scaling() {
        let config = config_2d();
        let plain = knee_angles(walk_2d(120), &config, None);
        assert_eq!(plain.len(), 2);
        assert_same_curves(&plain, &knee_angles(walk_2d(120), &config, Some(2.5)));

        let to_joint = SubjectConfig {
            standardise_y_to_a_joint: true,
            y_standardisation_joint: vec!["Ankle".into()],
            ..config_2d()
        };
        assert_same_curves(&plain, &knee_angles(walk_2d(120), &to_joint, Some(0.4)));
    }

    #[test]
    fn test_angles_ignore_walking_direction() {
        let mut backward = walk_2d(120);
        backward.map_columns(|k| k.coord() == Some(Coord::X), |v| 200.0 - v);

        let flipping = config_2d();
        let recorded = SubjectConfig {
            flip_gait_direction: false,
            ..config_2d()
        };
        let forward = knee_angles(walk_2d(120), &flipping, None);
        assert_same_curves(&forward, &knee_angles(backward.clone(), &flipping, None));
        assert_same_curves(&forward, &knee_angles(backward, &recorded, None));
    }

    #[test]
    fn test_effective_config_drops_unknown_names() {
        let mut config = config_2d();
        config.hind_joints.push("Nonexistent".into());
        config.fore_joints = vec!["Nose".into()];
        config.angles.name.push("Toe".into());
        config.angles.lower_joint.push("Ankle".into());
        config.angles.upper_joint.push("Knee".into());

        let inputs = SubjectInputs {
            key: SubjectKey::with_run("M1", "1"),
            coords: walk_2d(120),
            beam: None,
            annotation: annotation("ID,Run,Swing (ti),Stance (te)\nM1,1,0.05,0.30\n"),
            divisor: None,
        };
        let log = IssueLog::in_memory("M1");
        let results = analyse_subject(inputs, &config, &log).unwrap();

        assert_eq!(results.config.hind_joints, vec!["Hip", "Knee", "Ankle"]);
        assert!(results.config.fore_joints.is_empty());
        assert_eq!(results.config.angles.name, vec!["Knee"]);
        assert_eq!(results.config.angles.lower_joint, vec!["Ankle"]);
        assert_eq!(results.config.angles.upper_joint, vec!["Hip"]);
        assert_eq!(results.config.bin_num, config.bin_num);
    }

    #[test]
    fn test_analyse_3d_subject_sheets() {
        let rows = 60;
        let lateral = |side: Side, c: Coord, f: &dyn Fn(f64) -> f64| {
            (
                ColumnKey::coordinate(Joint::lateral("Knee", side), c),
                (0..rows).map(|i| f(i as f64)).collect::<Vec<f64>>(),
            )
        };
        let coords = CoordFrame::from_columns(
            Dimensionality::ThreeD,
            100,
            vec![
                lateral(Side::Left, Coord::Y, &|t| t),
                lateral(Side::Left, Coord::Z, &|t| (t / 5.0).sin()),
                lateral(Side::Right, Coord::Y, &|t| t + 0.5),
                lateral(Side::Right, Coord::Z, &|t| (t / 5.0).cos()),
            ],
        )
        .unwrap();
        let config = SubjectConfig {
            dimensionality: Dimensionality::ThreeD,
            joints: vec!["Knee".into()],
            bin_num: 5,
            ..SubjectConfig::default()
        };
        let inputs = SubjectInputs {
            key: SubjectKey::new("P1"),
            coords,
            beam: None,
            annotation: annotation(
                "ID,Leg,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1\n\
                 P1,left,0.0,0.2,0.3,0.5\n\
                 ,right,0.1,0.3,,\n",
            ),
            divisor: None,
        };
        let log = IssueLog::in_memory("P1");

        let results = analyse_subject(inputs, &config, &log).unwrap();
        let sheets: Vec<Sheet> = results.sheets.iter().map(|s| s.sheet).collect();
        assert_eq!(
            sheets,
            vec![Sheet::Leg(Side::Left), Sheet::Leg(Side::Right), Sheet::Both]
        );
        assert_eq!(results.sheet(Sheet::Both).unwrap().summary.sc_number, 3);
        assert_eq!(results.sheet(Sheet::Leg(Side::Right)).unwrap().original[0].side, Some(Side::Right));
    }

    #[test]
    fn test_run_subject_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();

        let mut csv = String::from("scorer,a,a,a,a,a,a\nbodyparts,Hip,Hip,Knee,Knee,Ankle,Ankle\ncoords,x,y,x,y,x,y\n");
        for i in 0..80 {
            let t = i as f64;
            csv.push_str(&format!("{i},{t},3,{},{},{t},1\n", t + 1.0, 2.0 + (t / 10.0).sin()));
        }
        std::fs::write(root.join("M1_run1_SIDE.csv"), csv).unwrap();
        std::fs::write(
            root.join("SC Latency Table.csv"),
            "ID,Run,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1\nM1,1,0.1,0.3,0.4,0.7\n",
        )
        .unwrap();

        let mut config = SubjectConfig {
            root_dir: root.clone(),
            results_dir: Some(dir.path().join("results")),
            sctable_filename: "SC Latency Table.csv".into(),
            data_string: "SIDE".into(),
            beam_string: "BEAM".into(),
            postmouse_string: "_".into(),
            prerun_string: "run".into(),
            ..config_2d()
        };
        config.hind_joints.push("Nonexistent".into());
        let key = SubjectKey::with_run("M1", "1");
        let report = run_subject(&config, &key, &CsvStore).unwrap();

        assert_eq!(report.cycles, 2);
        assert_eq!(report.written.len(), 4);
        assert!(report.results_dir.join("M1_run1_SIDE.csv").is_file());
        let snapshot = read_snapshot(&report.results_dir).unwrap();
        let hind: Vec<&str> = snapshot["hind_joints"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(hind, vec!["Hip", "Knee", "Ankle"]);

        let stem = report
            .results_dir
            .join(artifact_stem(&key.label(), NORMALISED_STEPCYCLES, Sheet::All));
        let table = CsvStore.read(&stem).unwrap();
        let ranges = cycle_rows(&table).unwrap();
        assert_eq!(ranges.len(), 2);
        assert!(ranges.iter().all(|r| r.len() == 10));
        assert!(table.has_column("Knee Angle"));
    }

    #[test]
    fn test_run_subject_logs_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::write(
            root.join("M2_SIDE.csv"),
            "bodyparts,Hip,Hip\ncoords,x,y\n0,0,0\n1,1,0\n",
        )
        .unwrap();
        std::fs::write(root.join("table.csv"), "ID,Swing (ti),Stance (te)\nM9,0.0,0.01\n").unwrap();

        let config = SubjectConfig {
            root_dir: root.clone(),
            sctable_filename: "table.csv".into(),
            data_string: "SIDE".into(),
            hind_joints: vec!["Hip".into()],
            ..SubjectConfig::default()
        };
        let key = SubjectKey::new("M2");
        let err = run_subject(&config, &key, &CsvStore).unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));

        let issues = std::fs::read_to_string(results_subdir(&config, &key).join("Issues.txt")).unwrap();
        assert!(issues.contains("M2 skipped"));
    }

    #[test]
    fn test_run_subject_logs_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::write(root.join("table.csv"), "ID,Swing (ti),Stance (te)\nM3,0.0,0.1\n").unwrap();

        let config = SubjectConfig {
            root_dir: root.clone(),
            sctable_filename: "table.csv".into(),
            data_string: "SIDE".into(),
            hind_joints: vec!["Hip".into()],
            ..SubjectConfig::default()
        };
        let key = SubjectKey::new("M3");
        let err = run_subject(&config, &key, &CsvStore).unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));

        let issues = std::fs::read_to_string(results_subdir(&config, &key).join("Issues.txt")).unwrap();
        assert!(issues.contains("M3 skipped"));
        assert!(issues.contains("no coordinate file"));
    }
}
