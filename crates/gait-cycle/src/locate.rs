//! Input discovery and results directory layout.

use std::fs;
use std::path::{Path, PathBuf};

use gait_core::{Dimensionality, Error, IssueLog, Result, SubjectConfig, SubjectKey};
use gait_io::{AnnotationTable, ID_ALIASES, RUN_ALIASES};

/// Raw coordinate files of one subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFiles {
    pub data: PathBuf,
    pub beam: Option<PathBuf>,
}

const COORDINATE_EXTENSIONS: &[&str] = &["csv", "h5", "xlsx", "xls"];

fn candidate_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::InputMissing(format!("directory {} not found", dir.display()))
        }
        _ => Error::Io(e),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| COORDINATE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && supported {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn single(matches: Vec<PathBuf>, role: &str, subject: &SubjectKey) -> Result<Option<PathBuf>> {
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.into_iter().next()),
        n => Err(Error::InputAmbiguous(format!(
            "{n} {role} files match {subject}: {}",
            matches
                .iter()
                .map(|p| file_name(p).to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Find the coordinate (and beam) file of a subject in `config.root_dir`.
///
/// 2D names must contain the data or beam marker plus the configured
/// name and run patterns; 3D names start with the subject name and
/// contain `postname_string`.
pub fn find_subject_files(config: &SubjectConfig, subject: &SubjectKey) -> Result<SubjectFiles> {
    let files = candidate_files(&config.root_dir)?;

    let (data, beam) = match config.dimensionality {
        Dimensionality::TwoD => {
            let name = format!(
                "{}{}{}",
                config.premouse_string, subject.name, config.postmouse_string
            );
            let run = subject
                .run
                .as_ref()
                .map(|r| format!("{}{}{}", config.prerun_string, r, config.postrun_string));
            let identifies = |n: &str| n.contains(&name) && run.as_ref().map_or(true, |r| n.contains(r));
            let is_beam = |n: &str| !config.beam_string.is_empty() && n.contains(&config.beam_string);

            let data: Vec<PathBuf> = files
                .iter()
                .filter(|p| {
                    let n = file_name(p);
                    identifies(n) && n.contains(&config.data_string) && !is_beam(n)
                })
                .cloned()
                .collect();
            let beam: Vec<PathBuf> = if config.subtract_beam {
                files
                    .iter()
                    .filter(|p| identifies(file_name(p)) && is_beam(file_name(p)))
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            (data, beam)
        }
        Dimensionality::ThreeD => {
            let data = files
                .iter()
                .filter(|p| {
                    let n = file_name(p);
                    n.starts_with(&subject.name) && n.contains(&config.postname_string)
                })
                .cloned()
                .collect();
            (data, Vec::new())
        }
    };

    let data = single(data, "coordinate", subject)?.ok_or_else(|| {
        Error::InputMissing(format!(
            "no coordinate file for {subject} in {}",
            config.root_dir.display()
        ))
    })?;
    let beam = single(beam, "beam", subject)?;
    if config.subtract_beam && beam.is_none() {
        return Err(Error::InputMissing(format!("no beam file for {subject}")));
    }

    tracing::debug!(subject = %subject, data = %data.display(), "Located input files");
    Ok(SubjectFiles { data, beam })
}

/// Results directory of one subject
pub fn results_subdir(config: &SubjectConfig, subject: &SubjectKey) -> PathBuf {
    config.results_dir().join(subject.label())
}

/// Create an empty results directory, removing a previous one first.
///
/// Failing to remove old results only produces a warning.
pub fn fresh_results_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        if let Err(err) = fs::remove_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %err, "Could not remove previous results");
        }
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Copy the raw inputs next to the results
pub fn copy_inputs(files: &SubjectFiles, dir: &Path, log: &IssueLog) -> Result<SubjectFiles> {
    let copy = |source: &Path| -> Result<PathBuf> {
        let target = dir.join(source.file_name().unwrap_or_default());
        if let Err(err) = fs::copy(source, &target) {
            log.record(format!("Could not copy {}: {err}", source.display()));
            return Ok(source.to_path_buf());
        }
        Ok(target)
    };

    Ok(SubjectFiles {
        data: copy(&files.data)?,
        beam: match &files.beam {
            Some(beam) => Some(copy(beam)?),
            None => None,
        },
    })
}

/// Subjects listed in an annotation table, in table order
pub fn subjects_from_annotation(annotation: &AnnotationTable, dim: Dimensionality) -> Result<Vec<SubjectKey>> {
    let id_col = annotation.require_column(ID_ALIASES)?;
    let run_col = match dim {
        Dimensionality::TwoD => annotation.column(RUN_ALIASES),
        Dimensionality::ThreeD => None,
    };

    let mut out: Vec<SubjectKey> = Vec::new();
    for row in 0..annotation.rows.len() {
        let name = annotation.cell(row, id_col);
        if name.is_empty() {
            continue;
        }
        let key = match run_col.map(|c| annotation.cell(row, c)) {
            Some(run) if !run.is_empty() => SubjectKey::with_run(name, run),
            _ => SubjectKey::new(name),
        };
        if !out.contains(&key) {
            out.push(key);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "x").unwrap();
    }

    fn config_2d(root: &Path) -> SubjectConfig {
        SubjectConfig {
            root_dir: root.to_path_buf(),
            data_string: "SIDE".into(),
            beam_string: "BEAM".into(),
            premouse_string: "Mouse".into(),
            postmouse_string: "_".into(),
            prerun_string: "run".into(),
            postrun_string: "-".into(),
            ..SubjectConfig::default()
        }
    }

    #[test]
    fn test_find_2d_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Mouse12_run1-SIDE.csv");
        touch(dir.path(), "Mouse12_run1-BEAM.csv");
        touch(dir.path(), "Mouse12_run2-SIDE.csv");
        touch(dir.path(), "Mouse123_run1-SIDE.csv");
        touch(dir.path(), "notes.txt");

        let mut config = config_2d(dir.path());
        let files = find_subject_files(&config, &SubjectKey::with_run("12", "1")).unwrap();
        assert!(files.data.ends_with("Mouse12_run1-SIDE.csv"));
        assert_eq!(files.beam, None);

        config.subtract_beam = true;
        let files = find_subject_files(&config, &SubjectKey::with_run("12", "1")).unwrap();
        assert!(files.beam.unwrap().ends_with("Mouse12_run1-BEAM.csv"));
    }

    #[test]
    fn test_duplicate_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Mouse12_run1-SIDE.csv");
        touch(dir.path(), "Mouse12_run1-SIDE_copy.csv");
        let config = config_2d(dir.path());

        assert!(matches!(
            find_subject_files(&config, &SubjectKey::with_run("12", "1")),
            Err(Error::InputAmbiguous(_))
        ));
        assert!(matches!(
            find_subject_files(&config, &SubjectKey::with_run("7", "1")),
            Err(Error::InputMissing(_))
        ));
    }

    #[test]
    fn test_find_3d_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "P01_gait.csv");
        touch(dir.path(), "P02_gait.csv");
        let config = SubjectConfig {
            dimensionality: Dimensionality::ThreeD,
            root_dir: dir.path().to_path_buf(),
            postname_string: "_gait".into(),
            ..SubjectConfig::default()
        };
        let files = find_subject_files(&config, &SubjectKey::new("P02")).unwrap();
        assert!(files.data.ends_with("P02_gait.csv"));
    }

    #[test]
    fn test_fresh_results_dir_replaces_old_results() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("M1 - Run 1");
        fs::create_dir_all(&results).unwrap();
        touch(&results, "stale.csv");

        fresh_results_dir(&results).unwrap();
        assert!(results.is_dir());
        assert!(!results.join("stale.csv").exists());

        let source = dir.path().join("Mouse1.csv");
        fs::write(&source, "data").unwrap();
        let log = IssueLog::in_memory("M1");
        let copied = copy_inputs(
            &SubjectFiles {
                data: source,
                beam: None,
            },
            &results,
            &log,
        )
        .unwrap();
        assert_eq!(copied.data, results.join("Mouse1.csv"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_subjects_from_annotation() {
        let table = AnnotationTable::parse_csv(
            "ID,Run,Swing (ti),Stance (te)\nM1,1,0.1,0.2\nM1,2,0.1,0.2\n,,,\nM2,1,0.1,0.2\nM1,1,0.3,0.4\n"
                .as_bytes(),
        )
        .unwrap();
        let subjects = subjects_from_annotation(&table, Dimensionality::TwoD).unwrap();
        assert_eq!(
            subjects,
            vec![
                SubjectKey::with_run("M1", "1"),
                SubjectKey::with_run("M1", "2"),
                SubjectKey::with_run("M2", "1"),
            ]
        );
    }
}
