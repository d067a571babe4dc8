//! Step-cycle extraction.
//!
//! Annotated latencies (seconds) are converted to frame ranges and passed
//! through a fixed chain of filters. Every dropped cycle leaves one entry
//! in the subject's issue log.

use gait_core::{
    kinematics, ColumnKey, Coord, CoordFrame, Dimensionality, Error, IssueLog, Joint, Result, Side,
    SubjectConfig, SubjectKey,
};
use gait_io::{
    same_run, AnnotationTable, ID_ALIASES, LEG_ALIASES, RUN_ALIASES, SC_COUNT_ALIASES,
};

use crate::prepare::{side_view, Prepared};

/// Largest distance of a scaled latency from a whole frame
pub const FRAME_ALIGNMENT_TOLERANCE: f64 = 1e-7;

/// Inclusive frame range of one step cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    pub start: usize,
    pub end: usize,
}

impl Cycle {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of frames in the cycle
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

pub type CycleList = Vec<Cycle>;

/// Cycles of one leg across the annotated runs
#[derive(Debug, Clone, PartialEq)]
pub struct SideCycles {
    pub side: Side,
    pub runs: Vec<CycleList>,
}

/// Filtered cycles of one subject
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedCycles {
    /// 2D: one list per subject and run
    Single(CycleList),
    /// 3D: runs per leg, left before right
    Sided(Vec<SideCycles>),
}

impl ExtractedCycles {
    pub fn count(&self) -> usize {
        match self {
            ExtractedCycles::Single(cycles) => cycles.len(),
            ExtractedCycles::Sided(sides) => sides
                .iter()
                .flat_map(|s| &s.runs)
                .map(Vec::len)
                .sum(),
        }
    }
}

/// Annotated cycle before bounds checking; frames may be negative
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    ordinal: usize,
    start: i64,
    end: i64,
}

/// Converts annotation rows into filtered [`CycleList`]s
pub struct CycleExtractor<'a> {
    prepared: &'a Prepared,
    config: &'a SubjectConfig,
    log: &'a IssueLog,
}

impl<'a> CycleExtractor<'a> {
    pub fn new(prepared: &'a Prepared, config: &'a SubjectConfig, log: &'a IssueLog) -> Self {
        Self {
            prepared,
            config,
            log,
        }
    }

    /// Extract and filter all cycles of `subject`
    pub fn extract(&self, annotation: &AnnotationTable, subject: &SubjectKey) -> Result<ExtractedCycles> {
        let pairs = annotation.cycle_columns()?;
        let empty = || Error::EmptyCycles {
            subject: subject.label(),
        };

        match self.config.dimensionality {
            Dimensionality::TwoD => {
                let row = subject_row(annotation, subject)?;
                let candidates = self.candidates(annotation, row, &pairs, None)?;
                let cycles = self.filter(candidates, None);
                if cycles.is_empty() {
                    return Err(empty());
                }
                tracing::info!(subject = %subject, cycles = cycles.len(), "Extracted step cycles");
                Ok(ExtractedCycles::Single(cycles))
            }
            Dimensionality::ThreeD => {
                let mut sides: Vec<SideCycles> = Vec::new();
                for (side, row) in leg_rows(annotation, subject)? {
                    let candidates = self.candidates(annotation, row, &pairs, Some(side))?;
                    let cycles = self.filter(candidates, Some(side));
                    if cycles.is_empty() {
                        self.log.record(format!("{side} leg: no valid step cycles in this run"));
                        continue;
                    }
                    match sides.iter_mut().find(|s| s.side == side) {
                        Some(entry) => entry.runs.push(cycles),
                        None => sides.push(SideCycles {
                            side,
                            runs: vec![cycles],
                        }),
                    }
                }
                if sides.is_empty() {
                    return Err(empty());
                }
                let extracted = ExtractedCycles::Sided(sides);
                tracing::info!(subject = %subject, cycles = extracted.count(), "Extracted step cycles");
                Ok(extracted)
            }
        }
    }

    fn tag(&self, side: Option<Side>, ordinal: usize) -> String {
        match side {
            Some(side) => format!("{side} leg, SC #{ordinal}"),
            None => format!("SC #{ordinal}"),
        }
    }

    fn to_frame(&self, seconds: f64, side: Option<Side>, ordinal: usize) -> i64 {
        let scaled = seconds * f64::from(self.config.sampling_rate);
        let nearest = scaled.round();
        if (scaled - nearest).abs() > FRAME_ALIGNMENT_TOLERANCE {
            self.log.record(format!(
                "{}: latency {seconds}s is not aligned to a frame at {} Hz; truncated",
                self.tag(side, ordinal),
                self.config.sampling_rate
            ));
            scaled.trunc() as i64
        } else {
            nearest as i64
        }
    }

    fn candidates(
        &self,
        annotation: &AnnotationTable,
        row: usize,
        pairs: &[(usize, usize)],
        side: Option<Side>,
    ) -> Result<Vec<Candidate>> {
        let annotated = pairs
            .iter()
            .filter(|(_, stance)| !annotation.cell(row, *stance).is_empty())
            .count();

        if let Some(col) = annotation.column(SC_COUNT_ALIASES) {
            let declared = annotation.cell(row, col);
            if !declared.is_empty() && declared.parse::<f64>().ok() != Some(annotated as f64) {
                self.log.record(format!(
                    "{}declared {declared} step cycles but {annotated} are annotated; using {annotated}",
                    side.map(|s| format!("{s} leg: ")).unwrap_or_default()
                ));
            }
        }

        let parse = |col: usize| -> Result<f64> {
            let cell = annotation.cell(row, col);
            cell.parse::<f64>().map_err(|_| {
                Error::IoFormat(format!(
                    "latency {cell:?} in column {:?} is not a number",
                    annotation.headers[col]
                ))
            })
        };

        let mut out = Vec::new();
        for (i, &(swing, stance)) in pairs.iter().enumerate() {
            let ordinal = i + 1;
            match (annotation.cell(row, swing).is_empty(), annotation.cell(row, stance).is_empty()) {
                (true, true) => continue,
                (false, false) => {}
                _ => {
                    self.log.record(format!(
                        "{}: only one of swing and stance latency given; skipped",
                        self.tag(side, ordinal)
                    ));
                    continue;
                }
            }
            out.push(Candidate {
                ordinal,
                start: self.to_frame(parse(swing)?, side, ordinal),
                end: self.to_frame(parse(stance)?, side, ordinal),
            });
        }
        Ok(out)
    }

    fn filter(&self, candidates: Vec<Candidate>, side: Option<Side>) -> CycleList {
        let frame = &self.prepared.frame;
        let rate = f64::from(self.config.sampling_rate);

        // bounds
        let mut kept: Vec<(usize, Cycle)> = Vec::new();
        for c in candidates {
            let valid = |f: i64| f >= 0 && frame.contains_frame(f as usize);
            if valid(c.start) && valid(c.end) {
                kept.push((c.ordinal, Cycle::new(c.start as usize, c.end as usize)));
            } else {
                self.log.record(format!(
                    "{}: latencies {}s to {}s (frames {} to {}) not in data range; skipped",
                    self.tag(side, c.ordinal),
                    c.start as f64 / rate,
                    c.end as f64 / rate,
                    c.start,
                    c.end
                ));
            }
        }

        // shared boundary frames
        for i in 1..kept.len() {
            if kept[i].1.start == kept[i - 1].1.end {
                kept[i].1.start += 1;
                tracing::debug!(ordinal = kept[i].0, start = kept[i].1.start, "Nudged cycle start");
            }
        }

        // ordering
        let mut ordered: Vec<(usize, Cycle)> = Vec::new();
        for (ordinal, cycle) in kept {
            if cycle.start >= cycle.end {
                self.log.record(format!(
                    "{}: swing frame {} is not before stance frame {}; skipped",
                    self.tag(side, ordinal),
                    cycle.start,
                    cycle.end
                ));
                continue;
            }
            if let Some((_, previous)) = ordered.last() {
                if cycle.start <= previous.end {
                    self.log.record(format!(
                        "{}: starts at frame {} before the previous cycle ends at {}; skipped",
                        self.tag(side, ordinal),
                        cycle.start,
                        previous.end
                    ));
                    continue;
                }
            }
            ordered.push((ordinal, cycle));
        }

        ordered
            .into_iter()
            .filter(|(ordinal, cycle)| match self.rejection(*cycle, side) {
                Some(reason) => {
                    self.log
                        .record(format!("{}: {reason}; skipped", self.tag(side, *ordinal)));
                    false
                }
                None => true,
            })
            .map(|(_, cycle)| cycle)
            .collect()
    }

    /// Reason to drop an in-range, well-ordered cycle
    fn rejection(&self, cycle: Cycle, side: Option<Side>) -> Option<String> {
        let frame = &self.prepared.frame;
        let resolved = &self.prepared.resolved;
        let a = frame.row_of(cycle.start)?;
        let b = frame.row_of(cycle.end)?;
        let view = |joint: &Joint| match side {
            Some(side) => side_view(joint, side, frame),
            None => joint.clone(),
        };

        if frame.dim() == Dimensionality::TwoD {
            for (coord, threshold) in [
                (Coord::X, self.prepared.x_jump_threshold),
                (Coord::Y, self.prepared.y_jump_threshold),
            ] {
                let Some(threshold) = threshold else { continue };
                for joint in &resolved.joints {
                    let Some(values) = frame.coordinate(joint, coord) else { continue };
                    let jump = values[a..=b]
                        .windows(2)
                        .map(|w| (w[1] - w[0]).abs())
                        .fold(0.0, f64::max);
                    if jump > threshold {
                        return Some(format!(
                            "{joint} {} jumped by {jump:.3} between frames (threshold {threshold})",
                            coord.label(frame.dim())
                        ));
                    }
                }
            }
        }

        let strict_tracking = frame.dim() == Dimensionality::ThreeD
            || frame.coordinate_keys(Coord::Likelihood).is_empty();
        if strict_tracking {
            for joint in resolved.referenced_joints() {
                let joint = view(&joint);
                for &coord in frame.dim().spatial_coords() {
                    let Some(values) = frame.coordinate(&joint, coord) else { continue };
                    if values[a..=b].iter().any(|v| v.is_nan()) {
                        return Some(format!(
                            "{joint} {} has untracked frames",
                            coord.label(frame.dim())
                        ));
                    }
                }
            }
        }

        for spec in &resolved.angles {
            let spec = spec.map_joints(view);
            if let Err(err) = check_angle_joints(frame, &spec, a, b) {
                return Some(err.to_string());
            }
        }
        None
    }
}

/// `(horizontal, vertical)` columns of a joint
pub(crate) fn plane<'f>(frame: &'f CoordFrame, joint: &Joint) -> Result<(&'f [f64], &'f [f64])> {
    let dim = frame.dim();
    Ok((
        frame.require(&ColumnKey::coordinate(joint.clone(), dim.horizontal()))?,
        frame.require(&ColumnKey::coordinate(joint.clone(), dim.vertical()))?,
    ))
}

/// Fail when two reference joints of an angle coincide at any row in `a..=b`
pub fn check_angle_joints(
    frame: &CoordFrame,
    spec: &gait_core::AngleSpec,
    a: usize,
    b: usize,
) -> Result<()> {
    let joints = spec.joints();
    let series = [
        plane(frame, joints[0])?,
        plane(frame, joints[1])?,
        plane(frame, joints[2])?,
    ];

    for row in a..=b {
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            let p = [series[i].0[row], series[i].1[row]];
            let q = [series[j].0[row], series[j].1[row]];
            if kinematics::coincident(p, q) {
                return Err(Error::NumericDegenerate {
                    angle: spec.key().display(frame.dim()),
                    time: frame.time()[row],
                    first: joints[i].to_string(),
                    second: joints[j].to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Row of a 2D subject (and run)
pub fn subject_row(annotation: &AnnotationTable, subject: &SubjectKey) -> Result<usize> {
    let id_col = annotation.require_column(ID_ALIASES)?;
    let run_col = match &subject.run {
        Some(_) => Some(annotation.require_column(RUN_ALIASES)?),
        None => None,
    };

    let rows: Vec<usize> = (0..annotation.rows.len())
        .filter(|&r| annotation.cell(r, id_col) == subject.name)
        .filter(|&r| match (run_col, &subject.run) {
            (Some(c), Some(run)) => same_run(annotation.cell(r, c), run),
            _ => true,
        })
        .collect();

    match rows.as_slice() {
        [] => Err(Error::InputMissing(format!(
            "{subject} is not in the annotation table"
        ))),
        [row] => Ok(*row),
        _ => Err(Error::InputAmbiguous(format!(
            "{subject} appears in {} annotation rows",
            rows.len()
        ))),
    }
}

/// Leg rows of a 3D subject.
///
/// A subject's block starts at the row carrying its ID and continues over
/// rows with a blank or identical ID; blank rows must separate blocks and
/// legs must be listed left before right.
pub fn leg_rows(annotation: &AnnotationTable, subject: &SubjectKey) -> Result<Vec<(Side, usize)>> {
    let id_col = annotation.require_column(ID_ALIASES)?;
    let leg_col = annotation.require_column(LEG_ALIASES)?;
    let n = annotation.rows.len();

    let starts: Vec<usize> = (0..n)
        .filter(|&r| annotation.cell(r, id_col) == subject.name)
        .filter(|&r| r == 0 || annotation.cell(r - 1, id_col) != subject.name)
        .collect();
    let start = match starts.as_slice() {
        [] => {
            return Err(Error::InputMissing(format!(
                "{subject} is not in the annotation table"
            )))
        }
        [start] => *start,
        _ => {
            return Err(Error::InputAmbiguous(format!(
                "{subject} appears in {} separate annotation blocks",
                starts.len()
            )))
        }
    };

    let mut end = start;
    while end < n
        && !annotation.is_blank_row(end)
        && (annotation.cell(end, id_col).is_empty() || annotation.cell(end, id_col) == subject.name)
    {
        end += 1;
    }
    let separated = |r: usize| annotation.is_blank_row(r);
    if (start > 0 && !separated(start - 1)) || (end < n && !separated(end)) {
        return Err(Error::ConfigInvalid(format!(
            "annotation rows of {subject} must be separated from other subjects by a blank row"
        )));
    }

    let mut legs: Vec<(Side, usize)> = Vec::new();
    for row in start..end {
        let cell = annotation.cell(row, leg_col);
        let side = Side::parse(cell).ok_or_else(|| {
            Error::ConfigInvalid(format!("{subject}: leg {cell:?} is neither left nor right"))
        })?;
        if legs.last().is_some_and(|(previous, _)| *previous > side) {
            return Err(Error::ConfigInvalid(format!(
                "{subject}: legs must be listed left before right"
            )));
        }
        legs.push((side, row));
    }
    Ok(legs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare::{prepare, Prepared};
    use gait_core::{AngleConfig, ColumnKey};

    fn linear_frame(rows: usize) -> CoordFrame {
        let col = |j: &str, c: Coord, f: &dyn Fn(usize) -> f64| {
            (ColumnKey::coordinate(Joint::central(j), c), (0..rows).map(f).collect::<Vec<f64>>())
        };
        CoordFrame::from_columns(
            Dimensionality::TwoD,
            100,
            vec![
                col("Hip", Coord::X, &|i| i as f64),
                col("Hip", Coord::Y, &|_| 1.0),
                col("Knee", Coord::X, &|i| i as f64 + 1.0),
                col("Knee", Coord::Y, &|_| 0.0),
                col("Ankle", Coord::X, &|i| i as f64),
                col("Ankle", Coord::Y, &|_| -1.0),
            ],
        )
        .unwrap()
    }

    fn config() -> SubjectConfig {
        SubjectConfig {
            hind_joints: vec!["Hip".into(), "Knee".into(), "Ankle".into()],
            angles: AngleConfig {
                name: vec!["Knee".into()],
                lower_joint: vec!["Ankle".into()],
                upper_joint: vec!["Hip".into()],
            },
            flip_gait_direction: false,
            ..SubjectConfig::default()
        }
    }

    fn prepared(frame: CoordFrame, config: &SubjectConfig, log: &IssueLog) -> Prepared {
        prepare(frame, None, config, None, log).unwrap()
    }

    fn annotation(body: &str) -> AnnotationTable {
        AnnotationTable::parse_csv(body.as_bytes()).unwrap()
    }

    #[test]
    fn test_latencies_become_frames() {
        let config = config();
        let log = IssueLog::in_memory("M1");
        let prepared = prepared(linear_frame(100), &config, &log);
        let table = annotation(
            "ID,Run,SC Number,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1\n\
             M1,1,2,0.10,0.30,0.30,0.55\n",
        );

        let extracted = CycleExtractor::new(&prepared, &config, &log)
            .extract(&table, &SubjectKey::with_run("M1", "1"))
            .unwrap();
        // second start nudged off the shared boundary
        assert_eq!(
            extracted,
            ExtractedCycles::Single(vec![Cycle::new(10, 30), Cycle::new(31, 55)])
        );
        assert!(log.is_empty());
    }

    #[test]
    fn test_out_of_range_cycle_dropped() {
        let config = config();
        let log = IssueLog::in_memory("M1");
        let prepared = prepared(linear_frame(100), &config, &log);
        let table = annotation(
            "ID,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1\n\
             M1,0.1,0.4,0.5,1.5\n",
        );

        let extracted = CycleExtractor::new(&prepared, &config, &log)
            .extract(&table, &SubjectKey::new("M1"))
            .unwrap();
        assert_eq!(extracted, ExtractedCycles::Single(vec![Cycle::new(10, 40)]));
        assert!(log.contains("not in data range"));
        assert!(log.contains("frames 50 to 150"));
    }

    #[test]
    fn test_all_cycles_dropped_is_empty() {
        let config = config();
        let log = IssueLog::in_memory("M1");
        let prepared = prepared(linear_frame(100), &config, &log);
        let table = annotation("ID,Swing (ti),Stance (te)\nM1,0.5,1.5\n");

        let err = CycleExtractor::new(&prepared, &config, &log)
            .extract(&table, &SubjectKey::new("M1"))
            .unwrap_err();
        assert!(matches!(err, Error::EmptyCycles { .. }));
    }

    #[test]
    fn test_degenerate_angle_dropped() {
        let config = config();
        let log = IssueLog::in_memory("M1");
        let mut frame = linear_frame(100);
        // Knee collapses onto Ankle at frame 20
        frame.column_mut(&ColumnKey::coordinate(Joint::central("Knee"), Coord::X)).unwrap()[20] = 20.0;
        frame.column_mut(&ColumnKey::coordinate(Joint::central("Knee"), Coord::Y)).unwrap()[20] = -1.0;
        let prepared = prepared(frame, &config, &log);
        let table = annotation(
            "ID,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1\n\
             M1,0.1,0.3,0.4,0.6\n",
        );

        let extracted = CycleExtractor::new(&prepared, &config, &log)
            .extract(&table, &SubjectKey::new("M1"))
            .unwrap();
        assert_eq!(extracted, ExtractedCycles::Single(vec![Cycle::new(40, 60)]));
        assert!(log.contains("Knee Angle"));
        assert!(log.contains("0.2s"));
        assert!(log.contains("Knee and Ankle"));
    }

    #[test]
    fn test_order_and_tracking_filters() {
        let config = SubjectConfig {
            x_sc_broken_threshold: Some(5.0),
            ..config()
        };
        let log = IssueLog::in_memory("M1");
        let mut frame = linear_frame(100);
        frame.column_mut(&ColumnKey::coordinate(Joint::central("Hip"), Coord::X)).unwrap()[75] = 90.0;
        let prepared = prepared(frame, &config, &log);
        let table = annotation(
            "ID,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1,Swing (ti).2,Stance (te).2\n\
             M1,0.3,0.2,0.5,0.6,0.7,0.8\n",
        );

        let extracted = CycleExtractor::new(&prepared, &config, &log)
            .extract(&table, &SubjectKey::new("M1"))
            .unwrap();
        assert_eq!(extracted, ExtractedCycles::Single(vec![Cycle::new(50, 60)]));
        assert!(log.contains("SC #1: swing frame 30 is not before stance frame 20"));
        assert!(log.contains("SC #3: Hip x jumped"));
    }

    #[test]
    fn test_nan_tracking_without_likelihood() {
        let config = config();
        let log = IssueLog::in_memory("M1");
        let mut frame = linear_frame(100);
        frame.column_mut(&ColumnKey::coordinate(Joint::central("Ankle"), Coord::Y)).unwrap()[15] = f64::NAN;
        let prepared = prepared(frame, &config, &log);
        let table = annotation(
            "ID,Swing (ti),Stance (te),Swing (ti).1,Stance (te).1\n\
             M1,0.1,0.2,0.3,0.4\n",
        );

        let extracted = CycleExtractor::new(&prepared, &config, &log)
            .extract(&table, &SubjectKey::new("M1"))
            .unwrap();
        assert_eq!(extracted, ExtractedCycles::Single(vec![Cycle::new(30, 40)]));
        assert!(log.contains("untracked"));
    }

    #[test]
    fn test_declared_count_and_alignment_warnings() {
        let config = config();
        let log = IssueLog::in_memory("M1");
        let prepared = prepared(linear_frame(100), &config, &log);
        let table = annotation("ID,SC Number,Swing (ti),Stance (te)\nM1,3,0.105,0.3\n");

        let extracted = CycleExtractor::new(&prepared, &config, &log)
            .extract(&table, &SubjectKey::new("M1"))
            .unwrap();
        assert_eq!(extracted, ExtractedCycles::Single(vec![Cycle::new(10, 30)]));
        assert!(log.contains("declared 3 step cycles but 1 are annotated"));
        assert!(log.contains("not aligned to a frame"));
    }

    #[test]
    fn test_subject_row_lookup() {
        let table = annotation("ID,Run,Swing (ti),Stance (te)\nM1,1,0.1,0.2\nM1,1,0.1,0.2\nM2,1,0.1,0.2\n");
        assert!(matches!(
            subject_row(&table, &SubjectKey::with_run("M1", "1")),
            Err(Error::InputAmbiguous(_))
        ));
        assert!(matches!(
            subject_row(&table, &SubjectKey::with_run("M3", "1")),
            Err(Error::InputMissing(_))
        ));
        assert_eq!(subject_row(&table, &SubjectKey::with_run("M2", "1.0")).unwrap(), 2);
    }

    #[test]
    fn test_leg_rows_structure() {
        let good = annotation(
            "ID,Leg,Swing (ti),Stance (te)\n\
             P1,left,0.1,0.2\n\
             ,right,0.1,0.2\n\
             ,,,\n\
             P2,left,0.1,0.2\n",
        );
        assert_eq!(
            leg_rows(&good, &SubjectKey::new("P1")).unwrap(),
            vec![(Side::Left, 0), (Side::Right, 1)]
        );
        assert_eq!(leg_rows(&good, &SubjectKey::new("P2")).unwrap(), vec![(Side::Left, 3)]);

        let unseparated = annotation(
            "ID,Leg,Swing (ti),Stance (te)\nP1,left,0.1,0.2\nP2,left,0.1,0.2\n",
        );
        assert!(matches!(
            leg_rows(&unseparated, &SubjectKey::new("P1")),
            Err(Error::ConfigInvalid(_))
        ));

        let reversed = annotation(
            "ID,Leg,Swing (ti),Stance (te)\nP1,right,0.1,0.2\nP1,left,0.1,0.2\n",
        );
        assert!(matches!(
            leg_rows(&reversed, &SubjectKey::new("P1")),
            Err(Error::ConfigInvalid(_))
        ));
    }
}
