//! Per-cycle feature computation.
//!
//! Each accepted cycle is cut from the prepared coordinates and, in order:
//!
//! 1. height-standardised at cycle level (optional)
//! 2. mirrored along the forward axis when walking backwards (3D)
//! 3. duplicated into an x-standardised variant (2D, optional)
//! 4. extended with joint angles
//! 5. extended with velocities and accelerations

use std::cell::Cell;

use gait_core::{
    kinematics, ColumnKey, Coord, CoordFrame, Dimensionality, Error, IssueLog, Joint, Result, Side,
    SubjectConfig,
};

use crate::extract::{check_angle_joints, plane, Cycle};
use crate::prepare::{shift_axis, standardise_height, Prepared};

/// Feature columns of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSeries {
    /// Position among the subject's cycles, starting at 1
    pub ordinal: usize,
    pub side: Option<Side>,
    pub flipped: bool,
    pub time: Vec<f64>,
    pub columns: Vec<(ColumnKey, Vec<f64>)>,
}

impl CycleSeries {
    pub fn from_frame(frame: &CoordFrame, ordinal: usize, side: Option<Side>) -> Self {
        Self {
            ordinal,
            side,
            flipped: frame.flipped(),
            time: frame.time().to_vec(),
            columns: frame.iter().map(|(k, v)| (k.clone(), v.to_vec())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn column(&self, key: &ColumnKey) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &ColumnKey> {
        self.columns.iter().map(|(k, _)| k)
    }
}

/// Features of one cycle with the optional x-standardised variant
#[derive(Debug, Clone, PartialEq)]
pub struct CycleFeatures {
    pub original: CycleSeries,
    pub x_standardised: Option<CycleSeries>,
}

impl CycleFeatures {
    /// Variant that feeds normalization and averaging
    pub fn analysed(&self) -> &CycleSeries {
        self.x_standardised.as_ref().unwrap_or(&self.original)
    }
}

/// Keep one leg's columns under central joint names.
///
/// Columns of the other leg are removed; central joints stay unless this
/// leg records a joint of the same name.
pub fn collapse_side(frame: &mut CoordFrame, side: Side) -> Result<()> {
    for key in frame.keys().to_vec() {
        let ColumnKey::Coordinate { joint, coord } = &key else {
            continue;
        };
        match joint.side {
            Some(s) if s == side => {
                if let Some(values) = frame.remove(&key) {
                    frame.insert(ColumnKey::coordinate(Joint::central(&joint.name), *coord), values)?;
                }
            }
            Some(_) => {
                frame.remove(&key);
            }
            None => {}
        }
    }
    Ok(())
}

/// Computes [`CycleFeatures`] for the cycles of one subject
pub struct FeatureEngine<'a> {
    prepared: &'a Prepared,
    config: &'a SubjectConfig,
    log: &'a IssueLog,
    clamp_logged: Cell<bool>,
}

impl<'a> FeatureEngine<'a> {
    pub fn new(prepared: &'a Prepared, config: &'a SubjectConfig, log: &'a IssueLog) -> Self {
        Self {
            prepared,
            config,
            log,
            clamp_logged: Cell::new(false),
        }
    }

    /// Process every cycle; failing cycles are logged and skipped
    pub fn process_all(&self, cycles: &[Cycle], side: Option<Side>) -> Vec<CycleFeatures> {
        let mut out = Vec::with_capacity(cycles.len());
        for (i, cycle) in cycles.iter().enumerate() {
            match self.process(*cycle, i + 1, side) {
                Ok(features) => out.push(features),
                Err(err) => self.log.record(format!(
                    "{}SC {}-{} skipped: {err}",
                    side.map(|s| format!("{s} leg, ")).unwrap_or_default(),
                    cycle.start,
                    cycle.end
                )),
            }
        }
        out
    }

    pub fn process(&self, cycle: Cycle, ordinal: usize, side: Option<Side>) -> Result<CycleFeatures> {
        let resolved = &self.prepared.resolved;
        let mut frame = self.prepared.frame.slice(cycle.start, cycle.end)?;
        if let Some(side) = side {
            collapse_side(&mut frame, side)?;
        }

        if self.config.height_at_cycle_level() {
            standardise_height(&mut frame, resolved.height_joint.as_ref())?;
        }

        if frame.dim() == Dimensionality::ThreeD && self.config.flip_gait_direction {
            self.orient_forward(&mut frame);
        }

        let x_standardised = match &resolved.x_standardisation_joint {
            Some(joint) => {
                let mut copy = frame.clone();
                let offset = copy
                    .coordinate(joint, Coord::X)
                    .map(kinematics::nan_min)
                    .unwrap_or(f64::NAN);
                shift_axis(&mut copy, Coord::X, offset);
                self.add_features(&mut copy)?;
                Some(CycleSeries::from_frame(&copy, ordinal, side))
            }
            None => None,
        };

        self.add_features(&mut frame)?;
        Ok(CycleFeatures {
            original: CycleSeries::from_frame(&frame, ordinal, side),
            x_standardised,
        })
    }

    /// Mirror forward coordinates when the cycle starts ahead of its mean
    fn orient_forward(&self, frame: &mut CoordFrame) {
        let leading = &self.prepared.resolved.leading_joint;
        let Some(forward) = frame.coordinate(leading, Coord::Y) else {
            tracing::debug!(joint = %leading, "No forward column for this leg");
            return;
        };
        if forward[0] > kinematics::mean(forward) {
            let max = self.prepared.forward_max;
            frame.map_columns(|k| k.coord() == Some(Coord::Y), |v| max - v);
            frame.set_flipped(true);
        }
    }

    fn add_features(&self, frame: &mut CoordFrame) -> Result<()> {
        let resolved = &self.prepared.resolved;
        let dim = frame.dim();
        let h = dim.horizontal();
        let last = frame.len().saturating_sub(1);

        let mut angle_keys = Vec::with_capacity(resolved.angles.len());
        for spec in &resolved.angles {
            check_angle_joints(frame, spec, 0, last)?;
            let series = kinematics::angle_series(
                plane(frame, &spec.vertex)?,
                plane(frame, &spec.lower)?,
                plane(frame, &spec.upper)?,
            );

            if series.clamped_frames > 0 && !self.clamp_logged.replace(true) {
                self.log.record(format!(
                    "Cosine of {} clamped to [-1, 1] in {} frames",
                    spec.key().display(dim),
                    series.clamped_frames
                ));
            }
            frame.insert(spec.key(), series.degrees)?;
            angle_keys.push(spec.key());
        }

        let joint_acceleration = self.config.joint_acceleration();
        for joint in &resolved.joints {
            let key = ColumnKey::coordinate(joint.clone(), h);
            if frame.contains(&key) {
                self.add_derivatives(frame, &key, joint_acceleration)?;
            }
        }
        for key in &angle_keys {
            self.add_derivatives(frame, key, self.config.angular_acceleration)?;
        }
        Ok(())
    }

    fn add_derivatives(&self, frame: &mut CoordFrame, key: &ColumnKey, acceleration: bool) -> Result<()> {
        let velocity = kinematics::gradient(frame.require(key)?);
        if acceleration {
            frame.insert(key.acceleration(), kinematics::gradient(&velocity))?;
        }
        frame.insert(key.velocity(), velocity)
    }
}

/// Fail unless every cycle yielded at least one feature set
pub fn ensure_features(features: &[CycleFeatures], subject: &str) -> Result<()> {
    if features.is_empty() {
        return Err(Error::EmptyCycles {
            subject: subject.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare::prepare;
    use approx::assert_relative_eq;
    use gait_core::AngleConfig;

    fn frame(columns: Vec<(Joint, Coord, Vec<f64>)>, dim: Dimensionality) -> CoordFrame {
        CoordFrame::from_columns(
            dim,
            100,
            columns
                .into_iter()
                .map(|(j, c, v)| (ColumnKey::coordinate(j, c), v))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_minimal_cycle_velocity() {
        let config = SubjectConfig {
            hind_joints: vec!["Hip".into()],
            x_acceleration: true,
            flip_gait_direction: false,
            ..SubjectConfig::default()
        };
        let raw = frame(
            vec![
                (Joint::central("Hip"), Coord::X, vec![0.0, 1.0, 2.0, 3.0, 4.0]),
                (Joint::central("Hip"), Coord::Y, vec![0.0; 5]),
            ],
            Dimensionality::TwoD,
        );
        let log = IssueLog::in_memory("M1");
        let prepared = prepare(raw, None, &config, None, &log).unwrap();
        let engine = FeatureEngine::new(&prepared, &config, &log);

        let features = engine.process(Cycle::new(0, 4), 1, None).unwrap();
        let hip_x = ColumnKey::coordinate(Joint::central("Hip"), Coord::X);
        assert_eq!(features.original.column(&hip_x.velocity()).unwrap(), &[1.0; 5]);
        assert_eq!(features.original.column(&hip_x.acceleration()).unwrap(), &[0.0; 5]);
        assert_eq!(features.original.time, vec![0.0, 0.01, 0.02, 0.03, 0.04]);
        assert!(features.x_standardised.is_none());
    }

    #[test]
    fn test_right_angle_is_ninety_degrees() {
        let config = SubjectConfig {
            hind_joints: vec!["V".into(), "L".into(), "U".into()],
            angles: AngleConfig {
                name: vec!["V".into()],
                lower_joint: vec!["L".into()],
                upper_joint: vec!["U".into()],
            },
            angular_acceleration: true,
            flip_gait_direction: false,
            ..SubjectConfig::default()
        };
        let raw = frame(
            vec![
                (Joint::central("V"), Coord::X, vec![0.0; 10]),
                (Joint::central("V"), Coord::Y, vec![0.0; 10]),
                (Joint::central("L"), Coord::X, vec![1.0; 10]),
                (Joint::central("L"), Coord::Y, vec![0.0; 10]),
                (Joint::central("U"), Coord::X, vec![0.0; 10]),
                (Joint::central("U"), Coord::Y, vec![1.0; 10]),
            ],
            Dimensionality::TwoD,
        );
        let log = IssueLog::in_memory("M1");
        let prepared = prepare(raw, None, &config, None, &log).unwrap();
        let engine = FeatureEngine::new(&prepared, &config, &log);

        let features = engine.process(Cycle::new(0, 9), 1, None).unwrap();
        let angle = ColumnKey::angle(Joint::central("V"));
        for value in features.original.column(&angle).unwrap() {
            assert_relative_eq!(*value, 90.0, epsilon = 1e-12);
        }
        assert_eq!(features.original.column(&angle.velocity()).unwrap(), &[0.0; 10]);
        assert!(features.original.column(&angle.acceleration()).is_some());
    }

    #[test]
    fn test_x_standardised_variant() {
        let config = SubjectConfig {
            hind_joints: vec!["Hip".into(), "Toe".into()],
            standardise_x_coordinates: true,
            x_standardisation_joint: vec!["Toe".into()],
            flip_gait_direction: false,
            ..SubjectConfig::default()
        };
        let raw = frame(
            vec![
                (Joint::central("Hip"), Coord::X, vec![5.0, 6.0, 7.0, 8.0]),
                (Joint::central("Hip"), Coord::Y, vec![1.0; 4]),
                (Joint::central("Toe"), Coord::X, vec![4.0, 5.0, 6.0, 7.0]),
                (Joint::central("Toe"), Coord::Y, vec![0.0; 4]),
            ],
            Dimensionality::TwoD,
        );
        let log = IssueLog::in_memory("M1");
        let prepared = prepare(raw, None, &config, None, &log).unwrap();
        assert!(log.contains("without gait direction flipping"));

        let features = FeatureEngine::new(&prepared, &config, &log)
            .process(Cycle::new(2, 3), 1, None)
            .unwrap();
        let hip_x = ColumnKey::coordinate(Joint::central("Hip"), Coord::X);
        // subject level already subtracted the global Toe minimum
        assert_eq!(features.original.column(&hip_x).unwrap(), &[3.0, 4.0]);
        let standardised = features.x_standardised.as_ref().unwrap();
        assert_eq!(standardised.column(&hip_x).unwrap(), &[1.0, 2.0]);
        assert_eq!(features.analysed(), standardised);
    }

    #[test]
    fn test_cycle_level_height() {
        let config = SubjectConfig {
            hind_joints: vec!["Hip".into(), "Toe".into()],
            standardise_y_at_sc_level: true,
            standardise_y_to_a_joint: true,
            y_standardisation_joint: vec!["Toe".into()],
            flip_gait_direction: false,
            ..SubjectConfig::default()
        };
        let raw = frame(
            vec![
                (Joint::central("Hip"), Coord::X, vec![0.0, 1.0, 2.0, 3.0]),
                (Joint::central("Hip"), Coord::Y, vec![10.0, 11.0, 12.0, 13.0]),
                (Joint::central("Toe"), Coord::X, vec![0.5, 1.5, 2.5, 3.5]),
                (Joint::central("Toe"), Coord::Y, vec![2.0, 3.0, 4.0, 5.0]),
            ],
            Dimensionality::TwoD,
        );
        let log = IssueLog::in_memory("M1");
        let prepared = prepare(raw, None, &config, None, &log).unwrap();
        let features = FeatureEngine::new(&prepared, &config, &log)
            .process(Cycle::new(2, 3), 1, None)
            .unwrap();
        let hip_y = ColumnKey::coordinate(Joint::central("Hip"), Coord::Y);
        assert_eq!(features.original.column(&hip_y).unwrap(), &[8.0, 9.0]);
    }

    #[test]
    fn test_3d_leg_collapse_and_flip() {
        let config = SubjectConfig {
            dimensionality: Dimensionality::ThreeD,
            joints: vec!["Knee".into(), "Pelvis".into()],
            ..SubjectConfig::default()
        };
        let raw = frame(
            vec![
                (Joint::lateral("Knee", Side::Left), Coord::Y, vec![3.0, 2.0, 1.0]),
                (Joint::lateral("Knee", Side::Left), Coord::Z, vec![0.0, 1.0, 0.0]),
                (Joint::lateral("Knee", Side::Right), Coord::Y, vec![1.0, 2.0, 3.0]),
                (Joint::lateral("Knee", Side::Right), Coord::Z, vec![0.0, 2.0, 0.0]),
                (Joint::central("Pelvis"), Coord::Y, vec![2.0, 2.0, 2.0]),
                (Joint::central("Pelvis"), Coord::Z, vec![5.0, 5.0, 5.0]),
            ],
            Dimensionality::ThreeD,
        );
        let log = IssueLog::in_memory("P1");
        let prepared = prepare(raw, None, &config, None, &log).unwrap();
        let engine = FeatureEngine::new(&prepared, &config, &log);

        let knee_y = ColumnKey::coordinate(Joint::central("Knee"), Coord::Y);
        let left = engine.process(Cycle::new(0, 2), 1, Some(Side::Left)).unwrap();
        assert!(left.original.flipped);
        assert_eq!(left.original.column(&knee_y).unwrap(), &[0.0, 1.0, 2.0]);
        assert!(left
            .original
            .keys()
            .all(|k| k.joint().side.is_none()));

        let right = engine.process(Cycle::new(0, 2), 1, Some(Side::Right)).unwrap();
        assert!(!right.original.flipped);
        assert_eq!(right.original.column(&knee_y).unwrap(), &[1.0, 2.0, 3.0]);
        assert!(right.original.column(&knee_y.velocity()).is_some());
    }

    #[test]
    fn test_failing_cycle_is_skipped() {
        let config = SubjectConfig {
            hind_joints: vec!["Hip".into()],
            flip_gait_direction: false,
            ..SubjectConfig::default()
        };
        let raw = frame(
            vec![
                (Joint::central("Hip"), Coord::X, vec![0.0, 1.0, 2.0, 3.0]),
                (Joint::central("Hip"), Coord::Y, vec![0.0; 4]),
            ],
            Dimensionality::TwoD,
        );
        let log = IssueLog::in_memory("M1");
        let prepared = prepare(raw, None, &config, None, &log).unwrap();
        let features = FeatureEngine::new(&prepared, &config, &log)
            .process_all(&[Cycle::new(0, 1), Cycle::new(2, 9)], None);
        assert_eq!(features.len(), 1);
        assert!(log.contains("not in data range"));
        assert!(ensure_features(&features, "M1").is_ok());
        assert!(ensure_features(&[], "M1").is_err());
    }
}
