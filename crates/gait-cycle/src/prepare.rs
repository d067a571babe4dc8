//! Coordinate preparation.
//!
//! Runs once per subject before any cycle is cut:
//!
//! 1. **Canonicalisation**: configured joints and angles are checked against
//!    the recorded columns; unknown names are dropped with a warning
//! 2. **Axis handling**: optional y inversion and pixel-to-mm conversion
//! 3. **Height**: beam subtraction or minimum subtraction (unless deferred
//!    to cycle level)
//! 4. **Direction**: 2D recordings walking right-to-left are mirrored
//! 5. **Scaling**: optional per-subject coordinate standardisation divisor

use gait_core::{
    kinematics, AngleConfig, AngleSpec, ColumnKey, Coord, CoordFrame, Dimensionality, Error, IssueLog, Joint,
    Result, Side, SubjectConfig,
};

/// Frames averaged when locating entry and exit of the leading joint
pub const LIKELIHOOD_WINDOW: usize = 5;

/// Beam references and the joints measured against them
#[derive(Debug, Clone, PartialEq)]
pub struct BeamSpec {
    pub left: Joint,
    pub right: Joint,
    /// Joints whose heights are taken relative to the left beam column
    pub hind: Vec<Joint>,
    /// Joints whose heights are taken relative to the right beam column
    pub fore: Vec<Joint>,
}

/// Configuration after validation against one subject's columns.
///
/// Joints are central; 3D lateral variants are resolved per side with
/// [`side_view`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub dim: Dimensionality,
    pub hind_joints: Vec<Joint>,
    pub fore_joints: Vec<Joint>,
    /// Joints whose coordinates are analysed
    pub joints: Vec<Joint>,
    pub angles: Vec<AngleSpec>,
    pub leading_joint: Joint,
    pub height_joint: Option<Joint>,
    pub x_standardisation_joint: Option<Joint>,
    pub beam: Option<BeamSpec>,
    /// Names removed because no matching column exists
    pub dropped: Vec<String>,
}

impl ResolvedConfig {
    /// Every joint referenced by the analysed joints or the angles
    pub fn referenced_joints(&self) -> Vec<Joint> {
        let mut out = self.joints.clone();
        for spec in &self.angles {
            for joint in spec.joints() {
                if !out.contains(joint) {
                    out.push(joint.clone());
                }
            }
        }
        out
    }

    /// `config` with the joint and angle lists actually analysed
    pub fn effective(&self, config: &SubjectConfig) -> SubjectConfig {
        let names = |joints: &[Joint]| joints.iter().map(|j| j.name.clone()).collect::<Vec<_>>();
        let mut effective = config.clone();
        match self.dim {
            Dimensionality::TwoD => {
                effective.hind_joints = names(&self.hind_joints);
                effective.fore_joints = names(&self.fore_joints);
            }
            Dimensionality::ThreeD => effective.joints = names(&self.joints),
        }
        effective.angles = AngleConfig {
            name: self.angles.iter().map(|a| a.vertex.name.clone()).collect(),
            lower_joint: self.angles.iter().map(|a| a.lower.name.clone()).collect(),
            upper_joint: self.angles.iter().map(|a| a.upper.name.clone()).collect(),
        };
        if let Some(beam) = &self.beam {
            effective.beam_hind_jointadd = names(beam.hind.get(self.hind_joints.len()..).unwrap_or(&[]));
            effective.beam_fore_jointadd = names(beam.fore.get(self.fore_joints.len()..).unwrap_or(&[]));
        }
        effective
    }
}

/// Lateral variant of a joint when the frame records one for `side`
pub fn side_view(joint: &Joint, side: Side, frame: &CoordFrame) -> Joint {
    let lateral = joint.on_side(side);
    if frame.has_joint(&lateral) {
        lateral
    } else {
        joint.clone()
    }
}

fn known_joint(frame: &CoordFrame, name: &str) -> Option<Joint> {
    let joint = Joint::central(name.trim());
    let present = frame.has_joint(&joint)
        || (frame.dim() == Dimensionality::ThreeD
            && Side::ORDER.iter().any(|&s| frame.has_joint(&joint.on_side(s))));
    present.then_some(joint)
}

fn keep_known(frame: &CoordFrame, names: &[String], dropped: &mut Vec<String>) -> Vec<Joint> {
    let mut out = Vec::new();
    for name in names {
        match known_joint(frame, name) {
            Some(joint) if !out.contains(&joint) => out.push(joint),
            Some(_) => {}
            None => dropped.push(name.clone()),
        }
    }
    out
}

/// Validate the configuration against the recorded columns.
///
/// Fatal when no leading joint survives or a configured standardisation
/// joint is missing.
pub fn resolve_config(
    config: &SubjectConfig,
    frame: &CoordFrame,
    beam: Option<&CoordFrame>,
    log: &IssueLog,
) -> Result<ResolvedConfig> {
    let dim = config.dimensionality;
    let mut dropped = Vec::new();

    let (hind_joints, fore_joints, joints) = match dim {
        Dimensionality::TwoD => {
            let hind = keep_known(frame, &config.hind_joints, &mut dropped);
            let fore = keep_known(frame, &config.fore_joints, &mut dropped);
            let mut all = hind.clone();
            all.extend(fore.iter().filter(|j| !hind.contains(j)).cloned());
            (hind, fore, all)
        }
        Dimensionality::ThreeD => {
            let joints = keep_known(frame, &config.joints, &mut dropped);
            (Vec::new(), Vec::new(), joints)
        }
    };

    let mut angle_config = config.angles.clone();
    if angle_config.is_uneven() {
        log.record(format!(
            "Angle lists have unequal lengths ({} names, {} lower, {} upper joints); \
             truncated to the shortest",
            angle_config.name.len(),
            angle_config.lower_joint.len(),
            angle_config.upper_joint.len()
        ));
        angle_config.truncate_to_shortest();
    }

    let mut angles = Vec::new();
    for spec in angle_config.specs() {
        let resolved: Option<Vec<Joint>> = spec
            .joints()
            .iter()
            .map(|j| known_joint(frame, &j.name))
            .collect();
        match resolved {
            Some(joints) => {
                angles.push(AngleSpec::new(joints[0].clone(), joints[1].clone(), joints[2].clone()))
            }
            None => dropped.push(format!("{} Angle", spec.vertex.name)),
        }
    }

    let leading = match dim {
        Dimensionality::TwoD => hind_joints.first(),
        Dimensionality::ThreeD => joints.first(),
    };
    let leading_joint = leading.cloned().ok_or_else(|| {
        Error::ConfigInvalid(format!(
            "none of the configured {} exist in the data",
            match dim {
                Dimensionality::TwoD => "hind joints",
                Dimensionality::ThreeD => "joints",
            }
        ))
    })?;

    let height_joint = if config.height_to_joint() {
        let name = config.height_joint().unwrap_or_default();
        Some(known_joint(frame, name).ok_or_else(|| {
            Error::ConfigInvalid(format!("height standardisation joint {name:?} not in data"))
        })?)
    } else {
        None
    };

    let x_standardisation_joint = if dim == Dimensionality::TwoD && config.standardise_x_coordinates {
        let name = config
            .x_standardisation_joint
            .first()
            .map(String::as_str)
            .unwrap_or_default();
        Some(known_joint(frame, name).ok_or_else(|| {
            Error::ConfigInvalid(format!("x standardisation joint {name:?} not in data"))
        })?)
    } else {
        None
    };

    let beam = if dim == Dimensionality::TwoD && config.subtract_beam {
        let beam_frame = beam.ok_or_else(|| {
            Error::InputMissing("beam subtraction requested but no beam file was found".into())
        })?;
        let reference = |names: &[String], which: &str| -> Result<Joint> {
            names
                .first()
                .and_then(|n| known_joint(beam_frame, n))
                .ok_or_else(|| {
                    Error::ConfigInvalid(format!("{which} beam column {names:?} not in beam data"))
                })
        };
        let left = reference(&config.beam_col_left, "left")?;
        let right = reference(&config.beam_col_right, "right")?;

        let mut hind = hind_joints.clone();
        hind.extend(keep_known(frame, &config.beam_hind_jointadd, &mut dropped));
        let mut fore = fore_joints.clone();
        fore.extend(keep_known(frame, &config.beam_fore_jointadd, &mut dropped));
        Some(BeamSpec {
            left,
            right,
            hind,
            fore,
        })
    } else {
        None
    };

    if !dropped.is_empty() {
        log.record(format!(
            "Removed from the analysis because they are not in the data: {}",
            dropped.join(", ")
        ));
    }

    Ok(ResolvedConfig {
        dim,
        hind_joints,
        fore_joints,
        joints,
        angles,
        leading_joint,
        height_joint,
        x_standardisation_joint,
        beam,
        dropped,
    })
}

/// Coordinates ready for cycle extraction
#[derive(Debug, Clone)]
pub struct Prepared {
    pub frame: CoordFrame,
    pub resolved: ResolvedConfig,
    /// Largest forward coordinate of the recording (3D per-cycle flip)
    pub forward_max: f64,
    /// Tracking-jump thresholds in output units
    pub x_jump_threshold: Option<f64>,
    pub y_jump_threshold: Option<f64>,
}

/// Walking direction of a traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Unknown,
}

fn is_spatial(key: &ColumnKey) -> bool {
    matches!(key.coord(), Some(c) if c != Coord::Likelihood)
}

fn axis_min(frame: &CoordFrame, coord: Coord) -> f64 {
    frame
        .coordinate_keys(coord)
        .iter()
        .filter_map(|k| frame.column(k))
        .map(kinematics::nan_min)
        .fold(f64::NAN, f64::min)
}

fn axis_max(frame: &CoordFrame, coord: Coord) -> f64 {
    frame
        .coordinate_keys(coord)
        .iter()
        .filter_map(|k| frame.column(k))
        .map(kinematics::nan_max)
        .fold(f64::NAN, f64::max)
}

/// Subtract `offset` from every raw column on `coord`
pub fn shift_axis(frame: &mut CoordFrame, coord: Coord, offset: f64) {
    if offset.is_finite() {
        frame.map_columns(|k| k.coord() == Some(coord), |v| v - offset);
    }
}

/// Minimum subtraction on the vertical axis, from one joint or all columns.
///
/// A configured joint counts with its central column and both lateral
/// variants; it is an error when none of them is recorded.
pub fn standardise_height(frame: &mut CoordFrame, joint: Option<&Joint>) -> Result<()> {
    let vertical = frame.dim().vertical();
    let offset = match joint {
        Some(joint) => {
            let variants = std::iter::once(joint.clone())
                .chain(Side::ORDER.iter().map(|&s| joint.on_side(s)));
            let minima: Vec<f64> = variants
                .filter_map(|j| frame.coordinate(&j, vertical).map(kinematics::nan_min))
                .collect();
            if minima.is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "height standardisation joint {joint} has no {vertical:?} column"
                )));
            }
            minima.into_iter().fold(f64::NAN, f64::min)
        }
        None => axis_min(frame, vertical),
    };
    shift_axis(frame, vertical, offset);
    Ok(())
}

/// Prepare one subject's coordinates
pub fn prepare(
    frame: CoordFrame,
    beam: Option<CoordFrame>,
    config: &SubjectConfig,
    divisor: Option<f64>,
    log: &IssueLog,
) -> Result<Prepared> {
    if frame.dim() != config.dimensionality {
        return Err(Error::ConfigInvalid(format!(
            "{} coordinates given to a {} analysis",
            frame.dim(),
            config.dimensionality
        )));
    }
    if frame.is_empty() {
        return Err(Error::IoFormat("coordinate file holds no frames".into()));
    }

    match config.dimensionality {
        Dimensionality::TwoD => prepare_2d(frame, beam, config, divisor, log),
        Dimensionality::ThreeD => prepare_3d(frame, config, divisor, log),
    }
}

fn prepare_2d(
    mut frame: CoordFrame,
    mut beam: Option<CoordFrame>,
    config: &SubjectConfig,
    divisor: Option<f64>,
    log: &IssueLog,
) -> Result<Prepared> {
    let resolved = resolve_config(config, &frame, beam.as_ref(), log)?;

    if config.invert_y_axis {
        frame.map_columns(|k| k.coord() == Some(Coord::Y), |v| -v);
        if let Some(beam) = beam.as_mut() {
            beam.map_columns(|k| k.coord() == Some(Coord::Y), |v| -v);
        }
    }

    if config.convert_to_mm {
        let ratio = config.pixel_to_mm_ratio;
        frame.map_columns(is_spatial, |v| v / ratio);
        if let Some(beam) = beam.as_mut() {
            beam.map_columns(is_spatial, |v| v / ratio);
        }
    }

    match (&resolved.beam, &beam) {
        (Some(spec), Some(beam)) => subtract_beam(&mut frame, beam, spec)?,
        _ if !config.height_at_cycle_level() => {
            standardise_height(&mut frame, resolved.height_joint.as_ref())?
        }
        _ => {}
    }

    if config.flip_gait_direction {
        match traversal_2d(&frame, &resolved.leading_joint, config.likelihood_threshold) {
            Direction::Backward => {
                let max = axis_max(&frame, Coord::X);
                frame.map_columns(|k| k.coord() == Some(Coord::X), |v| max - v);
                frame.set_flipped(true);
                tracing::debug!(max, "Mirrored x coordinates");
            }
            Direction::Forward => {}
            Direction::Unknown => log.record(format!(
                "Could not determine gait direction from {}; coordinates left as recorded",
                resolved.leading_joint
            )),
        }
    }

    if let Some(joint) = &resolved.x_standardisation_joint {
        if !config.flip_gait_direction {
            log.record(
                "x coordinates standardised without gait direction flipping; \
                 results are only comparable if all runs walk the same way",
            );
        }
        let offset = frame
            .coordinate(joint, Coord::X)
            .map(kinematics::nan_min)
            .unwrap_or(f64::NAN);
        shift_axis(&mut frame, Coord::X, offset);
    }

    if let Some(divisor) = divisor {
        frame.map_columns(is_spatial, |v| v / divisor);
    }

    let unit = |threshold: Option<f64>| {
        threshold.map(|t| {
            if config.convert_to_mm {
                t / config.pixel_to_mm_ratio
            } else {
                t
            }
        })
    };

    tracing::info!(
        frames = frame.len(),
        joints = resolved.joints.len(),
        angles = resolved.angles.len(),
        flipped = frame.flipped(),
        "Prepared 2D coordinates"
    );

    Ok(Prepared {
        forward_max: axis_max(&frame, Coord::X),
        x_jump_threshold: unit(config.x_sc_broken_threshold),
        y_jump_threshold: unit(config.y_sc_broken_threshold),
        frame,
        resolved,
    })
}

fn subtract_beam(frame: &mut CoordFrame, beam: &CoordFrame, spec: &BeamSpec) -> Result<()> {
    if beam.len() != frame.len() {
        return Err(Error::IoFormat(format!(
            "beam file has {} frames but the coordinate file has {}",
            beam.len(),
            frame.len()
        )));
    }

    for (reference, joints) in [(&spec.left, &spec.hind), (&spec.right, &spec.fore)] {
        let Some(base) = beam.coordinate(reference, Coord::Y) else {
            return Err(Error::ConfigInvalid(format!(
                "beam column {reference} has no y coordinate"
            )));
        };
        let base = base.to_vec();
        for joint in joints {
            if let Some(values) = frame.column_mut(&ColumnKey::coordinate(joint.clone(), Coord::Y)) {
                values.iter_mut().zip(&base).for_each(|(v, b)| *v -= b);
            }
        }
    }
    Ok(())
}

/// Traversal direction of the leading joint.
///
/// Entry and exit are the first and last windows of [`LIKELIHOOD_WINDOW`]
/// frames whose mean likelihood exceeds `threshold`; without likelihood
/// columns the first and last tracked frames are used.
pub fn traversal_2d(frame: &CoordFrame, leading: &Joint, threshold: f64) -> Direction {
    let Some(x) = frame.coordinate(leading, Coord::X) else {
        return Direction::Unknown;
    };

    let bounds = match frame.coordinate(leading, Coord::Likelihood) {
        Some(lik) if lik.len() >= LIKELIHOOD_WINDOW => {
            let confident = |i: &usize| kinematics::mean(&lik[*i..*i + LIKELIHOOD_WINDOW]) > threshold;
            let last = lik.len() - LIKELIHOOD_WINDOW;
            let entry = (0..=last).find(confident);
            let exit = (0..=last).rev().find(confident);
            entry.zip(exit.map(|i| i + LIKELIHOOD_WINDOW - 1))
        }
        Some(_) => None,
        None => {
            let entry = x.iter().position(|v| !v.is_nan());
            let exit = x.iter().rposition(|v| !v.is_nan());
            entry.zip(exit)
        }
    };

    match bounds {
        Some((entry, exit)) if !x[entry].is_nan() && !x[exit].is_nan() => {
            if x[exit] < x[entry] {
                Direction::Backward
            } else {
                Direction::Forward
            }
        }
        _ => Direction::Unknown,
    }
}

/// Direction from the medians of the first and second half of a series
pub fn traversal_by_medians(values: &[f64]) -> Direction {
    let half = values.len() / 2;
    if half == 0 {
        return Direction::Unknown;
    }
    let first = kinematics::median(&values[..half]);
    let second = kinematics::median(&values[half..]);
    if first.is_nan() || second.is_nan() {
        Direction::Unknown
    } else if second < first {
        Direction::Backward
    } else {
        Direction::Forward
    }
}

fn prepare_3d(
    mut frame: CoordFrame,
    config: &SubjectConfig,
    divisor: Option<f64>,
    log: &IssueLog,
) -> Result<Prepared> {
    let resolved = resolve_config(config, &frame, None, log)?;

    if !config.height_at_cycle_level() {
        standardise_height(&mut frame, resolved.height_joint.as_ref())?;
    }

    if let Some(divisor) = divisor {
        frame.map_columns(is_spatial, |v| v / divisor);
    }

    for side in Side::ORDER {
        let joint = side_view(&resolved.leading_joint, side, &frame);
        let direction = frame
            .coordinate(&joint, Coord::Y)
            .map(traversal_by_medians)
            .unwrap_or(Direction::Unknown);
        tracing::info!(side = %side, joint = %joint, ?direction, "Traversal direction");
    }

    tracing::info!(
        frames = frame.len(),
        joints = resolved.joints.len(),
        angles = resolved.angles.len(),
        "Prepared 3D coordinates"
    );

    Ok(Prepared {
        forward_max: axis_max(&frame, Coord::Y),
        x_jump_threshold: None,
        y_jump_threshold: None,
        frame,
        resolved,
    })
}
