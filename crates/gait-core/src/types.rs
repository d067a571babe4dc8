//! Fundamental types for the gait analysis pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capture setup the coordinates come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimensionality {
    /// Single camera, planar (x, y) tracks
    #[serde(rename = "2D")]
    TwoD,
    /// Multi-camera, spatial (X, Y, Z) tracks
    #[serde(rename = "3D")]
    ThreeD,
}

impl fmt::Display for Dimensionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dimensionality::TwoD => "2D",
            Dimensionality::ThreeD => "3D",
        })
    }
}

impl Dimensionality {
    /// Axis of locomotion (walking direction)
    pub fn horizontal(&self) -> Coord {
        match self {
            Dimensionality::TwoD => Coord::X,
            Dimensionality::ThreeD => Coord::Y,
        }
    }

    /// Height axis
    pub fn vertical(&self) -> Coord {
        match self {
            Dimensionality::TwoD => Coord::Y,
            Dimensionality::ThreeD => Coord::Z,
        }
    }

    /// Coordinates that carry spatial position (likelihood excluded)
    pub fn spatial_coords(&self) -> &'static [Coord] {
        match self {
            Dimensionality::TwoD => &[Coord::X, Coord::Y],
            Dimensionality::ThreeD => &[Coord::X, Coord::Y, Coord::Z],
        }
    }
}

impl Default for Dimensionality {
    fn default() -> Self {
        Dimensionality::TwoD
    }
}

/// Body side of a lateralized joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Fixed order in which a subject's legs appear in the annotation table
    pub const ORDER: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Some(Side::Left),
            "right" | "r" => Some(Side::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinate channel of a tracked joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Coord {
    X,
    Y,
    Z,
    /// Tracker confidence (2D tracker A only)
    Likelihood,
}

impl Coord {
    /// Column suffix; 2D exports use lower case, 3D exports upper case
    pub fn label(&self, dim: Dimensionality) -> &'static str {
        match (self, dim) {
            (Coord::Likelihood, _) => "likelihood",
            (Coord::X, Dimensionality::TwoD) => "x",
            (Coord::Y, Dimensionality::TwoD) => "y",
            (Coord::Z, Dimensionality::TwoD) => "z",
            (Coord::X, Dimensionality::ThreeD) => "X",
            (Coord::Y, Dimensionality::ThreeD) => "Y",
            (Coord::Z, Dimensionality::ThreeD) => "Z",
        }
    }

    pub fn parse(s: &str, dim: Dimensionality) -> Option<Self> {
        match (s, dim) {
            ("likelihood", _) => Some(Coord::Likelihood),
            ("x", Dimensionality::TwoD) | ("X", Dimensionality::ThreeD) => Some(Coord::X),
            ("y", Dimensionality::TwoD) | ("Y", Dimensionality::ThreeD) => Some(Coord::Y),
            ("Z", Dimensionality::ThreeD) => Some(Coord::Z),
            _ => None,
        }
    }
}

/// A tracked body point, optionally carrying a laterality tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Joint {
    pub name: String,
    pub side: Option<Side>,
}

impl Joint {
    pub fn central(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            side: None,
        }
    }

    pub fn lateral(name: impl Into<String>, side: Side) -> Self {
        Self {
            name: name.into().trim().to_string(),
            side: Some(side),
        }
    }

    /// Same joint name tagged with a side
    pub fn on_side(&self, side: Side) -> Self {
        Self {
            name: self.name.clone(),
            side: Some(side),
        }
    }

    pub fn is_lateral(&self) -> bool {
        self.side.is_some()
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side {
            Some(side) => write!(f, "{}, {}", self.name, side),
            None => f.write_str(&self.name),
        }
    }
}

/// Typed column identity; display names are derived at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnKey {
    Coordinate { joint: Joint, coord: Coord },
    /// Planar angle with its vertex at `joint`
    Angle { joint: Joint },
    Velocity(Box<ColumnKey>),
    Acceleration(Box<ColumnKey>),
}

impl ColumnKey {
    pub fn coordinate(joint: Joint, coord: Coord) -> Self {
        ColumnKey::Coordinate { joint, coord }
    }

    pub fn angle(joint: Joint) -> Self {
        ColumnKey::Angle { joint }
    }

    pub fn velocity(&self) -> Self {
        ColumnKey::Velocity(Box::new(self.clone()))
    }

    pub fn acceleration(&self) -> Self {
        ColumnKey::Acceleration(Box::new(self.clone()))
    }

    pub fn coord(&self) -> Option<Coord> {
        match self {
            ColumnKey::Coordinate { coord, .. } => Some(*coord),
            _ => None,
        }
    }

    pub fn joint(&self) -> &Joint {
        match self {
            ColumnKey::Coordinate { joint, .. } | ColumnKey::Angle { joint } => joint,
            ColumnKey::Velocity(base) | ColumnKey::Acceleration(base) => base.joint(),
        }
    }

    pub fn is_likelihood(&self) -> bool {
        self.coord() == Some(Coord::Likelihood)
    }

    pub fn is_angle(&self) -> bool {
        matches!(self, ColumnKey::Angle { .. })
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, ColumnKey::Velocity(_) | ColumnKey::Acceleration(_))
    }

    /// Raw or derived column rooted in the given coordinate
    pub fn is_rooted_in(&self, coord: Coord) -> bool {
        match self {
            ColumnKey::Coordinate { coord: c, .. } => *c == coord,
            ColumnKey::Angle { .. } => false,
            ColumnKey::Velocity(base) | ColumnKey::Acceleration(base) => base.is_rooted_in(coord),
        }
    }

    /// Column name as written to disk
    pub fn display(&self, dim: Dimensionality) -> String {
        match self {
            ColumnKey::Coordinate { joint, coord } => format!("{} {}", joint, coord.label(dim)),
            ColumnKey::Angle { joint } => format!("{} Angle", joint),
            ColumnKey::Velocity(base) => format!("{} Velocity", base.display(dim)),
            ColumnKey::Acceleration(base) => format!("{} Acceleration", base.display(dim)),
        }
    }

    /// Parse a raw export header (`"<joint> <coord>"` or `"<joint>, <side> <coord>"`)
    pub fn parse_coordinate(header: &str, dim: Dimensionality) -> Option<Self> {
        let header = header.trim();
        let (body, suffix) = header.rsplit_once(' ')?;
        let coord = Coord::parse(suffix, dim)?;
        let body = body.trim();
        if body.is_empty() {
            return None;
        }

        let joint = match body.rsplit_once(", ") {
            Some((name, side)) => match Side::parse(side) {
                Some(side) => Joint::lateral(name, side),
                None => Joint::central(body),
            },
            None => Joint::central(body),
        };

        Some(ColumnKey::coordinate(joint, coord))
    }
}

/// Angle definition: vertex joint plus the two arms
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AngleSpec {
    pub vertex: Joint,
    pub lower: Joint,
    pub upper: Joint,
}

impl AngleSpec {
    pub fn new(vertex: Joint, lower: Joint, upper: Joint) -> Self {
        Self {
            vertex,
            lower,
            upper,
        }
    }

    pub fn map_joints(&self, mut f: impl FnMut(&Joint) -> Joint) -> Self {
        Self {
            vertex: f(&self.vertex),
            lower: f(&self.lower),
            upper: f(&self.upper),
        }
    }

    pub fn key(&self) -> ColumnKey {
        ColumnKey::angle(self.vertex.clone())
    }

    pub fn joints(&self) -> [&Joint; 3] {
        [&self.vertex, &self.lower, &self.upper]
    }
}

/// Identity of one subject pass
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    pub name: String,
    /// Run identifier (2D recordings only)
    pub run: Option<String>,
}

impl SubjectKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: None,
        }
    }

    pub fn with_run(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: Some(run.into()),
        }
    }

    /// Results folder / artifact prefix
    pub fn label(&self) -> String {
        match &self.run {
            Some(run) => format!("{} - Run {}", self.name, run),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        let knee = ColumnKey::coordinate(Joint::central("Knee"), Coord::Y);
        assert_eq!(knee.display(Dimensionality::TwoD), "Knee y");

        let lat = ColumnKey::coordinate(Joint::lateral("Ankle", Side::Left), Coord::Z);
        assert_eq!(lat.display(Dimensionality::ThreeD), "Ankle, left Z");

        let angle = ColumnKey::angle(Joint::central("Hip"));
        assert_eq!(angle.display(Dimensionality::TwoD), "Hip Angle");
        assert_eq!(
            angle.acceleration().display(Dimensionality::TwoD),
            "Hip Angle Acceleration"
        );
    }

    #[test]
    fn test_parse_coordinate_headers() {
        let key = ColumnKey::parse_coordinate("Hind paw tao x", Dimensionality::TwoD).unwrap();
        assert_eq!(
            key,
            ColumnKey::coordinate(Joint::central("Hind paw tao"), Coord::X)
        );

        let key = ColumnKey::parse_coordinate("Knee, right Y", Dimensionality::ThreeD).unwrap();
        assert_eq!(
            key,
            ColumnKey::coordinate(Joint::lateral("Knee", Side::Right), Coord::Y)
        );

        assert!(ColumnKey::parse_coordinate("Knee Y", Dimensionality::TwoD).is_none());
        assert!(ColumnKey::parse_coordinate("Time", Dimensionality::ThreeD).is_none());
    }

    #[test]
    fn test_derived_roots() {
        let x = ColumnKey::coordinate(Joint::central("Nose"), Coord::X);
        assert!(x.velocity().is_rooted_in(Coord::X));
        assert!(!x.velocity().is_rooted_in(Coord::Y));
        assert_eq!(x.acceleration().joint().name, "Nose");
    }

    #[test]
    fn test_subject_label() {
        assert_eq!(SubjectKey::with_run("M1", "3").label(), "M1 - Run 3");
        assert_eq!(SubjectKey::new("P07").label(), "P07");
    }
}
