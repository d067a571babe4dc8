//! Analysis configuration record.
//!
//! Field names follow the keys of the persisted configuration verbatim so a
//! snapshot written by one subject pass can be compared key by key at the
//! group stage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{AngleSpec, Dimensionality, Joint};

/// Keys that legitimately differ between subjects and groups
pub const PER_SUBJECT_KEYS: &[&str] = &[
    "root_dir",
    "results_dir",
    "sctable_filename",
    "data_string",
    "beam_string",
    "premouse_string",
    "postmouse_string",
    "prerun_string",
    "postrun_string",
    "postname_string",
    "coordinate_standardisation_xls",
];

/// Parallel lists describing joint angles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AngleConfig {
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub lower_joint: Vec<String>,
    #[serde(default)]
    pub upper_joint: Vec<String>,
}

impl AngleConfig {
    /// Lists are parallel; the shortest one wins
    pub fn is_uneven(&self) -> bool {
        self.name.len() != self.lower_joint.len() || self.name.len() != self.upper_joint.len()
    }

    pub fn truncate_to_shortest(&mut self) {
        let n = self
            .name
            .len()
            .min(self.lower_joint.len())
            .min(self.upper_joint.len());
        self.name.truncate(n);
        self.lower_joint.truncate(n);
        self.upper_joint.truncate(n);
    }

    /// Angle triplets with central joints; 3D passes resolve sides later
    pub fn specs(&self) -> Vec<AngleSpec> {
        self.name
            .iter()
            .zip(&self.lower_joint)
            .zip(&self.upper_joint)
            .map(|((v, l), u)| AngleSpec::new(Joint::central(v), Joint::central(l), Joint::central(u)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

fn default_sampling_rate() -> u32 {
    100
}

fn default_bin_num() -> usize {
    25
}

fn default_ratio() -> f64 {
    1.0
}

fn default_likelihood() -> f64 {
    0.95
}

fn default_true() -> bool {
    true
}

fn default_palette() -> String {
    "viridis".to_string()
}

fn default_plot_joints() -> usize {
    3
}

/// Configuration of one subject pass (coordinate preparation through averaging)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectConfig {
    #[serde(default)]
    pub dimensionality: Dimensionality,

    // I/O
    #[serde(default)]
    pub root_dir: PathBuf,
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
    #[serde(default)]
    pub sctable_filename: String,
    #[serde(default)]
    pub data_string: String,
    #[serde(default)]
    pub beam_string: String,
    #[serde(default)]
    pub premouse_string: String,
    #[serde(default)]
    pub postmouse_string: String,
    #[serde(default)]
    pub prerun_string: String,
    #[serde(default)]
    pub postrun_string: String,
    #[serde(default)]
    pub postname_string: String,

    // Time
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,

    // Geometry
    #[serde(default)]
    pub convert_to_mm: bool,
    #[serde(default = "default_ratio")]
    pub pixel_to_mm_ratio: f64,
    #[serde(default)]
    pub invert_y_axis: bool,
    #[serde(default = "default_true")]
    pub flip_gait_direction: bool,
    #[serde(default)]
    pub subtract_beam: bool,
    #[serde(default)]
    pub beam_col_left: Vec<String>,
    #[serde(default)]
    pub beam_col_right: Vec<String>,
    #[serde(default)]
    pub beam_hind_jointadd: Vec<String>,
    #[serde(default)]
    pub beam_fore_jointadd: Vec<String>,
    #[serde(default = "default_likelihood")]
    pub likelihood_threshold: f64,

    // Joints and angles
    #[serde(default)]
    pub hind_joints: Vec<String>,
    #[serde(default)]
    pub fore_joints: Vec<String>,
    #[serde(default)]
    pub joints: Vec<String>,
    #[serde(default)]
    pub angles: AngleConfig,

    // Standardisation
    #[serde(rename = "standardise_y_at_SC_level", alias = "standardise_y_at_sc_level", default)]
    pub standardise_y_at_sc_level: bool,
    #[serde(default)]
    pub standardise_y_to_a_joint: bool,
    #[serde(default)]
    pub y_standardisation_joint: Vec<String>,
    #[serde(default)]
    pub standardise_x_coordinates: bool,
    #[serde(default)]
    pub x_standardisation_joint: Vec<String>,
    #[serde(rename = "standardise_z_at_SC_level", alias = "standardise_z_at_sc_level", default)]
    pub standardise_z_at_sc_level: bool,
    #[serde(default)]
    pub standardise_z_to_a_joint: bool,
    #[serde(default)]
    pub z_standardisation_joint: Vec<String>,
    #[serde(default)]
    pub coordinate_standardisation_xls: Option<PathBuf>,

    // Cycle filters
    #[serde(default)]
    pub x_sc_broken_threshold: Option<f64>,
    #[serde(default)]
    pub y_sc_broken_threshold: Option<f64>,

    // Feature switches
    #[serde(default)]
    pub x_acceleration: bool,
    #[serde(default)]
    pub y_acceleration: bool,
    #[serde(default)]
    pub angular_acceleration: bool,
    #[serde(default = "default_true")]
    pub analyse_average_x: bool,
    #[serde(default = "default_true")]
    pub analyse_average_y: bool,

    // Normalization
    #[serde(default = "default_bin_num")]
    pub bin_num: usize,

    // Reporting
    #[serde(default)]
    pub save_to_xls: bool,
    #[serde(default)]
    pub dont_show_plots: bool,
    #[serde(default = "default_palette")]
    pub color_palette: String,
    #[serde(default = "default_plot_joints")]
    pub plot_joint_number: usize,
    #[serde(rename = "plot_SE", alias = "plot_se", default)]
    pub plot_se: bool,
    #[serde(default)]
    pub legend_outside: bool,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            dimensionality: Dimensionality::TwoD,
            root_dir: PathBuf::new(),
            results_dir: None,
            sctable_filename: String::new(),
            data_string: String::new(),
            beam_string: String::new(),
            premouse_string: String::new(),
            postmouse_string: String::new(),
            prerun_string: String::new(),
            postrun_string: String::new(),
            postname_string: String::new(),
            sampling_rate: default_sampling_rate(),
            convert_to_mm: false,
            pixel_to_mm_ratio: default_ratio(),
            invert_y_axis: false,
            flip_gait_direction: true,
            subtract_beam: false,
            beam_col_left: Vec::new(),
            beam_col_right: Vec::new(),
            beam_hind_jointadd: Vec::new(),
            beam_fore_jointadd: Vec::new(),
            likelihood_threshold: default_likelihood(),
            hind_joints: Vec::new(),
            fore_joints: Vec::new(),
            joints: Vec::new(),
            angles: AngleConfig::default(),
            standardise_y_at_sc_level: false,
            standardise_y_to_a_joint: false,
            y_standardisation_joint: Vec::new(),
            standardise_x_coordinates: false,
            x_standardisation_joint: Vec::new(),
            standardise_z_at_sc_level: false,
            standardise_z_to_a_joint: false,
            z_standardisation_joint: Vec::new(),
            coordinate_standardisation_xls: None,
            x_sc_broken_threshold: None,
            y_sc_broken_threshold: None,
            x_acceleration: false,
            y_acceleration: false,
            angular_acceleration: false,
            analyse_average_x: true,
            analyse_average_y: true,
            bin_num: default_bin_num(),
            save_to_xls: false,
            dont_show_plots: false,
            color_palette: default_palette(),
            plot_joint_number: default_plot_joints(),
            plot_se: false,
            legend_outside: false,
        }
    }
}

impl SubjectConfig {
    /// Load configuration from file with `GAIT_` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("GAIT"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("GAIT"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Scalar sanity checks that do not need the coordinate data
    pub fn check(&self) -> Result<()> {
        if self.bin_num < 1 {
            return Err(Error::ConfigInvalid("bin_num must be at least 1".into()));
        }
        if self.sampling_rate < 1 {
            return Err(Error::ConfigInvalid("sampling_rate must be at least 1".into()));
        }
        if self.convert_to_mm && !(self.pixel_to_mm_ratio > 0.0) {
            return Err(Error::ConfigInvalid(
                "pixel_to_mm_ratio must be positive when convert_to_mm is set".into(),
            ));
        }
        if !self.data_string.is_empty() && self.data_string == self.beam_string {
            return Err(Error::InputAmbiguous(
                "data_string and beam_string are identical".into(),
            ));
        }
        Ok(())
    }

    pub fn results_dir(&self) -> &Path {
        self.results_dir.as_deref().unwrap_or(&self.root_dir)
    }

    /// Joints whose coordinates are analysed (hind + fore for 2D)
    pub fn analysed_joints(&self) -> Vec<String> {
        match self.dimensionality {
            Dimensionality::TwoD => self
                .hind_joints
                .iter()
                .chain(&self.fore_joints)
                .cloned()
                .collect(),
            Dimensionality::ThreeD => self.joints.clone(),
        }
    }

    /// Joint whose traversal defines gait direction
    pub fn leading_joint(&self) -> Option<&str> {
        match self.dimensionality {
            Dimensionality::TwoD => self.hind_joints.first(),
            Dimensionality::ThreeD => self.joints.first(),
        }
        .map(String::as_str)
    }

    pub fn height_at_cycle_level(&self) -> bool {
        match self.dimensionality {
            Dimensionality::TwoD => self.standardise_y_at_sc_level,
            Dimensionality::ThreeD => self.standardise_z_at_sc_level,
        }
    }

    pub fn height_to_joint(&self) -> bool {
        match self.dimensionality {
            Dimensionality::TwoD => self.standardise_y_to_a_joint,
            Dimensionality::ThreeD => self.standardise_z_to_a_joint,
        }
    }

    pub fn height_joint(&self) -> Option<&str> {
        match self.dimensionality {
            Dimensionality::TwoD => self.y_standardisation_joint.first(),
            Dimensionality::ThreeD => self.z_standardisation_joint.first(),
        }
        .map(String::as_str)
    }

    /// Second derivative of joint positions along the walking axis
    pub fn joint_acceleration(&self) -> bool {
        match self.dimensionality {
            Dimensionality::TwoD => self.x_acceleration,
            Dimensionality::ThreeD => self.y_acceleration,
        }
    }

    /// Horizontal columns participate in subject averages
    pub fn average_horizontal(&self) -> bool {
        match self.dimensionality {
            Dimensionality::TwoD => self.analyse_average_x,
            Dimensionality::ThreeD => self.analyse_average_y,
        }
    }

    /// Snapshot as a JSON object for cross-group comparison
    pub fn snapshot(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::Serialization("configuration is not a JSON object".into())),
        }
    }
}

/// Number of principal components to keep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PcaComponents {
    Count(usize),
    /// Smallest number of components explaining at least this variance ratio
    Variance(f64),
}

impl PcaComponents {
    pub fn check(&self) -> Result<()> {
        match *self {
            PcaComponents::Count(k) if k < 2 => Err(Error::ConfigInvalid(format!(
                "PCA_n_components must be at least 2, got {k}"
            ))),
            PcaComponents::Variance(v) if !(v > 0.0 && v < 1.0) => Err(Error::ConfigInvalid(
                format!("PCA_n_components variance ratio must lie in (0, 1), got {v}"),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for PcaComponents {
    fn default() -> Self {
        PcaComponents::Count(3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnovaDesign {
    #[serde(rename = "RM ANOVA")]
    RepeatedMeasures,
    #[serde(rename = "Mixed ANOVA")]
    Mixed,
}

impl Default for AnovaDesign {
    fn default() -> Self {
        AnovaDesign::Mixed
    }
}

/// Which per-subject sheet a 3D group analysis reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSelection {
    Left,
    Right,
    Both,
}

impl LegSelection {
    pub fn sheet(&self) -> &'static str {
        match self {
            LegSelection::Left => "left",
            LegSelection::Right => "right",
            LegSelection::Both => "both",
        }
    }
}

impl Default for LegSelection {
    fn default() -> Self {
        LegSelection::Both
    }
}

fn default_permutations() -> usize {
    10_000
}

fn default_alpha() -> f64 {
    0.05
}

/// Configuration of the group stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub dimensionality: Dimensionality,
    #[serde(default)]
    pub group_names: Vec<String>,
    #[serde(default)]
    pub group_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub results_dir: PathBuf,
    #[serde(default)]
    pub which_leg: LegSelection,

    #[serde(rename = "PCA_variables", alias = "pca_variables", default)]
    pub pca_variables: Vec<String>,
    #[serde(rename = "PCA_n_components", alias = "pca_n_components", default)]
    pub pca_n_components: PcaComponents,
    #[serde(rename = "PCA_bins", alias = "pca_bins", default)]
    pub pca_bins: String,
    #[serde(rename = "PCA_custom_scatter_PCs", alias = "pca_custom_scatter_pcs", default)]
    pub pca_custom_scatter_pcs: String,

    #[serde(default)]
    pub stats_variables: Vec<String>,
    #[serde(default = "default_true")]
    pub do_permtest: bool,
    #[serde(default = "default_true")]
    pub do_anova: bool,
    #[serde(default)]
    pub anova_design: AnovaDesign,
    #[serde(default = "default_permutations")]
    pub permutation_number: usize,
    #[serde(default = "default_alpha")]
    pub stats_threshold: f64,
    #[serde(default)]
    pub permutation_seed: u64,

    #[serde(default)]
    pub save_to_xls: bool,
    #[serde(default)]
    pub dont_show_plots: bool,
    #[serde(default = "default_palette")]
    pub color_palette: String,
    #[serde(rename = "plot_SE", alias = "plot_se", default)]
    pub plot_se: bool,
    #[serde(default)]
    pub legend_outside: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            dimensionality: Dimensionality::TwoD,
            group_names: Vec::new(),
            group_dirs: Vec::new(),
            results_dir: PathBuf::new(),
            which_leg: LegSelection::Both,
            pca_variables: Vec::new(),
            pca_n_components: PcaComponents::default(),
            pca_bins: String::new(),
            pca_custom_scatter_pcs: String::new(),
            stats_variables: Vec::new(),
            do_permtest: true,
            do_anova: true,
            anova_design: AnovaDesign::Mixed,
            permutation_number: default_permutations(),
            stats_threshold: default_alpha(),
            permutation_seed: 0,
            save_to_xls: false,
            dont_show_plots: false,
            color_palette: default_palette(),
            plot_se: false,
            legend_outside: false,
        }
    }
}

impl GroupConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("GAIT"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.check()?;
        Ok(cfg)
    }

    pub fn check(&self) -> Result<()> {
        if self.group_names.len() < 2 {
            return Err(Error::ConfigInvalid(
                "at least two groups are required".into(),
            ));
        }
        if self.group_names.len() != self.group_dirs.len() {
            return Err(Error::ConfigInvalid(format!(
                "{} group names but {} group directories",
                self.group_names.len(),
                self.group_dirs.len()
            )));
        }
        let mut names = self.group_names.clone();
        names.sort();
        names.dedup();
        if names.len() != self.group_names.len() {
            return Err(Error::InputAmbiguous("group names must be unique".into()));
        }
        if !(self.stats_threshold > 0.0 && self.stats_threshold < 1.0) {
            return Err(Error::ConfigInvalid(format!(
                "stats_threshold must lie in (0, 1), got {}",
                self.stats_threshold
            )));
        }
        if !self.pca_variables.is_empty() {
            self.pca_n_components.check()?;
        }
        Ok(())
    }
}

/// Parse a bin list such as `"1-5,10,12-14"` into zero-based bin indices.
///
/// Bins are one-based in the configuration and must lie in `1..=bin_num`.
/// An empty string selects every bin.
pub fn parse_pca_bins(spec: &str, bin_num: usize) -> Result<Vec<usize>> {
    if spec.is_empty() {
        return Ok((0..bin_num).collect());
    }
    let invalid = |why: &str| Error::ConfigInvalid(format!("PCA_bins {spec:?}: {why}"));

    if spec.contains(char::is_whitespace) {
        return Err(invalid("spaces are not allowed"));
    }
    if spec.contains(",-") || spec.contains("-,") || spec.contains(",,") || spec.contains("--") {
        return Err(invalid("separators must not be adjacent"));
    }

    let mut bins = Vec::new();
    for part in spec.split(',') {
        let bounds: Vec<&str> = part.split('-').collect();
        let parse = |s: &str| s.parse::<usize>().map_err(|_| invalid("not a bin number"));
        let (lo, hi) = match bounds.as_slice() {
            [single] => {
                let b = parse(single)?;
                (b, b)
            }
            [lo, hi] => (parse(lo)?, parse(hi)?),
            _ => return Err(invalid("a range has exactly two ends")),
        };
        if lo > hi {
            return Err(invalid("ranges must ascend"));
        }
        if lo < 1 || hi > bin_num {
            return Err(invalid(&format!("bins must lie in 1..={bin_num}")));
        }
        for b in lo..=hi {
            if !bins.contains(&(b - 1)) {
                bins.push(b - 1);
            }
        }
    }
    bins.sort_unstable();
    Ok(bins)
}

/// Parse scatter plot component groups such as `"1,2,3;4,5"`.
pub fn parse_scatter_pcs(spec: &str, n_components: usize) -> Result<Vec<Vec<usize>>> {
    if spec.is_empty() {
        return Ok(Vec::new());
    }
    let invalid = |why: &str| {
        Error::ConfigInvalid(format!("PCA_custom_scatter_PCs {spec:?}: {why}"))
    };
    if spec.contains(char::is_whitespace) {
        return Err(invalid("spaces are not allowed"));
    }

    spec.split(';')
        .map(|group| {
            let pcs = group
                .split(',')
                .map(|s| s.parse::<usize>().map_err(|_| invalid("not a component number")))
                .collect::<Result<Vec<_>>>()?;
            if !(2..=3).contains(&pcs.len()) {
                return Err(invalid("each scatter plot takes 2 or 3 components"));
            }
            if pcs.iter().any(|&pc| pc < 1 || pc > n_components) {
                return Err(invalid(&format!("components must lie in 1..={n_components}")));
            }
            Ok(pcs)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = SubjectConfig::default();
        assert_eq!(cfg.bin_num, 25);
        assert_eq!(cfg.sampling_rate, 100);
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn test_snapshot_uses_verbatim_keys() {
        let snapshot = SubjectConfig::default().snapshot().unwrap();
        assert!(snapshot.contains_key("standardise_y_at_SC_level"));
        assert!(snapshot.contains_key("plot_SE"));
        assert!(snapshot.contains_key("bin_num"));
    }

    #[test]
    fn test_angle_truncation() {
        let mut angles = AngleConfig {
            name: vec!["Knee".into(), "Hip".into()],
            lower_joint: vec!["Ankle".into()],
            upper_joint: vec!["Hip".into(), "Crest".into()],
        };
        assert!(angles.is_uneven());
        angles.truncate_to_shortest();
        assert_eq!(angles.len(), 1);
        assert_eq!(angles.specs()[0].lower, Joint::central("Ankle"));
    }

    #[test]
    fn test_pca_components_deserialize() {
        let k: PcaComponents = serde_json::from_str("3").unwrap();
        assert_eq!(k, PcaComponents::Count(3));
        let v: PcaComponents = serde_json::from_str("0.8").unwrap();
        assert_eq!(v, PcaComponents::Variance(0.8));
        assert!(PcaComponents::Count(1).check().is_err());
        assert!(PcaComponents::Variance(1.5).check().is_err());
    }

    #[test]
    fn test_anova_design_names() {
        let d: AnovaDesign = serde_json::from_str("\"RM ANOVA\"").unwrap();
        assert_eq!(d, AnovaDesign::RepeatedMeasures);
    }

    #[test]
    fn test_parse_pca_bins() {
        assert_eq!(parse_pca_bins("1-3,5", 10).unwrap(), vec![0, 1, 2, 4]);
        assert_eq!(parse_pca_bins("", 3).unwrap(), vec![0, 1, 2]);
        assert!(parse_pca_bins("1, 2", 10).is_err());
        assert!(parse_pca_bins("1,-2", 10).is_err());
        assert!(parse_pca_bins("5-2", 10).is_err());
        assert!(parse_pca_bins("0-2", 10).is_err());
        assert!(parse_pca_bins("9-11", 10).is_err());
    }

    #[test]
    fn test_parse_scatter_pcs() {
        assert_eq!(
            parse_scatter_pcs("1,2,3;4,5", 5).unwrap(),
            vec![vec![1, 2, 3], vec![4, 5]]
        );
        assert!(parse_scatter_pcs("1", 5).is_err());
        assert!(parse_scatter_pcs("1,6", 5).is_err());
    }

    #[test]
    fn test_group_config_checks() {
        let mut cfg = GroupConfig {
            group_names: vec!["WT".into(), "KO".into()],
            group_dirs: vec!["a".into(), "b".into()],
            ..GroupConfig::default()
        };
        assert!(cfg.check().is_ok());
        cfg.group_names[1] = "WT".into();
        assert!(cfg.check().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"sampling_rate": 200, "bin_num": 50, "hind_joints": ["Hip", "Knee"]}"#,
        )
        .unwrap();

        let cfg = SubjectConfig::from_file(&path).unwrap();
        assert_eq!(cfg.sampling_rate, 200);
        assert_eq!(cfg.bin_num, 50);
        assert_eq!(cfg.leading_joint(), Some("Hip"));
    }
}
