//! Kinematic primitives: planar joint angles, gradients and summary statistics.

/// Outcome of one planar angle evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleSample {
    /// Angle at the vertex in degrees, NaN if any input is NaN
    pub degrees: f64,
    /// The cosine drifted outside [-1, 1] and was clamped
    pub clamped: bool,
}

/// Both coordinates coincide exactly
pub fn coincident(a: [f64; 2], b: [f64; 2]) -> bool {
    a[0] == b[0] && a[1] == b[1]
}

/// Angle at `vertex` between the arms towards `lower` and `upper`.
///
/// θ = degrees(arccos(clamp(v1·v2 / (|v1||v2|), -1, 1)))
pub fn planar_angle(vertex: [f64; 2], lower: [f64; 2], upper: [f64; 2]) -> AngleSample {
    let v1 = [lower[0] - vertex[0], lower[1] - vertex[1]];
    let v2 = [upper[0] - vertex[0], upper[1] - vertex[1]];

    let dot = v1[0] * v2[0] + v1[1] * v2[1];
    let norm = (v1[0] * v1[0] + v1[1] * v1[1]).sqrt() * (v2[0] * v2[0] + v2[1] * v2[1]).sqrt();
    let cos = dot / norm;

    if cos.is_nan() {
        return AngleSample {
            degrees: f64::NAN,
            clamped: false,
        };
    }

    let clamped = !(-1.0..=1.0).contains(&cos);
    AngleSample {
        degrees: cos.clamp(-1.0, 1.0).acos().to_degrees(),
        clamped,
    }
}

/// Angle series plus how often clamping was engaged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngleSeries {
    pub degrees: Vec<f64>,
    pub clamped_frames: usize,
}

/// Evaluate [`planar_angle`] frame by frame.
///
/// Each argument is `(horizontal, vertical)` of one joint.
pub fn angle_series(
    vertex: (&[f64], &[f64]),
    lower: (&[f64], &[f64]),
    upper: (&[f64], &[f64]),
) -> AngleSeries {
    let n = vertex.0.len();
    let mut series = AngleSeries {
        degrees: Vec::with_capacity(n),
        clamped_frames: 0,
    };

    for t in 0..n {
        let sample = planar_angle(
            [vertex.0[t], vertex.1[t]],
            [lower.0[t], lower.1[t]],
            [upper.0[t], upper.1[t]],
        );
        if sample.clamped {
            series.clamped_frames += 1;
        }
        series.degrees.push(sample.degrees);
    }

    series
}

/// Three-point gradient with unit spacing.
///
/// Interior points use the central difference `(f[i+1] - f[i-1]) / 2`,
/// endpoints the one-sided first difference.
pub fn gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let mut out = Vec::with_capacity(n);
            out.push(values[1] - values[0]);
            for i in 1..n - 1 {
                out.push((values[i + 1] - values[i - 1]) / 2.0);
            }
            out.push(values[n - 1] - values[n - 2]);
            out
        }
    }
}

/// Arithmetic mean, NaN for empty input
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1), NaN below two values
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub fn sample_std(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

/// Median ignoring NaN values
pub fn median(values: &[f64]) -> f64 {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

/// Minimum ignoring NaN values, NaN if none remain
pub fn nan_min(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|x| !x.is_nan())
        .fold(f64::NAN, |acc, x| if acc.is_nan() || x < acc { x } else { acc })
}

/// Maximum ignoring NaN values, NaN if none remain
pub fn nan_max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|x| !x.is_nan())
        .fold(f64::NAN, |acc, x| if acc.is_nan() || x > acc { x } else { acc })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_right_angle() {
        let s = planar_angle([0.0, 0.0], [1.0, 0.0], [0.0, 1.0]);
        assert_abs_diff_eq!(s.degrees, 90.0, epsilon = 1e-12);
        assert!(!s.clamped);
    }

    #[test]
    fn test_angle_invariance_under_translation_and_scale() {
        let v = [0.3, 1.2];
        let l = [1.7, -0.4];
        let u = [-0.8, 2.5];
        let base = planar_angle(v, l, u).degrees;

        let shift = |p: [f64; 2]| [p[0] + 13.5, p[1] - 7.25];
        assert_abs_diff_eq!(planar_angle(shift(v), shift(l), shift(u)).degrees, base, epsilon = 1e-9);

        let scale = |p: [f64; 2]| [p[0] * 3.7, p[1] * 3.7];
        assert_abs_diff_eq!(planar_angle(scale(v), scale(l), scale(u)).degrees, base, epsilon = 1e-9);
    }

    #[test]
    fn test_angle_invariance_under_mirroring() {
        let v = [2.0, 1.0];
        let l = [3.0, 0.0];
        let u = [2.5, 2.0];
        let base = planar_angle(v, l, u).degrees;

        let mirror = |p: [f64; 2]| [10.0 - p[0], p[1]];
        assert_abs_diff_eq!(planar_angle(mirror(v), mirror(l), mirror(u)).degrees, base, epsilon = 1e-9);
    }

    #[test]
    fn test_collinear_clamp() {
        let s = planar_angle([0.0, 0.0], [0.1, 0.1], [0.3, 0.3]);
        assert!(s.degrees.abs() < 1e-5);
    }

    #[test]
    fn test_coincident_vertex_is_nan() {
        let s = planar_angle([1.0, 1.0], [1.0, 1.0], [0.0, 1.0]);
        assert!(s.degrees.is_nan());
        assert!(coincident([1.0, 1.0], [1.0, 1.0]));
    }

    #[test]
    fn test_gradient() {
        assert_eq!(gradient(&[0.0, 1.0, 2.0, 3.0, 4.0]), vec![1.0; 5]);
        assert_eq!(gradient(&[1.0, 1.0, 1.0, 1.0, 1.0]), vec![0.0; 5]);
        assert_eq!(gradient(&[0.0, 1.0, 4.0]), vec![1.0, 2.0, 3.0]);
        assert_eq!(gradient(&[5.0]), vec![0.0]);
    }

    #[test]
    fn test_summary_statistics() {
        assert_abs_diff_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert_abs_diff_eq!(sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.138089935299395, epsilon = 1e-12);
        assert!(sample_std(&[1.0]).is_nan());
        assert_eq!(median(&[3.0, f64::NAN, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(nan_min(&[f64::NAN, 3.0, -1.0]), -1.0);
        assert_eq!(nan_max(&[f64::NAN, 3.0, -1.0]), 3.0);
        assert!(nan_max(&[f64::NAN]).is_nan());
    }
}
