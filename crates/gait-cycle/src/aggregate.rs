//! Per-subject averaging across normalized cycles.

use ndarray::{Array2, ArrayView2, Axis};

use gait_core::{kinematics, ColumnKey, Coord, Error, Result};

use crate::features::CycleSeries;
use crate::normalize::sc_percentages;

/// Mean and sample SD of every averaged column on the bin grid
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectSummary {
    pub id: String,
    /// Cycles that entered the average
    pub sc_number: usize,
    pub percentages: Vec<f64>,
    pub keys: Vec<ColumnKey>,
    /// One vector of `bins` values per key
    pub mean: Vec<Vec<f64>>,
    pub std: Vec<Vec<f64>>,
}

impl SubjectSummary {
    pub fn bins(&self) -> usize {
        self.percentages.len()
    }

    pub fn mean_of(&self, key: &ColumnKey) -> Option<&[f64]> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|i| self.mean[i].as_slice())
    }

    pub fn std_of(&self, key: &ColumnKey) -> Option<&[f64]> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|i| self.std[i].as_slice())
    }
}

/// Row-wise mean and sample SD of a `bins × samples` matrix.
///
/// Missing values are skipped per row; a row with fewer than two values has
/// an SD of NaN.
pub fn row_statistics(matrix: ArrayView2<f64>) -> (Vec<f64>, Vec<f64>) {
    matrix
        .axis_iter(Axis(0))
        .map(|row| {
            let present: Vec<f64> = row.iter().copied().filter(|v| !v.is_nan()).collect();
            (kinematics::mean(&present), kinematics::sample_std(&present))
        })
        .unzip()
}

/// Columns left out of subject averages
#[derive(Debug, Clone, Copy)]
pub struct AverageExclusions {
    /// Drop raw horizontal coordinates
    pub horizontal: Option<Coord>,
}

impl AverageExclusions {
    pub fn excludes(&self, key: &ColumnKey) -> bool {
        key.is_likelihood() || (self.horizontal.is_some() && key.coord() == self.horizontal)
    }
}

/// Average normalized cycles of one subject.
///
/// Every cycle must hold exactly `bins` rows; columns missing from a cycle
/// contribute NaN.
pub fn average_cycles(
    id: &str,
    cycles: &[CycleSeries],
    bins: usize,
    exclusions: AverageExclusions,
) -> Result<SubjectSummary> {
    let Some(first) = cycles.first() else {
        return Err(Error::EmptyCycles {
            subject: id.to_string(),
        });
    };
    if let Some(bad) = cycles.iter().find(|c| c.len() != bins) {
        return Err(Error::CycleInvalid(format!(
            "cycle {} of {id} has {} rows, expected {bins} bins",
            bad.ordinal,
            bad.len()
        )));
    }

    let mut keys: Vec<ColumnKey> = first
        .keys()
        .filter(|k| !exclusions.excludes(k))
        .cloned()
        .collect();
    for cycle in &cycles[1..] {
        for key in cycle.keys() {
            if !exclusions.excludes(key) && !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }

    let mut mean = Vec::with_capacity(keys.len());
    let mut std = Vec::with_capacity(keys.len());
    for key in &keys {
        let columns: Vec<Option<&[f64]>> = cycles.iter().map(|c| c.column(key)).collect();
        let matrix = Array2::from_shape_fn((bins, cycles.len()), |(bin, cycle)| {
            columns[cycle].map_or(f64::NAN, |values| values[bin])
        });
        let (m, s) = row_statistics(matrix.view());
        mean.push(m);
        std.push(s);
    }

    tracing::debug!(id, cycles = cycles.len(), columns = keys.len(), "Averaged cycles");
    Ok(SubjectSummary {
        id: id.to_string(),
        sc_number: cycles.len(),
        percentages: sc_percentages(bins),
        keys,
        mean,
        std,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gait_core::Joint;
    use ndarray::array;

    fn cycle(ordinal: usize, hip_x: Vec<f64>, hip_y: Vec<f64>) -> CycleSeries {
        let n = hip_x.len();
        CycleSeries {
            ordinal,
            side: None,
            flipped: false,
            time: (0..n).map(|i| i as f64).collect(),
            columns: vec![
                (ColumnKey::coordinate(Joint::central("Hip"), Coord::X), hip_x),
                (ColumnKey::coordinate(Joint::central("Hip"), Coord::Y), hip_y),
                (
                    ColumnKey::coordinate(Joint::central("Hip"), Coord::Likelihood),
                    vec![1.0; n],
                ),
            ],
        }
    }

    #[test]
    fn test_row_statistics() {
        let m = array![[1.0, 3.0], [2.0, f64::NAN], [f64::NAN, f64::NAN]];
        let (mean, std) = row_statistics(m.view());
        assert_eq!(mean[0], 2.0);
        assert_relative_eq!(std[0], 2.0_f64.sqrt());
        assert_eq!(mean[1], 2.0);
        assert!(std[1].is_nan());
        assert!(mean[2].is_nan());
    }

    #[test]
    fn test_average_excludes_likelihood_and_horizontal() {
        let cycles = vec![
            cycle(1, vec![0.0, 1.0], vec![1.0, 2.0]),
            cycle(2, vec![2.0, 3.0], vec![3.0, 6.0]),
        ];
        let hip_x = ColumnKey::coordinate(Joint::central("Hip"), Coord::X);
        let hip_y = ColumnKey::coordinate(Joint::central("Hip"), Coord::Y);

        let all = average_cycles("M1", &cycles, 2, AverageExclusions { horizontal: None }).unwrap();
        assert_eq!(all.keys, vec![hip_x.clone(), hip_y.clone()]);
        assert_eq!(all.sc_number, 2);
        assert_eq!(all.percentages, vec![50.0, 100.0]);
        assert_eq!(all.mean_of(&hip_y).unwrap(), &[2.0, 4.0]);
        assert_relative_eq!(all.std_of(&hip_y).unwrap()[1], 8.0_f64.sqrt());

        let no_x = average_cycles(
            "M1",
            &cycles,
            2,
            AverageExclusions {
                horizontal: Some(Coord::X),
            },
        )
        .unwrap();
        assert_eq!(no_x.keys, vec![hip_y]);
    }

    #[test]
    fn test_average_rejects_wrong_bin_count() {
        let cycles = vec![cycle(1, vec![0.0, 1.0, 2.0], vec![0.0; 3])];
        let err = average_cycles("M1", &cycles, 2, AverageExclusions { horizontal: None });
        assert!(matches!(err, Err(Error::CycleInvalid(_))));
        assert!(matches!(
            average_cycles("M1", &[], 2, AverageExclusions { horizontal: None }),
            Err(Error::EmptyCycles { .. })
        ));
    }
}
