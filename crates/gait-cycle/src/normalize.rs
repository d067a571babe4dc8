//! Resampling of cycles onto a fixed bin grid.
//!
//! A cycle of `L` frames maps onto `B` bins through the sorted labels
//! `i mod B`: longer cycles average contiguous blocks (the first `L mod B`
//! bins take one extra frame), shorter cycles repeat frames in order.

use crate::features::CycleSeries;

/// Frame positions feeding each of `bins` bins
pub fn bin_sources(len: usize, bins: usize) -> Vec<Vec<usize>> {
    let mut sources = vec![Vec::new(); bins];
    if len == 0 || bins == 0 {
        return sources;
    }

    if len >= bins {
        let mut labels: Vec<usize> = (0..len).map(|i| i % bins).collect();
        labels.sort_unstable();
        for (position, bin) in labels.into_iter().enumerate() {
            sources[bin].push(position);
        }
    } else {
        let mut positions: Vec<usize> = (0..bins).map(|i| i % len).collect();
        positions.sort_unstable();
        for (bin, position) in positions.into_iter().enumerate() {
            sources[bin].push(position);
        }
    }
    sources
}

fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

fn apply(values: &[f64], sources: &[Vec<usize>]) -> Vec<f64> {
    sources
        .iter()
        .map(|positions| nan_mean(positions.iter().map(|&p| values[p])))
        .collect()
}

/// Resample one series; missing samples are ignored within a bin
pub fn normalize_series(values: &[f64], bins: usize) -> Vec<f64> {
    apply(values, &bin_sources(values.len(), bins))
}

/// Resample every column of a cycle onto `bins` rows
pub fn normalize_cycle(cycle: &CycleSeries, bins: usize) -> CycleSeries {
    let sources = bin_sources(cycle.len(), bins);
    CycleSeries {
        ordinal: cycle.ordinal,
        side: cycle.side,
        flipped: cycle.flipped,
        time: apply(&cycle.time, &sources),
        columns: cycle
            .columns
            .iter()
            .map(|(key, values)| (key.clone(), apply(values, &sources)))
            .collect(),
    }
}

/// `SC Percentage` of each bin, two decimals above 100 bins
pub fn sc_percentages(bins: usize) -> Vec<f64> {
    let scale = if bins > 100 { 100.0 } else { 1.0 };
    (0..bins)
        .map(|i| {
            let pct = (i + 1) as f64 / bins as f64 * 100.0;
            (pct * scale).round() / scale
        })
        .collect()
}
