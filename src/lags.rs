//! Per-key time-shifted target values.

use crate::grouping::GroupedSeries;
use crate::noise::NoiseSource;

pub fn lag_column_name(lag: usize) -> String {
    format!("sales_lag_{lag}")
}

/// Value `lag` rows earlier in the same key's series plus one noise sample.
///
/// Missing when the series has fewer than `lag` prior rows or when the
/// referenced row has no known target. One sample is drawn per row, missing
/// or not, so the noise stream stays aligned with the frame.
pub fn lag_column(
    series: &GroupedSeries,
    target: &[Option<f64>],
    lag: usize,
    noise: &mut dyn NoiseSource,
) -> Vec<Option<f64>> {
    series.transform(target, |values| shift(values, lag, &mut *noise))
}

fn shift(
    values: &[Option<f64>],
    lag: usize,
    noise: &mut dyn NoiseSource,
) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(idx, _)| {
            let jitter = noise.sample();
            let prior = idx.checked_sub(lag).and_then(|src| values[src]);
            prior.map(|v| v + jitter)
        })
        .collect()
}
