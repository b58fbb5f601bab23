//! Rolling and exponentially weighted smoothing of past targets, per key.
//!
//! Both families only look at rows strictly before the current one: the
//! rolling mean runs over the series shifted by one, the weighted mean over
//! the series shifted by its configured lag.

use crate::grouping::GroupedSeries;
use crate::noise::NoiseSource;

pub fn rolling_mean_column_name(window: usize) -> String {
    format!("sales_roll_mean_{window}")
}

/// `0.95` with lag 91 becomes `sales_ewm_alpha_095_lag_91`.
pub fn ewm_column_name(alpha: f64, lag: usize) -> String {
    let alpha = format!("{alpha}").replace('.', "");
    format!("sales_ewm_alpha_{alpha}_lag_{lag}")
}

/// Symmetric triangular window with non-zero end points.
pub fn triangular_weights(window: usize) -> Vec<f64> {
    if window == 0 {
        return Vec::new();
    }
    let n = window as f64;
    let denom = if window % 2 == 1 { n + 1.0 } else { n };
    (0..window)
        .map(|k| 1.0 - ((2.0 * k as f64) - (n - 1.0)).abs() / denom)
        .collect()
}

/// Triangular-weighted mean of the previous `window` targets. Missing until
/// at least `min_observations` known values fall inside the window.
pub fn rolling_mean_column(
    series: &GroupedSeries,
    target: &[Option<f64>],
    window: usize,
    min_observations: usize,
    noise: &mut dyn NoiseSource,
) -> Vec<Option<f64>> {
    let weights = triangular_weights(window);
    series.transform(target, |values| {
        let shifted = shift_plain(values, 1);
        weighted_rolling_mean(&shifted, &weights, min_observations)
            .into_iter()
            .map(|mean| {
                let jitter = noise.sample();
                mean.map(|m| m + jitter)
            })
            .collect()
    })
}

/// Adjusted exponentially weighted mean of the series shifted by `lag`.
/// Gaps decay the weights of older observations but contribute nothing.
pub fn ewm_column(
    series: &GroupedSeries,
    target: &[Option<f64>],
    alpha: f64,
    lag: usize,
    noise: &mut dyn NoiseSource,
) -> Vec<Option<f64>> {
    series.transform(target, |values| {
        let shifted = shift_plain(values, lag);
        exponential_mean(&shifted, alpha)
            .into_iter()
            .map(|mean| {
                let jitter = noise.sample();
                mean.map(|m| m + jitter)
            })
            .collect()
    })
}

fn shift_plain(values: &[Option<f64>], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| idx.checked_sub(lag).and_then(|src| values[src]))
        .collect()
}

fn weighted_rolling_mean(
    values: &[Option<f64>],
    weights: &[f64],
    min_observations: usize,
) -> Vec<Option<f64>> {
    let window = weights.len();
    (0..values.len())
        .map(|end| {
            if window == 0 {
                return None;
            }
            let mut weighted_sum = 0.0;
            let mut weight_total = 0.0;
            let mut observations = 0;
            // last weight sits on the newest value of the window
            for (offset, weight) in weights.iter().rev().enumerate() {
                let Some(idx) = end.checked_sub(offset) else {
                    break;
                };
                if let Some(value) = values[idx] {
                    weighted_sum += weight * value;
                    weight_total += weight;
                    observations += 1;
                }
            }
            if observations >= min_observations.max(1) && weight_total > 0.0 {
                Some(weighted_sum / weight_total)
            } else {
                None
            }
        })
        .collect()
}

fn exponential_mean(values: &[Option<f64>], alpha: f64) -> Vec<Option<f64>> {
    let decay = 1.0 - alpha;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    values
        .iter()
        .map(|value| {
            weighted_sum *= decay;
            weight_total *= decay;
            if let Some(v) = value {
                weighted_sum += v;
                weight_total += 1.0;
            }
            if weight_total > 0.0 {
                Some(weighted_sum / weight_total)
            } else {
                None
            }
        })
        .collect()
}
