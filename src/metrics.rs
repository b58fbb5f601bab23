//! Regression metrics for validating a trained model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("actual has {actual} values, predicted has {predicted}")]
    LengthMismatch { actual: usize, predicted: usize },
    #[error("metrics need at least one value")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    pub count: usize,
    pub smape: f64,
    pub mean_absolute_error: f64,
    pub root_mean_squared_error: f64,
    pub r2: f64,
    pub explained_variance: f64,
}

/// Symmetric mean absolute percentage error, in percent.
///
/// Pairs where both values are zero are left out of the sum but still count
/// towards the length.
pub fn smape(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricsError> {
    let n = check(actual, predicted)?;
    let total: f64 = actual
        .iter()
        .zip(predicted)
        .filter(|(a, p)| !(**a == 0.0 && **p == 0.0))
        .map(|(a, p)| (p - a).abs() / (p.abs() + a.abs()))
        .sum();
    Ok(200.0 * total / n as f64)
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricsError> {
    let n = check(actual, predicted)?;
    let total: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum();
    Ok(total / n as f64)
}

pub fn root_mean_squared_error(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricsError> {
    let n = check(actual, predicted)?;
    let total: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    Ok((total / n as f64).sqrt())
}

/// Coefficient of determination. A constant `actual` scores 1.0 when matched
/// exactly and 0.0 otherwise.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricsError> {
    check(actual, predicted)?;
    let mean = mean(actual);
    let residual: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    let total: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    Ok(ratio_score(residual, total))
}

pub fn explained_variance_score(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricsError> {
    check(actual, predicted)?;
    let errors: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();
    Ok(ratio_score(variance(&errors), variance(actual)))
}

pub fn evaluate(actual: &[f64], predicted: &[f64]) -> Result<RegressionReport, MetricsError> {
    Ok(RegressionReport {
        count: check(actual, predicted)?,
        smape: smape(actual, predicted)?,
        mean_absolute_error: mean_absolute_error(actual, predicted)?,
        root_mean_squared_error: root_mean_squared_error(actual, predicted)?,
        r2: r2_score(actual, predicted)?,
        explained_variance: explained_variance_score(actual, predicted)?,
    })
}

fn check(actual: &[f64], predicted: &[f64]) -> Result<usize, MetricsError> {
    if actual.len() != predicted.len() {
        return Err(MetricsError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(MetricsError::Empty);
    }
    Ok(actual.len())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    let mean = mean(values);
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

fn ratio_score(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        if numerator == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - numerator / denominator
    }
}
