//! Date-based train/validation split over the labelled rows of a frame.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use crate::features::FeatureFrame;
use crate::predict::{feature_matrix, FeatureMatrix, MissingFeaturePolicy, PredictionError};

#[derive(Debug, Clone, PartialEq)]
pub struct LabelledMatrix {
    pub features: FeatureMatrix,
    pub target: Vec<f64>,
    pub dates: Vec<NaiveDate>,
}

impl LabelledMatrix {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit {
    pub train: LabelledMatrix,
    pub validation: LabelledMatrix,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("train_end {train_end} must be before validation_end {validation_end}")]
    InvalidRange {
        train_end: NaiveDate,
        validation_end: NaiveDate,
    },
    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

/// Train rows have `date < train_end`; validation rows have
/// `train_end <= date < validation_end`. Only rows with a known target are
/// used, and the columns are the frame's model input columns.
pub fn split_by_date(
    frame: &FeatureFrame,
    train_end: NaiveDate,
    validation_end: NaiveDate,
    policy: MissingFeaturePolicy,
) -> Result<DatasetSplit, DatasetError> {
    if train_end >= validation_end {
        return Err(DatasetError::InvalidRange {
            train_end,
            validation_end,
        });
    }

    let mut train_rows = Vec::new();
    let mut validation_rows = Vec::new();
    for (row, record) in frame.records().iter().enumerate() {
        if record.sales.is_none() {
            continue;
        }
        if record.date < train_end {
            train_rows.push(row);
        } else if record.date < validation_end {
            validation_rows.push(row);
        }
    }

    let columns = frame.schema().model_columns();
    let train = labelled(frame, &columns, &train_rows, policy)?;
    let validation = labelled(frame, &columns, &validation_rows, policy)?;

    info!(
        component = "dataset",
        event = "dataset.split.finish",
        train_rows = train.len(),
        validation_rows = validation.len(),
        columns = columns.len(),
        train_end = %train_end,
        validation_end = %validation_end
    );

    Ok(DatasetSplit { train, validation })
}

fn labelled(
    frame: &FeatureFrame,
    columns: &[String],
    rows: &[usize],
    policy: MissingFeaturePolicy,
) -> Result<LabelledMatrix, PredictionError> {
    let features = feature_matrix(frame, columns, rows, policy)?;
    let records = frame.records();
    Ok(LabelledMatrix {
        features,
        target: rows
            .iter()
            .filter_map(|&row| records[row].sales)
            .collect(),
        dates: rows.iter().map(|&row| records[row].date).collect(),
    })
}
