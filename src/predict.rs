//! Model contract and the prediction filler.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{ColumnKind, FeatureFrame, FeatureSchema};

/// Dense model input. Missing cells are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model expects columns {expected:?}, matrix has {actual:?}")]
    ColumnLayout {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("model failure: {0}")]
    Failed(String),
}

/// A trained model. Implementations are shared read-only across requests.
pub trait SalesModel: Send + Sync {
    /// Input columns in the order `predict` expects them.
    fn feature_names(&self) -> &[String];

    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, ModelError>;
}

/// Intercept plus named coefficients. NaN inputs contribute nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    intercept: f64,
    features: Vec<String>,
    coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn new(intercept: f64, weights: Vec<(String, f64)>) -> Self {
        let (features, coefficients) = weights.into_iter().unzip();
        Self {
            intercept,
            features,
            coefficients,
        }
    }

    /// Accepts every model input column of `schema` and averages the lag
    /// columns with equal weight.
    pub fn seasonal_naive(schema: &FeatureSchema) -> Self {
        let lag_count = schema
            .columns
            .iter()
            .filter(|c| c.model_input && c.kind == ColumnKind::Lag)
            .count();
        let weight = if lag_count == 0 {
            0.0
        } else {
            1.0 / lag_count as f64
        };
        let weights = schema
            .columns
            .iter()
            .filter(|c| c.model_input)
            .map(|c| {
                let coefficient = if c.kind == ColumnKind::Lag { weight } else { 0.0 };
                (c.name.clone(), coefficient)
            })
            .collect();
        Self::new(0.0, weights)
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .position(|feature| feature == name)
            .map(|idx| self.coefficients[idx])
    }
}

impl SalesModel for LinearModel {
    fn feature_names(&self) -> &[String] {
        &self.features
    }

    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        if matrix.columns() != self.features.as_slice() {
            return Err(ModelError::ColumnLayout {
                expected: self.features.clone(),
                actual: matrix.columns().to_vec(),
            });
        }
        Ok(matrix
            .rows()
            .iter()
            .map(|row| {
                self.intercept
                    + row
                        .iter()
                        .zip(&self.coefficients)
                        .filter(|(x, _)| !x.is_nan())
                        .map(|(x, w)| x * w)
                        .sum::<f64>()
            })
            .collect())
    }
}

/// What to do with model input cells left undefined by short history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFeaturePolicy {
    /// Hand NaN to the model; suits models that route missing values.
    #[default]
    PassThrough,
    ImputeZero,
    Reject,
}

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("model input mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    ModelInputMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("{cells} undefined feature cells across {rows} rows (columns {columns:?})")]
    MissingFeatures {
        rows: usize,
        cells: usize,
        columns: Vec<String>,
    },
    #[error("model returned {actual} predictions for {expected} rows")]
    PredictionCount { expected: usize, actual: usize },
    #[error("model returned a non-finite prediction for frame row {row}")]
    NonFinitePrediction { row: usize },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// A feature frame whose target is known on every row.
#[derive(Debug, Clone, PartialEq)]
pub struct FilledFrame {
    frame: FeatureFrame,
    sales: Vec<f64>,
    predicted: Vec<bool>,
}

impl FilledFrame {
    pub fn frame(&self) -> &FeatureFrame {
        &self.frame
    }

    pub fn sales(&self) -> &[f64] {
        &self.sales
    }

    pub fn is_predicted(&self, row: usize) -> bool {
        self.predicted.get(row).copied().unwrap_or(false)
    }

    pub fn predicted_rows(&self) -> usize {
        self.predicted.iter().filter(|p| **p).count()
    }

    pub fn len(&self) -> usize {
        self.sales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sales.is_empty()
    }
}

/// Set comparison of the frame's model columns against the model's inputs.
pub fn check_model_input(
    schema: &FeatureSchema,
    model_columns: &[String],
) -> Result<(), PredictionError> {
    let produced = schema.model_columns();
    let produced_set: HashSet<&str> = produced.iter().map(String::as_str).collect();
    let expected_set: HashSet<&str> = model_columns.iter().map(String::as_str).collect();

    let missing: Vec<String> = model_columns
        .iter()
        .filter(|c| !produced_set.contains(c.as_str()))
        .cloned()
        .collect();
    let unexpected: Vec<String> = produced
        .iter()
        .filter(|c| !expected_set.contains(c.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(PredictionError::ModelInputMismatch {
            missing,
            unexpected,
        })
    }
}

/// Extracts `rows` of `frame` as a matrix over `columns`, in that order.
pub fn feature_matrix(
    frame: &FeatureFrame,
    columns: &[String],
    rows: &[usize],
    policy: MissingFeaturePolicy,
) -> Result<FeatureMatrix, PredictionError> {
    let schema = frame.schema();
    let mut indices = Vec::with_capacity(columns.len());
    let mut absent = Vec::new();
    for column in columns {
        match schema.column_index(column) {
            Some(idx) => indices.push(idx),
            None => absent.push(column.clone()),
        }
    }
    if !absent.is_empty() {
        return Err(PredictionError::ModelInputMismatch {
            missing: absent,
            unexpected: Vec::new(),
        });
    }

    let mut missing_rows = 0;
    let mut missing_cells = 0;
    let mut missing_columns: Vec<String> = Vec::new();
    let mut matrix_rows = Vec::with_capacity(rows.len());
    for &row in rows {
        let values = frame.row_values(row);
        let mut row_missing = false;
        let mut out = Vec::with_capacity(indices.len());
        for (&idx, name) in indices.iter().zip(columns) {
            match values[idx] {
                Some(value) => out.push(value),
                None => {
                    row_missing = true;
                    missing_cells += 1;
                    if !missing_columns.contains(name) {
                        missing_columns.push(name.clone());
                    }
                    out.push(match policy {
                        MissingFeaturePolicy::ImputeZero => 0.0,
                        MissingFeaturePolicy::PassThrough | MissingFeaturePolicy::Reject => {
                            f64::NAN
                        }
                    });
                }
            }
        }
        if row_missing {
            missing_rows += 1;
        }
        matrix_rows.push(out);
    }

    if policy == MissingFeaturePolicy::Reject && missing_cells > 0 {
        return Err(PredictionError::MissingFeatures {
            rows: missing_rows,
            cells: missing_cells,
            columns: missing_columns,
        });
    }

    Ok(FeatureMatrix::new(columns.to_vec(), matrix_rows))
}

/// Predicts every row with an unknown target and returns a new frame with
/// the target fully populated. Known history values are never replaced.
pub fn fill_predictions(
    frame: FeatureFrame,
    model: &dyn SalesModel,
    policy: MissingFeaturePolicy,
) -> Result<FilledFrame, PredictionError> {
    check_model_input(frame.schema(), model.feature_names())?;

    let unknown = frame.unknown_target_rows();
    let mut sales: Vec<f64> = frame
        .records()
        .iter()
        .map(|r| r.sales.unwrap_or(f64::NAN))
        .collect();
    let mut predicted = vec![false; frame.len()];

    if !unknown.is_empty() {
        let matrix = feature_matrix(&frame, model.feature_names(), &unknown, policy)?;
        let predictions = model.predict(&matrix)?;
        if predictions.len() != unknown.len() {
            return Err(PredictionError::PredictionCount {
                expected: unknown.len(),
                actual: predictions.len(),
            });
        }
        for (&row, value) in unknown.iter().zip(predictions) {
            if !value.is_finite() {
                return Err(PredictionError::NonFinitePrediction { row });
            }
            sales[row] = value;
            predicted[row] = true;
        }
    }

    info!(
        component = "predict",
        event = "predict.fill.finish",
        rows = frame.len(),
        predicted_rows = unknown.len(),
        columns = model.feature_names().len(),
        policy = ?policy
    );

    Ok(FilledFrame {
        frame,
        sales,
        predicted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{assemble_feature_frame, FeatureConfig};
    use crate::history::TransactionRecord;
    use crate::noise::ZeroNoise;
    use chrono::NaiveDate;

    struct FixedModel {
        features: Vec<String>,
        output: Vec<f64>,
    }

    impl SalesModel for FixedModel {
        fn feature_names(&self) -> &[String] {
            &self.features
        }

        fn predict(&self, _matrix: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
            Ok(self.output.clone())
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 10, d).unwrap()
    }

    fn frame() -> FeatureFrame {
        let history = vec![
            TransactionRecord::observed(date(1), "C1", "P1", 4.0),
            TransactionRecord::observed(date(2), "C1", "P1", 6.0),
        ];
        let synthetic = vec![
            TransactionRecord::unknown(date(3), "C1", "P1"),
            TransactionRecord::unknown(date(4), "C1", "P1"),
        ];
        let cfg = FeatureConfig {
            lags: vec![1, 2],
            ..FeatureConfig::default()
        };
        assemble_feature_frame(&history, synthetic, &cfg, &mut ZeroNoise).unwrap()
    }

    #[test]
    fn fills_only_unknown_rows_and_keeps_history() {
        let frame = frame();
        let model = LinearModel::seasonal_naive(frame.schema());

        let filled = fill_predictions(frame, &model, MissingFeaturePolicy::PassThrough).unwrap();

        assert_eq!(filled.len(), 4);
        assert_eq!(filled.sales()[0], 4.0);
        assert_eq!(filled.sales()[1], 6.0);
        assert!(!filled.is_predicted(1));
        // row 2: lags 6 and 4 average to 5
        assert_eq!(filled.sales()[2], 5.0);
        // row 3: lag 1 is undefined and skipped, lag 2 contributes 6 * 0.5
        assert_eq!(filled.sales()[3], 3.0);
        assert_eq!(filled.predicted_rows(), 2);
        assert!(filled.frame().records()[2].sales.is_none());
    }

    #[test]
    fn model_column_order_is_respected() {
        let frame = frame();
        let mut columns = frame.schema().model_columns();
        columns.reverse();

        let matrix =
            feature_matrix(&frame, &columns, &[2], MissingFeaturePolicy::PassThrough).unwrap();
        assert_eq!(matrix.columns(), columns.as_slice());
        let lag1 = matrix.column_index("sales_lag_1").unwrap();
        assert_eq!(matrix.rows()[0][lag1], 6.0);
    }

    #[test]
    fn unseen_category_is_a_model_input_mismatch() {
        let frame = frame();
        let mut features = frame.schema().model_columns();
        features.push("customer_id_C9".to_string());
        features.retain(|c| c != "sales_lag_2");
        let model = FixedModel {
            features,
            output: vec![0.0, 0.0],
        };

        let err = fill_predictions(frame, &model, MissingFeaturePolicy::PassThrough).unwrap_err();
        match err {
            PredictionError::ModelInputMismatch {
                missing,
                unexpected,
            } => {
                assert_eq!(missing, vec!["customer_id_C9".to_string()]);
                assert_eq!(unexpected, vec!["sales_lag_2".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_feature_policies() {
        let frame = frame();
        let columns = frame.schema().model_columns();
        let lag1 = columns.iter().position(|c| c == "sales_lag_1").unwrap();

        let pass =
            feature_matrix(&frame, &columns, &[3], MissingFeaturePolicy::PassThrough).unwrap();
        assert!(pass.rows()[0][lag1].is_nan());

        let zero =
            feature_matrix(&frame, &columns, &[3], MissingFeaturePolicy::ImputeZero).unwrap();
        assert_eq!(zero.rows()[0][lag1], 0.0);

        let err =
            feature_matrix(&frame, &columns, &[2, 3], MissingFeaturePolicy::Reject).unwrap_err();
        assert!(matches!(
            err,
            PredictionError::MissingFeatures { rows: 1, cells: 1, ref columns } if columns == &vec!["sales_lag_1".to_string()]
        ));
    }

    #[test]
    fn prediction_count_and_finiteness_are_checked() {
        let frame = frame();
        let short = FixedModel {
            features: frame.schema().model_columns(),
            output: vec![1.0],
        };
        assert!(matches!(
            fill_predictions(frame.clone(), &short, MissingFeaturePolicy::PassThrough),
            Err(PredictionError::PredictionCount {
                expected: 2,
                actual: 1
            })
        ));

        let nan = FixedModel {
            features: frame.schema().model_columns(),
            output: vec![1.0, f64::NAN],
        };
        assert!(matches!(
            fill_predictions(frame, &nan, MissingFeaturePolicy::PassThrough),
            Err(PredictionError::NonFinitePrediction { row: 3 })
        ));
    }

    #[test]
    fn linear_model_rejects_foreign_layout() {
        let model = LinearModel::new(1.0, vec![("a".to_string(), 2.0)]);
        let ok = model
            .predict(&FeatureMatrix::new(vec!["a".to_string()], vec![vec![3.0]]))
            .unwrap();
        assert_eq!(ok, vec![7.0]);
        assert_eq!(model.coefficient("a"), Some(2.0));
        assert!(model
            .predict(&FeatureMatrix::new(vec!["b".to_string()], vec![vec![3.0]]))
            .is_err());
    }
}
