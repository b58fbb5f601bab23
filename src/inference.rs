//! One request end to end: date parsing, month synthesis, feature assembly,
//! prediction fill and aggregation.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::{aggregate, AggregateError, Granularity, SalesValue, Scope, TimeBucket};
use crate::features::{build_feature_frame, FeatureConfig, FeatureError};
use crate::history::{History, HistoryLoadError};
use crate::noise::NoisePolicy;
use crate::predict::{fill_predictions, MissingFeaturePolicy, PredictionError, SalesModel};

/// `DDMMYYYY`, e.g. `20102019`.
pub const TEST_DATE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub test_date: String,
    pub granularity: Granularity,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
}

impl PredictionRequest {
    pub fn new(test_date: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            test_date: test_date.into(),
            granularity,
            customer_id: None,
            product_id: None,
        }
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn scope(&self) -> Result<Scope, InferenceError> {
        Ok(Scope::for_granularity(
            self.granularity,
            self.customer_id.as_deref(),
            self.product_id.as_deref(),
        )?)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub features: FeatureConfig,
    pub missing_feature_policy: MissingFeaturePolicy,
    pub noise: NoisePolicy,
    pub bucket: TimeBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceOutcome {
    pub value: SalesValue,
    pub date: NaiveDate,
    pub rows: usize,
    pub predicted_rows: usize,
    pub superseded_synthetic_rows: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidDateFormat,
    Configuration,
    ModelInputMismatch,
    MissingFeatures,
    NotFound,
    History,
    Model,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidDateFormat => "invalid_date_format",
            Self::Configuration => "configuration",
            Self::ModelInputMismatch => "model_input_mismatch",
            Self::MissingFeatures => "missing_features",
            Self::NotFound => "not_found",
            Self::History => "history",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("invalid test date '{input}': {reason}")]
    InvalidDateFormat { input: String, reason: String },
    #[error("history: {0}")]
    History(#[from] HistoryLoadError),
    #[error("features: {0}")]
    Feature(#[from] FeatureError),
    #[error("prediction: {0}")]
    Prediction(#[from] PredictionError),
    #[error("aggregation: {0}")]
    Aggregate(#[from] AggregateError),
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDateFormat { .. } => ErrorKind::InvalidDateFormat,
            Self::History(_) => ErrorKind::History,
            Self::Feature(
                FeatureError::SchemaVersionMismatch { .. }
                | FeatureError::SchemaFingerprintMismatch { .. },
            ) => ErrorKind::ModelInputMismatch,
            Self::Feature(_) => ErrorKind::Configuration,
            Self::Prediction(PredictionError::ModelInputMismatch { .. }) => {
                ErrorKind::ModelInputMismatch
            }
            Self::Prediction(PredictionError::MissingFeatures { .. }) => {
                ErrorKind::MissingFeatures
            }
            Self::Prediction(_) => ErrorKind::Model,
            Self::Aggregate(AggregateError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Aggregate(_) => ErrorKind::Configuration,
        }
    }
}

/// Parses an exactly eight character `DDMMYYYY` date.
pub fn parse_test_date(input: &str) -> Result<NaiveDate, InferenceError> {
    let invalid = |reason: String| InferenceError::InvalidDateFormat {
        input: input.to_string(),
        reason,
    };

    let len = input.chars().count();
    if len != TEST_DATE_LEN {
        return Err(invalid(format!(
            "expected {TEST_DATE_LEN} characters (DDMMYYYY), got {len}"
        )));
    }
    if !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected digits only (DDMMYYYY)".to_string()));
    }

    let field = |range: std::ops::Range<usize>| input[range].parse::<u32>();
    let (day, month, year) = match (field(0..2), field(2..4), field(4..8)) {
        (Ok(day), Ok(month), Ok(year)) => (day, month, year),
        _ => return Err(invalid("expected digits only (DDMMYYYY)".to_string())),
    };
    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(|| {
        invalid(format!(
            "day {day} month {month} year {year} is not a calendar date"
        ))
    })
}

/// Runs one request against an already loaded history.
pub fn run_request(
    model: &dyn SalesModel,
    history: &History,
    request: &PredictionRequest,
    cfg: &InferenceConfig,
) -> Result<InferenceOutcome, InferenceError> {
    let started = Instant::now();
    info!(
        component = "inference",
        event = "inference.request.start",
        test_date = %request.test_date,
        granularity = %request.granularity,
        customer_id = ?request.customer_id,
        product_id = ?request.product_id
    );

    let result = execute(model, history, request, cfg, started);
    match &result {
        Ok(outcome) => info!(
            component = "inference",
            event = "inference.request.finish",
            test_date = %request.test_date,
            granularity = %request.granularity,
            value = outcome.value.0,
            rows = outcome.rows,
            predicted_rows = outcome.predicted_rows,
            elapsed_ms = outcome.elapsed.as_millis() as u64
        ),
        Err(err) => warn!(
            component = "inference",
            event = "inference.request.error",
            test_date = %request.test_date,
            granularity = %request.granularity,
            kind = err.kind().as_str(),
            error = %err,
            elapsed_ms = started.elapsed().as_millis() as u64
        ),
    }
    result
}

/// Scalar entry point over a loaded history.
pub fn infer(
    model: &dyn SalesModel,
    history: &History,
    test_date: &str,
    granularity: Granularity,
    customer_id: Option<&str>,
    product_id: Option<&str>,
    cfg: &InferenceConfig,
) -> Result<SalesValue, InferenceError> {
    let request = PredictionRequest {
        test_date: test_date.to_string(),
        granularity,
        customer_id: customer_id.map(str::to_string),
        product_id: product_id.map(str::to_string),
    };
    run_request(model, history, &request, cfg).map(|outcome| outcome.value)
}

fn execute(
    model: &dyn SalesModel,
    history: &History,
    request: &PredictionRequest,
    cfg: &InferenceConfig,
    started: Instant,
) -> Result<InferenceOutcome, InferenceError> {
    let date = parse_test_date(&request.test_date)?;
    let scope = request.scope()?;

    let mut noise = cfg
        .noise
        .build(cfg.features.noise_std_dev)
        .map_err(FeatureError::from)?;
    let frame = build_feature_frame(history, date, &cfg.features, noise.as_mut())?;
    if let Some(customer_id) = scope.customer_id() {
        frame.ensure_customer_encoded(customer_id)?;
    }
    if let Some(product_id) = scope.product_id() {
        frame.ensure_product_encoded(product_id)?;
    }
    let superseded_synthetic_rows = frame.report().superseded_synthetic_rows;

    let filled = fill_predictions(frame, model, cfg.missing_feature_policy)?;
    let value = aggregate(&filled, &scope, date, cfg.bucket)?;

    Ok(InferenceOutcome {
        value,
        date,
        rows: filled.len(),
        predicted_rows: filled.predicted_rows(),
        superseded_synthetic_rows,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ddmmyyyy() {
        assert_eq!(
            parse_test_date("20102019").unwrap(),
            NaiveDate::from_ymd_opt(2019, 10, 20).unwrap()
        );
        assert_eq!(
            parse_test_date("29022020").unwrap(),
            NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()
        );
    }

    #[test]
    fn rejects_wrong_length_and_shape() {
        for input in ["2019-10-20", "2010201", "", "201020190"] {
            let err = parse_test_date(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidDateFormat, "{input}");
        }
        for input in ["20-10-19", "2O102019", "31022019", "00012019", "01132019"] {
            assert!(
                matches!(
                    parse_test_date(input),
                    Err(InferenceError::InvalidDateFormat { .. })
                ),
                "{input}"
            );
        }
    }

    #[test]
    fn multibyte_input_is_rejected_without_panicking() {
        assert!(parse_test_date("2010201é").is_err());
        assert!(parse_test_date("éééééééé").is_err());
    }

    #[test]
    fn request_scope_follows_granularity() {
        let request = PredictionRequest::new("20102019", Granularity::Customer);
        let err = request.scope().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let scope = request.with_customer("C1").scope().unwrap();
        assert_eq!(scope, Scope::Customer("C1".into()));
    }

    #[test]
    fn error_kinds_follow_taxonomy() {
        let not_found = InferenceError::from(AggregateError::NotFound {
            date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            bucket: TimeBucket::Day,
        });
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let unknown = InferenceError::from(FeatureError::UnknownCustomer("C9".into()));
        assert_eq!(unknown.kind(), ErrorKind::Configuration);

        let mismatch = InferenceError::from(PredictionError::ModelInputMismatch {
            missing: vec!["customer_id_C9".into()],
            unexpected: Vec::new(),
        });
        assert_eq!(mismatch.kind(), ErrorKind::ModelInputMismatch);
    }
}
