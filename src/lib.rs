//! Demand Sense core crate.
//!
//! Current implemented scope:
//! - transaction history loading (CSV, SQLite, in-memory)
//! - calendar, lag and smoothing features over (customer, product) series
//! - evaluation-month synthesis, feature frame assembly and one-hot encoding
//! - prediction fill, scope filtering and time-bucket aggregation
//! - request orchestration, caching and concurrent precache at the serving boundary
//! - train/validation split and regression metrics

mod aggregate;
mod cache;
mod calendar;
mod dataset;
mod features;
mod grouping;
mod history;
mod inference;
mod lags;
mod metrics;
mod noise;
mod observability;
mod predict;
mod service;
mod smoothing;
mod synth;

pub use aggregate::{
    aggregate, bucket_totals, scope_rows, truncate_to_bucket, AggregateError, Granularity,
    SalesValue, Scope, TimeBucket,
};
pub use cache::{CacheKey, NoCache, PredictionCache, TtlCache};
pub use calendar::{calendar_features, days_in_month, CalendarFeatures};
pub use dataset::{split_by_date, DatasetError, DatasetSplit, LabelledMatrix};
pub use features::{
    assemble_feature_frame, assert_schema_compatible, build_feature_frame, build_feature_schema,
    customer_column_name, day_of_week_column_name, month_column_name, product_column_name,
    validate_config, CategoryLevels, ColumnKind, FeatureColumn, FeatureConfig, FeatureError,
    FeatureFrame, FeatureSchema, FrameReport, RowOrigin, FEATURE_SCHEMA_VERSION,
    NON_MODEL_COLUMNS,
};
pub use grouping::GroupedSeries;
pub use history::{
    history_source_for_path, load_history_csv, load_history_sqlite, parse_history_csv,
    parse_history_date, summarize_history, CsvHistorySource, GroupKey, History,
    HistoryLoadError, HistorySource, HistorySummary, InMemoryHistorySource, SqliteHistorySource,
    TransactionRecord, CUSTOMER_COLUMN, DATE_COLUMN, PRODUCT_COLUMN, SALES_COLUMN,
};
pub use inference::{
    infer, parse_test_date, run_request, ErrorKind, InferenceConfig, InferenceError,
    InferenceOutcome, PredictionRequest, TEST_DATE_LEN,
};
pub use lags::{lag_column, lag_column_name};
pub use metrics::{
    evaluate, explained_variance_score, mean_absolute_error, r2_score, root_mean_squared_error,
    smape, MetricsError, RegressionReport,
};
pub use noise::{
    GaussianNoise, NoiseError, NoisePolicy, NoiseSource, ZeroNoise, DEFAULT_NOISE_STD_DEV,
};
pub use observability::{
    init_logging, log_app_start, log_model_selected, log_service_config, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError, LOG_FORMAT_VAR, LOG_LEVEL_VAR, LOG_TARGET_VAR,
};
pub use predict::{
    check_model_input, feature_matrix, fill_predictions, FeatureMatrix, FilledFrame, LinearModel,
    MissingFeaturePolicy, ModelError, PredictionError, SalesModel,
};
pub use service::{
    consecutive_day_requests, precache_by_month, precache_requests, PrecacheFailure,
    PrecacheReport, PredictionService, ServiceConfig, ServiceConfigError, DEFAULT_CACHE_CAPACITY,
    DEFAULT_CACHE_TTL_SECS, DEFAULT_PRECACHE_CONCURRENCY,
};
pub use smoothing::{
    ewm_column, ewm_column_name, rolling_mean_column, rolling_mean_column_name, triangular_weights,
};
pub use synth::{month_days, synthesize_for_history, synthesize_month};
