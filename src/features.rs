//! Feature frame assembly over history and synthetic rows.
//!
//! The frame keeps rows in concatenation order (history first, then the
//! synthetic rows that survived the merge). Lag and smoothing builders work
//! on an explicit (customer, product, date) ordering and scatter their
//! results back, so the row order never affects a feature value.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::calendar::calendar_features;
use crate::grouping::GroupedSeries;
use crate::history::{History, TransactionRecord};
use crate::lags::{lag_column, lag_column_name};
use crate::noise::{NoiseError, NoiseSource, DEFAULT_NOISE_STD_DEV};
use crate::smoothing::{ewm_column, ewm_column_name, rolling_mean_column, rolling_mean_column_name};
use crate::synth::{month_days, synthesize_for_history};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Frame columns that never reach the model.
pub const NON_MODEL_COLUMNS: [&str; 3] = ["date", "sales", "year"];

const CALENDAR_COLUMNS: [&str; 7] = [
    "day_of_month",
    "day_of_year",
    "week_of_year",
    "year",
    "is_weekend",
    "is_month_start",
    "is_month_end",
];

/// Static, versioned parameter set. Changing any value changes the model
/// input schema and its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub min_window_observations: usize,
    pub ewm_alphas: Vec<f64>,
    pub ewm_lags: Vec<usize>,
    pub noise_std_dev: f64,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![91, 98, 105],
            rolling_windows: Vec::new(),
            min_window_observations: 10,
            ewm_alphas: Vec::new(),
            ewm_lags: Vec::new(),
            noise_std_dev: DEFAULT_NOISE_STD_DEV,
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

impl FeatureConfig {
    /// Default lags plus the rolling and exponentially weighted families.
    pub fn with_smoothing() -> Self {
        Self {
            rolling_windows: vec![365, 546],
            ewm_alphas: vec![0.95, 0.9, 0.8, 0.7, 0.5],
            ewm_lags: vec![91, 98, 105, 112, 180, 270, 365, 546, 728],
            ..Self::default()
        }
    }

    pub fn smoothing_enabled(&self) -> bool {
        !self.rolling_windows.is_empty() || !self.ewm_alphas.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Calendar,
    Lag,
    RollingMean,
    ExponentialMean,
    OneHot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub model_input: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Columns handed to the model, in frame order.
    pub fn model_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| column.model_input)
            .map(|column| column.name.clone())
            .collect()
    }
}

/// Encoded category levels, kept sorted so the one-hot layout does not
/// depend on row order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryLevels {
    pub customers: BTreeSet<String>,
    pub products: BTreeSet<String>,
    pub days_of_week: BTreeSet<u32>,
    pub months: BTreeSet<u32>,
}

impl CategoryLevels {
    pub fn from_records(records: &[TransactionRecord]) -> Self {
        let mut levels = Self::default();
        for record in records {
            levels.insert(record);
        }
        levels
    }

    /// Levels a frame for `target`'s month will carry: history plus the
    /// synthesized days of that month.
    pub fn for_target_month(history: &History, target: NaiveDate) -> Self {
        let mut levels = Self::from_records(history.records());
        for day in month_days(target) {
            let calendar = calendar_features(day);
            levels.days_of_week.insert(calendar.day_of_week);
            levels.months.insert(calendar.month);
        }
        levels
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            customers: self.customers.union(&other.customers).cloned().collect(),
            products: self.products.union(&other.products).cloned().collect(),
            days_of_week: self.days_of_week.union(&other.days_of_week).copied().collect(),
            months: self.months.union(&other.months).copied().collect(),
        }
    }

    fn insert(&mut self, record: &TransactionRecord) {
        let calendar = calendar_features(record.date);
        if !self.customers.contains(&record.customer_id) {
            self.customers.insert(record.customer_id.clone());
        }
        if !self.products.contains(&record.product_id) {
            self.products.insert(record.product_id.clone());
        }
        self.days_of_week.insert(calendar.day_of_week);
        self.months.insert(calendar.month);
    }
}

pub fn customer_column_name(customer_id: &str) -> String {
    format!("customer_id_{customer_id}")
}

pub fn product_column_name(product_id: &str) -> String {
    format!("product_id_{product_id}")
}

pub fn day_of_week_column_name(day_of_week: u32) -> String {
    format!("day_of_week_{day_of_week}")
}

pub fn month_column_name(month: u32) -> String {
    format!("month_{month}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOrigin {
    History,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameReport {
    pub history_rows: u64,
    pub synthetic_rows: u64,
    pub superseded_synthetic_rows: u64,
    pub group_keys: u64,
    pub missing_feature_cells: u64,
    pub unknown_rows_with_missing_features: u64,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid feature config: {0}")]
    InvalidConfig(String),
    #[error("customer '{0}' was never observed in history; no encoded column exists")]
    UnknownCustomer(String),
    #[error("product '{0}' was never observed in history; no encoded column exists")]
    UnknownProduct(String),
    #[error("noise source: {0}")]
    Noise(#[from] NoiseError),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// History and synthetic rows with every derived column materialized.
/// Cells are `None` where a lag or window lacks history.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    records: Vec<TransactionRecord>,
    origins: Vec<RowOrigin>,
    schema: FeatureSchema,
    levels: CategoryLevels,
    values: Vec<Vec<Option<f64>>>,
    report: FrameReport,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn origins(&self) -> &[RowOrigin] {
        &self.origins
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn levels(&self) -> &CategoryLevels {
        &self.levels
    }

    pub fn report(&self) -> &FrameReport {
        &self.report
    }

    pub fn row_values(&self, row: usize) -> &[Option<f64>] {
        &self.values[row]
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.schema.column_index(column)?;
        self.values.get(row).and_then(|values| values[idx])
    }

    pub fn unknown_target_rows(&self) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.sales.is_none())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn ensure_customer_encoded(&self, customer_id: &str) -> Result<(), FeatureError> {
        if self.levels.customers.contains(customer_id) {
            Ok(())
        } else {
            Err(FeatureError::UnknownCustomer(customer_id.to_string()))
        }
    }

    pub fn ensure_product_encoded(&self, product_id: &str) -> Result<(), FeatureError> {
        if self.levels.products.contains(product_id) {
            Ok(())
        } else {
            Err(FeatureError::UnknownProduct(product_id.to_string()))
        }
    }
}

pub fn validate_config(cfg: &FeatureConfig) -> Result<(), FeatureError> {
    if cfg.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(FeatureError::InvalidConfig(format!(
            "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
        )));
    }

    ensure_positive_unique("lags", &cfg.lags)?;
    ensure_positive_unique("rolling_windows", &cfg.rolling_windows)?;
    ensure_positive_unique("ewm_lags", &cfg.ewm_lags)?;

    if cfg.min_window_observations == 0 {
        return Err(FeatureError::InvalidConfig(
            "min_window_observations must be > 0".to_string(),
        ));
    }

    if cfg.ewm_alphas.is_empty() != cfg.ewm_lags.is_empty() {
        return Err(FeatureError::InvalidConfig(
            "ewm_alphas and ewm_lags must be both set or both empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for alpha in &cfg.ewm_alphas {
        if !(alpha.is_finite() && *alpha > 0.0 && *alpha <= 1.0) {
            return Err(FeatureError::InvalidConfig(format!(
                "ewm alpha must lie in (0, 1], got {alpha}"
            )));
        }
        if !seen.insert(alpha.to_bits()) {
            return Err(FeatureError::InvalidConfig(
                "ewm_alphas entries must be unique".to_string(),
            ));
        }
    }

    if !cfg.noise_std_dev.is_finite() || cfg.noise_std_dev < 0.0 {
        return Err(FeatureError::InvalidConfig(
            "noise_std_dev must be finite and >= 0".to_string(),
        ));
    }

    Ok(())
}

pub fn build_feature_schema(cfg: &FeatureConfig, levels: &CategoryLevels) -> FeatureSchema {
    let mut columns = Vec::new();

    for name in CALENDAR_COLUMNS {
        columns.push(FeatureColumn {
            name: name.to_string(),
            kind: ColumnKind::Calendar,
            model_input: !NON_MODEL_COLUMNS.contains(&name),
        });
    }
    for lag in &cfg.lags {
        columns.push(model_column(lag_column_name(*lag), ColumnKind::Lag));
    }
    for window in &cfg.rolling_windows {
        columns.push(model_column(
            rolling_mean_column_name(*window),
            ColumnKind::RollingMean,
        ));
    }
    for alpha in &cfg.ewm_alphas {
        for lag in &cfg.ewm_lags {
            columns.push(model_column(
                ewm_column_name(*alpha, *lag),
                ColumnKind::ExponentialMean,
            ));
        }
    }
    for customer in &levels.customers {
        columns.push(model_column(customer_column_name(customer), ColumnKind::OneHot));
    }
    for product in &levels.products {
        columns.push(model_column(product_column_name(product), ColumnKind::OneHot));
    }
    for day in &levels.days_of_week {
        columns.push(model_column(day_of_week_column_name(*day), ColumnKind::OneHot));
    }
    for month in &levels.months {
        columns.push(model_column(month_column_name(*month), ColumnKind::OneHot));
    }

    let fingerprint = schema_fingerprint(cfg, &columns);

    info!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        lags = ?cfg.lags,
        smoothing = cfg.smoothing_enabled(),
        column_count = columns.len(),
        fingerprint = %fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

/// Synthesizes the month containing `target_period`, merges it with
/// `history` and builds every feature column.
pub fn build_feature_frame(
    history: &History,
    target_period: NaiveDate,
    cfg: &FeatureConfig,
    noise: &mut dyn NoiseSource,
) -> Result<FeatureFrame, FeatureError> {
    let synthetic = synthesize_for_history(history, target_period);
    assemble_feature_frame(history.records(), synthetic, cfg, noise)
}

/// Concatenates `history` and `synthetic` and derives all columns.
///
/// A synthetic row whose (customer, product, date) already exists in history
/// is dropped: the observed value wins and nothing is double counted.
pub fn assemble_feature_frame(
    history: &[TransactionRecord],
    synthetic: Vec<TransactionRecord>,
    cfg: &FeatureConfig,
    noise: &mut dyn NoiseSource,
) -> Result<FeatureFrame, FeatureError> {
    validate_config(cfg)?;

    let observed: HashSet<(&str, &str, NaiveDate)> = history
        .iter()
        .map(|r| (r.customer_id.as_str(), r.product_id.as_str(), r.date))
        .collect();
    let synthetic_total = synthetic.len();
    let kept_synthetic: Vec<TransactionRecord> = synthetic
        .into_iter()
        .filter(|r| !observed.contains(&(r.customer_id.as_str(), r.product_id.as_str(), r.date)))
        .collect();
    let superseded = synthetic_total - kept_synthetic.len();

    let mut records = Vec::with_capacity(history.len() + kept_synthetic.len());
    records.extend_from_slice(history);
    let mut origins = vec![RowOrigin::History; history.len()];
    origins.extend(std::iter::repeat(RowOrigin::Synthetic).take(kept_synthetic.len()));
    records.extend(kept_synthetic);

    let levels = CategoryLevels::from_records(&records);
    let schema = build_feature_schema(cfg, &levels);
    let grouped = GroupedSeries::from_records(&records);
    let target: Vec<Option<f64>> = records.iter().map(|r| r.sales).collect();

    // Family order is fixed so enabling smoothing never changes lag values
    // drawn from the same noise stream.
    let mut derived: Vec<Vec<Option<f64>>> = Vec::new();
    for lag in &cfg.lags {
        derived.push(lag_column(&grouped, &target, *lag, noise));
    }
    for window in &cfg.rolling_windows {
        derived.push(rolling_mean_column(
            &grouped,
            &target,
            *window,
            cfg.min_window_observations,
            noise,
        ));
    }
    for alpha in &cfg.ewm_alphas {
        for lag in &cfg.ewm_lags {
            derived.push(ewm_column(&grouped, &target, *alpha, *lag, noise));
        }
    }

    let encoder = OneHotLayout::new(&schema, &levels, CALENDAR_COLUMNS.len() + derived.len());
    let width = schema.columns.len();
    let mut values = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let calendar = calendar_features(record.date);
        let mut row_values = Vec::with_capacity(width);
        row_values.push(Some(calendar.day_of_month as f64));
        row_values.push(Some(calendar.day_of_year as f64));
        row_values.push(Some(calendar.week_of_year as f64));
        row_values.push(Some(calendar.year as f64));
        row_values.push(Some(flag(calendar.is_weekend)));
        row_values.push(Some(flag(calendar.is_month_start)));
        row_values.push(Some(flag(calendar.is_month_end)));
        for column in &derived {
            row_values.push(column[row]);
        }
        row_values.resize(width, Some(0.0));
        encoder.set_hot(
            &mut row_values,
            record,
            calendar.day_of_week,
            calendar.month,
        );
        values.push(row_values);
    }

    let report = frame_report(&records, &schema, &values, superseded, grouped.group_count());

    info!(
        component = "features",
        event = "features.frame.built",
        history_rows = report.history_rows,
        synthetic_rows = report.synthetic_rows,
        superseded_synthetic_rows = report.superseded_synthetic_rows,
        group_keys = report.group_keys,
        missing_feature_cells = report.missing_feature_cells,
        unknown_rows_with_missing_features = report.unknown_rows_with_missing_features
    );

    Ok(FeatureFrame {
        records,
        origins,
        schema,
        levels,
        values,
        report,
    })
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// Column positions of every one-hot level.
struct OneHotLayout {
    customers: HashMap<String, usize>,
    products: HashMap<String, usize>,
    days_of_week: HashMap<u32, usize>,
    months: HashMap<u32, usize>,
}

impl OneHotLayout {
    fn new(schema: &FeatureSchema, levels: &CategoryLevels, first_one_hot: usize) -> Self {
        let mut position = first_one_hot;
        let mut next = || {
            let current = position;
            position += 1;
            current
        };
        let customers = levels.customers.iter().map(|c| (c.clone(), next())).collect();
        let products = levels.products.iter().map(|p| (p.clone(), next())).collect();
        let days_of_week = levels.days_of_week.iter().map(|d| (*d, next())).collect();
        let months = levels.months.iter().map(|m| (*m, next())).collect();
        debug_assert_eq!(position, schema.columns.len());
        Self {
            customers,
            products,
            days_of_week,
            months,
        }
    }

    fn set_hot(
        &self,
        row_values: &mut [Option<f64>],
        record: &TransactionRecord,
        day_of_week: u32,
        month: u32,
    ) {
        let hot = [
            self.customers.get(&record.customer_id),
            self.products.get(&record.product_id),
            self.days_of_week.get(&day_of_week),
            self.months.get(&month),
        ];
        for idx in hot.into_iter().flatten() {
            row_values[*idx] = Some(1.0);
        }
    }
}

fn model_column(name: String, kind: ColumnKind) -> FeatureColumn {
    FeatureColumn {
        name,
        kind,
        model_input: true,
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn ensure_positive_unique(field: &str, values: &[usize]) -> Result<(), FeatureError> {
    let mut seen = HashSet::new();
    for value in values {
        if *value == 0 {
            return Err(FeatureError::InvalidConfig(format!(
                "{field} entries must be > 0"
            )));
        }
        if !seen.insert(*value) {
            return Err(FeatureError::InvalidConfig(format!(
                "{field} entries must be unique"
            )));
        }
    }
    Ok(())
}

fn frame_report(
    records: &[TransactionRecord],
    schema: &FeatureSchema,
    values: &[Vec<Option<f64>>],
    superseded: usize,
    group_keys: usize,
) -> FrameReport {
    let model_idx: Vec<usize> = schema
        .columns
        .iter()
        .enumerate()
        .filter(|(_, column)| column.model_input)
        .map(|(idx, _)| idx)
        .collect();

    let mut report = FrameReport {
        superseded_synthetic_rows: superseded as u64,
        group_keys: group_keys as u64,
        ..FrameReport::default()
    };
    for (record, row) in records.iter().zip(values) {
        if record.sales.is_some() {
            report.history_rows += 1;
        } else {
            report.synthetic_rows += 1;
        }
        let missing = model_idx.iter().filter(|&&idx| row[idx].is_none()).count() as u64;
        report.missing_feature_cells += missing;
        if record.sales.is_none() && missing > 0 {
            report.unknown_rows_with_missing_features += 1;
        }
    }
    report
}

fn schema_fingerprint(cfg: &FeatureConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update("lags:");
    for lag in &cfg.lags {
        hasher.update(format!("{lag},"));
    }
    hasher.update(";rolling:");
    for window in &cfg.rolling_windows {
        hasher.update(format!("{window},"));
    }
    hasher.update(format!(";min_obs:{};", cfg.min_window_observations));
    hasher.update("ewm_alphas:");
    for alpha in &cfg.ewm_alphas {
        hasher.update(format!("{alpha},"));
    }
    hasher.update(";ewm_lags:");
    for lag in &cfg.ewm_lags {
        hasher.update(format!("{lag},"));
    }
    hasher.update(format!(";noise_std_dev:{};", cfg.noise_std_dev));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(if column.model_input { ":in;" } else { ":out;" });
    }
    hex::encode(hasher.finalize())
}
