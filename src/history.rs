//! Historical transaction records and the sources they are loaded from.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const DATE_COLUMN: &str = "date";
pub const CUSTOMER_COLUMN: &str = "customer_id";
pub const PRODUCT_COLUMN: &str = "product_id";
pub const SALES_COLUMN: &str = "sales";

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// One observed (or placeholder) sale. `sales` is `None` only for synthetic rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    pub customer_id: String,
    pub product_id: String,
    pub sales: Option<f64>,
}

impl TransactionRecord {
    pub fn observed(
        date: NaiveDate,
        customer_id: impl Into<String>,
        product_id: impl Into<String>,
        sales: f64,
    ) -> Self {
        Self {
            date,
            customer_id: customer_id.into(),
            product_id: product_id.into(),
            sales: Some(sales),
        }
    }

    pub fn unknown(
        date: NaiveDate,
        customer_id: impl Into<String>,
        product_id: impl Into<String>,
    ) -> Self {
        Self {
            date,
            customer_id: customer_id.into(),
            product_id: product_id.into(),
            sales: None,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.customer_id.clone(), self.product_id.clone())
    }
}

/// Partition key for every lag/window computation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub customer_id: String,
    pub product_id: String,
}

impl GroupKey {
    pub fn new(customer_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            product_id: product_id.into(),
        }
    }
}

/// Read-only set of real transactions. Every record carries a known sales value.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    records: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub rows: u64,
    pub customers: u64,
    pub products: u64,
    pub group_keys: u64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub span_days: i64,
}

#[derive(Debug, Error)]
pub enum HistoryLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("history source is missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("failed to parse field {field} value '{value}' on line {line}")]
    ParseField {
        field: &'static str,
        value: String,
        line: u64,
    },
    #[error("sales must be known, finite and non-negative; got {value} on line {line}")]
    InvalidSales { value: f64, line: u64 },
    #[error("history source {0} contains no records")]
    Empty(String),
}

impl History {
    pub fn new(records: Vec<TransactionRecord>) -> Result<Self, HistoryLoadError> {
        for (idx, record) in records.iter().enumerate() {
            match record.sales {
                Some(value) if value.is_finite() && value >= 0.0 => {}
                other => {
                    return Err(HistoryLoadError::InvalidSales {
                        value: other.unwrap_or(f64::NAN),
                        line: idx as u64 + 1,
                    })
                }
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct customer ids in order of first appearance.
    pub fn distinct_customers(&self) -> Vec<String> {
        first_appearance(self.records.iter().map(|r| r.customer_id.as_str()))
    }

    /// Distinct product ids in order of first appearance.
    pub fn distinct_products(&self) -> Vec<String> {
        first_appearance(self.records.iter().map(|r| r.product_id.as_str()))
    }
}

/// Anything that can hand the core a fresh, read-only history per call.
pub trait HistorySource: Send + Sync {
    fn load(&self) -> Result<History, HistoryLoadError>;
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct CsvHistorySource {
    path: PathBuf,
}

impl CsvHistorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HistorySource for CsvHistorySource {
    fn load(&self) -> Result<History, HistoryLoadError> {
        load_history_csv(&self.path)
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteHistorySource {
    path: PathBuf,
}

impl SqliteHistorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HistorySource for SqliteHistorySource {
    fn load(&self) -> Result<History, HistoryLoadError> {
        load_history_sqlite(&self.path)
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryHistorySource {
    history: Arc<History>,
}

impl InMemoryHistorySource {
    pub fn new(history: History) -> Self {
        Self {
            history: Arc::new(history),
        }
    }
}

impl HistorySource for InMemoryHistorySource {
    fn load(&self) -> Result<History, HistoryLoadError> {
        Ok(self.history.as_ref().clone())
    }

    fn describe(&self) -> String {
        format!("memory:{}rows", self.history.len())
    }
}

/// Picks the SQLite loader for `.sqlite`/`.db` files and CSV otherwise.
pub fn history_source_for_path(path: &Path) -> Arc<dyn HistorySource> {
    let is_sqlite = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "sqlite" | "db"))
        .unwrap_or(false);
    if is_sqlite {
        Arc::new(SqliteHistorySource::new(path))
    } else {
        Arc::new(CsvHistorySource::new(path))
    }
}

pub fn load_history_csv(path: &Path) -> Result<History, HistoryLoadError> {
    let bytes = fs::read(path)?;
    let history = parse_history_csv(&bytes)?;
    if history.is_empty() {
        return Err(HistoryLoadError::Empty(path.display().to_string()));
    }
    log_history_loaded(&format!("csv:{}", path.display()), &history);
    Ok(history)
}

/// Parses CSV bytes with a header row. Columns are located by name, so column
/// order and extra columns do not matter.
pub fn parse_history_csv(bytes: &[u8]) -> Result<History, HistoryLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let layout = CsvLayout::from_headers(&headers)?;

    let mut records = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        // header is line 1
        let line = idx as u64 + 2;
        records.push(layout.parse_record(&record, line)?);
    }

    History::new(records)
}

pub fn load_history_sqlite(path: &Path) -> Result<History, HistoryLoadError> {
    let conn = Connection::open(path)?;
    let mut stmt = conn.prepare(
        "
        SELECT date, customer_id, product_id, sales
        FROM transactions
        ORDER BY rowid ASC
        ",
    )?;

    let mut rows = stmt.query([])?;
    let mut records = Vec::new();
    let mut line: u64 = 0;
    while let Some(row) = rows.next()? {
        line += 1;
        let raw_date: String = row.get(0)?;
        let customer_id: String = row.get(1)?;
        let product_id: String = row.get(2)?;
        let sales: f64 = row.get(3)?;
        let date = parse_history_date(&raw_date).ok_or_else(|| HistoryLoadError::ParseField {
            field: DATE_COLUMN,
            value: raw_date.clone(),
            line,
        })?;
        records.push(TransactionRecord::observed(date, customer_id, product_id, sales));
    }

    let history = History::new(records)?;
    if history.is_empty() {
        return Err(HistoryLoadError::Empty(path.display().to_string()));
    }
    log_history_loaded(&format!("sqlite:{}", path.display()), &history);
    Ok(history)
}

pub fn summarize_history(history: &History) -> HistorySummary {
    let records = history.records();
    let first_date = records.iter().map(|r| r.date).min();
    let last_date = records.iter().map(|r| r.date).max();
    let span_days = match (first_date, last_date) {
        (Some(first), Some(last)) => (last - first).num_days(),
        _ => 0,
    };
    let group_keys: HashSet<(&str, &str)> = records
        .iter()
        .map(|r| (r.customer_id.as_str(), r.product_id.as_str()))
        .collect();

    HistorySummary {
        rows: records.len() as u64,
        customers: history.distinct_customers().len() as u64,
        products: history.distinct_products().len() as u64,
        group_keys: group_keys.len() as u64,
        first_date,
        last_date,
        span_days,
    }
}

pub fn parse_history_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .ok()
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        })
}

fn log_history_loaded(source: &str, history: &History) {
    let summary = summarize_history(history);
    info!(
        component = "history",
        event = "history.load.finish",
        source,
        rows = summary.rows,
        customers = summary.customers,
        products = summary.products,
        group_keys = summary.group_keys,
        first_date = ?summary.first_date,
        last_date = ?summary.last_date,
        span_days = summary.span_days
    );
}

fn first_appearance<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values {
        if seen.insert(value) {
            out.push(value.to_string());
        }
    }
    out
}

struct CsvLayout {
    date: usize,
    customer_id: usize,
    product_id: usize,
    sales: usize,
}

impl CsvLayout {
    fn from_headers(headers: &StringRecord) -> Result<Self, HistoryLoadError> {
        let find = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or(HistoryLoadError::MissingColumn(name))
        };
        Ok(Self {
            date: find(DATE_COLUMN)?,
            customer_id: find(CUSTOMER_COLUMN)?,
            product_id: find(PRODUCT_COLUMN)?,
            sales: find(SALES_COLUMN)?,
        })
    }

    fn parse_record(
        &self,
        record: &StringRecord,
        line: u64,
    ) -> Result<TransactionRecord, HistoryLoadError> {
        let raw_date = record.get(self.date).unwrap_or_default();
        let date = parse_history_date(raw_date).ok_or_else(|| HistoryLoadError::ParseField {
            field: DATE_COLUMN,
            value: raw_date.to_string(),
            line,
        })?;

        let customer_id = required_text(record, self.customer_id, CUSTOMER_COLUMN, line)?;
        let product_id = required_text(record, self.product_id, PRODUCT_COLUMN, line)?;

        let raw_sales = record.get(self.sales).unwrap_or_default();
        let sales = raw_sales
            .parse::<f64>()
            .map_err(|_| HistoryLoadError::ParseField {
                field: SALES_COLUMN,
                value: raw_sales.to_string(),
                line,
            })?;
        if !sales.is_finite() || sales < 0.0 {
            return Err(HistoryLoadError::InvalidSales { value: sales, line });
        }

        Ok(TransactionRecord::observed(date, customer_id, product_id, sales))
    }
}

fn required_text(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<String, HistoryLoadError> {
    let raw = record.get(idx).unwrap_or_default();
    if raw.is_empty() {
        return Err(HistoryLoadError::ParseField {
            field,
            value: raw.to_string(),
            line,
        });
    }
    Ok(raw.to_string())
}
