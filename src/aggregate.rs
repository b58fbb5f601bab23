//! Scope filtering and time-bucket totals over a filled frame.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::features::{customer_column_name, product_column_name};
use crate::predict::FilledFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Customer,
    Product,
    CustomerProduct,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Customer => "customer",
            Self::Product => "product",
            Self::CustomerProduct => "customer_product",
        }
    }

    pub fn uses_customer(self) -> bool {
        matches!(self, Self::Customer | Self::CustomerProduct)
    }

    pub fn uses_product(self) -> bool {
        matches!(self, Self::Product | Self::CustomerProduct)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = AggregateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "customer" => Ok(Self::Customer),
            "product" => Ok(Self::Product),
            "customer_product" => Ok(Self::CustomerProduct),
            other => Err(AggregateError::UnknownGranularity(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    #[default]
    Day,
    Month,
    Year,
}

impl TimeBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBucket {
    type Err = AggregateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(AggregateError::UnknownBucket(other.to_string())),
        }
    }
}

/// Rows a request aggregates over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    All,
    Customer(String),
    Product(String),
    CustomerProduct {
        customer_id: String,
        product_id: String,
    },
}

impl Scope {
    /// Builds the scope for `granularity`; ids it does not use are ignored.
    pub fn for_granularity(
        granularity: Granularity,
        customer_id: Option<&str>,
        product_id: Option<&str>,
    ) -> Result<Self, AggregateError> {
        let require = |value: Option<&str>, field: &'static str| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(AggregateError::MissingIdentifier { granularity, field })
        };
        match granularity {
            Granularity::Day => Ok(Self::All),
            Granularity::Customer => Ok(Self::Customer(require(customer_id, "customer_id")?)),
            Granularity::Product => Ok(Self::Product(require(product_id, "product_id")?)),
            Granularity::CustomerProduct => Ok(Self::CustomerProduct {
                customer_id: require(customer_id, "customer_id")?,
                product_id: require(product_id, "product_id")?,
            }),
        }
    }

    pub fn customer_id(&self) -> Option<&str> {
        match self {
            Self::Customer(id) => Some(id),
            Self::CustomerProduct { customer_id, .. } => Some(customer_id),
            Self::All | Self::Product(_) => None,
        }
    }

    pub fn product_id(&self) -> Option<&str> {
        match self {
            Self::Product(id) => Some(id),
            Self::CustomerProduct { product_id, .. } => Some(product_id),
            Self::All | Self::Customer(_) => None,
        }
    }
}

/// Summed target over one bucket.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesValue(pub f64);

impl fmt::Display for SalesValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no {bucket} bucket for {date} in the requested scope")]
    NotFound { date: NaiveDate, bucket: TimeBucket },
    #[error("granularity {granularity} requires {field}")]
    MissingIdentifier {
        granularity: Granularity,
        field: &'static str,
    },
    #[error("unknown granularity '{0}' (expected day, customer, product or customer_product)")]
    UnknownGranularity(String),
    #[error("unknown time bucket '{0}' (expected day, month or year)")]
    UnknownBucket(String),
}

pub fn truncate_to_bucket(date: NaiveDate, bucket: TimeBucket) -> NaiveDate {
    let truncated = match bucket {
        TimeBucket::Day => Some(date),
        TimeBucket::Month => date.with_day(1),
        TimeBucket::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
    };
    truncated.unwrap_or(date)
}

/// Frame rows selected by `scope`, via the one-hot identity columns.
pub fn scope_rows(filled: &FilledFrame, scope: &Scope) -> Vec<usize> {
    let frame = filled.frame();
    let schema = frame.schema();
    let customer_idx = scope
        .customer_id()
        .map(|id| schema.column_index(&customer_column_name(id)));
    let product_idx = scope
        .product_id()
        .map(|id| schema.column_index(&product_column_name(id)));

    // An id without a column selects nothing.
    if matches!(customer_idx, Some(None)) || matches!(product_idx, Some(None)) {
        return Vec::new();
    }
    let required: Vec<usize> = [customer_idx.flatten(), product_idx.flatten()]
        .into_iter()
        .flatten()
        .collect();

    (0..frame.len())
        .filter(|&row| {
            let values = frame.row_values(row);
            required.iter().all(|&idx| values[idx] == Some(1.0))
        })
        .collect()
}

pub fn bucket_totals(
    filled: &FilledFrame,
    scope: &Scope,
    bucket: TimeBucket,
) -> BTreeMap<NaiveDate, f64> {
    let records = filled.frame().records();
    let sales = filled.sales();
    let mut totals = BTreeMap::new();
    for row in scope_rows(filled, scope) {
        *totals
            .entry(truncate_to_bucket(records[row].date, bucket))
            .or_insert(0.0) += sales[row];
    }
    totals
}

/// Total for the bucket containing `date`.
pub fn aggregate(
    filled: &FilledFrame,
    scope: &Scope,
    date: NaiveDate,
    bucket: TimeBucket,
) -> Result<SalesValue, AggregateError> {
    let key = truncate_to_bucket(date, bucket);
    let totals = bucket_totals(filled, scope, bucket);

    debug!(
        component = "aggregate",
        event = "aggregate.lookup",
        scope = ?scope,
        bucket = %bucket,
        key = %key,
        buckets = totals.len()
    );

    totals
        .get(&key)
        .copied()
        .map(SalesValue)
        .ok_or(AggregateError::NotFound { date, bucket })
}
