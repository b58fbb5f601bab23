//! Request-level result caching for the serving boundary.

use std::time::Duration;

use chrono::NaiveDate;
use moka::sync::Cache;
use serde::Serialize;

use crate::aggregate::{Granularity, SalesValue};
use crate::inference::{parse_test_date, InferenceError, PredictionRequest};

/// Normalized request tuple. Ids the granularity does not use are dropped,
/// so `day` requests share one entry whatever ids they carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    pub date: NaiveDate,
    pub granularity: Granularity,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
}

impl CacheKey {
    pub fn for_request(request: &PredictionRequest) -> Result<Self, InferenceError> {
        let date = parse_test_date(&request.test_date)?;
        let normalize = |value: &Option<String>, used: bool| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| used && !v.is_empty())
                .map(str::to_string)
        };
        Ok(Self {
            date,
            granularity: request.granularity,
            customer_id: normalize(&request.customer_id, request.granularity.uses_customer()),
            product_id: normalize(&request.product_id, request.granularity.uses_product()),
        })
    }
}

pub trait PredictionCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<SalesValue>;
    fn insert(&self, key: CacheKey, value: SalesValue);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl PredictionCache for NoCache {
    fn get(&self, _key: &CacheKey) -> Option<SalesValue> {
        None
    }

    fn insert(&self, _key: CacheKey, _value: SalesValue) {}

    fn len(&self) -> usize {
        0
    }
}

/// Entries expire `ttl` after insertion; at capacity moka's admission and
/// eviction policy picks what stays.
#[derive(Clone)]
pub struct TtlCache {
    ttl: Duration,
    capacity: usize,
    entries: Cache<CacheKey, SalesValue>,
}

impl TtlCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity as u64)
            .time_to_live(ttl)
            .build();
        Self {
            ttl,
            capacity,
            entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl PredictionCache for TtlCache {
    fn get(&self, key: &CacheKey) -> Option<SalesValue> {
        self.entries.get(key)
    }

    fn insert(&self, key: CacheKey, value: SalesValue) {
        if self.capacity == 0 {
            return;
        }
        self.entries.insert(key, value);
    }

    fn len(&self) -> usize {
        // entry_count lags behind writes until pending maintenance runs
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }
}
