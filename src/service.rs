//! Serving boundary: owns the cache, reloads history per miss and fans out
//! precache requests.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::aggregate::{truncate_to_bucket, Granularity, SalesValue, TimeBucket};
use crate::cache::{CacheKey, PredictionCache};
use crate::history::{History, HistorySource};
use crate::inference::{
    parse_test_date, run_request, InferenceConfig, InferenceError, PredictionRequest,
};
use crate::noise::NoisePolicy;
use crate::predict::SalesModel;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;
pub const DEFAULT_PRECACHE_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub history_path: PathBuf,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub precache_concurrency: usize,
    pub noise_seed: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ServiceConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ServiceConfigError> {
        let history_path = env::var("DEMAND_SENSE_HISTORY_PATH")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from)
            .ok_or(ServiceConfigError::Missing("DEMAND_SENSE_HISTORY_PATH"))?;

        let ttl_secs = env_number("DEMAND_SENSE_CACHE_TTL_SECS")?.unwrap_or(DEFAULT_CACHE_TTL_SECS);
        let cache_capacity = env_number("DEMAND_SENSE_CACHE_CAPACITY")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_CACHE_CAPACITY);
        let precache_concurrency = env_number("DEMAND_SENSE_PRECACHE_CONCURRENCY")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_PRECACHE_CONCURRENCY);
        if precache_concurrency == 0 {
            return Err(ServiceConfigError::Invalid {
                name: "DEMAND_SENSE_PRECACHE_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            history_path,
            cache_ttl: Duration::from_secs(ttl_secs),
            cache_capacity,
            precache_concurrency,
            noise_seed: env_number("DEMAND_SENSE_NOISE_SEED")?,
        })
    }

    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            noise: NoisePolicy::Seeded(self.noise_seed.unwrap_or(0)),
            ..InferenceConfig::default()
        }
    }
}

fn env_number(name: &'static str) -> Result<Option<u64>, ServiceConfigError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ServiceConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Answers requests from the cache or by running the core against freshly
/// loaded history. Each miss builds its own frame; nothing mutable is shared
/// between requests except the cache.
#[derive(Clone)]
pub struct PredictionService {
    model: Arc<dyn SalesModel>,
    history: Arc<dyn HistorySource>,
    cache: Arc<dyn PredictionCache>,
    config: InferenceConfig,
}

impl PredictionService {
    pub fn new(
        model: Arc<dyn SalesModel>,
        history: Arc<dyn HistorySource>,
        cache: Arc<dyn PredictionCache>,
        config: InferenceConfig,
    ) -> Self {
        Self {
            model,
            history,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn cache(&self) -> &dyn PredictionCache {
        self.cache.as_ref()
    }

    pub fn predict(&self, request: &PredictionRequest) -> Result<SalesValue, InferenceError> {
        let key = CacheKey::for_request(request)?;
        if let Some(value) = self.cache.get(&key) {
            debug!(
                component = "service",
                event = "cache.hit",
                date = %key.date,
                granularity = %key.granularity
            );
            return Ok(value);
        }
        debug!(
            component = "service",
            event = "cache.miss",
            date = %key.date,
            granularity = %key.granularity,
            source = %self.history.describe()
        );

        let history = self.history.load()?;
        let outcome = run_request(self.model.as_ref(), &history, request, &self.config)?;
        self.cache.insert(key, outcome.value);
        Ok(outcome.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecacheFailure {
    pub test_date: String,
    pub kind: String,
    pub error: String,
}

impl PrecacheFailure {
    fn from_error(test_date: String, err: &InferenceError) -> Self {
        warn!(
            component = "service",
            event = "precache.request.error",
            test_date = %test_date,
            kind = err.kind().as_str(),
            error = %err
        );
        Self {
            test_date,
            kind: err.kind().as_str().to_string(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecacheReport {
    pub requested: usize,
    pub succeeded: usize,
    pub failures: Vec<PrecacheFailure>,
    pub elapsed_ms: u64,
}

/// `days` consecutive `DDMMYYYY` requests starting at `start`.
pub fn consecutive_day_requests(
    start: NaiveDate,
    days: u32,
    granularity: Granularity,
) -> Vec<PredictionRequest> {
    (0..days)
        .filter_map(|offset| start.checked_add_days(Days::new(u64::from(offset))))
        .map(|date| PredictionRequest::new(date.format("%d%m%Y").to_string(), granularity))
        .collect()
}

/// Runs `requests` through `service` with at most `max_concurrency` in
/// flight. Failures are collected, never retried.
pub async fn precache_requests(
    service: Arc<PredictionService>,
    requests: Vec<PredictionRequest>,
    max_concurrency: usize,
) -> PrecacheReport {
    let started = Instant::now();
    let requested = requests.len();
    let sem = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut in_flight: JoinSet<Result<(), PrecacheFailure>> = JoinSet::new();

    for request in requests {
        let permit = match sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let service = service.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            let test_date = request.test_date.clone();
            let joined = tokio::task::spawn_blocking(move || service.predict(&request)).await;
            match joined {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(err)) => Err(PrecacheFailure::from_error(test_date, &err)),
                Err(err) => Err(PrecacheFailure {
                    test_date,
                    kind: "task".to_string(),
                    error: err.to_string(),
                }),
            }
        });
    }

    let mut succeeded = 0;
    let mut failures = Vec::new();
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok(Ok(())) => succeeded += 1,
            Ok(Err(failure)) => failures.push(failure),
            Err(err) => failures.push(PrecacheFailure {
                test_date: String::new(),
                kind: "task".to_string(),
                error: err.to_string(),
            }),
        }
    }
    failures.sort_by(|a, b| a.test_date.cmp(&b.test_date));

    let report = PrecacheReport {
        requested,
        succeeded,
        failures,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        component = "service",
        event = "precache.finish",
        requested = report.requested,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        max_concurrency,
        elapsed_ms = report.elapsed_ms
    );
    report
}

/// Precaches a run that may span several target months. A model's one-hot
/// columns are fixed by the month it was built for, so requests are grouped by
/// month and each group runs against `model_for_month(history, month_start)`.
/// All groups share `cache`.
pub async fn precache_by_month<F>(
    history: Arc<dyn HistorySource>,
    cache: Arc<dyn PredictionCache>,
    config: InferenceConfig,
    requests: Vec<PredictionRequest>,
    max_concurrency: usize,
    model_for_month: F,
) -> Result<PrecacheReport, InferenceError>
where
    F: Fn(&History, NaiveDate) -> Arc<dyn SalesModel>,
{
    let started = Instant::now();
    let requested = requests.len();
    let loaded = history.load()?;

    let mut failures = Vec::new();
    let mut by_month: BTreeMap<NaiveDate, Vec<PredictionRequest>> = BTreeMap::new();
    for request in requests {
        match parse_test_date(&request.test_date) {
            Ok(date) => by_month
                .entry(truncate_to_bucket(date, TimeBucket::Month))
                .or_default()
                .push(request),
            Err(err) => failures.push(PrecacheFailure::from_error(request.test_date, &err)),
        }
    }

    let months = by_month.len();
    let mut succeeded = 0;
    for (month, batch) in by_month {
        let service = Arc::new(PredictionService::new(
            model_for_month(&loaded, month),
            history.clone(),
            cache.clone(),
            config.clone(),
        ));
        let report = precache_requests(service, batch, max_concurrency).await;
        succeeded += report.succeeded;
        failures.extend(report.failures);
    }
    failures.sort_by(|a, b| a.test_date.cmp(&b.test_date));

    let report = PrecacheReport {
        requested,
        succeeded,
        failures,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        component = "service",
        event = "precache.run.finish",
        months,
        requested = report.requested,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        elapsed_ms = report.elapsed_ms
    );
    Ok(report)
}
