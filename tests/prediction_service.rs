use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use demand_sense::{
    build_feature_schema, consecutive_day_requests, precache_by_month, precache_requests, CacheKey,
    CategoryLevels, FeatureConfig, Granularity, History, HistoryLoadError, HistorySource,
    InMemoryHistorySource, InferenceConfig, LinearModel, NoCache, NoisePolicy, PredictionCache,
    PredictionRequest, PredictionService, SalesModel, SalesValue, TransactionRecord, TtlCache,
};

struct CountingSource {
    inner: InMemoryHistorySource,
    loads: AtomicUsize,
}

impl HistorySource for CountingSource {
    fn load(&self) -> Result<History, HistoryLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load()
    }

    fn describe(&self) -> String {
        format!("counting:{}", self.inner.describe())
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn history() -> History {
    let start = date(2019, 5, 1);
    let records = [("C1", "P1", 4.0), ("C2", "P1", 8.0)]
        .into_iter()
        .flat_map(|(customer, product, sales)| {
            (0..150).map(move |i| {
                TransactionRecord::observed(
                    start.checked_add_days(Days::new(i)).expect("date in range"),
                    customer,
                    product,
                    sales,
                )
            })
        })
        .collect();
    History::new(records).expect("history should build")
}

fn config() -> InferenceConfig {
    InferenceConfig {
        features: FeatureConfig {
            lags: vec![91, 98],
            ..FeatureConfig::default()
        },
        noise: NoisePolicy::Disabled,
        ..InferenceConfig::default()
    }
}

fn service_with(cache: Arc<dyn PredictionCache>) -> (PredictionService, Arc<CountingSource>) {
    let history = history();
    let cfg = config();
    // history runs May..September, so October only adds its own month level
    let levels = CategoryLevels::for_target_month(&history, date(2019, 10, 1));
    let model = LinearModel::seasonal_naive(&build_feature_schema(&cfg.features, &levels));
    let source = Arc::new(CountingSource {
        inner: InMemoryHistorySource::new(history),
        loads: AtomicUsize::new(0),
    });
    let service = PredictionService::new(Arc::new(model), source.clone(), cache, cfg);
    (service, source)
}

#[test]
fn repeated_request_is_served_from_cache() {
    let (service, source) =
        service_with(Arc::new(TtlCache::new(Duration::from_secs(300), 16)));
    let request = PredictionRequest::new("20102019", Granularity::Day);

    let first = service.predict(&request).expect("first call should succeed");
    let second = service.predict(&request).expect("second call should succeed");

    assert_eq!(first, SalesValue(12.0));
    assert_eq!(first, second);
    assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    assert_eq!(service.cache().len(), 1);
}

#[test]
fn cache_key_ignores_ids_the_granularity_does_not_use() {
    let (service, source) =
        service_with(Arc::new(TtlCache::new(Duration::from_secs(300), 16)));

    service
        .predict(&PredictionRequest::new("20102019", Granularity::Day))
        .expect("day call should succeed");
    service
        .predict(&PredictionRequest::new("20102019", Granularity::Day).with_customer("C1"))
        .expect("day call with stray id should succeed");
    let customer = service
        .predict(&PredictionRequest::new("20102019", Granularity::Customer).with_customer("C2"))
        .expect("customer call should succeed");

    assert_eq!(customer, SalesValue(8.0));
    assert_eq!(source.loads.load(Ordering::SeqCst), 2);
}

#[test]
fn no_cache_recomputes_every_time() {
    let (service, source) = service_with(Arc::new(NoCache));
    let request = PredictionRequest::new("21102019", Granularity::Day);

    service.predict(&request).expect("first call should succeed");
    service.predict(&request).expect("second call should succeed");

    assert_eq!(source.loads.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_requests_are_not_cached() {
    let (service, source) =
        service_with(Arc::new(TtlCache::new(Duration::from_secs(300), 16)));
    let request = PredictionRequest::new("20102019", Granularity::Customer).with_customer("C404");

    assert!(service.predict(&request).is_err());
    assert!(service.predict(&request).is_err());
    assert!(service.cache().is_empty());
    assert_eq!(source.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn precache_fills_the_cache_for_each_day() {
    let (service, source) =
        service_with(Arc::new(TtlCache::new(Duration::from_secs(300), 64)));
    let service = Arc::new(service);
    let requests = consecutive_day_requests(date(2019, 10, 2), 15, Granularity::Day);

    let report = precache_requests(service.clone(), requests, 4).await;

    assert_eq!(report.requested, 15);
    assert_eq!(report.succeeded, 15);
    assert!(report.failures.is_empty());
    assert_eq!(service.cache().len(), 15);
    assert_eq!(source.loads.load(Ordering::SeqCst), 15);

    let cached = service
        .predict(&PredictionRequest::new("16102019", Granularity::Day))
        .expect("cached call should succeed");
    assert_eq!(cached, SalesValue(12.0));
    assert_eq!(source.loads.load(Ordering::SeqCst), 15);
}

#[tokio::test]
async fn precache_reports_failures_without_stopping() {
    let (service, _source) =
        service_with(Arc::new(TtlCache::new(Duration::from_secs(300), 64)));
    let service = Arc::new(service);
    let requests = vec![
        PredictionRequest::new("02102019", Granularity::Day),
        PredictionRequest::new("2019-10-03", Granularity::Day),
        PredictionRequest::new("04102019", Granularity::Day),
    ];

    let report = precache_requests(service, requests, 1).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].test_date, "2019-10-03");
    assert_eq!(report.failures[0].kind, "invalid_date_format");
}

#[tokio::test]
async fn precache_across_a_month_boundary_uses_a_model_per_month() {
    // C1/P1 sells 4 a day from 2019-06-01 through 2019-10-19
    let start = date(2019, 6, 1);
    let records = (0..141)
        .map(|i| {
            TransactionRecord::observed(
                start.checked_add_days(Days::new(i)).expect("date in range"),
                "C1",
                "P1",
                4.0,
            )
        })
        .collect();
    let history = History::new(records).expect("history should build");
    let source = Arc::new(CountingSource {
        inner: InMemoryHistorySource::new(history),
        loads: AtomicUsize::new(0),
    });
    let cache: Arc<dyn PredictionCache> = Arc::new(TtlCache::new(Duration::from_secs(300), 64));
    let cfg = config();
    let features = cfg.features.clone();
    let mut requests = consecutive_day_requests(date(2019, 10, 25), 15, Granularity::Day);
    requests.push(
        PredictionRequest::new("30112019", Granularity::CustomerProduct)
            .with_customer("C1")
            .with_product("P1"),
    );
    requests.push(PredictionRequest::new("2019-11-01", Granularity::Day));

    let model_for_month = |history: &History, month: NaiveDate| {
        let levels = CategoryLevels::for_target_month(history, month);
        Arc::new(LinearModel::seasonal_naive(&build_feature_schema(&features, &levels)))
            as Arc<dyn SalesModel>
    };

    let report = precache_by_month(
        source.clone(),
        cache.clone(),
        cfg,
        requests,
        4,
        model_for_month,
    )
    .await
    .expect("history should load");

    assert_eq!(report.requested, 17);
    assert_eq!(report.succeeded, 16);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].test_date, "2019-11-01");
    assert_eq!(report.failures[0].kind, "invalid_date_format");
    assert_eq!(cache.len(), 16);
    // one load to build models plus one per computed request
    assert_eq!(source.loads.load(Ordering::SeqCst), 17);

    for test_date in ["25102019", "31102019", "01112019", "08112019"] {
        let key = CacheKey::for_request(&PredictionRequest::new(test_date, Granularity::Day))
            .expect("valid request");
        assert_eq!(cache.get(&key), Some(SalesValue(4.0)), "{test_date}");
    }
}
