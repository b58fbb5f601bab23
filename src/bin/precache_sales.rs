use std::sync::Arc;

use demand_sense::{
    build_feature_schema, consecutive_day_requests, history_source_for_path, init_logging,
    log_app_start, log_model_selected, log_service_config, logging_config_from_env,
    parse_test_date, precache_by_month, CategoryLevels, Granularity, LinearModel,
    PredictionCache, SalesModel, ServiceConfig, TtlCache,
};

const COMPONENT: &str = "precache_sales";
const DEFAULT_START: &str = "02102019";
const DEFAULT_DAYS: u32 = 15;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(COMPONENT, &logging_cfg);

    let service_cfg = ServiceConfig::from_env()?;
    log_service_config(COMPONENT, &service_cfg);

    let start_raw =
        optional_env("DEMAND_SENSE_PRECACHE_START").unwrap_or_else(|| DEFAULT_START.to_string());
    let start = parse_test_date(&start_raw)?;
    let days = match optional_env("DEMAND_SENSE_PRECACHE_DAYS") {
        Some(raw) => raw.parse::<u32>()?,
        None => DEFAULT_DAYS,
    };
    let granularity = match optional_env("DEMAND_SENSE_GRANULARITY") {
        Some(raw) => raw.parse::<Granularity>()?,
        None => Granularity::Day,
    };
    let requests = consecutive_day_requests(start, days, granularity);

    let source = history_source_for_path(&service_cfg.history_path);
    let inference_cfg = service_cfg.inference_config();
    let features = inference_cfg.features.clone();
    let cache: Arc<dyn PredictionCache> = Arc::new(TtlCache::new(
        service_cfg.cache_ttl,
        service_cfg.cache_capacity,
    ));

    let report = precache_by_month(
        source,
        cache.clone(),
        inference_cfg,
        requests,
        service_cfg.precache_concurrency,
        |history, month| {
            let levels = CategoryLevels::for_target_month(history, month);
            let schema = build_feature_schema(&features, &levels);
            log_model_selected(COMPONENT, "seasonal_naive", &schema);
            Arc::new(LinearModel::seasonal_naive(&schema)) as Arc<dyn SalesModel>
        },
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("cached_entries={}", cache.len());

    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "{} of {} precache requests failed",
            report.failures.len(),
            report.requested
        )
        .into())
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}
