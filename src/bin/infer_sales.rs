use demand_sense::{
    build_feature_schema, history_source_for_path, init_logging, log_app_start,
    log_model_selected, log_service_config, logging_config_from_env, parse_test_date,
    run_request, summarize_history, CategoryLevels, Granularity, LinearModel, PredictionRequest,
    ServiceConfig, TimeBucket,
};

const COMPONENT: &str = "infer_sales";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(COMPONENT, &logging_cfg);

    let service_cfg = ServiceConfig::from_env()?;
    log_service_config(COMPONENT, &service_cfg);

    let request = request_from_env()?;
    let mut inference_cfg = service_cfg.inference_config();
    if let Some(bucket) = optional_env("DEMAND_SENSE_BUCKET") {
        inference_cfg.bucket = bucket.parse::<TimeBucket>()?;
    }

    let source = history_source_for_path(&service_cfg.history_path);
    let history = source.load()?;

    let target = parse_test_date(&request.test_date)?;
    let levels = CategoryLevels::for_target_month(&history, target);
    let schema = build_feature_schema(&inference_cfg.features, &levels);
    let model = LinearModel::seasonal_naive(&schema);
    log_model_selected(COMPONENT, "seasonal_naive", &schema);

    let outcome = run_request(&model, &history, &request, &inference_cfg)?;

    let output = serde_json::json!({
        "request": request,
        "bucket": inference_cfg.bucket,
        "history": summarize_history(&history),
        "outcome": outcome,
        "elapsed_ms": outcome.elapsed.as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn request_from_env() -> Result<PredictionRequest, Box<dyn std::error::Error>> {
    let test_date = optional_env("DEMAND_SENSE_TEST_DATE")
        .ok_or("DEMAND_SENSE_TEST_DATE must be set (DDMMYYYY)")?;
    let granularity = match optional_env("DEMAND_SENSE_GRANULARITY") {
        Some(raw) => raw.parse::<Granularity>()?,
        None => Granularity::Day,
    };

    let mut request = PredictionRequest::new(test_date, granularity);
    request.customer_id = optional_env("DEMAND_SENSE_CUSTOMER_ID");
    request.product_id = optional_env("DEMAND_SENSE_PRODUCT_ID");
    Ok(request)
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}
