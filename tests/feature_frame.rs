use chrono::{Days, NaiveDate};
use demand_sense::{
    assemble_feature_frame, build_feature_frame, build_feature_schema, synthesize_for_history,
    synthesize_month, CategoryLevels, FeatureConfig, FeatureError, GaussianNoise, History,
    RowOrigin, TransactionRecord, ZeroNoise, FEATURE_SCHEMA_VERSION,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn daily(
    start: NaiveDate,
    days: u64,
    customer: &str,
    product: &str,
    value: impl Fn(u64) -> f64,
) -> Vec<TransactionRecord> {
    (0..days)
        .map(|i| {
            TransactionRecord::observed(
                start
                    .checked_add_days(Days::new(i))
                    .expect("date in range"),
                customer,
                product,
                value(i),
            )
        })
        .collect()
}

fn sample_history() -> Vec<TransactionRecord> {
    let start = date(2019, 1, 1);
    let mut records = daily(start, 60, "C1", "P1", |i| i as f64);
    records.extend(daily(start, 60, "C2", "P1", |i| 100.0 + i as f64));
    records.extend(daily(start, 45, "C1", "P2", |i| 2.0 * i as f64));
    records
}

fn short_config() -> FeatureConfig {
    FeatureConfig {
        lags: vec![7, 14],
        rolling_windows: vec![21],
        min_window_observations: 10,
        ewm_alphas: vec![0.5],
        ewm_lags: vec![7],
        ..FeatureConfig::default()
    }
}

#[test]
fn june_month_has_sixty_unknown_rows() {
    let rows = synthesize_month(
        date(2020, 6, 15),
        &["P1".to_string(), "P2".to_string()],
        &["C1".to_string()],
    );

    assert_eq!(rows.len(), 60);
    assert!(rows.iter().all(|r| r.sales.is_none()));
}

#[test]
fn lag_equals_prior_value_in_same_series() {
    let history = sample_history();
    let frame = assemble_feature_frame(&history, Vec::new(), &short_config(), &mut ZeroNoise)
        .expect("frame should build");

    for (row, record) in frame.records().iter().enumerate() {
        let position = (record.date - date(2019, 1, 1)).num_days();
        let lag7 = frame.value(row, "sales_lag_7");
        if position < 7 {
            assert_eq!(lag7, None, "row {row}");
        } else {
            let expected = history
                .iter()
                .find(|r| {
                    r.customer_id == record.customer_id
                        && r.product_id == record.product_id
                        && (record.date - r.date).num_days() == 7
                })
                .and_then(|r| r.sales);
            assert_eq!(lag7, expected, "row {row}");
        }
    }
}

#[test]
fn window_is_undefined_before_minimum_observations() {
    let frame =
        assemble_feature_frame(&sample_history(), Vec::new(), &short_config(), &mut ZeroNoise)
            .expect("frame should build");

    for (row, record) in frame.records().iter().enumerate() {
        let prior_rows = (record.date - date(2019, 1, 1)).num_days();
        let value = frame.value(row, "sales_roll_mean_21");
        assert_eq!(value.is_some(), prior_rows >= 10, "row {row}");
    }
}

#[test]
fn encoding_is_invariant_to_row_order() {
    let history = sample_history();
    let mut shuffled = history.clone();
    shuffled.reverse();
    shuffled.swap(3, 77);

    let cfg = short_config();
    let a = assemble_feature_frame(&history, Vec::new(), &cfg, &mut ZeroNoise)
        .expect("frame should build");
    let b = assemble_feature_frame(&shuffled, Vec::new(), &cfg, &mut ZeroNoise)
        .expect("frame should build");

    assert_eq!(a.schema(), b.schema());
    for (row_b, record) in b.records().iter().enumerate() {
        let row_a = a
            .records()
            .iter()
            .position(|r| r == record)
            .expect("same rows in both frames");
        assert_eq!(a.row_values(row_a), b.row_values(row_b), "{record:?}");
    }
}

#[test]
fn encoded_levels_are_the_union_of_history_and_synthetic_rows() {
    let records = sample_history();
    let history = History::new(records.clone()).expect("history should build");
    let target = date(2019, 3, 10);
    let synthetic = synthesize_for_history(&history, target);

    let frame = build_feature_frame(&history, target, &short_config(), &mut ZeroNoise)
        .expect("frame should build");

    let separate = CategoryLevels::from_records(&records)
        .union(&CategoryLevels::from_records(&synthetic));
    assert_eq!(frame.levels(), &separate);
    assert_eq!(frame.levels(), &CategoryLevels::for_target_month(&history, target));
    assert_eq!(
        frame.schema(),
        &build_feature_schema(&short_config(), &separate)
    );
    assert!(frame.schema().column_index("month_3").is_some());
    assert!(frame.schema().column_index("customer_id_C3").is_none());
}

#[test]
fn synthetic_rows_overlapping_history_keep_observed_sales() {
    let records = sample_history();
    let history = History::new(records.clone()).expect("history should build");

    // history ends 2019-03-01 for the 60-day series and 2019-02-14 for C1/P2
    let frame = build_feature_frame(&history, date(2019, 2, 20), &short_config(), &mut ZeroNoise)
        .expect("frame should build");

    let report = frame.report();
    assert_eq!(report.history_rows, records.len() as u64);
    // February rows already observed: days 1..=28 for two series, 1..=14 for C1/P2
    assert_eq!(report.superseded_synthetic_rows, 28 + 28 + 14);
    // every (customer, product) pair is synthesized, including C2/P2
    assert_eq!(report.synthetic_rows, 4 * 28 - 70);
    assert!(frame
        .origins()
        .iter()
        .skip(records.len())
        .all(|origin| *origin == RowOrigin::Synthetic));
}

#[test]
fn fixed_noise_seed_reproduces_the_frame() {
    let history = History::new(sample_history()).expect("history should build");
    let cfg = short_config();

    let a = build_feature_frame(
        &history,
        date(2019, 3, 5),
        &cfg,
        &mut GaussianNoise::seeded(cfg.noise_std_dev, 99).expect("noise should build"),
    )
    .expect("frame should build");
    let b = build_feature_frame(
        &history,
        date(2019, 3, 5),
        &cfg,
        &mut GaussianNoise::seeded(cfg.noise_std_dev, 99).expect("noise should build"),
    )
    .expect("frame should build");
    let c = build_feature_frame(
        &history,
        date(2019, 3, 5),
        &cfg,
        &mut GaussianNoise::seeded(cfg.noise_std_dev, 100).expect("noise should build"),
    )
    .expect("frame should build");

    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let cfg = FeatureConfig {
        lags: vec![7, 0],
        ..FeatureConfig::default()
    };
    let err = assemble_feature_frame(&sample_history(), Vec::new(), &cfg, &mut ZeroNoise)
        .expect_err("zero lag is invalid");
    assert!(matches!(err, FeatureError::InvalidConfig(_)));
    assert_eq!(cfg.schema_version, FEATURE_SCHEMA_VERSION);
}
