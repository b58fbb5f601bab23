//! Forward-looking evaluation rows for the month of a target date.

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::calendar::days_in_month;
use crate::history::{History, TransactionRecord};

/// Every day of the calendar month containing `target`.
pub fn month_days(target: NaiveDate) -> Vec<NaiveDate> {
    let (year, month) = (target.year(), target.month());
    (1..=days_in_month(year, month))
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .collect()
}

/// One unknown-target row per (product, customer, day) of the target month,
/// ordered product-major, then customer, then day.
pub fn synthesize_month(
    target: NaiveDate,
    products: &[String],
    customers: &[String],
) -> Vec<TransactionRecord> {
    let days = month_days(target);
    let mut rows = Vec::with_capacity(products.len() * customers.len() * days.len());
    for product in products {
        for customer in customers {
            for day in &days {
                rows.push(TransactionRecord::unknown(*day, customer, product));
            }
        }
    }

    debug!(
        component = "synth",
        event = "synth.month.built",
        target = %target,
        products = products.len(),
        customers = customers.len(),
        days = days.len(),
        rows = rows.len()
    );

    rows
}

/// Synthesizes the target month over every identity seen in `history`.
pub fn synthesize_for_history(history: &History, target: NaiveDate) -> Vec<TransactionRecord> {
    synthesize_month(
        target,
        &history.distinct_products(),
        &history.distinct_customers(),
    )
}
