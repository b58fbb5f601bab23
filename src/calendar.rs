//! Calendar-aligned scalar features derived from a single date.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// `day_of_week` is 0 for Monday through 6 for Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    pub month: u32,
    pub day_of_month: u32,
    pub day_of_year: u32,
    pub week_of_year: u32,
    pub day_of_week: u32,
    pub year: i32,
    pub is_weekend: bool,
    pub is_month_start: bool,
    pub is_month_end: bool,
}

pub fn calendar_features(date: NaiveDate) -> CalendarFeatures {
    let day_of_week = date.weekday().num_days_from_monday();
    CalendarFeatures {
        month: date.month(),
        day_of_month: date.day(),
        day_of_year: date.ordinal(),
        week_of_year: date.iso_week().week(),
        day_of_week,
        year: date.year(),
        is_weekend: day_of_week >= 5,
        is_month_start: date.day() == 1,
        is_month_end: is_last_day_of_month(date),
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (next, NaiveDate::from_ymd_opt(year, month, 1)) {
        (Some(next), Some(first)) => (next - first).num_days() as u32,
        _ => 0,
    }
}

fn is_last_day_of_month(date: NaiveDate) -> bool {
    date.succ_opt()
        .map(|next| next.month() != date.month())
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn basic_fields_for_a_sunday() {
        let f = calendar_features(date(2019, 10, 20));
        assert_eq!(f.month, 10);
        assert_eq!(f.day_of_month, 20);
        assert_eq!(f.day_of_year, 293);
        assert_eq!(f.week_of_year, 42);
        assert_eq!(f.day_of_week, 6);
        assert_eq!(f.year, 2019);
        assert!(f.is_weekend);
        assert!(!f.is_month_start);
        assert!(!f.is_month_end);
    }

    #[test]
    fn weekend_flag_covers_saturday_and_sunday_only() {
        // 2019-10-14 is a Monday
        let flags: Vec<bool> = (14..=20)
            .map(|d| calendar_features(date(2019, 10, d)).is_weekend)
            .collect();
        assert_eq!(flags, vec![false, false, false, false, false, true, true]);
    }

    #[test]
    fn iso_week_rolls_over_year_boundaries() {
        // 2020-12-31 falls in ISO week 53 of 2020
        assert_eq!(calendar_features(date(2020, 12, 31)).week_of_year, 53);
        // 2021-01-03 still belongs to ISO week 53 of 2020
        assert_eq!(calendar_features(date(2021, 1, 3)).week_of_year, 53);
        // 2019-12-30 belongs to ISO week 1 of 2020
        assert_eq!(calendar_features(date(2019, 12, 30)).week_of_year, 1);
        assert_eq!(calendar_features(date(2019, 12, 30)).year, 2019);
    }

    #[test]
    fn month_boundaries_including_leap_february() {
        assert!(calendar_features(date(2020, 2, 1)).is_month_start);
        assert!(!calendar_features(date(2020, 2, 28)).is_month_end);
        assert!(calendar_features(date(2020, 2, 29)).is_month_end);
        assert!(calendar_features(date(2019, 2, 28)).is_month_end);
        assert!(calendar_features(date(2019, 12, 31)).is_month_end);
        assert_eq!(calendar_features(date(2020, 12, 31)).day_of_year, 366);
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2020, 6), 30);
        assert_eq!(days_in_month(2020, 2), 29);
        assert_eq!(days_in_month(2019, 2), 28);
        assert_eq!(days_in_month(2019, 12), 31);
        assert_eq!(days_in_month(2019, 13), 0);
    }
}
