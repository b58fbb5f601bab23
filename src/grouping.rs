//! Stable chronological ordering per [`GroupKey`].
//!
//! Lag and window builders only accept a [`GroupedSeries`]; constructing one
//! is the explicit sort step, so no builder relies on incoming row order.

use std::ops::Range;

use crate::history::{GroupKey, TransactionRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedSeries {
    order: Vec<usize>,
    groups: Vec<Range<usize>>,
}

impl GroupedSeries {
    /// Stable sort of row indices by (GroupKey, date). Rows that tie on both
    /// keep their input order.
    pub fn from_records(records: &[TransactionRecord]) -> Self {
        let keys: Vec<GroupKey> = records.iter().map(TransactionRecord::group_key).collect();
        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|&a, &b| {
            keys[a]
                .cmp(&keys[b])
                .then_with(|| records[a].date.cmp(&records[b].date))
        });

        let mut groups = Vec::new();
        let mut start = 0;
        for pos in 1..=order.len() {
            let boundary = pos == order.len() || keys[order[pos - 1]] != keys[order[pos]];
            if boundary {
                if pos > start {
                    groups.push(start..pos);
                }
                start = pos;
            }
        }

        Self { order, groups }
    }

    pub fn row_count(&self) -> usize {
        self.order.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Row indices of each key's series, oldest first.
    pub fn groups(&self) -> impl Iterator<Item = &[usize]> + '_ {
        self.groups.iter().map(move |range| &self.order[range.clone()])
    }

    /// Gathers `column` into per-key chronological order, applies `transform`
    /// to each series and scatters the result back to frame row positions.
    pub fn transform<F>(&self, column: &[Option<f64>], mut transform: F) -> Vec<Option<f64>>
    where
        F: FnMut(&[Option<f64>]) -> Vec<Option<f64>>,
    {
        let mut out = vec![None; column.len()];
        for rows in self.groups() {
            let series: Vec<Option<f64>> = rows.iter().map(|&row| column[row]).collect();
            let transformed = transform(&series);
            for (&row, value) in rows.iter().zip(transformed) {
                out[row] = value;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rec(c: &str, p: &str, day: u32, sales: f64) -> TransactionRecord {
        TransactionRecord::observed(NaiveDate::from_ymd_opt(2019, 1, day).unwrap(), c, p, sales)
    }

    #[test]
    fn groups_are_disjoint_and_chronological() {
        let records = vec![
            rec("C1", "P1", 3, 3.0),
            rec("C2", "P1", 1, 10.0),
            rec("C1", "P1", 1, 1.0),
            rec("C1", "P2", 2, 20.0),
            rec("C1", "P1", 2, 2.0),
        ];
        let series = GroupedSeries::from_records(&records);

        assert_eq!(series.row_count(), 5);
        assert_eq!(series.group_count(), 3);
        let groups: Vec<Vec<usize>> = series.groups().map(|g| g.to_vec()).collect();
        assert_eq!(groups, vec![vec![2, 4, 0], vec![3], vec![1]]);
    }

    #[test]
    fn groups_follow_the_record_group_key() {
        let records = vec![
            rec("C2", "P1", 1, 1.0),
            rec("C1", "P2", 1, 2.0),
            rec("C1", "P1", 1, 3.0),
            rec("C1", "P2", 2, 4.0),
        ];
        let series = GroupedSeries::from_records(&records);

        let keys: Vec<GroupKey> = series
            .groups()
            .map(|g| {
                let key = records[g[0]].group_key();
                assert!(g.iter().all(|&i| records[i].group_key() == key));
                key
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn transform_scatters_back_to_original_positions() {
        let records = vec![rec("C1", "P1", 2, 2.0), rec("C1", "P1", 1, 1.0)];
        let series = GroupedSeries::from_records(&records);
        let column: Vec<Option<f64>> = records.iter().map(|r| r.sales).collect();

        let shifted = series.transform(&column, |s| {
            let mut out = vec![None];
            out.extend_from_slice(&s[..s.len() - 1]);
            out
        });

        assert_eq!(shifted, vec![Some(1.0), None]);
    }

    #[test]
    fn empty_input_has_no_groups() {
        let series = GroupedSeries::from_records(&[]);
        assert_eq!(series.group_count(), 0);
        assert!(series.transform(&[], |s| s.to_vec()).is_empty());
    }
}
