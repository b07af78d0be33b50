use crate::error::{Error, Result};

use chrono::{Datelike, Days, Months, NaiveDate};

use std::fmt;
use std::str::FromStr;

/// Granularity of a partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Interval {
    #[default]
    Once,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Once => "once",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
            Interval::Quarterly => "quarterly",
            Interval::Yearly => "yearly",
        }
    }

    /// First day of the calendar period containing `date`. Weeks start on
    /// Monday. Everything falls into the same period for [`Interval::Once`].
    pub fn start_of(&self, date: NaiveDate) -> NaiveDate {
        let first_of = |month: u32| NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date);
        match self {
            Interval::Once => NaiveDate::MIN,
            Interval::Daily => date,
            Interval::Weekly => date - Days::new(u64::from(date.weekday().num_days_from_monday())),
            Interval::Monthly => first_of(date.month()),
            Interval::Quarterly => first_of(date.month0() / 3 * 3 + 1),
            Interval::Yearly => first_of(1),
        }
    }

    /// First day of the calendar period following the one containing `date`.
    pub fn next_start(&self, date: NaiveDate) -> NaiveDate {
        let start = self.start_of(date);
        let next = match self {
            Interval::Once => None,
            Interval::Daily => start.checked_add_days(Days::new(1)),
            Interval::Weekly => start.checked_add_days(Days::new(7)),
            Interval::Monthly => start.checked_add_months(Months::new(1)),
            Interval::Quarterly => start.checked_add_months(Months::new(3)),
            Interval::Yearly => start.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "once" => Ok(Interval::Once),
            "daily" => Ok(Interval::Daily),
            "weekly" => Ok(Interval::Weekly),
            "monthly" => Ok(Interval::Monthly),
            "quarterly" => Ok(Interval::Quarterly),
            "yearly" => Ok(Interval::Yearly),
            _ => Err(Error::Config(format!("unknown interval `{}'", s))),
        }
    }
}

/// A half-open date interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// The last day inside the period.
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.start).max(self.start)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Ordered, non-overlapping periods covering a span.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    periods: Vec<Period>,
}

impl Partition {
    /// Cuts `[from, to)` at the calendar boundaries of `interval`. The first
    /// and last periods are clipped to the span. With `last > 0` only the
    /// final `last` periods are kept.
    pub fn new(from: NaiveDate, to: NaiveDate, interval: Interval, last: usize) -> Self {
        let mut periods = Vec::new();
        let mut start = from;
        while start < to {
            let end = interval.next_start(start).min(to);
            periods.push(Period::new(start, end));
            start = end;
        }
        if last > 0 && last < periods.len() {
            periods.drain(..periods.len() - last);
        }
        Self { periods }
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Last day of every period.
    pub fn end_dates(&self) -> Vec<NaiveDate> {
        self.periods.iter().map(Period::last_day).collect()
    }
}

impl IntoIterator for Partition {
    type Item = Period;
    type IntoIter = std::vec::IntoIter<Period>;

    fn into_iter(self) -> Self::IntoIter {
        self.periods.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_start_of() {
        let d = date(2023, 8, 17);
        assert_eq!(Interval::Daily.start_of(d), d);
        assert_eq!(Interval::Weekly.start_of(d), date(2023, 8, 14));
        assert_eq!(Interval::Monthly.start_of(d), date(2023, 8, 1));
        assert_eq!(Interval::Quarterly.start_of(d), date(2023, 7, 1));
        assert_eq!(Interval::Yearly.start_of(d), date(2023, 1, 1));
        assert_eq!(Interval::Once.start_of(d), NaiveDate::MIN);
    }

    #[test]
    fn test_next_start() {
        assert_eq!(Interval::Monthly.next_start(date(2023, 12, 31)), date(2024, 1, 1));
        assert_eq!(Interval::Quarterly.next_start(date(2023, 2, 28)), date(2023, 4, 1));
        assert_eq!(Interval::Weekly.next_start(date(2023, 8, 20)), date(2023, 8, 21));
        assert_eq!(Interval::Once.next_start(date(2023, 8, 20)), NaiveDate::MAX);
    }

    #[test]
    fn test_monthly_partition_is_clipped() {
        let partition = Partition::new(date(2023, 1, 15), date(2023, 4, 10), Interval::Monthly, 0);
        assert_eq!(
            partition.periods(),
            &[
                Period::new(date(2023, 1, 15), date(2023, 2, 1)),
                Period::new(date(2023, 2, 1), date(2023, 3, 1)),
                Period::new(date(2023, 3, 1), date(2023, 4, 1)),
                Period::new(date(2023, 4, 1), date(2023, 4, 10)),
            ]
        );
        assert_eq!(
            partition.end_dates(),
            vec![date(2023, 1, 31), date(2023, 2, 28), date(2023, 3, 31), date(2023, 4, 9)]
        );
    }

    #[test]
    fn test_partition_last() {
        let partition = Partition::new(date(2022, 1, 1), date(2023, 1, 1), Interval::Quarterly, 2);
        assert_eq!(
            partition.periods(),
            &[
                Period::new(date(2022, 7, 1), date(2022, 10, 1)),
                Period::new(date(2022, 10, 1), date(2023, 1, 1)),
            ]
        );
    }

    #[test]
    fn test_once_and_empty_partition() {
        let once = Partition::new(date(2022, 3, 3), date(2023, 1, 1), Interval::Once, 0);
        assert_eq!(once.periods(), &[Period::new(date(2022, 3, 3), date(2023, 1, 1))]);

        assert!(Partition::new(date(2023, 1, 1), date(2023, 1, 1), Interval::Daily, 0).is_empty());
        assert!(Partition::new(date(2023, 1, 2), date(2023, 1, 1), Interval::Daily, 0).is_empty());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!("weekly".parse::<Interval>().unwrap(), Interval::Weekly);
        assert_eq!(
            format!("{}", "fortnightly".parse::<Interval>().unwrap_err()),
            "invalid configuration: unknown interval `fortnightly'"
        );
    }
}
