use crate::amounts::Amounts;
use crate::ast::Day;
use crate::date::{Interval, Partition, Period};
use crate::error::Error;
use crate::flow::{Emitter, Processor};
use crate::registry::Registry;

use chrono::{Days, NaiveDate};
use log::debug;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Balances (and values, when valuating) as of the end of a period, or
/// their change over it when differencing.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub period: Period,
    pub amounts: Amounts,
    pub valuation: Option<Amounts>,
}

/// Cuts the day stream into periods and emits one [`Snapshot`] per period
/// once the stream ends.
///
/// Only the latest state within each calendar bucket of the interval is
/// retained, so memory grows with the number of periods, not days.
pub struct PeriodFilter {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    interval: Interval,
    last: usize,
    first: Option<NaiveDate>,
    latest: Option<NaiveDate>,
    valued: bool,
    buckets: BTreeMap<NaiveDate, (Amounts, Option<Amounts>)>,
}

impl PeriodFilter {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>, interval: Interval, last: usize) -> Self {
        Self {
            from,
            to,
            interval,
            last,
            first: None,
            latest: None,
            valued: false,
            buckets: BTreeMap::new(),
        }
    }

    fn partition(&self) -> Option<Partition> {
        let from = self.from.or(self.first)?;
        let to = match self.to {
            Some(to) => to,
            None => self.latest?.checked_add_days(Days::new(1))?,
        };
        Some(Partition::new(from, to, self.interval, self.last))
    }
}

impl Processor for PeriodFilter {
    type Input = Day;
    type Output = Snapshot;

    fn name(&self) -> &'static str {
        "period filter"
    }

    fn process(&mut self, day: Day, _out: &mut Emitter<Snapshot>) {
        if matches!(self.to, Some(to) if day.date >= to) {
            return;
        }
        self.first.get_or_insert(day.date);
        self.latest = Some(day.date);
        self.valued |= day.valuation.is_some();
        self.buckets.insert(
            self.interval.start_of(day.date),
            (day.amounts.unwrap_or_default(), day.valuation),
        );
    }

    fn finalize(&mut self, out: &mut Emitter<Snapshot>) {
        let Some(partition) = self.partition() else {
            debug!("period filter: no days");
            return;
        };
        for period in partition {
            let (amounts, valuation) = match self.buckets.range(..period.end).next_back() {
                Some((_, (amounts, valuation))) => (amounts.clone(), valuation.clone()),
                None => (Amounts::new(), self.valued.then(Amounts::new)),
            };
            out.emit(Snapshot {
                period,
                amounts,
                valuation,
            });
        }
    }
}

/// Replaces every snapshot but the first with its difference to the one
/// before, dropping the first. Passes snapshots through when disabled.
pub struct Differ {
    registry: Arc<Registry>,
    diff: bool,
    previous: Option<Snapshot>,
}

impl Differ {
    pub fn new(registry: Arc<Registry>, diff: bool) -> Self {
        Self {
            registry,
            diff,
            previous: None,
        }
    }

    fn delta(&self, current: Snapshot, previous: &Snapshot) -> Result<Snapshot, Error> {
        let overflow = |overflow: crate::amounts::Overflow| {
            Error::overflow(&self.registry, current.period.last_day(), overflow.0.commodity)
        };
        let valuation = match (&current.valuation, &previous.valuation) {
            (Some(now), Some(before)) => Some(now.clone().minus(before).map_err(overflow)?),
            (now, _) => now.clone(),
        };
        Ok(Snapshot {
            period: current.period,
            amounts: current.amounts.clone().minus(&previous.amounts).map_err(overflow)?,
            valuation,
        })
    }
}

impl Processor for Differ {
    type Input = Snapshot;
    type Output = Snapshot;

    fn name(&self) -> &'static str {
        "differ"
    }

    fn process(&mut self, snapshot: Snapshot, out: &mut Emitter<Snapshot>) {
        if !self.diff {
            out.emit(snapshot);
            return;
        }
        let Some(previous) = self.previous.replace(snapshot.clone()) else {
            return;
        };
        match self.delta(snapshot, &previous) {
            Ok(delta) => out.emit(delta),
            Err(error) => out.error(error),
        }
    }
}
