use crate::amounts::{Amounts, Position};
use crate::ast::Day;
use crate::directive::{Origin, Posting, Transaction};
use crate::error::{Error, Result};
use crate::flow::{Emitter, Processor};
use crate::prices::{NormalizedPrices, Prices};
use crate::registry::{Account, Commodity, Registry};

use log::debug;
use rust_decimal::Decimal;

use std::collections::HashSet;
use std::sync::Arc;

/// Keeps the price graph current and attaches its normalized form to every
/// day. Does nothing without a valuation commodity.
///
/// When the graph cannot be normalized on a price day, the previous
/// normalization stays in effect.
pub struct PriceUpdater {
    registry: Arc<Registry>,
    valuation: Option<Commodity>,
    prices: Prices,
    normalized: Option<Arc<NormalizedPrices>>,
}

impl PriceUpdater {
    pub fn new(registry: Arc<Registry>, valuation: Option<Commodity>) -> Self {
        Self {
            registry,
            valuation,
            prices: Prices::new(),
            normalized: None,
        }
    }
}

impl Processor for PriceUpdater {
    type Input = Day;
    type Output = Day;

    fn name(&self) -> &'static str {
        "price updater"
    }

    fn process(&mut self, mut day: Day, out: &mut Emitter<Day>) {
        if let Some(valuation) = self.valuation {
            for price in &day.prices {
                self.prices.insert(price);
            }
            if !day.prices.is_empty() || self.normalized.is_none() {
                match self.prices.normalize(&self.registry, day.date, valuation) {
                    Ok(normalized) => self.normalized = Some(Arc::new(normalized)),
                    Err(error) => {
                        out.error(error);
                        if self.normalized.is_none() {
                            self.normalized = Some(Arc::new(NormalizedPrices::empty(valuation)));
                        }
                    }
                }
            }
            day.normalized = self.normalized.clone();
        }
        out.emit(day);
    }
}

/// Converts postings into the valuation commodity and keeps the value of
/// every position in line with current prices.
///
/// Values are tracked separately from the booked quantities. Whenever a
/// balance sheet position's worth drifts, an adjustment transaction against
/// the valuation account is added to the day; these carry a zero quantity
/// and only move value.
pub struct Valuator {
    registry: Arc<Registry>,
    valuation: Option<Commodity>,
    account: Account,
    values: Amounts,
    unreachable: HashSet<Commodity>,
}

impl Valuator {
    pub fn new(registry: Arc<Registry>, valuation: Option<Commodity>, account: Account) -> Self {
        Self {
            registry,
            valuation,
            account,
            values: Amounts::new(),
            unreachable: HashSet::new(),
        }
    }

    fn adjustment(&mut self, day: &Day, position: Position, diff: Decimal, description: String) -> Result<Transaction> {
        self.values
            .book(self.account, position.account, diff, position.commodity)
            .map_err(|_| Error::overflow(&self.registry, day.date, position.commodity))?;
        let mut posting = Posting::new(self.account, position.account, position.commodity, Decimal::ZERO);
        posting.value = Some(diff);
        Ok(Transaction {
            date: day.date,
            description,
            postings: vec![posting],
            addons: Vec::new(),
            origin: Origin::synthetic(),
        })
    }

    /// Values the postings of `transaction` and books those values as one
    /// unit. Postings keep no value when any of them fails.
    fn valuate(&mut self, normalized: &NormalizedPrices, transaction: &mut Transaction) -> Result<()> {
        let registry = &self.registry;
        let values = transaction
            .postings
            .iter()
            .map(|p| normalized.valuate(registry, transaction.date, p.commodity, p.quantity))
            .collect::<Result<Vec<_>>>()?;
        self.values
            .book_all(
                transaction
                    .postings
                    .iter()
                    .zip(&values)
                    .map(|(p, value)| (p.credit, p.debit, *value, p.commodity)),
            )
            .map_err(|overflow| Error::overflow(registry, transaction.date, overflow.0.commodity))?;
        for (posting, value) in transaction.postings.iter_mut().zip(values) {
            posting.value = Some(value);
        }
        Ok(())
    }
}

impl Processor for Valuator {
    type Input = Day;
    type Output = Day;

    fn name(&self) -> &'static str {
        "valuator"
    }

    fn process(&mut self, mut day: Day, out: &mut Emitter<Day>) {
        let Some(valuation) = self.valuation else {
            out.emit(day);
            return;
        };
        let normalized = day
            .normalized
            .clone()
            .unwrap_or_else(|| Arc::new(NormalizedPrices::empty(valuation)));
        let registry = Arc::clone(&self.registry);

        for transaction in &mut day.transactions {
            if let Err(error) = self.valuate(&normalized, transaction) {
                out.error(error);
            }
        }

        let mut adjustments = Vec::new();
        let mut manual = HashSet::new();
        for value in &day.values {
            let position = Position::new(value.account, value.commodity);
            manual.insert(position);
            let Some(diff) = value.amount.checked_sub(self.values.get(&position)) else {
                out.error(Error::overflow(&registry, day.date, value.commodity));
                continue;
            };
            if diff.is_zero() {
                continue;
            }
            let description = format!(
                "Set value of {} in account {}",
                registry.commodity_name(value.commodity),
                registry.account_name(value.account)
            );
            match self.adjustment(&day, position, diff, description) {
                Ok(adjustment) => adjustments.push(adjustment),
                Err(error) => out.error(error),
            }
        }

        let amounts = day.amounts.clone().unwrap_or_default();
        for (position, quantity) in &amounts {
            if position.commodity == valuation
                || !position.account.kind().is_balance_sheet()
                || manual.contains(position)
            {
                continue;
            }
            let value = match normalized.valuate(&registry, day.date, position.commodity, *quantity) {
                Ok(value) => {
                    self.unreachable.remove(&position.commodity);
                    value
                }
                Err(error @ Error::NoValuationPath { .. }) => {
                    if self.unreachable.insert(position.commodity) {
                        out.error(error);
                    }
                    continue;
                }
                Err(error) => {
                    out.error(error);
                    continue;
                }
            };
            let Some(diff) = value.checked_sub(self.values.get(position)) else {
                out.error(Error::overflow(&registry, day.date, position.commodity));
                continue;
            };
            if diff.is_zero() {
                continue;
            }
            let description = format!(
                "Adjust value of {} in account {}",
                registry.commodity_name(position.commodity),
                registry.account_name(position.account)
            );
            debug!("{}: {}: {}", day.date, description, diff);
            match self.adjustment(&day, *position, diff, description) {
                Ok(adjustment) => adjustments.push(adjustment),
                Err(error) => out.error(error),
            }
        }

        day.transactions.extend(adjustments);
        day.valuation = Some(self.values.clone());
        out.emit(day);
    }
}
