use crate::directive::Price;
use crate::error::{Error, Result};
use crate::registry::{Commodity, Registry};

use chrono::NaiveDate;
use log::warn;
use rust_decimal::Decimal;

use std::collections::{HashMap, VecDeque};

/// Exchange rate graph. `rates[a][b]` is the worth of one `a` in `b`.
///
/// Every price is inserted together with its reciprocal and stays until a
/// later price for the same pair replaces it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Prices {
    rates: HashMap<Commodity, HashMap<Commodity, Decimal>>,
}

impl Prices {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, price: &Price) {
        if price.price.is_zero() || price.commodity == price.target {
            warn!("{}: ignoring degenerate price {}", price.origin, price.price);
            return;
        }
        let Some(reciprocal) = Decimal::ONE.checked_div(price.price) else {
            warn!("{}: ignoring price {} without a reciprocal", price.origin, price.price);
            return;
        };
        self.rates
            .entry(price.commodity)
            .or_default()
            .insert(price.target, price.price);
        self.rates
            .entry(price.target)
            .or_default()
            .insert(price.commodity, reciprocal);
    }

    pub fn rate(&self, from: Commodity, to: Commodity) -> Option<Decimal> {
        self.rates.get(&from)?.get(&to).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Resolves the worth of every reachable commodity in `valuation` with a
    /// breadth-first walk starting at `valuation`, multiplying the rates
    /// along the first path that reaches a commodity. The path is not
    /// guaranteed to be the shortest in rates nor the cheapest.
    ///
    /// Fails when a composed rate does not fit a [`Decimal`].
    pub fn normalize(&self, registry: &Registry, date: NaiveDate, valuation: Commodity) -> Result<NormalizedPrices> {
        let mut resolved = HashMap::from([(valuation, Decimal::ONE)]);
        let mut queue = VecDeque::from([valuation]);

        while let Some(current) = queue.pop_front() {
            let factor = resolved[&current];
            let Some(neighbours) = self.rates.get(&current) else {
                continue;
            };
            let mut neighbours: Vec<_> = neighbours.keys().copied().collect();
            neighbours.sort();
            for neighbour in neighbours {
                if resolved.contains_key(&neighbour) {
                    continue;
                }
                if let Some(rate) = self.rate(neighbour, current) {
                    let composed = rate
                        .checked_mul(factor)
                        .ok_or_else(|| Error::overflow(registry, date, neighbour))?;
                    resolved.insert(neighbour, composed);
                    queue.push_back(neighbour);
                }
            }
        }

        Ok(NormalizedPrices {
            valuation,
            rates: resolved,
        })
    }
}

/// Worth of every reachable commodity in the valuation commodity, as of
/// one day.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedPrices {
    valuation: Commodity,
    rates: HashMap<Commodity, Decimal>,
}

impl NormalizedPrices {
    /// Snapshot without any prices, only the valuation commodity is known.
    pub fn empty(valuation: Commodity) -> Self {
        Self {
            valuation,
            rates: HashMap::from([(valuation, Decimal::ONE)]),
        }
    }

    pub fn valuation(&self) -> Commodity {
        self.valuation
    }

    pub fn rate(&self, commodity: Commodity) -> Option<Decimal> {
        self.rates.get(&commodity).copied()
    }

    /// Converts `quantity` of `commodity` into the valuation commodity.
    pub fn valuate(
        &self,
        registry: &Registry,
        date: NaiveDate,
        commodity: Commodity,
        quantity: Decimal,
    ) -> Result<Decimal> {
        if commodity == self.valuation {
            return Ok(quantity);
        }
        match self.rates.get(&commodity) {
            Some(rate) => quantity
                .checked_mul(*rate)
                .ok_or_else(|| Error::overflow(registry, date, commodity)),
            None => Err(Error::NoValuationPath {
                date,
                commodity: registry.commodity_name(commodity),
                target: registry.commodity_name(self.valuation),
            }),
        }
    }
}
