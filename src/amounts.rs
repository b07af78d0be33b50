use crate::registry::{Account, Commodity};

use rust_decimal::Decimal;
use thiserror::Error;

use std::collections::btree_map::{self, BTreeMap};

/// A holding of one commodity in one account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub account: Account,
    pub commodity: Commodity,
}

impl Position {
    pub fn new(account: Account, commodity: Commodity) -> Self {
        Self { account, commodity }
    }
}

/// A sum for the contained position left the range of [`Decimal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("arithmetic overflow")]
pub struct Overflow(pub Position);

/// Quantities (or values) per position. Missing positions are zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Amounts(BTreeMap<Position, Decimal>);

impl Amounts {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, position: &Position) -> Decimal {
        self.0.get(position).copied().unwrap_or_default()
    }

    /// Adds `quantity` to `position`, leaving it untouched on overflow.
    pub fn add(&mut self, position: Position, quantity: Decimal) -> Result<(), Overflow> {
        let sum = self
            .get(&position)
            .checked_add(quantity)
            .ok_or(Overflow(position))?;
        self.0.insert(position, sum);
        Ok(())
    }

    /// Books one posting: `quantity` leaves `credit` and enters `debit`.
    /// Neither side changes when one of them would overflow.
    pub fn book(
        &mut self,
        credit: Account,
        debit: Account,
        quantity: Decimal,
        commodity: Commodity,
    ) -> Result<(), Overflow> {
        let from = Position::new(credit, commodity);
        let to = Position::new(debit, commodity);
        let left = self.get(&from).checked_sub(quantity).ok_or(Overflow(from))?;
        let base = if from == to { left } else { self.get(&to) };
        let right = base.checked_add(quantity).ok_or(Overflow(to))?;
        self.0.insert(from, left);
        self.0.insert(to, right);
        Ok(())
    }

    /// Books `(credit, debit, quantity, commodity)` postings as one unit:
    /// all of them, or none when any overflows.
    pub fn book_all(
        &mut self,
        postings: impl IntoIterator<Item = (Account, Account, Decimal, Commodity)>,
    ) -> Result<(), Overflow> {
        let mut saved = Vec::new();
        for (credit, debit, quantity, commodity) in postings {
            for account in [credit, debit] {
                let position = Position::new(account, commodity);
                saved.push((position, self.0.get(&position).copied()));
            }
            if let Err(overflow) = self.book(credit, debit, quantity, commodity) {
                for (position, previous) in saved.into_iter().rev() {
                    match previous {
                        Some(quantity) => self.0.insert(position, quantity),
                        None => self.0.remove(&position),
                    };
                }
                return Err(overflow);
            }
        }
        Ok(())
    }

    /// Pointwise subtraction of `other`.
    pub fn minus(mut self, other: &Amounts) -> Result<Amounts, Overflow> {
        for (position, quantity) in other.iter() {
            self.add(*position, -*quantity)?;
        }
        Ok(self)
    }

    /// Non-zero holdings of `account`.
    pub fn holdings_of(&self, account: Account) -> impl Iterator<Item = (Commodity, Decimal)> + '_ {
        self.0
            .iter()
            .filter(move |(position, quantity)| position.account == account && !quantity.is_zero())
            .map(|(position, quantity)| (position.commodity, *quantity))
    }

    pub fn is_zero(&self) -> bool {
        self.0.values().all(Decimal::is_zero)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Position, Decimal> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Amounts {
    type Item = (&'a Position, &'a Decimal);
    type IntoIter = btree_map::Iter<'a, Position, Decimal>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Later quantities for the same position replace earlier ones.
impl FromIterator<(Position, Decimal)> for Amounts {
    fn from_iter<I: IntoIterator<Item = (Position, Decimal)>>(iter: I) -> Self {
        Amounts(iter.into_iter().collect())
    }
}
