use crate::date::Interval;
use crate::registry::{Account, Commodity};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use std::fmt;
use std::sync::Arc;

/// Where a directive was written. Synthesized directives have no file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Origin {
    file: Option<Arc<str>>,
    line: usize,
}

impl Origin {
    pub fn new(file: impl Into<Arc<str>>, line: usize) -> Self {
        Self {
            file: Some(file.into()),
            line,
        }
    }

    pub fn synthetic() -> Self {
        Default::default()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> usize {
        self.line
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file, self.line),
            None => f.write_str("<synthetic>"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Open {
    pub date: NaiveDate,
    pub account: Account,
    pub origin: Origin,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Close {
    pub date: NaiveDate,
    pub account: Account,
    pub origin: Origin,
}

/// One unit of `commodity` is worth `price` units of `target`.
#[derive(Clone, Debug, PartialEq)]
pub struct Price {
    pub date: NaiveDate,
    pub commodity: Commodity,
    pub price: Decimal,
    pub target: Commodity,
    pub origin: Origin,
}

/// Moves `quantity` of `commodity` out of `credit` into `debit`. Every
/// posting balances on its own.
#[derive(Clone, Debug, PartialEq)]
pub struct Posting {
    pub credit: Account,
    pub debit: Account,
    pub commodity: Commodity,
    pub quantity: Decimal,
    /// Worth of the quantity in the valuation commodity, once valuated.
    pub value: Option<Decimal>,
}

impl Posting {
    pub fn new(credit: Account, debit: Account, commodity: Commodity, quantity: Decimal) -> Self {
        Self {
            credit,
            debit,
            commodity,
            quantity,
            value: None,
        }
    }
}

/// Spreads a transaction across the sub-periods of `[start, end)`, with
/// `account` holding the not yet recognized part.
#[derive(Clone, Debug, PartialEq)]
pub struct Accrual {
    pub interval: Interval,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub account: Account,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Addon {
    Accrual(Accrual),
    /// Parsed, but not processed by the engine.
    Performance(Vec<Commodity>),
}

impl Addon {
    pub fn kind(&self) -> &'static str {
        match self {
            Addon::Accrual(_) => "accrue",
            Addon::Performance(_) => "performance",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub date: NaiveDate,
    pub description: String,
    pub postings: Vec<Posting>,
    pub addons: Vec<Addon>,
    pub origin: Origin,
}

impl Transaction {
    /// Copy of this transaction carrying only `postings`.
    pub fn with_postings(&self, postings: Vec<Posting>) -> Transaction {
        Transaction {
            date: self.date,
            description: self.description.clone(),
            postings,
            addons: self.addons.clone(),
            origin: self.origin.clone(),
        }
    }
}

/// Balance assertion.
#[derive(Clone, Debug, PartialEq)]
pub struct Assertion {
    pub date: NaiveDate,
    pub account: Account,
    pub quantity: Decimal,
    pub commodity: Commodity,
    pub origin: Origin,
}

/// Declares what a position is worth in the valuation commodity.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub date: NaiveDate,
    pub account: Account,
    pub amount: Decimal,
    pub commodity: Commodity,
    pub origin: Origin,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    Price(Price),
    Open(Open),
    Transaction(Transaction),
    Value(Value),
    Assertion(Assertion),
    Close(Close),
}

impl Directive {
    pub fn date(&self) -> NaiveDate {
        match self {
            Directive::Price(p) => p.date,
            Directive::Open(o) => o.date,
            Directive::Transaction(t) => t.date,
            Directive::Value(v) => v.date,
            Directive::Assertion(a) => a.date,
            Directive::Close(c) => c.date,
        }
    }

    pub fn origin(&self) -> &Origin {
        match self {
            Directive::Price(p) => &p.origin,
            Directive::Open(o) => &o.origin,
            Directive::Transaction(t) => &t.origin,
            Directive::Value(v) => &v.origin,
            Directive::Assertion(a) => &a.origin,
            Directive::Close(c) => &c.origin,
        }
    }

    /// Same-day processing rank.
    pub fn priority(&self) -> u8 {
        match self {
            Directive::Price(_) => 0,
            Directive::Open(_) => 1,
            Directive::Transaction(_) => 2,
            Directive::Value(_) => 3,
            Directive::Assertion(_) => 4,
            Directive::Close(_) => 5,
        }
    }

    /// Sort key, by date then same-day priority.
    pub fn order(&self) -> (NaiveDate, u8) {
        (self.date(), self.priority())
    }
}

macro_rules! impl_from_directive {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Directive {
                fn from(d: $variant) -> Self {
                    Directive::$variant(d)
                }
            }
        )*
    };
}

impl_from_directive!(Price, Open, Transaction, Value, Assertion, Close);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use rust_decimal_macros::dec;

    #[test]
    fn test_directive_order() -> anyhow::Result<()> {
        let registry = Registry::new();
        let cash = registry.account("Assets:Cash")?;
        let usd = registry.commodity("USD");
        let day = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let next = day.succ_opt().unwrap();

        let mut directives: Vec<Directive> = vec![
            Close { date: day, account: cash, origin: Origin::synthetic() }.into(),
            Assertion { date: day, account: cash, quantity: dec!(0), commodity: usd, origin: Origin::synthetic() }.into(),
            Open { date: next, account: cash, origin: Origin::synthetic() }.into(),
            Open { date: day, account: cash, origin: Origin::synthetic() }.into(),
            Price { date: day, commodity: usd, price: dec!(1), target: usd, origin: Origin::synthetic() }.into(),
        ];
        directives.sort_by_key(Directive::order);

        assert_eq!(
            directives.iter().map(Directive::order).collect::<Vec<_>>(),
            vec![(day, 0), (day, 1), (day, 4), (day, 5), (next, 1)]
        );
        Ok(())
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(format!("{}", Origin::new("books/2023.journal", 12)), "books/2023.journal:12");
        assert_eq!(format!("{}", Origin::synthetic()), "<synthetic>");
    }
}
