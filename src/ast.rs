use crate::amounts::Amounts;
use crate::directive::{Assertion, Close, Directive, Open, Posting, Price, Transaction, Value};
use crate::prices::NormalizedPrices;
use crate::registry::{Account, Commodity, Registry};

use chrono::NaiveDate;
use regex::Regex;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Everything that happens on one date, split by kind.
///
/// The `amounts`, `normalized` and `valuation` fields are filled in by the
/// processing stages as the day travels through them.
#[derive(Clone, Debug, Default)]
pub struct Day {
    pub date: NaiveDate,
    pub prices: Vec<Price>,
    pub openings: Vec<Open>,
    pub transactions: Vec<Transaction>,
    pub values: Vec<Value>,
    pub assertions: Vec<Assertion>,
    pub closings: Vec<Close>,

    pub amounts: Option<Amounts>,
    pub normalized: Option<Arc<NormalizedPrices>>,
    pub valuation: Option<Amounts>,
}

impl Day {
    pub fn new(date: NaiveDate) -> Day {
        Day {
            date,
            ..Default::default()
        }
    }

    /// Directives of the day, in processing order.
    pub fn directives(&self) -> impl Iterator<Item = Directive> + '_ {
        let prices = self.prices.iter().cloned().map(Directive::from);
        let openings = self.openings.iter().cloned().map(Directive::from);
        let transactions = self.transactions.iter().cloned().map(Directive::from);
        let values = self.values.iter().cloned().map(Directive::from);
        let assertions = self.assertions.iter().cloned().map(Directive::from);
        let closings = self.closings.iter().cloned().map(Directive::from);
        prices
            .chain(openings)
            .chain(transactions)
            .chain(values)
            .chain(assertions)
            .chain(closings)
    }
}

/// The journal, grouped by date.
#[derive(Clone, Debug)]
pub struct Ast {
    registry: Arc<Registry>,
    days: BTreeMap<NaiveDate, Day>,
    options: HashMap<String, String>,
}

macro_rules! day_insert {
    ($($kind:ident => $field:ident: $ty:ty),* $(,)?) => {
        camelpaste::paste! {
            $(
                pub fn [<add_ $kind>](&mut self, directive: $ty) {
                    let date = directive.date;
                    self.day_mut(date).$field.push(directive);
                }
            )*
        }
    };
}

impl Ast {
    pub fn new(registry: Arc<Registry>) -> Ast {
        Ast {
            registry,
            days: BTreeMap::new(),
            options: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    day_insert!(
        price => prices: Price,
        open => openings: Open,
        transaction => transactions: Transaction,
        value => values: Value,
        assertion => assertions: Assertion,
        close => closings: Close,
    );

    pub fn add(&mut self, directive: Directive) {
        match directive {
            Directive::Price(p) => self.add_price(p),
            Directive::Open(o) => self.add_open(o),
            Directive::Transaction(t) => self.add_transaction(t),
            Directive::Value(v) => self.add_value(v),
            Directive::Assertion(a) => self.add_assertion(a),
            Directive::Close(c) => self.add_close(c),
        }
    }

    pub fn day_mut(&mut self, date: NaiveDate) -> &mut Day {
        self.days.entry(date).or_insert_with(|| Day::new(date))
    }

    pub fn get_at(&self, date: &NaiveDate) -> Option<&Day> {
        self.days.get(date)
    }

    pub fn set_option(&mut self, key: &str, val: &str) {
        self.options.insert(key.to_string(), val.to_string());
    }

    pub fn option(&self, key: &str) -> Option<&String> {
        self.options.get(key)
    }

    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }

    pub fn min_date(&self) -> Option<NaiveDate> {
        self.days.keys().next().copied()
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.days.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Days in ascending date order.
    pub fn days(&self) -> impl Iterator<Item = &Day> {
        self.days.values()
    }

    pub fn into_days(self) -> impl Iterator<Item = Day> {
        self.days.into_values()
    }

    /// An empty AST sharing this one's registry and options.
    pub fn empty_copy(&self) -> Ast {
        Ast {
            registry: Arc::clone(&self.registry),
            days: BTreeMap::new(),
            options: self.options.clone(),
        }
    }
}

/// Restricts processing to matching accounts and commodities. An unset
/// pattern matches everything.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub accounts: Option<Regex>,
    pub commodities: Option<Regex>,
}

impl Filter {
    pub fn new(accounts: Option<Regex>, commodities: Option<Regex>) -> Self {
        Self {
            accounts,
            commodities,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_none() && self.commodities.is_none()
    }

    pub fn match_account(&self, registry: &Registry, account: Account) -> bool {
        self.accounts
            .as_ref()
            .map_or(true, |re| re.is_match(&registry.account_name(account)))
    }

    pub fn match_commodity(&self, registry: &Registry, commodity: Commodity) -> bool {
        self.commodities
            .as_ref()
            .map_or(true, |re| re.is_match(&registry.commodity_name(commodity)))
    }

    /// A posting matches when its commodity does and either of its accounts
    /// does.
    pub fn match_posting(&self, registry: &Registry, posting: &Posting) -> bool {
        self.match_commodity(registry, posting.commodity)
            && (self.match_account(registry, posting.credit)
                || self.match_account(registry, posting.debit))
    }

    /// Keeps the matching postings of `transaction`. Returns `None` if none
    /// is left and a copy only if some were dropped.
    pub fn transaction(&self, registry: &Registry, transaction: Transaction) -> Option<Transaction> {
        if self.is_empty() {
            return Some(transaction);
        }
        let filtered: Vec<Posting> = transaction
            .postings
            .iter()
            .filter(|p| self.match_posting(registry, p))
            .cloned()
            .collect();
        if filtered.is_empty() {
            return None;
        }
        if filtered.len() < transaction.postings.len() {
            return Some(transaction.with_postings(filtered));
        }
        Some(transaction)
    }
}
