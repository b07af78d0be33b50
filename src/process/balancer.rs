use crate::amounts::{Amounts, Position};
use crate::ast::Day;
use crate::directive::{Assertion, Close, Open, Origin, Transaction};
use crate::error::{Error, Result};
use crate::flow::{Emitter, Processor};
use crate::registry::{Account, AccountType, Registry};

use chrono::NaiveDate;
use log::debug;

use std::collections::HashSet;
use std::sync::Arc;

/// The booking engine. Keeps running balances and the set of open accounts,
/// and checks every directive of a day against them.
pub struct Balancer {
    registry: Arc<Registry>,
    amounts: Amounts,
    open: HashSet<Account>,
}

impl Balancer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            amounts: Amounts::new(),
            open: HashSet::new(),
        }
    }

    pub fn amounts(&self) -> &Amounts {
        &self.amounts
    }

    /// Equity accounts are always open.
    pub fn is_open(&self, account: Account) -> bool {
        account.kind() == AccountType::Equity || self.open.contains(&account)
    }

    /// Applies the directives of `day` in same-day order. A failing
    /// directive is skipped, the others still apply. Transactions that
    /// could not be booked are removed from `day`.
    pub fn book_day(&mut self, day: &mut Day) -> Vec<Error> {
        let mut errors = Vec::new();
        for open in &day.openings {
            errors.extend(self.open(open).err());
        }
        day.transactions.retain(|transaction| match self.book(transaction) {
            Ok(()) => true,
            Err(error) => {
                errors.push(error);
                false
            }
        });
        for assertion in &day.assertions {
            errors.extend(self.assert(assertion).err());
        }
        for close in &day.closings {
            errors.extend(self.close(close).err());
        }
        errors
    }

    fn account_error(&self, origin: &Origin, date: NaiveDate, account: Account, message: String) -> Error {
        Error::AccountState {
            origin: origin.clone(),
            date,
            account: self.registry.account_name(account),
            message,
        }
    }

    fn open(&mut self, open: &Open) -> Result<()> {
        if !self.open.insert(open.account) {
            return Err(self.account_error(&open.origin, open.date, open.account, "is already open".into()));
        }
        Ok(())
    }

    fn close(&mut self, close: &Close) -> Result<()> {
        if !self.is_open(close.account) {
            return Err(self.account_error(&close.origin, close.date, close.account, "is not open".into()));
        }
        let holdings: Vec<String> = self
            .amounts
            .holdings_of(close.account)
            .map(|(commodity, quantity)| format!("{} {}", quantity, self.registry.commodity_name(commodity)))
            .collect();
        if !holdings.is_empty() {
            return Err(self.account_error(
                &close.origin,
                close.date,
                close.account,
                format!("has a non-zero balance: {}", holdings.join(", ")),
            ));
        }
        self.open.remove(&close.account);
        Ok(())
    }

    /// Books all postings or none of them.
    fn book(&mut self, transaction: &Transaction) -> Result<()> {
        for posting in &transaction.postings {
            for account in [posting.credit, posting.debit] {
                if !self.is_open(account) {
                    return Err(self.account_error(
                        &transaction.origin,
                        transaction.date,
                        account,
                        "is not open".into(),
                    ));
                }
            }
        }
        self.amounts
            .book_all(
                transaction
                    .postings
                    .iter()
                    .map(|p| (p.credit, p.debit, p.quantity, p.commodity)),
            )
            .map_err(|overflow| Error::overflow(&self.registry, transaction.date, overflow.0.commodity))
    }

    fn assert(&self, assertion: &Assertion) -> Result<()> {
        let actual = self
            .amounts
            .get(&Position::new(assertion.account, assertion.commodity));
        if actual != assertion.quantity {
            return Err(Error::Assertion {
                origin: assertion.origin.clone(),
                date: assertion.date,
                account: self.registry.account_name(assertion.account),
                commodity: self.registry.commodity_name(assertion.commodity),
                expected: assertion.quantity,
                actual,
            });
        }
        Ok(())
    }
}

impl Processor for Balancer {
    type Input = Day;
    type Output = Day;

    fn name(&self) -> &'static str {
        "balancer"
    }

    fn process(&mut self, mut day: Day, out: &mut Emitter<Day>) {
        for error in self.book_day(&mut day) {
            debug!("balancer: {}", error);
            out.error(error);
        }
        day.amounts = Some(self.amounts.clone());
        out.emit(day);
    }
}
