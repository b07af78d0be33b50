use crate::date::Partition;
use crate::directive::{Accrual, Posting, Transaction};
use crate::registry::Account;

use rust_decimal::{Decimal, RoundingStrategy};

/// Which side of a posting gets spread across the accrual periods.
struct Routing {
    once: Option<(Account, Account)>,
    spread: Option<(Account, Account)>,
}

impl Accrual {
    /// Rewrites `transaction` into the entries it accrues to.
    ///
    /// The balance sheet side of each posting is booked once, in full, on
    /// the transaction date against the accrual account. The income
    /// statement side is spread evenly across the sub-periods of
    /// `[start, end)`, dated on the last day of each sub-period, with the
    /// final one absorbing the rounding remainder.
    pub fn expand(&self, transaction: &Transaction) -> Vec<Transaction> {
        let partition = Partition::new(self.start, self.end, self.interval, 0);
        let periods = partition.len();

        let mut once = Vec::new();
        let mut spread: Vec<Vec<Posting>> = vec![Vec::new(); periods];

        for posting in &transaction.postings {
            let routing = self.route(posting);
            if periods == 0 {
                once.push(posting.clone());
                continue;
            }
            if let Some((credit, debit)) = routing.once {
                once.push(Posting::new(credit, debit, posting.commodity, posting.quantity));
            }
            if let Some((credit, debit)) = routing.spread {
                for (period, quantity) in split(posting.quantity, periods).into_iter().enumerate() {
                    spread[period].push(Posting::new(credit, debit, posting.commodity, quantity));
                }
            }
        }

        let mut result = Vec::new();
        if !once.is_empty() {
            result.push(Transaction {
                date: transaction.date,
                description: transaction.description.clone(),
                postings: once,
                addons: Vec::new(),
                origin: transaction.origin.clone(),
            });
        }
        for (i, (period, postings)) in partition.periods().iter().zip(spread).enumerate() {
            if postings.is_empty() {
                continue;
            }
            result.push(Transaction {
                date: period.last_day(),
                description: format!("{} (accrual {}/{})", transaction.description, i + 1, periods),
                postings,
                addons: Vec::new(),
                origin: transaction.origin.clone(),
            });
        }
        result
    }

    fn route(&self, posting: &Posting) -> Routing {
        let (credit, debit) = (posting.credit.kind(), posting.debit.kind());
        if credit.is_balance_sheet() && debit.is_income_statement() {
            Routing {
                once: Some((posting.credit, self.account)),
                spread: Some((self.account, posting.debit)),
            }
        } else if credit.is_income_statement() && debit.is_balance_sheet() {
            Routing {
                once: Some((self.account, posting.debit)),
                spread: Some((posting.credit, self.account)),
            }
        } else if credit.is_income_statement() && debit.is_income_statement() {
            Routing {
                once: None,
                spread: Some((posting.credit, posting.debit)),
            }
        } else {
            Routing {
                once: Some((posting.credit, posting.debit)),
                spread: None,
            }
        }
    }
}

/// Splits `total` into `n` shares truncated to the scale of `total`; the
/// last share takes whatever is left.
fn split(total: Decimal, n: usize) -> Vec<Decimal> {
    let share = (total / Decimal::from(n)).round_dp_with_strategy(total.scale(), RoundingStrategy::ToZero);
    let mut shares = vec![share; n];
    if let Some(last) = shares.last_mut() {
        *last = total - share * Decimal::from(n - 1);
    }
    shares
}
