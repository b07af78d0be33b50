use crate::error::{Error, Result};

use indexmap::IndexSet;

use std::fmt;
use std::sync::{PoisonError, RwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccountType {
    Assets,
    Liabilities,
    Equity,
    Income,
    Expenses,
}

impl AccountType {
    const ALL: [AccountType; 5] = [
        AccountType::Assets,
        AccountType::Liabilities,
        AccountType::Equity,
        AccountType::Income,
        AccountType::Expenses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Assets => "Assets",
            AccountType::Liabilities => "Liabilities",
            AccountType::Equity => "Equity",
            AccountType::Income => "Income",
            AccountType::Expenses => "Expenses",
        }
    }

    /// Assets and liabilities, the accounts whose holdings get revalued.
    pub fn is_balance_sheet(&self) -> bool {
        matches!(self, AccountType::Assets | AccountType::Liabilities)
    }

    /// Income and expenses.
    pub fn is_income_statement(&self) -> bool {
        matches!(self, AccountType::Income | AccountType::Expenses)
    }

    fn of(name: &str) -> Option<AccountType> {
        let (prefix, rest) = name.split_once(':')?;
        if rest.is_empty() || rest.split(':').any(str::is_empty) {
            return None;
        }
        Self::ALL.into_iter().find(|t| t.as_str() == prefix)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle of an interned account. Carries its type so that booking and
/// valuation never need to look at the name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Account {
    kind: AccountType,
    id: usize,
}

impl Account {
    pub fn kind(&self) -> AccountType {
        self.kind
    }
}

/// Handle of an interned commodity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Commodity(usize);

/// Intern table for account and commodity names.
///
/// Written to while journals are parsed, read-only afterwards. Handles
/// stay valid for the lifetime of the registry, names are never removed.
#[derive(Debug, Default)]
pub struct Registry {
    accounts: RwLock<IndexSet<String>>,
    commodities: RwLock<IndexSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Interns `name`, e.g. `Assets:Bank:Jawir`, and returns its handle.
    pub fn account(&self, name: &str) -> Result<Account> {
        let kind = AccountType::of(name).ok_or_else(|| Error::InvalidAccount(name.to_string()))?;
        if let Some(account) = self.lookup_account(name) {
            return Ok(account);
        }
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        let (id, _) = accounts.insert_full(name.to_string());
        Ok(Account { kind, id })
    }

    pub fn lookup_account(&self, name: &str) -> Option<Account> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        let id = accounts.get_index_of(name)?;
        let kind = AccountType::of(name)?;
        Some(Account { kind, id })
    }

    /// Interns a commodity name.
    pub fn commodity(&self, name: &str) -> Commodity {
        if let Some(commodity) = self.lookup_commodity(name) {
            return commodity;
        }
        let mut commodities = self
            .commodities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let (id, _) = commodities.insert_full(name.to_string());
        Commodity(id)
    }

    pub fn lookup_commodity(&self, name: &str) -> Option<Commodity> {
        let commodities = self
            .commodities
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        commodities.get_index_of(name).map(Commodity)
    }

    pub fn account_name(&self, account: Account) -> String {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        accounts
            .get_index(account.id)
            .cloned()
            .unwrap_or_else(|| format!("{}:#{}", account.kind, account.id))
    }

    pub fn commodity_name(&self, commodity: Commodity) -> String {
        let commodities = self
            .commodities
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        commodities
            .get_index(commodity.0)
            .cloned()
            .unwrap_or_else(|| format!("#{}", commodity.0))
    }

    /// All accounts, in the order they were first seen.
    pub fn accounts(&self) -> Vec<Account> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        accounts
            .iter()
            .enumerate()
            .filter_map(|(id, name)| AccountType::of(name).map(|kind| Account { kind, id }))
            .collect()
    }

    /// All commodities, in the order they were first seen.
    pub fn commodities(&self) -> Vec<Commodity> {
        let commodities = self
            .commodities
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        (0..commodities.len()).map(Commodity).collect()
    }
}
