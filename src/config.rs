use crate::date::Interval;
use crate::error::{Error, Result};
use crate::flow::DEFAULT_CAPACITY;

use chrono::NaiveDate;
use regex::Regex;

pub const DEFAULT_VALUATION_ACCOUNT: &str = "Equity:Valuation";

/// Parameters of one processing run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Commodity every balance is converted into. No valuation when unset.
    pub valuation: Option<String>,
    /// First day reported, defaults to the first day of the journal.
    pub from: Option<NaiveDate>,
    /// First day no longer reported, defaults to the day after the last day
    /// of the journal.
    pub to: Option<NaiveDate>,
    pub interval: Interval,
    /// Keep only the last N periods, 0 keeps all of them.
    pub last: usize,
    /// Report the change over each period instead of the balance at its end.
    pub diff: bool,
    pub accounts: Option<Regex>,
    pub commodities: Option<Regex>,
    /// Expand accrual addons.
    pub expand: bool,
    /// Counter account of synthesized valuation adjustments.
    pub valuation_account: String,
    /// Capacity of every channel between two pipeline stages.
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            valuation: None,
            from: None,
            to: None,
            interval: Interval::Once,
            last: 0,
            diff: false,
            accounts: None,
            commodities: None,
            expand: true,
            valuation_account: DEFAULT_VALUATION_ACCOUNT.to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_valuation(mut self, commodity: impl Into<String>) -> Self {
        self.valuation = Some(commodity.into());
        self
    }

    pub fn with_from(mut self, from: NaiveDate) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_to(mut self, to: NaiveDate) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_last(mut self, last: usize) -> Self {
        self.last = last;
        self
    }

    pub fn with_diff(mut self, diff: bool) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_accounts(mut self, pattern: &str) -> Result<Self> {
        self.accounts = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_commodities(mut self, pattern: &str) -> Result<Self> {
        self.commodities = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn with_expand(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    pub fn with_valuation_account(mut self, account: impl Into<String>) -> Self {
        self.valuation_account = account.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("channel capacity must be positive".into()));
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if to < from {
                return Err(Error::Config(format!("`to' ({}) is before `from' ({})", to, from)));
            }
        }
        if matches!(&self.valuation, Some(v) if v.trim().is_empty()) {
            return Err(Error::Config("valuation commodity is empty".into()));
        }
        Ok(())
    }

    /// Applies a journal `option` line. Returns `false` for keys that do not
    /// name a setting.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "valuation" => self.valuation = Some(value.to_string()),
            "from" => self.from = Some(parse_date(key, value)?),
            "to" => self.to = Some(parse_date(key, value)?),
            "interval" => self.interval = value.parse()?,
            "last" => self.last = parse_number(key, value)?,
            "diff" => self.diff = parse_bool(key, value)?,
            "accounts" => self.accounts = Some(compile(value)?),
            "commodities" => self.commodities = Some(compile(value)?),
            "expand" => self.expand = parse_bool(key, value)?,
            "valuation_account" => self.valuation_account = value.to_string(),
            "capacity" => self.capacity = parse_number(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("invalid pattern `{}': {}", pattern, e)))
}

fn parse_date(key: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::Config(format!("{}: invalid date `{}': {}", key, value, e)))
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{}: invalid number `{}': {}", key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "yes" | "on" => Ok(true),
        "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{}: invalid flag `{}'", key, value))),
    }
}
