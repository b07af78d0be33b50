//! Errors raised while parsing and processing a journal.
//!
//! Parse errors carry the file and position they were found at, processing
//! errors carry the [`Origin`] of the directive that failed. Cancellation is
//! not an error and is reported through [`Cancelled`] instead.

use crate::directive::Origin;
use crate::registry::{Commodity, Registry};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use std::fmt;

/// A positioned syntax error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntaxError {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.file, self.line, self.column, self.message
        )
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Syntax(SyntaxError),

    #[error("{file}:{column}: include cycle: {}", chain.join(" -> "))]
    IncludeCycle {
        file: String,
        column: usize,
        chain: Vec<String>,
    },

    #[error("{origin}:{column}: unknown directive `{keyword}'")]
    UnknownDirective {
        origin: Origin,
        column: usize,
        keyword: String,
    },

    #[error("{origin}: unsupported addon `@{kind}'")]
    UnsupportedAddon { origin: Origin, kind: String },

    #[error("{origin}: {date}: account `{account}' {message}")]
    AccountState {
        origin: Origin,
        date: NaiveDate,
        account: String,
        message: String,
    },

    #[error("{origin}: {date}: balance of `{account}' in {commodity} is {actual}, expected {expected}")]
    Assertion {
        origin: Origin,
        date: NaiveDate,
        account: String,
        commodity: String,
        expected: Decimal,
        actual: Decimal,
    },

    #[error("{date}: no valuation path from {commodity} to {target}")]
    NoValuationPath {
        date: NaiveDate,
        commodity: String,
        target: String,
    },

    #[error("{date}: arithmetic overflow in {commodity}")]
    Overflow { date: NaiveDate, commodity: String },

    #[error("stage `{stage}' aborted")]
    Aborted { stage: String },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("input `{0}' is not a valid account name")]
    InvalidAccount(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn syntax(file: &str, (line, column): (usize, usize), message: impl Into<String>) -> Self {
        Error::Syntax(SyntaxError {
            file: file.to_string(),
            line,
            column,
            message: message.into(),
        })
    }

    pub fn overflow(registry: &Registry, date: NaiveDate, commodity: Commodity) -> Self {
        Error::Overflow {
            date,
            commodity: registry.commodity_name(commodity),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Marker returned by blocking operations once the shared cancellation
/// token fired or the other end of a channel went away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Why a pipeline run did not produce its result.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("{} error(s):\n{}", .0.len(), join_errors(.0))]
    Failed(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
