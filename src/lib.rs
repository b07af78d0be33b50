//! Roastery - A plain text double-entry journal processing engine
//! ---
//!
//! Roastery reads a journal of dated directives (openings, closings, prices,
//! transactions, balance assertions and valuations), books them day by day
//! against running balances, converts the balances into a valuation commodity
//! through a graph of exchange rates, and cuts the result into periods for
//! reporting.
//!
//! Journals are processed either in batch, through [`Journal`], or as a
//! cancellable stream of stages connected by bounded channels, through
//! [`Pipeline`].
//!

extern crate pest;
#[macro_use]
extern crate pest_derive;

/// Balances keyed by account and commodity.
pub mod amounts;

/// Days, the AST, and posting filters.
pub mod ast;

/// Accrual expansion of transactions into periodic entries.
pub mod accrual;

/// Run configuration.
pub mod config;

/// Intervals, periods and partitions.
pub mod date;

/// The directive model.
pub mod directive;

pub mod error;

/// Bounded, cancellable channel plumbing shared by the processing stages.
pub mod flow;

/// Batch and streaming entrypoints.
pub mod journal;

/// Our main parser entrypoints.
pub mod parser;

/// Exchange rate graph and valuation.
pub mod prices;

/// Renders directives back into journal syntax.
pub mod printer;

/// Processing stages: booking, valuation, partitioning, diffing.
pub mod process;

/// Interning of accounts and commodities.
///
/// The main structure is [`Registry`][registry::Registry], which hands out
/// small `Copy` handles for every account and commodity name it has seen.
pub mod registry;

pub use config::Config;
pub use error::{Cancelled, Error, Result, RunError};
pub use flow::Outcome;
pub use journal::{Journal, Pipeline};
pub use parser::parse;
pub use process::Snapshot;
pub use registry::Registry;
