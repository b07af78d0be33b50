//! The stages a journal goes through, in order:
//!
//! entries -> [`AstBuilder`] -> [`AstExpander`] -> [`DaySplitter`] ->
//! [`Balancer`] -> [`PriceUpdater`] -> [`Valuator`] -> [`PeriodFilter`] ->
//! [`Differ`] -> snapshots
//!
//! Each stage is a [`Processor`](crate::flow::Processor), so the same code
//! runs in batch through [`run_batch`](crate::flow::run_batch) and streaming
//! through [`connect`](crate::flow::connect).

mod balancer;
mod builder;
mod period;
mod valuator;

pub use balancer::Balancer;
pub use builder::{AstBuilder, AstExpander, DaySplitter};
pub use period::{Differ, PeriodFilter, Snapshot};
pub use valuator::{PriceUpdater, Valuator};
