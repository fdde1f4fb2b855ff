//! Core types and trait definitions for Tally.
//!
//! Tally keeps a durable history of GitHub traffic counters and of
//! search-derived feature adoption, outliving the short window GitHub itself
//! retains. This crate holds the reconciliation engine and lifecycle
//! classifier; it is free of HTTP and database dependencies. Fetchers and
//! stores plug in through the [`fetch::Fetcher`] and [`store::HistoryStore`]
//! traits.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod analytics;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod reconcile;
pub mod run;
pub mod snapshot;
pub mod store;
pub mod traffic;
pub mod usage;

pub use error::{Error, Result};

#[cfg(test)]
mod testing;
